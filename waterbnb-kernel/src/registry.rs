/**
 * REGISTRE D'OCCUPATION - Dernier état connu de chaque piscine
 *
 * RÔLE : Map pool_id -> PoolState alimentée uniquement par l'ingestion MQTT.
 * Vide au démarrage, jamais purgée (une piscine muette garde son dernier état).
 *
 * CONCURRENCE : un écrivain (tâche MQTT) et N lecteurs (requêtes HTTP).
 * Le verrou n'est tenu que le temps de l'opération sur la map ;
 * les lecteurs reçoivent toujours une copie.
 */

use crate::models::{PoolState, PoolsMap};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};

#[derive(Clone)]
pub struct OccupancyRegistry {
    pools: Arc<Mutex<PoolsMap>>,
}

/// Vue d'une piscine pour l'API, avec indicateur de fraîcheur
#[derive(Debug, Serialize, Clone)]
pub struct PoolView {
    pub occuped: bool,
    pub last_update: String,
    pub stale: bool,
    pub stale_for_seconds: i64,
}

impl OccupancyRegistry {
    pub fn new() -> Self {
        Self { pools: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Upsert du statut ; le dernier message arrivé gagne.
    /// Retourne false (no-op) si l'identifiant est vide.
    pub fn update(&self, pool_id: &str, occuped: bool) -> bool {
        if pool_id.is_empty() {
            tracing::warn!("registry update ignored: empty pool id");
            return false;
        }
        let st = PoolState {
            pool_id: pool_id.to_string(),
            occuped,
            last_update: OffsetDateTime::now_utc(),
        };
        self.pools.lock().insert(st.pool_id.clone(), st);
        true
    }

    pub fn get(&self, pool_id: &str) -> Option<PoolState> {
        if pool_id.is_empty() {
            tracing::debug!("registry lookup with empty pool id");
            return None;
        }
        self.pools.lock().get(pool_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<PoolState> {
        self.pools.lock().values().cloned().collect()
    }

    pub fn pool_ids(&self) -> Vec<String> {
        self.pools.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pools.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.lock().is_empty()
    }
}

impl Default for OccupancyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn to_view(p: &PoolState, stale_after: Duration, now: OffsetDateTime) -> PoolView {
    let age = now - p.last_update;
    PoolView {
        occuped: p.occuped,
        last_update: p.last_update.format(&Rfc3339).unwrap_or_default(),
        stale: age > stale_after,
        stale_for_seconds: age.whole_seconds().max(0),
    }
}
