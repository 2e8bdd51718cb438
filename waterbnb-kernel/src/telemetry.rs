/**
 * INGESTION TÉLÉMÉTRIE - Statuts publiés par les ESP32 des piscines
 *
 * Décodage : JSON avec `info.ident` (non vide) et `piscine.occuped` (booléen).
 * Tout message invalide est rejeté avec une erreur typée ; l'appelant journalise
 * et continue, l'abonnement n'est jamais interrompu.
 *
 * Un message valide met d'abord à jour le registre (source de vérité) de façon
 * synchrone ; l'historique est écrit ensuite, hors de la boucle MQTT, au mieux.
 * Un échec d'historique ne défait rien.
 */

use crate::models::{PoolStatusRecord, StatusIn};
use crate::registry::OccupancyRegistry;
use crate::store::AuditSink;
use serde_json::Value;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message without pool identifier")]
    MissingIdent,
    #[error("message without 'occuped' state for pool {0}")]
    MissingOccuped(String),
    #[error("color command seen on the status topic")]
    EchoedCommand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReading {
    pub pool_id: String,
    pub occuped: bool,
    pub raw: Value,
}

pub fn decode_status(payload: &[u8]) -> Result<StatusReading, TelemetryError> {
    let raw: Value = serde_json::from_slice(payload)?;
    // les commandes couleur partagent le topic par défaut
    if raw.get("cmd").is_some() && raw.get("info").is_none() {
        return Err(TelemetryError::EchoedCommand);
    }

    let parsed: StatusIn = serde_json::from_value(raw.clone())?;
    let pool_id = parsed
        .info
        .and_then(|i| i.ident)
        .filter(|id| !id.is_empty())
        .ok_or(TelemetryError::MissingIdent)?;
    let occuped = parsed
        .piscine
        .and_then(|p| p.occuped)
        .ok_or_else(|| TelemetryError::MissingOccuped(pool_id.clone()))?;

    Ok(StatusReading { pool_id, occuped, raw })
}

#[derive(Clone)]
pub struct TelemetryIngest {
    registry: OccupancyRegistry,
    history: Arc<dyn AuditSink>,
}

impl TelemetryIngest {
    pub fn new(registry: OccupancyRegistry, history: Arc<dyn AuditSink>) -> Self {
        Self { registry, history }
    }

    /// Décode et applique au registre ; renvoie l'enregistrement d'historique à écrire.
    pub fn apply(&self, payload: &[u8]) -> Result<PoolStatusRecord, TelemetryError> {
        let reading = decode_status(payload)?;

        self.registry.update(&reading.pool_id, reading.occuped);
        tracing::info!(pool_id = %reading.pool_id, occuped = reading.occuped, "pool status updated");

        Ok(PoolStatusRecord {
            pool_id: reading.pool_id,
            occuped: reading.occuped,
            timestamp: OffsetDateTime::now_utc(),
            raw_data: reading.raw,
        })
    }

    pub async fn record_history(&self, record: PoolStatusRecord) {
        if let Err(e) = self.history.record_pool_status(&record).await {
            tracing::warn!(pool_id = %record.pool_id, error = %e, "failed to persist pool status history");
        }
    }

    pub fn spawn_history(&self, record: PoolStatusRecord) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.record_history(record).await })
    }
}
