/**
 * STORES - Annuaire des usagers et journaux d'audit
 *
 * RÔLE :
 * Interfaces entre le coeur d'autorisation et la persistance.
 * - UserDirectory = lookup exact par identifiant usager (`idu`)
 * - AuditSink = deux flux append-only : historique des statuts piscine
 *   et journal des demandes d'accès
 *
 * Deux implémentations : fichiers JSON (production) et mémoire (tests).
 * Les erreurs d'écriture d'audit sont journalisées par l'appelant, jamais propagées
 * jusqu'au client HTTP.
 */

pub mod json;
pub mod memory;

use crate::models::{AccessDecision, PoolStatusRecord, UserRecord};
use async_trait::async_trait;

pub use json::JsonFileStore;
pub use memory::MemoryStore;

/// Erreurs possibles lors des opérations sur les stores
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Vrai si l'usager est inscrit (correspondance exacte sur `num`)
    async fn contains(&self, user_id: &str) -> Result<bool, StoreError>;

    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record_pool_status(&self, record: &PoolStatusRecord) -> Result<(), StoreError>;

    async fn record_access(&self, decision: &AccessDecision) -> Result<(), StoreError>;
}
