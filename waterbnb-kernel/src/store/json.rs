/**
 * STORE FICHIERS JSON
 *
 * - users.json : tableau de UserRecord, relu à chaque lookup pour que les
 *   inscriptions soient visibles sans redémarrer le kernel
 * - pool_status.jsonl / access_logs.jsonl : une ligne JSON par enregistrement
 */

use super::{AuditSink, StoreError, UserDirectory};
use crate::models::{AccessDecision, PoolStatusRecord, UserRecord};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const POOL_STATUS_FILE: &str = "pool_status.jsonl";
pub const ACCESS_LOG_FILE: &str = "access_logs.jsonl";

pub struct JsonFileStore {
    users_path: PathBuf,
    data_dir: PathBuf,
    // sérialise les appends entre tâches concurrentes
    append_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Ouvre le store ; crée le répertoire de données et un annuaire vide si absents
    pub fn open<P: Into<PathBuf>, Q: Into<PathBuf>>(data_dir: P, users_path: Q) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        let users_path = users_path.into();

        std::fs::create_dir_all(&data_dir)?;
        if !users_path.exists() {
            if let Some(parent) = users_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&users_path, "[]")?;
            tracing::info!(path = ?users_path, "created empty user directory");
        }

        tracing::info!(data_dir = ?data_dir, users = ?users_path, "json store initialized");
        Ok(Self { users_path, data_dir, append_lock: Mutex::new(()) })
    }

    async fn load_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let content = tokio::fs::read_to_string(&self.users_path).await?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    async fn append<T: Serialize>(&self, file: &str, record: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.append_lock.lock().await;
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.data_dir.join(file))
            .await?;
        f.write_all(&line).await?;
        f.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for JsonFileStore {
    async fn contains(&self, user_id: &str) -> Result<bool, StoreError> {
        let users = self.load_users().await?;
        Ok(users.iter().any(|u| u.num == user_id))
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        self.load_users().await
    }
}

#[async_trait]
impl AuditSink for JsonFileStore {
    async fn record_pool_status(&self, record: &PoolStatusRecord) -> Result<(), StoreError> {
        self.append(POOL_STATUS_FILE, record).await
    }

    async fn record_access(&self, decision: &AccessDecision) -> Result<(), StoreError> {
        self.append(ACCESS_LOG_FILE, decision).await
    }
}
