use super::{AuditSink, StoreError, UserDirectory};
use crate::models::{AccessDecision, PoolStatusRecord, UserRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Store en mémoire : annuaire + journaux, avec pannes simulables.
#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<Vec<UserRecord>>,
    history: Mutex<Vec<PoolStatusRecord>>,
    access_log: Mutex<Vec<AccessDecision>>,
    user_lookups: AtomicUsize,
    fail_audit: AtomicBool,
    fail_users: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        for num in users {
            store.add_user(num.into(), None);
        }
        store
    }

    pub fn add_user(&self, num: String, login: Option<String>) {
        self.users.lock().push(UserRecord { num, login });
    }

    pub fn fail_audit(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    pub fn fail_users(&self, fail: bool) {
        self.fail_users.store(fail, Ordering::SeqCst);
    }

    pub fn history(&self) -> Vec<PoolStatusRecord> {
        self.history.lock().clone()
    }

    pub fn access_log(&self) -> Vec<AccessDecision> {
        self.access_log.lock().clone()
    }

    pub fn user_lookups(&self) -> usize {
        self.user_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn contains(&self, user_id: &str) -> Result<bool, StoreError> {
        self.user_lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_users.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("user directory offline".into()));
        }
        Ok(self.users.lock().iter().any(|u| u.num == user_id))
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        if self.fail_users.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("user directory offline".into()));
        }
        Ok(self.users.lock().clone())
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn record_pool_status(&self, record: &PoolStatusRecord) -> Result<(), StoreError> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("audit sink offline".into()));
        }
        self.history.lock().push(record.clone());
        Ok(())
    }

    async fn record_access(&self, decision: &AccessDecision) -> Result<(), StoreError> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("audit sink offline".into()));
        }
        self.access_log.lock().push(decision.clone());
        Ok(())
    }
}
