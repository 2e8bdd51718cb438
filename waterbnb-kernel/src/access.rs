/**
 * MOTEUR D'AUTORISATION - Décision d'accès à une piscine
 *
 * Étapes, chacune terminale :
 * 1. paramètres idu/idswp absents ou vides -> requête invalide, aucun effet
 * 2. usager inconnu                         -> refus, LED rouge, audit
 * 3. piscine absente du registre            -> refus, LED rouge, audit
 * 4. piscine occupée                        -> refus, LED rouge + retour vert différé, audit
 * 5. sinon                                  -> accepté, LED jaune, audit
 *
 * La commande part avant l'écriture d'audit ; l'échec d'audit est journalisé
 * et ne change pas la décision. Le moteur lit le registre sans jamais le modifier.
 */

use crate::dispatch::CommandDispatcher;
use crate::models::{AccessDecision, AccessStatus, Color};
use crate::registry::OccupancyRegistry;
use crate::store::{AuditSink, StoreError, UserDirectory};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    UnknownUser,
    UnknownPool,
    PoolOccupied,
}

impl Denial {
    pub fn reason(&self) -> &'static str {
        match self {
            Denial::UnknownUser => "unknown user",
            Denial::UnknownPool => "unknown pool",
            Denial::PoolOccupied => "pool occupied",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    Malformed,
    Denied(Denial),
    Accepted,
}

pub const ACCEPTED_REASON: &str = "access granted";

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("user directory unavailable: {0}")]
    UserDirectory(#[from] StoreError),
}

pub struct AccessController {
    registry: OccupancyRegistry,
    users: Arc<dyn UserDirectory>,
    audit: Arc<dyn AuditSink>,
    dispatcher: CommandDispatcher,
    revert_delay: Duration,
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.filter(|s| !s.is_empty())
}

impl AccessController {
    pub fn new(
        registry: OccupancyRegistry,
        users: Arc<dyn UserDirectory>,
        audit: Arc<dyn AuditSink>,
        dispatcher: CommandDispatcher,
    ) -> Self {
        Self { registry, users, audit, dispatcher, revert_delay: Duration::from_secs(30) }
    }

    pub fn with_revert_delay(mut self, delay: Duration) -> Self {
        self.revert_delay = delay;
        self
    }

    pub async fn authorize(&self, idu: Option<&str>, idswp: Option<&str>) -> Result<AccessOutcome, AccessError> {
        let (Some(user), Some(pool)) = (non_empty(idu), non_empty(idswp)) else {
            tracing::warn!(?idu, ?idswp, "access request with missing parameters");
            return Ok(AccessOutcome::Malformed);
        };
        tracing::info!(user, pool, "access request");

        if !self.users.contains(user).await? {
            return Ok(self.deny(user, pool, Denial::UnknownUser).await);
        }

        let Some(state) = self.registry.get(pool) else {
            return Ok(self.deny(user, pool, Denial::UnknownPool).await);
        };

        if state.occuped {
            return Ok(self.deny(user, pool, Denial::PoolOccupied).await);
        }

        tracing::info!(user, pool, "access granted");
        self.dispatcher.send_command(pool, Color::Yellow).await;
        self.log_access(user, pool, AccessStatus::Accepted, ACCEPTED_REASON).await;
        Ok(AccessOutcome::Accepted)
    }

    async fn deny(&self, user: &str, pool: &str, denial: Denial) -> AccessOutcome {
        tracing::info!(user, pool, reason = denial.reason(), "access denied");
        self.dispatcher.send_command(pool, Color::Red).await;
        if denial == Denial::PoolOccupied {
            // détaché : le handle n'est pas conservé
            let _ = self.dispatcher.schedule_revert(pool, Color::Green, self.revert_delay);
        }
        self.log_access(user, pool, AccessStatus::Denied, denial.reason()).await;
        AccessOutcome::Denied(denial)
    }

    async fn log_access(&self, user: &str, pool: &str, status: AccessStatus, reason: &str) {
        let decision = AccessDecision {
            user: user.to_string(),
            pool: pool.to_string(),
            status,
            reason: reason.to_string(),
            timestamp: OffsetDateTime::now_utc(),
        };
        if let Err(e) = self.audit.record_access(&decision).await {
            tracing::warn!(user, pool, error = %e, "failed to persist access log");
        }
    }
}
