/**
 * DISPATCHER DE COMMANDES - Couleur LED des piscines
 *
 * Toutes les commandes partent sur le topic de contrôle partagé par la flotte ;
 * chaque ESP32 filtre lui-même. Un échec de publication est journalisé et
 * avalé : le retour visuel ne doit jamais faire échouer une décision d'accès.
 *
 * Retour différé (revert) : tâche tokio one-shot. En mode `supersede`, seules
 * les piscines ayant un revert en attente sont suivies : chaque commande leur
 * incrémente une génération, et un revert dont la génération capturée est
 * dépassée n'est pas envoyé. L'entrée disparaît avec le dernier revert en attente.
 */

use crate::models::{Color, CommandOut};
use crate::mqtt::CommandPublisher;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct PoolGeneration {
    generation: u64,
    pending: u32,
}

type Generations = Arc<Mutex<HashMap<String, PoolGeneration>>>;

#[derive(Clone)]
pub struct CommandDispatcher {
    publisher: Arc<dyn CommandPublisher>,
    topic: String,
    generations: Generations,
    supersede_reverts: bool,
}

// Décrémente le compteur de reverts en attente, y compris sur abort.
struct PendingRevert {
    generations: Generations,
    pool_id: String,
}

impl Drop for PendingRevert {
    fn drop(&mut self) {
        let mut map = self.generations.lock();
        let done = match map.get_mut(&self.pool_id) {
            Some(g) => {
                g.pending = g.pending.saturating_sub(1);
                g.pending == 0
            }
            None => false,
        };
        if done {
            map.remove(&self.pool_id);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertOutcome {
    Sent,
    Superseded,
}

/// Handle d'un retour différé planifié
#[derive(Debug)]
pub struct RevertHandle {
    pub pool_id: String,
    pub color: Color,
    task: JoinHandle<RevertOutcome>,
}

impl RevertHandle {
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// None si la tâche a été annulée
    pub async fn join(self) -> Option<RevertOutcome> {
        self.task.await.ok()
    }
}

pub fn build_command(color: Color) -> CommandOut {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    CommandOut { cmd: "color".to_string(), value: color, timestamp }
}

impl CommandDispatcher {
    pub fn new(publisher: Arc<dyn CommandPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            generations: Arc::new(Mutex::new(HashMap::new())),
            supersede_reverts: false,
        }
    }

    pub fn with_supersede_reverts(mut self, enabled: bool) -> Self {
        self.supersede_reverts = enabled;
        self
    }

    pub fn generation(&self, pool_id: &str) -> u64 {
        self.generations.lock().get(pool_id).map_or(0, |g| g.generation)
    }

    /// Nombre de piscines suivies pour la supersession (reverts en attente)
    pub fn tracked_pools(&self) -> usize {
        self.generations.lock().len()
    }

    pub async fn send_command(&self, pool_id: &str, color: Color) {
        if self.supersede_reverts {
            if let Some(g) = self.generations.lock().get_mut(pool_id) {
                g.generation += 1;
            }
        }

        let command = build_command(color);
        let payload = match serde_json::to_vec(&command) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(pool_id, %color, error = %e, "failed to encode command");
                return;
            }
        };

        match self.publisher.publish(&self.topic, payload).await {
            Ok(()) => tracing::info!(pool_id, %color, topic = %self.topic, "command sent"),
            Err(e) => tracing::warn!(pool_id, %color, topic = %self.topic, error = %e, "command publish failed"),
        }
    }

    /// Planifie l'envoi de `color` après `delay`, sans bloquer l'appelant.
    pub fn schedule_revert(&self, pool_id: &str, color: Color, delay: Duration) -> RevertHandle {
        // le guard est capturé avant le spawn : un abort avant le premier poll le libère aussi
        let tracking = self.supersede_reverts.then(|| {
            let mut map = self.generations.lock();
            let entry = map.entry(pool_id.to_string()).or_default();
            entry.pending += 1;
            let scheduled_at = entry.generation;
            drop(map);
            let guard = PendingRevert { generations: self.generations.clone(), pool_id: pool_id.to_string() };
            (scheduled_at, guard)
        });
        let this = self.clone();
        let pool = pool_id.to_string();

        tracing::debug!(pool_id, %color, delay_secs = delay.as_secs(), "revert scheduled");
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some((scheduled_at, guard)) = tracking {
                let current = this.generation(&pool);
                drop(guard);
                if current != scheduled_at {
                    tracing::info!(pool_id = %pool, %color, "revert skipped, newer command already sent");
                    return RevertOutcome::Superseded;
                }
            }
            this.send_command(&pool, color).await;
            RevertOutcome::Sent
        });

        RevertHandle { pool_id: pool_id.to_string(), color, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waterbnb_devkit::MockMqttClient;

    fn dispatcher(mock: &MockMqttClient) -> CommandDispatcher {
        CommandDispatcher::new(Arc::new(mock.clone()), "uca/iot/master")
    }

    #[tokio::test]
    async fn command_payload_matches_device_format() {
        let mock = MockMqttClient::new();
        dispatcher(&mock).send_command("P_1", Color::Yellow).await;

        let msgs = mock.find_messages_by_topic("uca/iot/master");
        assert_eq!(msgs.len(), 1);
        let v = msgs[0].json().unwrap();
        assert_eq!(v["cmd"], "color");
        assert_eq!(v["value"], "YELLOW");
        assert!(OffsetDateTime::parse(v["timestamp"].as_str().unwrap(), &Rfc3339).is_ok());
    }

    #[tokio::test]
    async fn publish_failure_is_swallowed() {
        let mock = MockMqttClient::new();
        mock.fail_publishes(true);
        let d = dispatcher(&mock);
        d.send_command("P_1", Color::Red).await;
        assert!(mock.get_published_messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn revert_fires_after_delay() {
        let mock = MockMqttClient::new();
        let d = dispatcher(&mock);
        let handle = d.schedule_revert("P_1", Color::Green, Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(mock.color_commands().is_empty());
        assert!(!handle.is_finished());

        assert_eq!(handle.join().await, Some(RevertOutcome::Sent));
        assert_eq!(mock.color_commands(), vec!["GREEN"]);
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_revert_sends_nothing() {
        let mock = MockMqttClient::new();
        let handle = dispatcher(&mock).schedule_revert("P_1", Color::Green, Duration::from_secs(30));
        handle.abort();
        assert_eq!(handle.join().await, None);
        assert!(mock.color_commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_revert_is_skipped() {
        let mock = MockMqttClient::new();
        let d = dispatcher(&mock).with_supersede_reverts(true);
        d.send_command("P_1", Color::Red).await;
        let handle = d.schedule_revert("P_1", Color::Green, Duration::from_secs(30));
        d.send_command("P_1", Color::Yellow).await;

        assert_eq!(d.generation("P_1"), 1);

        assert_eq!(handle.join().await, Some(RevertOutcome::Superseded));
        assert_eq!(mock.color_commands(), vec!["RED", "YELLOW"]);
        assert_eq!(d.tracked_pools(), 0);
    }

    #[tokio::test]
    async fn commands_without_pending_revert_are_not_tracked() {
        for supersede in [false, true] {
            let mock = MockMqttClient::new();
            let d = dispatcher(&mock).with_supersede_reverts(supersede);
            for i in 0..1_000 {
                d.send_command(&format!("junk_{i}"), Color::Red).await;
            }
            assert_eq!(d.tracked_pools(), 0);
            assert_eq!(mock.color_commands().len(), 1_000);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn default_mode_never_tracks_reverts() {
        let mock = MockMqttClient::new();
        let d = dispatcher(&mock);
        let handle = d.schedule_revert("P_1", Color::Green, Duration::from_secs(30));
        assert_eq!(d.tracked_pools(), 0);
        assert_eq!(handle.join().await, Some(RevertOutcome::Sent));
        assert_eq!(d.tracked_pools(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_revert_releases_its_pool_entry() {
        let mock = MockMqttClient::new();
        let d = dispatcher(&mock).with_supersede_reverts(true);
        let first = d.schedule_revert("P_1", Color::Green, Duration::from_secs(30));
        let second = d.schedule_revert("P_1", Color::Green, Duration::from_secs(60));
        assert_eq!(d.tracked_pools(), 1);

        first.abort();
        assert_eq!(first.join().await, None);
        assert_eq!(d.tracked_pools(), 1);

        assert_eq!(second.join().await, Some(RevertOutcome::Sent));
        assert_eq!(d.tracked_pools(), 0);
        assert_eq!(mock.color_commands(), vec!["GREEN"]);
    }

    #[tokio::test(start_paused = true)]
    async fn other_pools_do_not_supersede() {
        let mock = MockMqttClient::new();
        let d = dispatcher(&mock).with_supersede_reverts(true);
        let handle = d.schedule_revert("P_1", Color::Green, Duration::from_secs(30));
        d.send_command("P_2", Color::Yellow).await;

        assert_eq!(handle.join().await, Some(RevertOutcome::Sent));
        assert_eq!(mock.color_commands(), vec!["YELLOW", "GREEN"]);
        assert_eq!(d.tracked_pools(), 0);
    }
}
