/**
 * TRANSPORT MQTT - Connexion broker, boucle d'événements, publication
 *
 * Une seule connexion broker : la boucle `spawn_mqtt_listener` pilote l'EventLoop
 * rumqttc, qui reçoit la télémétrie ET vide la file des commandes publiées
 * par le CommandDispatcher via le même AsyncClient.
 *
 * Reconnexion : toute erreur de poll entraîne une pause fixe (5s par défaut)
 * puis un nouveau poll, qui relance la connexion. L'abonnement est refait
 * après chaque ConnAck, et retenté à chaque itération tant que la file de
 * requêtes est pleine. La boucle s'arrête sur le token d'arrêt.
 *
 * Le topic de statut peut être un filtre (`+`, `#`). L'historique est écrit
 * dans une tâche séparée pour ne jamais ralentir le poll.
 */

use crate::config::MqttConf;
use crate::health::HealthTracker;
use crate::telemetry::{TelemetryError, TelemetryIngest};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Publish, QoS};
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("publish failed: {0}")]
    Other(String),
}

/// Seam de publication utilisé par le dispatcher de commandes
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

#[async_trait]
impl CommandPublisher for AsyncClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        // try_publish : ne bloque jamais une requête HTTP si la file est pleine
        // pendant une coupure broker
        self.try_publish(topic, QoS::AtLeastOnce, false, payload)?;
        Ok(())
    }
}

pub fn create_mqtt_client(cfg: &MqttConf) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
    opts.set_keep_alive(cfg.keep_alive());
    opts.set_clean_session(true);
    AsyncClient::new(opts, 64)
}

pub struct ListenerParams {
    pub client: AsyncClient,
    pub eventloop: EventLoop,
    pub status_topic: String,
    pub backoff: Duration,
    pub health: HealthTracker,
    pub shutdown: CancellationToken,
}

/// État d'abonnement au topic de statut pour la connexion courante
struct Subscription {
    topic: String,
    connected: bool,
    active: bool,
    failures: u32,
}

impl Subscription {
    fn new(topic: String) -> Self {
        Self { topic, connected: false, active: false, failures: 0 }
    }

    fn on_connack(&mut self) {
        self.connected = true;
        self.active = false;
        self.failures = 0;
    }

    fn on_disconnect(&mut self) {
        self.connected = false;
        self.active = false;
    }

    /// Demande l'abonnement si connecté et pas encore accepté par la file.
    fn ensure(&mut self, client: &AsyncClient) -> bool {
        if !self.connected || self.active {
            return self.active;
        }
        match client.try_subscribe(self.topic.as_str(), QoS::AtLeastOnce) {
            Ok(()) => {
                self.active = true;
                tracing::info!(topic = %self.topic, retries = self.failures, "mqtt connected, subscribed");
            }
            Err(e) => {
                self.failures += 1;
                if self.failures == 1 {
                    tracing::warn!(topic = %self.topic, error = %e, "mqtt subscribe not queued, will retry");
                } else {
                    tracing::debug!(topic = %self.topic, attempt = self.failures, "mqtt subscribe still pending");
                }
            }
        }
        self.active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Ignored,
    Applied,
    Echo,
    Dropped,
}

/// Aiguille un message entrant vers l'ingestion si son topic correspond au filtre de statut.
pub fn route_publish(p: &Publish, status_topic: &str, ingest: &TelemetryIngest) -> Routed {
    if !rumqttc::matches(&p.topic, status_topic) {
        return Routed::Ignored;
    }
    match ingest.apply(&p.payload) {
        Ok(record) => {
            ingest.spawn_history(record);
            Routed::Applied
        }
        Err(TelemetryError::EchoedCommand) => {
            tracing::debug!(topic = %p.topic, "ignoring our own command echoed on the status topic");
            Routed::Echo
        }
        Err(e) => {
            tracing::warn!(topic = %p.topic, error = %e, "telemetry dropped");
            Routed::Dropped
        }
    }
}

pub fn spawn_mqtt_listener(params: ListenerParams, ingest: TelemetryIngest) -> JoinHandle<()> {
    let ListenerParams { client, mut eventloop, status_topic, backoff, health, shutdown } = params;

    task::spawn(async move {
        tracing::info!(topic = %status_topic, "mqtt listener starting");
        let mut subscription = Subscription::new(status_topic.clone());
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    subscription.on_connack();
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    route_publish(&p, &status_topic, &ingest);
                }
                Ok(_) => {}
                Err(e) => {
                    subscription.on_disconnect();
                    health.mark_mqtt_disconnected();
                    health.increment_reconnects();
                    tracing::warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "mqtt connection error, retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }

            subscription.ensure(&client);
        }

        if let Err(e) = client.try_disconnect() {
            tracing::debug!(error = %e, "mqtt disconnect request not queued");
        }
        health.mark_mqtt_disconnected();
        tracing::info!("mqtt listener stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::OccupancyRegistry;
    use crate::store::MemoryStore;
    use rumqttc::Request;
    use std::sync::Arc;
    use waterbnb_devkit::WaterbnbMessageBuilder;

    fn ingest() -> (OccupancyRegistry, Arc<MemoryStore>, TelemetryIngest) {
        let registry = OccupancyRegistry::new();
        let store = Arc::new(MemoryStore::new());
        let ingest = TelemetryIngest::new(registry.clone(), store.clone());
        (registry, store, ingest)
    }

    fn publish(topic: &str, payload: &serde_json::Value) -> Publish {
        Publish::new(topic, QoS::AtLeastOnce, WaterbnbMessageBuilder::to_bytes(payload))
    }

    #[tokio::test]
    async fn status_messages_are_routed_by_topic() {
        let (registry, _store, ingest) = ingest();
        let status = WaterbnbMessageBuilder::status("P_1", true);

        assert_eq!(route_publish(&publish("other/topic", &status), "uca/iot/master", &ingest), Routed::Ignored);
        assert!(registry.is_empty());

        assert_eq!(route_publish(&publish("uca/iot/master", &status), "uca/iot/master", &ingest), Routed::Applied);
        assert!(registry.get("P_1").unwrap().occuped);
    }

    #[tokio::test]
    async fn wildcard_status_filter_matches_device_topics() {
        let (registry, _store, ingest) = ingest();
        let status = WaterbnbMessageBuilder::status("P_7", false);

        assert_eq!(route_publish(&publish("uca/iot/P_7", &status), "uca/iot/+", &ingest), Routed::Applied);
        assert_eq!(route_publish(&publish("uca/iot/a/b", &status), "uca/iot/+", &ingest), Routed::Ignored);
        assert_eq!(route_publish(&publish("uca/iot/a/b", &status), "uca/#", &ingest), Routed::Applied);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn echoed_commands_and_garbage_are_not_ingested() {
        let (registry, store, ingest) = ingest();
        let cmd = serde_json::json!({"cmd": "color", "value": "RED", "timestamp": "2026-01-01T00:00:00Z"});
        assert_eq!(route_publish(&publish("uca/iot/master", &cmd), "uca/iot/master", &ingest), Routed::Echo);

        let garbage = Publish::new("uca/iot/master", QoS::AtLeastOnce, b"{nope".to_vec());
        assert_eq!(route_publish(&garbage, "uca/iot/master", &ingest), Routed::Dropped);

        assert!(registry.is_empty());
        assert!(store.history().is_empty());
    }

    #[test]
    fn subscribe_is_retried_until_the_request_queue_accepts_it() {
        let (tx, rx) = flume::bounded(1);
        let client = AsyncClient::from_senders(tx);
        let mut sub = Subscription::new("uca/iot/master".to_string());

        // pas connecté : rien n'est demandé
        assert!(!sub.ensure(&client));
        assert!(rx.is_empty());

        // file pleine au moment du ConnAck (commandes accumulées pendant la coupure)
        client.try_publish("uca/iot/master", QoS::AtLeastOnce, false, b"{}".to_vec()).unwrap();
        sub.on_connack();
        assert!(!sub.ensure(&client));
        assert!(!sub.ensure(&client));

        assert!(matches!(rx.try_recv(), Ok(Request::Publish(_))));
        assert!(sub.ensure(&client));
        match rx.try_recv() {
            Ok(Request::Subscribe(s)) => assert_eq!(s.filters[0].path, "uca/iot/master"),
            other => panic!("expected subscribe request, got {other:?}"),
        }

        // une fois abonné, pas de doublon
        assert!(sub.ensure(&client));
        assert!(rx.is_empty());

        sub.on_disconnect();
        sub.on_connack();
        assert!(sub.ensure(&client));
        assert!(matches!(rx.try_recv(), Ok(Request::Subscribe(_))));
    }

    #[tokio::test]
    async fn listener_backs_off_reports_health_and_stops_on_shutdown() {
        // port 1 : connexion refusée immédiatement
        let mut opts = MqttOptions::new("waterbnb-test", "127.0.0.1", 1);
        opts.set_keep_alive(Duration::from_secs(5));
        let (client, eventloop) = AsyncClient::new(opts, 8);
        let health = HealthTracker::new();
        let shutdown = CancellationToken::new();
        let (_registry, _store, ingest) = ingest();

        let handle = spawn_mqtt_listener(
            ListenerParams {
                client,
                eventloop,
                status_topic: "uca/iot/master".to_string(),
                backoff: Duration::from_millis(10),
                health: health.clone(),
                shutdown: shutdown.clone(),
            },
            ingest,
        );

        let reconnecting = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let h = health.get_health(&OccupancyRegistry::new());
                if h.mqtt_reconnects >= 2 && h.mqtt_status == "reconnecting" {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(reconnecting.is_ok());

        shutdown.cancel();
        let stopped = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(matches!(stopped, Ok(Ok(()))));
        assert_eq!(health.mqtt_status(), "disconnected");
    }
}
