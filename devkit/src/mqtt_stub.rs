/*!
Mock MQTT Client pour tests sans broker

Enregistre tous les messages publiés (commandes LED envoyées aux ESP32)
et permet de simuler une panne de publication.
*/

use rumqttc::QoS;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl MockMessage {
    /// Payload décodé en JSON (None si ce n'est pas du JSON)
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

/// Mock MQTT Client qui simule rumqttc::AsyncClient côté publication
#[derive(Clone, Default)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    fail_publish: Arc<AtomicBool>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toutes les publications suivantes échouent (broker injoignable)
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Simule la publication d'un message (compatible avec AsyncClient)
    pub async fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        };

        if self.fail_publish.load(Ordering::SeqCst) {
            anyhow::bail!("mock broker unreachable (topic {})", message.topic);
        }

        tracing::debug!(topic = %message.topic, bytes = message.payload.len(), "[mock] published");
        self.published_messages.lock().unwrap().push(message);
        Ok(())
    }

    /// Récupère tous les messages publiés (pour assertions de tests)
    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().unwrap().clone()
    }

    /// Trouve les messages publiés sur un topic donné
    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Valeurs `value` des commandes couleur publiées, dans l'ordre
    pub fn color_commands(&self) -> Vec<String> {
        self.get_published_messages()
            .iter()
            .filter_map(MockMessage::json)
            .filter(|v| v["cmd"] == "color")
            .filter_map(|v| v["value"].as_str().map(str::to_string))
            .collect()
    }
}

/// Helper pour créer des messages de télémétrie tels que les publient les ESP32
pub struct WaterbnbMessageBuilder;

impl WaterbnbMessageBuilder {
    /// Message de statut minimal : identifiant + occupation
    pub fn status(ident: &str, occuped: bool) -> Value {
        serde_json::json!({
            "info": { "ident": ident },
            "piscine": { "occuped": occuped }
        })
    }

    /// Message de statut complet, avec le reste du payload de l'ESP32
    pub fn status_full(ident: &str, occuped: bool, temperature: f64) -> Value {
        serde_json::json!({
            "status": {
                "temperature": temperature,
                "light": 512,
                "regul": "RUNNING",
                "fire": false,
                "heat": "OFF",
                "cold": "ON"
            },
            "location": {
                "room": "312",
                "gps": { "lat": 43.62, "lon": 7.07 },
                "address": "Les lucioles"
            },
            "info": {
                "ident": ident,
                "user": "devkit",
                "loc": "B1"
            },
            "piscine": {
                "hotspot": false,
                "occuped": occuped
            }
        })
    }

    /// Payload brut sérialisé
    pub fn to_bytes(value: &Value) -> Vec<u8> {
        serde_json::to_vec(value).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_client_publish() {
        let client = MockMqttClient::new();

        let payload = serde_json::json!({"cmd": "color", "value": "RED"});
        client
            .publish("uca/iot/master", QoS::AtLeastOnce, false, serde_json::to_vec(&payload).unwrap())
            .await
            .unwrap();

        let messages = client.get_published_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "uca/iot/master");
        assert_eq!(client.color_commands(), vec!["RED"]);
    }

    #[tokio::test]
    async fn test_failing_publish_records_nothing() {
        let client = MockMqttClient::new();
        client.fail_publishes(true);

        let res = client.publish("t", QoS::AtMostOnce, false, b"x".to_vec()).await;
        assert!(res.is_err());
        assert!(client.get_published_messages().is_empty());
    }

    #[test]
    fn test_message_builders() {
        let status = WaterbnbMessageBuilder::status("P_22", true);
        assert_eq!(status["info"]["ident"], "P_22");
        assert_eq!(status["piscine"]["occuped"], true);

        let full = WaterbnbMessageBuilder::status_full("P_7", false, 21.5);
        assert_eq!(full["status"]["temperature"], 21.5);
        assert_eq!(full["piscine"]["occuped"], false);
    }
}
