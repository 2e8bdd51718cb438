//! Glue de test : le stub MQTT du devkit comme publisher de commandes.

use crate::mqtt::{CommandPublisher, PublishError};
use async_trait::async_trait;
use waterbnb_devkit::MockMqttClient;

#[async_trait]
impl CommandPublisher for MockMqttClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        MockMqttClient::publish(self, topic, rumqttc::QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| PublishError::Other(e.to_string()))
    }
}
