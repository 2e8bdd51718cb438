/*!
# WaterBnB DevKit - Stubs et utilitaires pour tests

Bibliothèque facilitant les tests du kernel WaterBnB:
- Stub MQTT qui enregistre les publications sans broker
- Builders de messages de télémétrie piscine
*/

pub mod mqtt_stub;

pub use mqtt_stub::{MockMessage, MockMqttClient, WaterbnbMessageBuilder};
