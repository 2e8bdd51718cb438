//! WaterBnB kernel : autorisation d'accès aux piscines à partir de la
//! télémétrie MQTT des ESP32 et d'un annuaire d'usagers.

pub mod access;
pub mod config;
pub mod dispatch;
pub mod health;
pub mod http;
pub mod models;
pub mod mqtt;
pub mod registry;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod testing;
