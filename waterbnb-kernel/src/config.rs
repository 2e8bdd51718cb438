use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub mqtt: MqttConf,
    pub http: HttpConf,
    pub access: AccessConf,
    pub registry: RegistryConf,
    pub store: StoreConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Topic sur lequel les ESP32 publient leur statut
    pub status_topic: String,
    /// Topic partagé par toute la flotte pour les commandes couleur
    pub command_topic: String,
    pub reconnect_backoff_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String, // ex: "0.0.0.0:5000"
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AccessConf {
    pub revert_delay_secs: u64,
    /// Ignore un retour au vert si une commande plus récente a visé la piscine
    pub supersede_pending_reverts: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RegistryConf {
    pub stale_after_secs: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConf {
    pub data_dir: String,
    pub users_file: String,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "mqtt.i3s.unice.fr".into(),
            port: 1883,
            client_id: "waterbnb-kernel".into(),
            keep_alive_secs: 60,
            status_topic: "uca/iot/master".into(),
            command_topic: "uca/iot/master".into(),
            reconnect_backoff_secs: 5,
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:5000".into() }
    }
}

impl Default for AccessConf {
    fn default() -> Self {
        Self { revert_delay_secs: 30, supersede_pending_reverts: false }
    }
}

impl Default for RegistryConf {
    fn default() -> Self {
        Self { stale_after_secs: 90 }
    }
}

impl Default for StoreConf {
    fn default() -> Self {
        Self { data_dir: "./data".into(), users_file: "./data/users.json".into() }
    }
}

impl MqttConf {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(5))
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }
}

impl AccessConf {
    pub fn revert_delay(&self) -> Duration {
        Duration::from_secs(self.revert_delay_secs)
    }
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("WATERBNB_CONFIG").unwrap_or_else(|_| "waterbnb.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt).unwrap_or_else(|e| {
            tracing::error!(%path, error = %e, "invalid config, using defaults");
            KernelConfig::default()
        })
    } else {
        tracing::warn!(%path, "no config file, using defaults");
        KernelConfig::default()
    }
}
