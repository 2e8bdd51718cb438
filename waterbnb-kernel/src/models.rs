use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use time::OffsetDateTime;

/// Dernier état connu d'une piscine, tel que rapporté par son ESP32.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PoolState {
    pub pool_id: String,
    pub occuped: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_update: OffsetDateTime,
}

pub type PoolsMap = HashMap<String, PoolState>;

// Payload publié par les ESP32 sur le topic de statut. Seuls `info.ident` et
// `piscine.occuped` sont lus, le reste est conservé tel quel pour l'historique.
#[derive(Debug, Deserialize)]
pub struct StatusIn {
    pub info: Option<InfoIn>,
    pub piscine: Option<PiscineIn>,
}
#[derive(Debug, Deserialize)]
pub struct InfoIn { pub ident: Option<String> }
#[derive(Debug, Deserialize)]
pub struct PiscineIn { pub occuped: Option<bool> }

/// Ligne d'historique écrite à chaque télémétrie valide.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolStatusRecord {
    pub pool_id: String,
    pub occuped: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub raw_data: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessStatus {
    Accepted,
    Denied,
}

/// Trace d'une demande d'accès, persistée dans le journal d'accès.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessDecision {
    pub user: String,
    pub pool: String,
    pub status: AccessStatus,
    pub reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Couleur affichée par la LED de la piscine.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Color {
    Red,
    Yellow,
    Green,
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Color::Red => "RED",
            Color::Yellow => "YELLOW",
            Color::Green => "GREEN",
        };
        f.write_str(s)
    }
}

// Format JSON attendu par l'ESP32 : {"cmd":"color","value":"RED","timestamp":"..."}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CommandOut {
    pub cmd: String,
    pub value: Color,
    pub timestamp: String,
}

/// Entrée de l'annuaire des usagers ; `num` est l'identifiant `idu`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub num: String,
    #[serde(default)]
    pub login: Option<String>,
}
