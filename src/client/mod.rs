// Game-protocol client boundary: the capability surface the core consumes.
//
// The actual wire protocol lives behind `GameClient`; this crate ships only
// the simulated implementation in `sim`, and a real protocol client plugs in
// behind the same trait.

pub mod sim;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::core::snapshot::{Experience, InventoryItem, Position};

/// How a connection authenticates against the target server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Offline,
    Cracked,
    Platform,
}

/// Connection parameters supplied at create/reconnect time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub version: String,
    pub auth: AuthMode,
    /// Platform-auth token cache location, when `auth` is `Platform`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_cache: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: "localhost".to_string(),
            port: 25565,
            username: "Bot".to_string(),
            version: "1.21.8".to_string(),
            auth: AuthMode::Offline,
            auth_cache: None,
        }
    }
}

/// An entity as reported by the client at a point in time.
///
/// Telemetry gaps are expected: any field here may be missing and derived
/// computations must skip the entity rather than fail.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityObservation {
    pub id: Option<i64>,
    pub kind: String,
    pub name: Option<String>,
    pub position: Option<Position>,
}

impl EntityObservation {
    /// Throttle key: entity id, falling back to name.
    pub fn throttle_key(&self) -> String {
        match self.id {
            Some(id) => id.to_string(),
            None => self
                .name
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }

    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "entity".to_string())
    }
}

/// An online player as reported by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerObservation {
    pub username: String,
    pub ping: i32,
    pub position: Option<Position>,
}

/// One consistent point-in-time read of the client's queryable fields.
#[derive(Debug, Clone, Default)]
pub struct ClientObservation {
    pub position: Option<Position>,
    pub health: f32,
    pub food: f32,
    pub experience: Experience,
    pub game_mode: String,
    pub dimension: String,
    /// Occupied inventory slots, armor slots 5-8 included.
    pub inventory: Vec<InventoryItem>,
    pub entities: Vec<EntityObservation>,
    pub players: Vec<PlayerObservation>,
    pub world_age: i64,
    pub time_of_day: i64,
    pub is_raining: bool,
    pub thunder_level: f32,
}

/// Raw asynchronous signals emitted by a live connection.
#[derive(Debug, Clone, PartialEq)]
pub enum RawClientEvent {
    Login,
    Spawn,
    HealthChanged,
    Kicked { reason: String },
    Error { message: String },
    Ended { reason: Option<String> },
    EntityHurt { entity: EntityObservation },
    Chat { message: String },
}

/// Equip destination names understood by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquipDestination {
    Head,
    Torso,
    Legs,
    Feet,
    Hand,
}

impl EquipDestination {
    pub fn from_armor_slot(slot: u8) -> Option<Self> {
        match slot {
            5 => Some(EquipDestination::Head),
            6 => Some(EquipDestination::Torso),
            7 => Some(EquipDestination::Legs),
            8 => Some(EquipDestination::Feet),
            _ => None,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "head" => Some(EquipDestination::Head),
            "torso" => Some(EquipDestination::Torso),
            "legs" => Some(EquipDestination::Legs),
            "feet" => Some(EquipDestination::Feet),
            "hand" => Some(EquipDestination::Hand),
            _ => None,
        }
    }
}

impl fmt::Display for EquipDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EquipDestination::Head => "head",
            EquipDestination::Torso => "torso",
            EquipDestination::Legs => "legs",
            EquipDestination::Feet => "feet",
            EquipDestination::Hand => "hand",
        };
        write!(f, "{name}")
    }
}

/// Movement controls the client can hold or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementControl {
    Forward,
    Back,
    Left,
    Right,
    Jump,
}

/// Failure from a capability call (equip/unequip/chat/consume round-trips).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ClientError(pub String);

/// The opaque capability object wrapping one protocol-client instance.
#[async_trait]
pub trait GameClient: Send + Sync {
    /// Whether the underlying transport is live.
    fn is_connected(&self) -> bool;

    /// Username assigned by the server (may differ from the requested one).
    fn username(&self) -> String;

    /// One consistent read of all queryable fields, or `None` while the
    /// client has no spawned entity yet.
    fn observe(&self) -> Option<ClientObservation>;

    /// Graceful shutdown of the connection.
    fn quit(&self);

    /// Sever the transport directly, for connections where a graceful quit
    /// would hang.
    fn force_terminate(&self);

    async fn equip(&self, slot: u8, dest: EquipDestination) -> Result<(), ClientError>;
    async fn unequip(&self, dest: EquipDestination) -> Result<(), ClientError>;
    async fn send_chat(&self, text: &str) -> Result<(), ClientError>;
    async fn activate_held_item(&self) -> Result<(), ClientError>;

    fn set_control(&self, control: MovementControl, active: bool);
    fn set_goal(&self, target: Position, range: f64);
    fn stop_pathfinding(&self);
}

/// Factory opening connections; injected into the manager so tests and local
/// mode swap the protocol implementation without touching the core.
pub trait Connector: Send + Sync {
    /// Open a connection. Returns immediately with the handle and the raw
    /// event stream; login/spawn arrive asynchronously on the stream.
    fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<(Arc<dyn GameClient>, mpsc::UnboundedReceiver<RawClientEvent>), ClientError>;
}
