// Per-bot world-state snapshot: the latest known aggregate view of one bot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chat history ring buffer cap (newest-first, oldest evicted).
pub const CHAT_BUFFER_CAP: usize = 50;
/// Maximum nearby entities kept per snapshot refresh.
pub const NEARBY_ENTITY_CAP: usize = 20;
/// Radius (in blocks) inside which entities count as "nearby".
pub const NEARBY_RADIUS: f64 = 32.0;

/// Armor slot indices in the inventory window. Fixed order: head, torso, legs, feet.
pub const ARMOR_SLOT_HEAD: u8 = 5;
pub const ARMOR_SLOT_FEET: u8 = 8;
/// Hotbar slot range (inclusive).
pub const HOTBAR_SLOT_FIRST: u8 = 36;
pub const HOTBAR_SLOT_LAST: u8 = 44;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub level: i32,
    pub points: i32,
    pub progress: f32,
}

/// One occupied inventory slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub name: String,
    pub display_name: String,
    pub slot: u8,
    pub count: u32,
}

/// A lightweight item reference used in the equipped-armor view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmorPiece {
    pub name: String,
    pub display_name: String,
}

/// Derived view over armor slots 5-8, recomputed on every refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquippedArmor {
    pub head: Option<ArmorPiece>,
    pub torso: Option<ArmorPiece>,
    pub legs: Option<ArmorPiece>,
    pub feet: Option<ArmorPiece>,
}

impl EquippedArmor {
    pub fn piece_count(&self) -> u32 {
        [&self.head, &self.torso, &self.legs, &self.feet]
            .iter()
            .filter(|p| p.is_some())
            .count() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyEntity {
    pub kind: String,
    pub name: String,
    pub position: Position,
    /// Distance to the bot, formatted to 2 decimals.
    pub distance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlinePlayer {
    pub username: String,
    pub ping: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldTime {
    pub age: i64,
    pub time_of_day: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weather {
    #[default]
    Clear,
    Rain,
    Thunder,
}

/// Marker for the scripted behavior currently attached to a bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentTask {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub paused: bool,
}

/// The latest known aggregate state of one bot's world view.
///
/// Created zeroed when the identity is registered, repopulated on every
/// reconciliation pass while connected, and marked `connected = false` in
/// place on disconnect so offline bots still show their last known state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub id: String,
    pub connected: bool,
    pub username: String,
    pub host: String,
    pub health: f32,
    pub food: f32,
    pub armor_points: u32,
    pub position: Position,
    pub dimension: String,
    pub game_mode: String,
    pub experience: Experience,
    pub inventory: Vec<InventoryItem>,
    pub equipped: EquippedArmor,
    pub entities: Vec<NearbyEntity>,
    pub players: Vec<OnlinePlayer>,
    pub chat_messages: Vec<ChatMessage>,
    pub time: WorldTime,
    pub weather: Weather,
    pub current_task: Option<CurrentTask>,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl StateSnapshot {
    /// Fresh all-zero snapshot for a newly registered identity.
    pub fn new(id: &str, username: &str, host: &str) -> Self {
        let now = Utc::now();
        StateSnapshot {
            id: id.to_string(),
            connected: false,
            username: username.to_string(),
            host: host.to_string(),
            health: 0.0,
            food: 0.0,
            armor_points: 0,
            position: Position::default(),
            dimension: "unknown".to_string(),
            game_mode: "survival".to_string(),
            experience: Experience::default(),
            inventory: Vec::new(),
            equipped: EquippedArmor::default(),
            entities: Vec::new(),
            players: Vec::new(),
            chat_messages: Vec::new(),
            time: WorldTime::default(),
            weather: Weather::Clear,
            current_task: None,
            created_at: now,
            last_update: now,
        }
    }

    /// Stamp the snapshot as freshly reconciled.
    pub fn touch(&mut self) {
        self.last_update = Utc::now();
    }

    /// Replace the inventory from a raw slot read.
    ///
    /// Armor slots 5-8 are never surfaced in the generic inventory list; they
    /// feed the `equipped` view instead. `armor_points` is recomputed as two
    /// points per equipped piece.
    pub fn set_inventory(&mut self, slots: &[InventoryItem]) {
        self.inventory = slots
            .iter()
            .filter(|item| !is_armor_slot(item.slot))
            .cloned()
            .collect();

        let piece = |slot: u8| -> Option<ArmorPiece> {
            slots.iter().find(|i| i.slot == slot).map(|i| ArmorPiece {
                name: i.name.clone(),
                display_name: i.display_name.clone(),
            })
        };
        self.equipped = EquippedArmor {
            head: piece(5),
            torso: piece(6),
            legs: piece(7),
            feet: piece(8),
        };
        self.armor_points = self.equipped.piece_count() * 2;
    }

    /// Replace the nearby-entity list, applying the hard cap.
    pub fn set_entities(&mut self, mut entities: Vec<NearbyEntity>) {
        entities.truncate(NEARBY_ENTITY_CAP);
        self.entities = entities;
    }

    /// Prepend a chat line, evicting the oldest past the cap.
    pub fn record_chat(&mut self, text: &str, at: DateTime<Utc>) {
        self.chat_messages.insert(
            0,
            ChatMessage {
                text: text.to_string(),
                at,
            },
        );
        self.chat_messages.truncate(CHAT_BUFFER_CAP);
    }

    /// Mark the connection as gone, preserving the rest of the state.
    pub fn mark_disconnected(&mut self) {
        self.connected = false;
        self.touch();
    }
}

/// Whether a slot index is one of the reserved armor slots (5-8).
pub fn is_armor_slot(slot: u8) -> bool {
    (ARMOR_SLOT_HEAD..=ARMOR_SLOT_FEET).contains(&slot)
}

/// Whether a slot index is in the hotbar range (36-44).
pub fn is_hotbar_slot(slot: u8) -> bool {
    (HOTBAR_SLOT_FIRST..=HOTBAR_SLOT_LAST).contains(&slot)
}
