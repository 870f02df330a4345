// Typed bot events and the in-process publish/subscribe bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::snapshot::{Position, StateSnapshot};

/// A discrete, user-visible event derived from raw client telemetry.
///
/// Every raw signal a bot can surface maps onto exactly one of these
/// variants, so the full set of reachable notifications is auditable here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BotEvent {
    /// Generic snapshot refresh, published after every reconciliation pass.
    Status,
    /// Health dropped; `amount` is the observed delta, rounded to 2 decimals.
    Damage { amount: f64 },
    Kicked { reason: String },
    Error { message: String },
    Disconnect { reason: Option<String> },
    EntityHurt { target: String },
    Chat { message: String },
    TaskStart { name: String },
    TaskProgress {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        position: Option<Position>,
        #[serde(skip_serializing_if = "Option::is_none")]
        distance: Option<String>,
    },
    TaskPause { name: String },
    TaskResume { name: String },
    TaskStop { name: String },
    /// Emitted by the follow behavior when no target has been seen for a while.
    TaskIdle { name: String },
    Equip { item: String, dest: String },
    EquipError {
        item: String,
        dest: String,
        message: String,
    },
    Unequip { dest: String },
    UnequipError { dest: String, message: String },
    Consume { item: String },
    ConsumeError { item: String, message: String },
}

impl BotEvent {
    /// Stable key used by the per-type emit guard.
    pub fn type_key(&self) -> &'static str {
        match self {
            BotEvent::Status => "status",
            BotEvent::Damage { .. } => "damage",
            BotEvent::Kicked { .. } => "kicked",
            BotEvent::Error { .. } => "error",
            BotEvent::Disconnect { .. } => "disconnect",
            BotEvent::EntityHurt { .. } => "entity-hurt",
            BotEvent::Chat { .. } => "chat",
            BotEvent::TaskStart { .. } => "task-start",
            BotEvent::TaskProgress { .. } => "task-progress",
            BotEvent::TaskPause { .. } => "task-pause",
            BotEvent::TaskResume { .. } => "task-resume",
            BotEvent::TaskStop { .. } => "task-stop",
            BotEvent::TaskIdle { .. } => "task-idle",
            BotEvent::Equip { .. } => "equip",
            BotEvent::EquipError { .. } => "equip-error",
            BotEvent::Unequip { .. } => "unequip",
            BotEvent::UnequipError { .. } => "unequip-error",
            BotEvent::Consume { .. } => "consume",
            BotEvent::ConsumeError { .. } => "consume-error",
        }
    }
}

/// The `{botId, state, event}` triple delivered to every live subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEnvelope {
    pub bot_id: String,
    pub state: StateSnapshot,
    pub event: BotEvent,
    pub at: DateTime<Utc>,
}

impl StateEnvelope {
    pub fn new(bot_id: &str, state: StateSnapshot, event: BotEvent) -> Self {
        StateEnvelope {
            bot_id: bot_id.to_string(),
            state,
            event,
            at: Utc::now(),
        }
    }
}

/// Process-wide live-tail event bus.
///
/// Publish fans out synchronously to all currently registered subscribers; a
/// subscriber registered after an envelope was published never sees it.
/// Dropping a receiver deregisters it, so a dying request handler cleans up
/// by letting its receiver fall out of scope.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StateEnvelope>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        EventBus { tx }
    }

    /// Fan an envelope out to every live subscriber. A send with no
    /// subscribers is not an error; the envelope is simply dropped.
    pub fn publish(&self, envelope: StateEnvelope) {
        crate::metrics::EVENTS_PUBLISHED_TOTAL
            .with_label_values(&[envelope.event.type_key()])
            .inc();
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEnvelope> {
        self.tx.subscribe()
    }

    /// Number of live subscribers (for diagnostics and leak tests).
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
