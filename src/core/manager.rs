// BotManager: the registry owning every connection handle, snapshot and task
// loop, keyed by bot identity. Composition root for the whole core.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::client::{
    ConnectionConfig, Connector, EquipDestination, GameClient, RawClientEvent,
};
use crate::metrics;

use super::events::{BotEvent, EventBus, StateEnvelope};
use super::reconciler::{refresh_snapshot, spawn_pump, Reconciler};
use super::snapshot::{CurrentTask, InventoryItem, StateSnapshot};
use super::tasks::{spawn_task, TaskHandle, TaskKind};

/// Item names the consume operation accepts as food.
const FOOD_NAMES: &[&str] = &[
    "apple", "bread", "beef", "porkchop", "chicken", "mutton", "rabbit", "carrot", "potato",
    "beetroot", "melon", "cookie", "cod", "salmon", "stew", "berries", "chorus_fruit",
];

/// Everything that can go wrong at the manager's public surface.
///
/// Caller-input variants are surfaced verbatim as single-line reasons and are
/// never retried internally.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Bot not found")]
    BotNotFound,
    #[error("Bot not connected")]
    NotConnected,
    #[error("Inventory not ready")]
    InventoryNotReady,
    #[error("Item not found")]
    ItemNotFound,
    #[error("Item not found in slot")]
    ItemNotFoundInSlot,
    #[error("Only armor can be equipped")]
    NotArmor,
    #[error("Only food can be consumed")]
    NotFood,
    #[error("Invalid armor destination")]
    InvalidDestination,
    #[error("Unknown task: {0}")]
    UnknownTask(String),
    #[error("No active task to pause")]
    NoTaskToPause,
    #[error("No task to resume")]
    NoTaskToResume,
    #[error("Task is not paused")]
    TaskNotPaused,
    #[error("Failed to connect: {0}")]
    ConnectFailed(String),
    #[error("{0}")]
    Capability(String),
}

impl ManagerError {
    /// Whether this is a missing-identity error (HTTP 404) as opposed to a
    /// rejected-input error (HTTP 400).
    pub fn is_not_found(&self) -> bool {
        matches!(self, ManagerError::BotNotFound)
    }
}

/// Fields a reconnect may override; anything absent reuses the stored config.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ReconnectOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub version: Option<String>,
    pub auth: Option<crate::client::AuthMode>,
    pub auth_cache: Option<String>,
}

impl ReconnectOverrides {
    fn merge_into(self, base: &ConnectionConfig) -> ConnectionConfig {
        ConnectionConfig {
            host: self.host.unwrap_or_else(|| base.host.clone()),
            port: self.port.unwrap_or(base.port),
            username: self.username.unwrap_or_else(|| base.username.clone()),
            version: self.version.unwrap_or_else(|| base.version.clone()),
            auth: self.auth.unwrap_or(base.auth),
            auth_cache: self.auth_cache.or_else(|| base.auth_cache.clone()),
        }
    }
}

/// How an inventory item is addressed in equip/consume requests.
#[derive(Debug, Clone)]
pub enum ItemSelector {
    Slot(u8),
    Name(String),
}

struct BotEntry {
    client: Arc<dyn GameClient>,
    snapshot: Arc<Mutex<StateSnapshot>>,
    config: ConnectionConfig,
    pump: JoinHandle<()>,
    task: Option<TaskHandle>,
}

/// Registry of live and offline bots. One entry per identity; at most one
/// live connection handle per entry, enforced by tearing the old one down
/// before any new handle is opened.
pub struct BotManager {
    connector: Arc<dyn Connector>,
    bus: EventBus,
    bots: Mutex<HashMap<String, BotEntry>>,
}

impl BotManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        BotManager {
            connector,
            bus: EventBus::new(),
            bots: Mutex::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Live-tail subscription to `{botId, state, event}` envelopes.
    pub fn subscribe(&self) -> broadcast::Receiver<StateEnvelope> {
        self.bus.subscribe()
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    /// Allocate a new identity and open its connection. Returns immediately;
    /// the connection completes asynchronously and the snapshot starts
    /// all-zero/disconnected.
    pub fn create(&self, config: ConnectionConfig) -> Result<(String, StateSnapshot), ManagerError> {
        let id = format!("bot-{}", Uuid::new_v4());
        let (client, rx) = self
            .connector
            .connect(&config)
            .map_err(|e| ManagerError::ConnectFailed(e.0))?;

        let snapshot = Arc::new(Mutex::new(StateSnapshot::new(
            &id,
            &config.username,
            &config.host,
        )));
        let pump = self.wire(&id, client.clone(), snapshot.clone(), rx);

        let initial = snapshot.lock().unwrap().clone();
        let mut bots = self.bots.lock().unwrap();
        bots.insert(
            id.clone(),
            BotEntry {
                client,
                snapshot,
                config,
                pump,
                task: None,
            },
        );
        metrics::BOTS_CREATED_TOTAL.inc();
        metrics::ACTIVE_BOTS.set(bots.len() as i64);
        tracing::info!(bot_id = %id, "bot created");
        Ok((id, initial))
    }

    /// Tear down any existing handle for `id` (ignoring teardown errors) and
    /// open a new one, re-wired against the same snapshot so chat history and
    /// identity persist across reconnects.
    pub fn reconnect(
        &self,
        id: &str,
        overrides: ReconnectOverrides,
    ) -> Result<StateSnapshot, ManagerError> {
        let mut bots = self.bots.lock().unwrap();
        let entry = bots.get_mut(id).ok_or(ManagerError::BotNotFound)?;

        Self::teardown_entry(entry);

        let config = overrides.merge_into(&entry.config);
        let (client, rx) = self
            .connector
            .connect(&config)
            .map_err(|e| ManagerError::ConnectFailed(e.0))?;

        {
            let mut snap = entry.snapshot.lock().unwrap();
            snap.connected = false;
            snap.username = config.username.clone();
            snap.host = config.host.clone();
            snap.touch();
        }

        entry.pump = self.wire(id, client.clone(), entry.snapshot.clone(), rx);
        entry.client = client;
        entry.config = config;
        metrics::RECONNECTS_TOTAL.inc();
        tracing::info!(bot_id = %id, "bot reconnecting");
        let snap = entry.snapshot.lock().unwrap().clone();
        Ok(snap)
    }

    /// Graceful teardown; the snapshot is retained with `connected = false`.
    pub fn disconnect(&self, id: &str) -> Result<(), ManagerError> {
        let mut bots = self.bots.lock().unwrap();
        let entry = bots.get_mut(id).ok_or(ManagerError::BotNotFound)?;
        Self::teardown_entry(entry);

        let state = {
            let mut snap = entry.snapshot.lock().unwrap();
            snap.current_task = None;
            snap.mark_disconnected();
            snap.clone()
        };
        self.bus.publish(StateEnvelope::new(
            id,
            state,
            BotEvent::Disconnect { reason: None },
        ));
        tracing::info!(bot_id = %id, "bot disconnected");
        Ok(())
    }

    /// Ungraceful teardown: sever the transport directly and purge the
    /// identity from every registry. Nothing is retained.
    pub fn force_kill(&self, id: &str) -> Result<(), ManagerError> {
        let entry = {
            let mut bots = self.bots.lock().unwrap();
            let entry = bots.remove(id).ok_or(ManagerError::BotNotFound)?;
            metrics::ACTIVE_BOTS.set(bots.len() as i64);
            entry
        };
        if let Some(task) = &entry.task {
            task.abort();
        }
        entry.pump.abort();
        entry.client.force_terminate();

        let state = {
            let mut snap = entry.snapshot.lock().unwrap();
            snap.mark_disconnected();
            snap.clone()
        };
        self.bus.publish(StateEnvelope::new(
            id,
            state,
            BotEvent::Disconnect {
                reason: Some("force-killed".to_string()),
            },
        ));
        tracing::warn!(bot_id = %id, "bot force-killed");
        Ok(())
    }

    /// Graceful disconnect plus removal from all registries.
    pub fn delete(&self, id: &str) -> Result<(), ManagerError> {
        self.disconnect(id)?;
        let mut bots = self.bots.lock().unwrap();
        bots.remove(id);
        metrics::ACTIVE_BOTS.set(bots.len() as i64);
        tracing::info!(bot_id = %id, "bot deleted");
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn get_state(&self, id: &str) -> Option<StateSnapshot> {
        let bots = self.bots.lock().unwrap();
        bots.get(id).map(|e| e.snapshot.lock().unwrap().clone())
    }

    pub fn list_states(&self) -> Vec<StateSnapshot> {
        let bots = self.bots.lock().unwrap();
        bots.values()
            .map(|e| e.snapshot.lock().unwrap().clone())
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.bots.lock().unwrap().contains_key(id)
    }

    // ── Capability calls ──────────────────────────────────────────────

    pub async fn send_chat(&self, id: &str, text: &str) -> Result<(), ManagerError> {
        let (client, _) = self.connected_client(id)?;
        client
            .send_chat(text)
            .await
            .map_err(|e| ManagerError::Capability(e.0))
    }

    /// Equip the armor item in the given inventory slot.
    pub async fn equip_by_slot(&self, id: &str, slot: u8) -> Result<(), ManagerError> {
        let (client, snapshot) = self.connected_client(id)?;
        let item = self.find_item(&client, &ItemSelector::Slot(slot))?;
        self.equip_item(id, &client, &snapshot, item).await
    }

    /// Equip an armor item found by name or display name.
    pub async fn equip_by_name(&self, id: &str, name: &str) -> Result<(), ManagerError> {
        let (client, snapshot) = self.connected_client(id)?;
        let item = self.find_item(&client, &ItemSelector::Name(name.to_string()))?;
        self.equip_item(id, &client, &snapshot, item).await
    }

    async fn equip_item(
        &self,
        id: &str,
        client: &Arc<dyn GameClient>,
        snapshot: &Arc<Mutex<StateSnapshot>>,
        item: InventoryItem,
    ) -> Result<(), ManagerError> {
        let dest = armor_destination(&item.name).ok_or(ManagerError::NotArmor)?;
        match client.equip(item.slot, dest).await {
            Ok(()) => {
                refresh_snapshot(client.as_ref(), snapshot);
                self.publish_for(id, snapshot, BotEvent::Equip {
                    item: item.display_name,
                    dest: dest.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                self.publish_for(id, snapshot, BotEvent::EquipError {
                    item: item.display_name,
                    dest: dest.to_string(),
                    message: e.0.clone(),
                });
                Err(ManagerError::Capability(e.0))
            }
        }
    }

    /// Unequip the armor piece at the given destination.
    pub async fn unequip(&self, id: &str, dest: EquipDestination) -> Result<(), ManagerError> {
        if dest == EquipDestination::Hand {
            return Err(ManagerError::InvalidDestination);
        }
        let (client, snapshot) = self.connected_client(id)?;
        match client.unequip(dest).await {
            Ok(()) => {
                refresh_snapshot(client.as_ref(), &snapshot);
                self.publish_for(id, &snapshot, BotEvent::Unequip {
                    dest: dest.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                self.publish_for(id, &snapshot, BotEvent::UnequipError {
                    dest: dest.to_string(),
                    message: e.0.clone(),
                });
                Err(ManagerError::Capability(e.0))
            }
        }
    }

    /// Move a food item to the hand and eat it.
    pub async fn consume_food(
        &self,
        id: &str,
        selector: ItemSelector,
    ) -> Result<(), ManagerError> {
        let (client, snapshot) = self.connected_client(id)?;
        let item = self.find_item(&client, &selector)?;
        if !is_food(&item.name) {
            return Err(ManagerError::NotFood);
        }

        let eat = async {
            client.equip(item.slot, EquipDestination::Hand).await?;
            client.activate_held_item().await
        };
        match eat.await {
            Ok(()) => {
                refresh_snapshot(client.as_ref(), &snapshot);
                self.publish_for(id, &snapshot, BotEvent::Consume {
                    item: item.display_name,
                });
                Ok(())
            }
            Err(e) => {
                self.publish_for(id, &snapshot, BotEvent::ConsumeError {
                    item: item.display_name,
                    message: e.0.clone(),
                });
                Err(ManagerError::Capability(e.0))
            }
        }
    }

    // ── Tasks ─────────────────────────────────────────────────────────

    /// Start a named task, implicitly stopping any task already running.
    pub fn start_task(&self, id: &str, name: &str) -> Result<(), ManagerError> {
        let kind =
            TaskKind::parse(name).ok_or_else(|| ManagerError::UnknownTask(name.to_string()))?;

        let mut bots = self.bots.lock().unwrap();
        let entry = bots.get_mut(id).ok_or(ManagerError::BotNotFound)?;
        if !entry.client.is_connected() {
            return Err(ManagerError::NotConnected);
        }

        self.stop_entry_task(id, entry);

        {
            let mut snap = entry.snapshot.lock().unwrap();
            snap.current_task = Some(CurrentTask {
                name: kind.name().to_string(),
                started_at: Utc::now(),
                paused: false,
            });
            snap.touch();
        }
        self.publish_for(id, &entry.snapshot, BotEvent::TaskStart {
            name: kind.name().to_string(),
        });

        entry.task = Some(spawn_task(
            kind,
            id,
            entry.client.clone(),
            entry.snapshot.clone(),
            self.bus.clone(),
        ));
        Ok(())
    }

    /// Cancel the pending tick without clearing the current-task marker.
    pub fn pause_task(&self, id: &str) -> Result<(), ManagerError> {
        let mut bots = self.bots.lock().unwrap();
        let entry = bots.get_mut(id).ok_or(ManagerError::BotNotFound)?;

        let name = {
            let mut snap = entry.snapshot.lock().unwrap();
            let task = snap.current_task.as_mut().ok_or(ManagerError::NoTaskToPause)?;
            task.paused = true;
            let name = task.name.clone();
            snap.touch();
            name
        };
        // Abort before any reschedule logic can run.
        if let Some(task) = entry.task.take() {
            task.abort();
        }
        self.publish_for(id, &entry.snapshot, BotEvent::TaskPause { name });
        Ok(())
    }

    /// Re-derive a fresh schedule for the paused task. Elapsed run time from
    /// before the pause is not carried over.
    pub fn resume_task(&self, id: &str) -> Result<(), ManagerError> {
        let mut bots = self.bots.lock().unwrap();
        let entry = bots.get_mut(id).ok_or(ManagerError::BotNotFound)?;
        if !entry.client.is_connected() {
            return Err(ManagerError::NotConnected);
        }

        let name = {
            let mut snap = entry.snapshot.lock().unwrap();
            let task = snap
                .current_task
                .as_mut()
                .ok_or(ManagerError::NoTaskToResume)?;
            if !task.paused {
                return Err(ManagerError::TaskNotPaused);
            }
            task.paused = false;
            let name = task.name.clone();
            snap.touch();
            name
        };
        let kind = TaskKind::parse(&name).ok_or(ManagerError::UnknownTask(name.clone()))?;

        self.publish_for(id, &entry.snapshot, BotEvent::TaskResume { name });
        entry.task = Some(spawn_task(
            kind,
            id,
            entry.client.clone(),
            entry.snapshot.clone(),
            self.bus.clone(),
        ));
        Ok(())
    }

    /// Stop the current task. A bot with no active task is a no-op: no error,
    /// no event.
    pub fn stop_task(&self, id: &str) -> Result<(), ManagerError> {
        let mut bots = self.bots.lock().unwrap();
        let entry = bots.get_mut(id).ok_or(ManagerError::BotNotFound)?;
        self.stop_entry_task(id, entry);
        Ok(())
    }

    // ── Internals ─────────────────────────────────────────────────────

    fn wire(
        &self,
        id: &str,
        client: Arc<dyn GameClient>,
        snapshot: Arc<Mutex<StateSnapshot>>,
        rx: tokio::sync::mpsc::UnboundedReceiver<RawClientEvent>,
    ) -> JoinHandle<()> {
        let reconciler = Reconciler::new(id, client, snapshot, self.bus.clone());
        spawn_pump(reconciler, rx)
    }

    /// Cancel task timer and pump, then close the transport. Errors from the
    /// old handle are ignored; it is on its way out regardless.
    fn teardown_entry(entry: &mut BotEntry) {
        if let Some(task) = entry.task.take() {
            task.abort();
        }
        entry.pump.abort();
        entry.client.quit();
    }

    fn stop_entry_task(&self, id: &str, entry: &mut BotEntry) {
        if let Some(task) = entry.task.take() {
            task.abort();
        }
        let stopped = {
            let mut snap = entry.snapshot.lock().unwrap();
            let name = snap.current_task.take().map(|t| t.name);
            if name.is_some() {
                snap.touch();
            }
            name
        };
        if let Some(name) = stopped {
            self.publish_for(id, &entry.snapshot, BotEvent::TaskStop { name });
        }
    }

    fn connected_client(
        &self,
        id: &str,
    ) -> Result<(Arc<dyn GameClient>, Arc<Mutex<StateSnapshot>>), ManagerError> {
        let bots = self.bots.lock().unwrap();
        let entry = bots.get(id).ok_or(ManagerError::BotNotFound)?;
        if !entry.client.is_connected() {
            return Err(ManagerError::NotConnected);
        }
        Ok((entry.client.clone(), entry.snapshot.clone()))
    }

    fn find_item(
        &self,
        client: &Arc<dyn GameClient>,
        selector: &ItemSelector,
    ) -> Result<InventoryItem, ManagerError> {
        let obs = client.observe().ok_or(ManagerError::InventoryNotReady)?;
        match selector {
            ItemSelector::Slot(slot) => obs
                .inventory
                .iter()
                .find(|i| i.slot == *slot)
                .cloned()
                .ok_or(ManagerError::ItemNotFoundInSlot),
            ItemSelector::Name(name) => {
                let target = name.to_ascii_lowercase();
                obs.inventory
                    .iter()
                    .find(|i| {
                        i.name.to_ascii_lowercase() == target
                            || i.display_name.to_ascii_lowercase() == target
                    })
                    .cloned()
                    .ok_or(ManagerError::ItemNotFound)
            }
        }
    }

    fn publish_for(&self, id: &str, snapshot: &Arc<Mutex<StateSnapshot>>, event: BotEvent) {
        let state = snapshot.lock().unwrap().clone();
        self.bus.publish(StateEnvelope::new(id, state, event));
    }
}

/// Map an item name onto its armor destination, or None for non-armor.
fn armor_destination(name: &str) -> Option<EquipDestination> {
    let name = name.to_ascii_lowercase();
    if name.contains("helmet") {
        Some(EquipDestination::Head)
    } else if name.contains("chestplate") {
        Some(EquipDestination::Torso)
    } else if name.contains("leggings") {
        Some(EquipDestination::Legs)
    } else if name.contains("boots") {
        Some(EquipDestination::Feet)
    } else {
        None
    }
}

fn is_food(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    FOOD_NAMES.iter().any(|f| name.contains(f))
}
