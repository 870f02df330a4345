// Simulated game client: drives the full reconciliation path without a real
// server. Backs the server binary and doubles as the capability-trait test
// implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::snapshot::{Experience, InventoryItem, Position};

use super::{
    ClientError, ClientObservation, ConnectionConfig, Connector, EntityObservation,
    EquipDestination, GameClient, MovementControl, PlayerObservation, RawClientEvent,
};

/// Mutable simulated world the client reads its observations from.
#[derive(Debug)]
pub struct SimWorld {
    pub observation: ClientObservation,
    /// Movement controls currently held (for test assertions).
    pub held_controls: Vec<MovementControl>,
    pub last_goal: Option<(Position, f64)>,
    pub pathfinding_stops: u32,
}

impl SimWorld {
    fn starting(username: &str) -> Self {
        let _ = username;
        SimWorld {
            observation: ClientObservation {
                position: Some(Position {
                    x: 0.5,
                    y: 64.0,
                    z: 0.5,
                }),
                health: 20.0,
                food: 20.0,
                experience: Experience::default(),
                game_mode: "survival".to_string(),
                dimension: "overworld".to_string(),
                inventory: vec![InventoryItem {
                    name: "bread".to_string(),
                    display_name: "Bread".to_string(),
                    slot: 36,
                    count: 3,
                }],
                entities: Vec::new(),
                players: Vec::new(),
                world_age: 0,
                time_of_day: 6000,
                is_raining: false,
                thunder_level: 0.0,
            },
            held_controls: Vec::new(),
            last_goal: None,
            pathfinding_stops: 0,
        }
    }
}

/// In-process client implementation over a `SimWorld`.
pub struct SimClient {
    username: String,
    world: Mutex<SimWorld>,
    connected: AtomicBool,
    events: mpsc::UnboundedSender<RawClientEvent>,
}

impl SimClient {
    fn new(config: &ConnectionConfig, events: mpsc::UnboundedSender<RawClientEvent>) -> Self {
        SimClient {
            username: config.username.clone(),
            world: Mutex::new(SimWorld::starting(&config.username)),
            connected: AtomicBool::new(true),
            events,
        }
    }

    /// Push a raw event onto the connection's event stream. Send failures
    /// (pump already torn down) are ignored.
    pub fn emit(&self, event: RawClientEvent) {
        let _ = self.events.send(event);
    }

    /// Emit the login/spawn pair a real connection produces once the server
    /// accepts it.
    pub fn complete_login(&self) {
        self.emit(RawClientEvent::Login);
        self.emit(RawClientEvent::Spawn);
    }

    /// Mutate the simulated world under its lock.
    pub fn with_world<R>(&self, f: impl FnOnce(&mut SimWorld) -> R) -> R {
        let mut world = self.world.lock().unwrap();
        f(&mut world)
    }

    /// Set the simulated health and fire the corresponding raw event.
    pub fn set_health(&self, health: f32) {
        self.with_world(|w| w.observation.health = health);
        self.emit(RawClientEvent::HealthChanged);
    }

    /// Report a nearby entity taking damage.
    pub fn hurt_entity(&self, entity: EntityObservation) {
        self.emit(RawClientEvent::EntityHurt { entity });
    }

    /// Add an online player to the simulated world.
    pub fn add_player(&self, username: &str, ping: i32, position: Option<Position>) {
        self.with_world(|w| {
            w.observation.players.push(PlayerObservation {
                username: username.to_string(),
                ping,
                position,
            })
        });
    }
}

#[async_trait]
impl GameClient for SimClient {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn username(&self) -> String {
        self.username.clone()
    }

    fn observe(&self) -> Option<ClientObservation> {
        if !self.is_connected() {
            return None;
        }
        Some(self.world.lock().unwrap().observation.clone())
    }

    fn quit(&self) {
        if self.connected.swap(false, Ordering::Relaxed) {
            self.emit(RawClientEvent::Ended {
                reason: Some("quit".to_string()),
            });
        }
    }

    fn force_terminate(&self) {
        if self.connected.swap(false, Ordering::Relaxed) {
            self.emit(RawClientEvent::Ended {
                reason: Some("socketClosed".to_string()),
            });
        }
    }

    async fn equip(&self, slot: u8, dest: EquipDestination) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError("Not connected".to_string()));
        }
        let dest_slot = match dest {
            EquipDestination::Head => 5,
            EquipDestination::Torso => 6,
            EquipDestination::Legs => 7,
            EquipDestination::Feet => 8,
            // Held item lives in the first hotbar slot.
            EquipDestination::Hand => 36,
        };
        self.with_world(|w| {
            let inventory = &mut w.observation.inventory;
            let from = inventory
                .iter()
                .position(|i| i.slot == slot)
                .ok_or_else(|| ClientError("Item not found in slot".to_string()))?;
            // Swap with whatever occupies the destination.
            if let Some(to) = inventory.iter().position(|i| i.slot == dest_slot) {
                inventory[to].slot = slot;
            }
            inventory[from].slot = dest_slot;
            Ok(())
        })
    }

    async fn unequip(&self, dest: EquipDestination) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError("Not connected".to_string()));
        }
        let armor_slot = match dest {
            EquipDestination::Head => 5,
            EquipDestination::Torso => 6,
            EquipDestination::Legs => 7,
            EquipDestination::Feet => 8,
            EquipDestination::Hand => {
                return Err(ClientError("Cannot unequip hand".to_string()))
            }
        };
        self.with_world(|w| {
            let inventory = &mut w.observation.inventory;
            let from = inventory
                .iter()
                .position(|i| i.slot == armor_slot)
                .ok_or_else(|| ClientError("Nothing equipped there".to_string()))?;
            // Move to the first free main-inventory slot.
            let free = (9u8..36)
                .find(|s| !inventory.iter().any(|i| i.slot == *s))
                .ok_or_else(|| ClientError("Inventory full".to_string()))?;
            inventory[from].slot = free;
            Ok(())
        })
    }

    async fn send_chat(&self, text: &str) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError("Not connected".to_string()));
        }
        // The server echoes chat back to the client.
        self.emit(RawClientEvent::Chat {
            message: format!("<{}> {}", self.username, text),
        });
        Ok(())
    }

    async fn activate_held_item(&self) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError("Not connected".to_string()));
        }
        self.with_world(|w| {
            let inventory = &mut w.observation.inventory;
            let held = inventory
                .iter()
                .position(|i| i.slot == 36)
                .ok_or_else(|| ClientError("Nothing held".to_string()))?;
            if inventory[held].count > 1 {
                inventory[held].count -= 1;
            } else {
                inventory.remove(held);
            }
            w.observation.food = (w.observation.food + 4.0).min(20.0);
            Ok(())
        })
    }

    fn set_control(&self, control: MovementControl, active: bool) {
        self.with_world(|w| {
            w.held_controls.retain(|c| *c != control);
            if active {
                w.held_controls.push(control);
            }
        });
    }

    fn set_goal(&self, target: Position, range: f64) {
        self.with_world(|w| w.last_goal = Some((target, range)));
    }

    fn stop_pathfinding(&self) {
        self.with_world(|w| {
            w.last_goal = None;
            w.pathfinding_stops += 1;
        });
    }
}

/// Connector producing `SimClient`s. Keeps every handle it has opened so
/// tests can reach into the simulated world.
pub struct SimConnector {
    auto_login: bool,
    handles: Mutex<Vec<Arc<SimClient>>>,
}

impl SimConnector {
    pub fn new(auto_login: bool) -> Self {
        SimConnector {
            auto_login,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// The most recently opened client, if any.
    pub fn latest(&self) -> Option<Arc<SimClient>> {
        self.handles.lock().unwrap().last().cloned()
    }
}

impl Connector for SimConnector {
    fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<(Arc<dyn GameClient>, mpsc::UnboundedReceiver<RawClientEvent>), ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(SimClient::new(config, tx));
        self.handles.lock().unwrap().push(client.clone());

        if self.auto_login {
            let login_client = client.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                login_client.complete_login();
            });
        }

        Ok((client, rx))
    }
}
