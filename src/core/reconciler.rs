// Reconciler: turns the raw callback firehose from one connection into a
// coherent snapshot plus a filtered stream of semantic events.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::{ClientObservation, GameClient, RawClientEvent};
use crate::metrics;

use super::events::{BotEvent, EventBus, StateEnvelope};
use super::filter::EventFilter;
use super::snapshot::{
    NearbyEntity, OnlinePlayer, StateSnapshot, Weather, WorldTime, NEARBY_RADIUS,
};

/// How often the snapshot is recomputed even without a raw trigger.
const PERIODIC_REFRESH_MS: u64 = 2000;

/// Per-connection reconciliation state. One reconciler is wired to each live
/// connection handle; reconnects build a fresh one against the same snapshot.
pub struct Reconciler {
    bot_id: String,
    client: Arc<dyn GameClient>,
    snapshot: Arc<Mutex<StateSnapshot>>,
    bus: EventBus,
    filter: EventFilter,
}

impl Reconciler {
    pub fn new(
        bot_id: &str,
        client: Arc<dyn GameClient>,
        snapshot: Arc<Mutex<StateSnapshot>>,
        bus: EventBus,
    ) -> Self {
        Reconciler {
            bot_id: bot_id.to_string(),
            client,
            snapshot,
            bus,
            filter: EventFilter::new(),
        }
    }

    /// Dispatch one raw client signal. Never panics past this boundary; the
    /// pump wraps calls in `catch_unwind` as a second line of defense.
    pub fn handle(&mut self, raw: RawClientEvent) {
        match raw {
            RawClientEvent::Login => {
                {
                    let mut snap = self.snapshot.lock().unwrap();
                    snap.connected = true;
                    snap.username = self.client.username();
                    snap.touch();
                }
                tracing::info!(bot_id = %self.bot_id, "bot logged in");
                self.refresh();
            }
            RawClientEvent::Spawn => {
                tracing::info!(bot_id = %self.bot_id, "bot spawned");
                self.refresh();
            }
            RawClientEvent::HealthChanged => {
                let old_health = self.snapshot.lock().unwrap().health;
                self.refresh();
                let new_health = self.snapshot.lock().unwrap().health;
                if let Some(amount) =
                    self.filter
                        .damage_amount(old_health, new_health, Instant::now())
                {
                    self.publish_guarded(BotEvent::Damage { amount });
                }
            }
            RawClientEvent::Kicked { reason } => {
                tracing::warn!(bot_id = %self.bot_id, %reason, "bot kicked");
                self.snapshot.lock().unwrap().mark_disconnected();
                self.publish_guarded(BotEvent::Kicked { reason });
            }
            RawClientEvent::Error { message } => {
                tracing::warn!(bot_id = %self.bot_id, %message, "connection error");
                self.snapshot.lock().unwrap().mark_disconnected();
                self.publish_guarded(BotEvent::Error { message });
            }
            RawClientEvent::Ended { reason } => {
                tracing::info!(bot_id = %self.bot_id, "connection ended");
                self.snapshot.lock().unwrap().mark_disconnected();
                self.publish_guarded(BotEvent::Disconnect { reason });
            }
            RawClientEvent::EntityHurt { entity } => {
                if !self
                    .filter
                    .allow_entity(&entity.throttle_key(), Instant::now())
                {
                    return;
                }
                self.refresh();
                // Throttled per entity identity only; hits on different
                // entities must surface promptly even in the same window.
                self.publish(BotEvent::EntityHurt {
                    target: entity.display_name(),
                });
            }
            RawClientEvent::Chat { message } => {
                let text = message.trim();
                if text.is_empty() {
                    return;
                }
                let at = Utc::now();
                self.snapshot.lock().unwrap().record_chat(text, at);
                // Chat bypasses the guard path entirely.
                self.publish(BotEvent::Chat {
                    message: text.to_string(),
                });
            }
        }
    }

    /// Full refresh on trigger: recompute the whole snapshot from one
    /// consistent client read and publish an unconditional status envelope.
    pub fn refresh(&self) {
        if refresh_snapshot(self.client.as_ref(), &self.snapshot) {
            self.publish(BotEvent::Status);
        }
    }

    fn publish(&self, event: BotEvent) {
        let state = self.snapshot.lock().unwrap().clone();
        self.bus
            .publish(StateEnvelope::new(&self.bot_id, state, event));
    }

    fn publish_guarded(&mut self, event: BotEvent) {
        if self.filter.allow_type(event.type_key(), Instant::now()) {
            self.publish(event);
        }
    }
}

/// Rewrite a snapshot from one point-in-time client observation.
///
/// Returns false (leaving the snapshot untouched) when the client has nothing
/// to observe yet. Malformed pieces of the observation (e.g. an entity with
/// no position) are skipped for their derived computation only; every other
/// field still refreshes.
pub fn refresh_snapshot(client: &dyn GameClient, snapshot: &Mutex<StateSnapshot>) -> bool {
    let start = Instant::now();
    let Some(obs) = client.observe() else {
        return false;
    };

    let mut snap = snapshot.lock().unwrap();
    apply_observation(&mut snap, &obs);
    snap.touch();

    metrics::SNAPSHOT_REFRESH_DURATION_MS.observe(start.elapsed().as_secs_f64() * 1000.0);
    true
}

fn apply_observation(snap: &mut StateSnapshot, obs: &ClientObservation) {
    snap.health = obs.health;
    snap.food = obs.food;
    snap.experience = obs.experience;
    snap.game_mode = obs.game_mode.clone();
    snap.dimension = obs.dimension.clone();
    if let Some(position) = obs.position {
        snap.position = position;
    }
    snap.set_inventory(&obs.inventory);

    // Nearby entities: within radius of our own position, capped, distance
    // formatted to 2 decimals. Entities without a position are skipped.
    if let Some(own) = obs.position {
        let entities: Vec<NearbyEntity> = obs
            .entities
            .iter()
            .filter_map(|e| {
                let pos = e.position?;
                let distance = pos.distance_to(&own);
                if distance >= NEARBY_RADIUS {
                    return None;
                }
                Some(NearbyEntity {
                    kind: e.kind.clone(),
                    name: e.display_name(),
                    position: pos,
                    distance: format!("{distance:.2}"),
                })
            })
            .collect();
        snap.set_entities(entities);
    }

    snap.players = obs
        .players
        .iter()
        .map(|p| OnlinePlayer {
            username: p.username.clone(),
            ping: p.ping,
        })
        .collect();

    snap.time = WorldTime {
        age: obs.world_age,
        time_of_day: obs.time_of_day,
    };
    snap.weather = if obs.is_raining {
        Weather::Rain
    } else if obs.thunder_level > 0.0 {
        Weather::Thunder
    } else {
        Weather::Clear
    };
}

/// Spawn the per-bot pump: consumes raw events until the connection's channel
/// closes, refreshing on a fixed interval in between. Aborted on teardown.
pub fn spawn_pump(
    mut reconciler: Reconciler,
    mut rx: mpsc::UnboundedReceiver<RawClientEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut refresh_tick =
            tokio::time::interval(std::time::Duration::from_millis(PERIODIC_REFRESH_MS));
        refresh_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first interval tick fires immediately; swallow it.
        refresh_tick.tick().await;

        loop {
            tokio::select! {
                raw = rx.recv() => {
                    let Some(raw) = raw else { break };
                    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        reconciler.handle(raw);
                    }));
                    if result.is_err() {
                        tracing::error!(bot_id = %reconciler.bot_id, "raw event handler panicked");
                    }
                }
                _ = refresh_tick.tick() => {
                    if reconciler.client.is_connected() {
                        reconciler.refresh();
                    }
                }
            }
        }
    })
}
