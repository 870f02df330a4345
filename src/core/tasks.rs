// Scripted behaviors: self-rescheduling control loops, at most one per bot.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::task::JoinHandle;

use crate::client::{GameClient, MovementControl};

use super::events::{BotEvent, EventBus, StateEnvelope};
use super::snapshot::StateSnapshot;

/// Follow loop poll cadence.
const FOLLOW_POLL_MS: u64 = 2000;
/// After this long without a visible player, the follow loop goes idle.
const FOLLOW_STARVE_SECS: u64 = 10;

/// The built-in scripted behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Idle-presence: periodic small movement and a jump to dodge idle kicks.
    Afk,
    /// Goal-seek toward the nearest online player.
    Follow,
}

impl TaskKind {
    /// Parse a task name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "AFK" => Some(TaskKind::Afk),
            "FOLLOW" => Some(TaskKind::Follow),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Afk => "AFK",
            TaskKind::Follow => "FOLLOW",
        }
    }
}

/// A running (or paused-and-respawnable) task loop. Aborting the join handle
/// cancels the pending timer synchronously; the marker in the snapshot is
/// managed by the caller.
pub struct TaskHandle {
    pub kind: TaskKind,
    pub join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn abort(&self) {
        self.join.abort();
    }
}

/// Clears every movement control when dropped. The loop future owns one, so
/// an abort landing mid-tick cannot leave a control held.
struct HeldControls {
    client: Arc<dyn GameClient>,
}

impl Drop for HeldControls {
    fn drop(&mut self) {
        for control in [
            MovementControl::Forward,
            MovementControl::Back,
            MovementControl::Left,
            MovementControl::Right,
            MovementControl::Jump,
        ] {
            self.client.set_control(control, false);
        }
    }
}

/// Halts pathfinding when dropped, so a cancelled loop leaves no stale goal
/// for the client to keep walking toward.
struct ActiveGoal {
    client: Arc<dyn GameClient>,
}

impl Drop for ActiveGoal {
    fn drop(&mut self) {
        self.client.stop_pathfinding();
    }
}

/// Spawn the loop for a task. The loop self-terminates without error or
/// reschedule once the connection is no longer live.
pub fn spawn_task(
    kind: TaskKind,
    bot_id: &str,
    client: Arc<dyn GameClient>,
    snapshot: Arc<Mutex<StateSnapshot>>,
    bus: EventBus,
) -> TaskHandle {
    crate::metrics::TASKS_STARTED_TOTAL
        .with_label_values(&[kind.name()])
        .inc();
    let bot_id = bot_id.to_string();
    let join = match kind {
        TaskKind::Afk => tokio::spawn(afk_loop(bot_id, client, snapshot, bus)),
        TaskKind::Follow => tokio::spawn(follow_loop(bot_id, client, snapshot, bus)),
    };
    TaskHandle { kind, join }
}

fn publish(bus: &EventBus, bot_id: &str, snapshot: &Mutex<StateSnapshot>, event: BotEvent) {
    let state = snapshot.lock().unwrap().clone();
    bus.publish(StateEnvelope::new(bot_id, state, event));
}

async fn afk_loop(
    bot_id: String,
    client: Arc<dyn GameClient>,
    snapshot: Arc<Mutex<StateSnapshot>>,
    bus: EventBus,
) {
    let _held = HeldControls {
        client: client.clone(),
    };
    tokio::time::sleep(Duration::from_millis(1000)).await;
    loop {
        if !client.is_connected() {
            tracing::debug!(bot_id = %bot_id, "AFK loop ending, connection gone");
            return;
        }

        let (direction, hold_ms, next_ms) = {
            let mut rng = rand::thread_rng();
            let dirs = [
                MovementControl::Forward,
                MovementControl::Back,
                MovementControl::Left,
                MovementControl::Right,
            ];
            (
                dirs[rng.gen_range(0..dirs.len())],
                rng.gen_range(500..1000u64),
                rng.gen_range(5000..10000u64),
            )
        };

        client.set_control(direction, true);
        tokio::time::sleep(Duration::from_millis(hold_ms)).await;
        client.set_control(direction, false);

        client.set_control(MovementControl::Jump, true);
        tokio::time::sleep(Duration::from_millis(250)).await;
        client.set_control(MovementControl::Jump, false);

        publish(
            &bus,
            &bot_id,
            &snapshot,
            BotEvent::TaskProgress {
                name: "AFK".to_string(),
                target: None,
                position: None,
                distance: None,
            },
        );

        tokio::time::sleep(Duration::from_millis(next_ms)).await;
    }
}

async fn follow_loop(
    bot_id: String,
    client: Arc<dyn GameClient>,
    snapshot: Arc<Mutex<StateSnapshot>>,
    bus: EventBus,
) {
    let _goal = ActiveGoal {
        client: client.clone(),
    };
    let own_name = client.username();
    let mut last_seen = Instant::now();
    let mut idle_emitted = false;

    loop {
        if !client.is_connected() {
            tracing::debug!(bot_id = %bot_id, "follow loop ending, connection gone");
            return;
        }

        let target = client.observe().and_then(|obs| {
            let own = obs.position?;
            obs.players
                .iter()
                .filter(|p| p.username != own_name)
                .filter_map(|p| {
                    let pos = p.position?;
                    Some((p.username.clone(), pos, pos.distance_to(&own)))
                })
                .min_by(|a, b| a.2.total_cmp(&b.2))
        });

        match target {
            Some((username, position, distance)) => {
                last_seen = Instant::now();
                idle_emitted = false;
                client.set_goal(position, 1.0);
                publish(
                    &bus,
                    &bot_id,
                    &snapshot,
                    BotEvent::TaskProgress {
                        name: "FOLLOW".to_string(),
                        target: Some(username),
                        position: Some(position),
                        distance: Some(format!("{distance:.2}")),
                    },
                );
            }
            None => {
                // Nobody visible: after the starvation window, halt movement
                // and signal idle once instead of polling a dead goal.
                if last_seen.elapsed() > Duration::from_secs(FOLLOW_STARVE_SECS) && !idle_emitted {
                    client.stop_pathfinding();
                    idle_emitted = true;
                    publish(
                        &bus,
                        &bot_id,
                        &snapshot,
                        BotEvent::TaskIdle {
                            name: "FOLLOW".to_string(),
                        },
                    );
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(FOLLOW_POLL_MS)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::sim::SimConnector;
    use crate::client::{ConnectionConfig, Connector};
    use crate::core::snapshot::Position;

    #[test]
    fn test_task_kind_parse() {
        assert_eq!(TaskKind::parse("afk"), Some(TaskKind::Afk));
        assert_eq!(TaskKind::parse("AFK"), Some(TaskKind::Afk));
        assert_eq!(TaskKind::parse("Follow"), Some(TaskKind::Follow));
        assert_eq!(TaskKind::parse("mine"), None);
        assert_eq!(TaskKind::Afk.name(), "AFK");
    }

    #[tokio::test]
    async fn test_follow_seeks_nearest_player() {
        let connector = SimConnector::new(false);
        let (client, _rx) = connector.connect(&ConnectionConfig::default()).unwrap();
        let sim = connector.latest().unwrap();
        sim.add_player(
            "Far",
            20,
            Some(Position {
                x: 30.0,
                y: 64.0,
                z: 0.0,
            }),
        );
        sim.add_player(
            "Near",
            20,
            Some(Position {
                x: 4.0,
                y: 64.0,
                z: 0.5,
            }),
        );

        let snapshot = Arc::new(Mutex::new(StateSnapshot::new("bot-1", "Bot", "h")));
        let bus = EventBus::new();
        let mut events = bus.subscribe();
        let handle = spawn_task(TaskKind::Follow, "bot-1", client, snapshot, bus);

        // First poll runs immediately.
        let env = events.recv().await.unwrap();
        match env.event {
            BotEvent::TaskProgress { name, target, .. } => {
                assert_eq!(name, "FOLLOW");
                assert_eq!(target.as_deref(), Some("Near"));
            }
            other => panic!("expected task-progress, got {other:?}"),
        }
        let goal = sim.with_world(|w| w.last_goal);
        assert_eq!(goal.unwrap().0.x, 4.0);
        handle.abort();
    }

    #[tokio::test]
    async fn test_abort_mid_tick_releases_controls() {
        let connector = SimConnector::new(false);
        let (client, _rx) = connector.connect(&ConnectionConfig::default()).unwrap();
        let sim = connector.latest().unwrap();

        let snapshot = Arc::new(Mutex::new(StateSnapshot::new("bot-1", "Bot", "h")));
        let bus = EventBus::new();
        let handle = spawn_task(TaskKind::Afk, "bot-1", client, snapshot, bus);

        // Let the loop get into a tick with a movement control held.
        tokio::time::timeout(Duration::from_secs(3), async {
            while sim.with_world(|w| w.held_controls.is_empty()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("loop never held a control");

        handle.abort();
        let _ = handle.join.await;

        // Cancellation mid-hold must not leave the bot walking.
        let held = sim.with_world(|w| w.held_controls.clone());
        assert!(held.is_empty(), "controls still held after abort: {held:?}");
    }

    #[tokio::test]
    async fn test_afk_loop_exits_when_disconnected() {
        let connector = SimConnector::new(false);
        let (client, _rx) = connector.connect(&ConnectionConfig::default()).unwrap();
        let sim = connector.latest().unwrap();
        sim.quit();

        let snapshot = Arc::new(Mutex::new(StateSnapshot::new("bot-1", "Bot", "h")));
        let bus = EventBus::new();
        let handle = spawn_task(TaskKind::Afk, "bot-1", client, snapshot, bus);

        // The loop notices the dead connection after its initial delay and
        // returns instead of erroring.
        tokio::time::timeout(Duration::from_secs(3), handle.join)
            .await
            .expect("loop should self-terminate")
            .expect("loop should not panic");
        let held = sim.with_world(|w| w.held_controls.clone());
        assert!(held.is_empty());
    }
}
