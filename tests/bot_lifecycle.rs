// End-to-end lifecycle tests against the manager, driven through the
// simulated connector: create/login, reconnect, disconnect, force-kill,
// events, inventory actions and scripted tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use botdeck_backend::client::sim::{SimClient, SimConnector};
use botdeck_backend::client::{ConnectionConfig, EntityObservation, GameClient};
use botdeck_backend::core::events::StateEnvelope;
use botdeck_backend::core::manager::{BotManager, ItemSelector, ManagerError, ReconnectOverrides};
use botdeck_backend::core::snapshot::{InventoryItem, Position, CHAT_BUFFER_CAP};

fn setup() -> (Arc<BotManager>, Arc<SimConnector>) {
    let connector = Arc::new(SimConnector::new(false));
    let manager = Arc::new(BotManager::new(connector.clone()));
    (manager, connector)
}

fn config(username: &str) -> ConnectionConfig {
    ConnectionConfig {
        username: username.to_string(),
        ..Default::default()
    }
}

/// Poll until `cond` holds; the pump processes raw events asynchronously so
/// state changes are not visible the instant an event is emitted.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

/// Complete the login handshake for the most recently opened sim client and
/// wait for the snapshot to reflect it.
async fn login(manager: &BotManager, connector: &SimConnector, id: &str) -> Arc<SimClient> {
    let client = connector.latest().expect("no sim client opened");
    client.complete_login();
    wait_until(|| manager.get_state(id).map(|s| s.connected).unwrap_or(false)).await;
    client
}

/// Receive envelopes until one matches the given event type key.
async fn next_event_of(rx: &mut broadcast::Receiver<StateEnvelope>, key: &str) -> StateEnvelope {
    loop {
        let envelope = tokio::time::timeout(Duration::from_secs(4), rx.recv())
            .await
            .unwrap_or_else(|_| panic!("no '{key}' event within 4s"))
            .expect("event bus closed");
        if envelope.event.type_key() == key {
            return envelope;
        }
    }
}

// ── Lifecycle ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_starts_zeroed_then_populates_on_login() {
    let (manager, connector) = setup();
    let (id, initial) = manager.create(config("Scout")).unwrap();

    // Before login the snapshot exists but carries no world data.
    assert!(!initial.connected);
    assert_eq!(initial.health, 0.0);
    assert_eq!(initial.username, "Scout");
    assert!(initial.inventory.is_empty());

    login(&manager, &connector, &id).await;

    let state = manager.get_state(&id).unwrap();
    assert!(state.connected);
    assert_eq!(state.health, 20.0);
    assert_eq!(state.food, 20.0);
    assert_eq!(state.dimension, "overworld");
    assert!(state.inventory.iter().any(|i| i.name == "bread"));
}

#[tokio::test]
async fn test_reconnect_tears_down_old_handle() {
    let (manager, connector) = setup();
    let (id, _) = manager.create(config("Scout")).unwrap();
    let first = login(&manager, &connector, &id).await;

    manager.reconnect(&id, ReconnectOverrides::default()).unwrap();
    let second = connector.latest().unwrap();

    // At most one live handle per identity: the old one is dead.
    assert!(!first.is_connected());
    assert!(!Arc::ptr_eq(&first, &second));

    login(&manager, &connector, &id).await;
    assert!(second.is_connected());
}

#[tokio::test]
async fn test_reconnect_overrides_replace_username() {
    let (manager, connector) = setup();
    let (id, _) = manager.create(config("OldName")).unwrap();
    login(&manager, &connector, &id).await;

    manager
        .reconnect(
            &id,
            ReconnectOverrides {
                username: Some("NewName".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    let state = manager.get_state(&id).unwrap();
    assert_eq!(state.username, "NewName");
    // Host was not overridden, so the stored one is reused.
    assert_eq!(state.host, "localhost");
}

#[tokio::test]
async fn test_disconnect_retains_last_known_state() {
    let (manager, connector) = setup();
    let (id, _) = manager.create(config("Scout")).unwrap();
    let mut rx = manager.subscribe();
    login(&manager, &connector, &id).await;

    manager.disconnect(&id).unwrap();

    let envelope = next_event_of(&mut rx, "disconnect").await;
    assert_eq!(envelope.bot_id, id);

    // The identity survives with its last known world view, offline.
    let state = manager.get_state(&id).unwrap();
    assert!(!state.connected);
    assert_eq!(state.health, 20.0);
    assert!(state.inventory.iter().any(|i| i.name == "bread"));
}

#[tokio::test]
async fn test_force_kill_purges_identity() {
    let (manager, connector) = setup();
    let (id, _) = manager.create(config("Scout")).unwrap();
    let mut rx = manager.subscribe();
    login(&manager, &connector, &id).await;

    manager.force_kill(&id).unwrap();

    let envelope = next_event_of(&mut rx, "disconnect").await;
    let json = serde_json::to_value(&envelope.event).unwrap();
    assert_eq!(json["reason"], "force-killed");

    // Nothing retained, unlike a graceful disconnect.
    assert!(!manager.contains(&id));
    assert!(manager.get_state(&id).is_none());
    assert!(matches!(
        manager.force_kill(&id),
        Err(ManagerError::BotNotFound)
    ));
}

#[tokio::test]
async fn test_delete_removes_after_graceful_disconnect() {
    let (manager, connector) = setup();
    let (id, _) = manager.create(config("Scout")).unwrap();
    login(&manager, &connector, &id).await;

    manager.delete(&id).unwrap();
    assert!(!manager.contains(&id));
    assert!(manager.list_states().is_empty());
}

// ── Event reconciliation ──────────────────────────────────────────────

#[tokio::test]
async fn test_health_drop_publishes_single_damage_event() {
    let (manager, connector) = setup();
    let (id, _) = manager.create(config("Scout")).unwrap();
    let client = login(&manager, &connector, &id).await;
    let mut rx = manager.subscribe();

    client.set_health(16.0);

    let envelope = next_event_of(&mut rx, "damage").await;
    let json = serde_json::to_value(&envelope.event).unwrap();
    assert_eq!(json["amount"], 4.0);
    assert_eq!(envelope.state.health, 16.0);
}

#[tokio::test]
async fn test_entity_hurt_distinct_entities_pass_throttle() {
    let (manager, connector) = setup();
    let (id, _) = manager.create(config("Scout")).unwrap();
    let client = login(&manager, &connector, &id).await;
    let mut rx = manager.subscribe();

    let near = Position { x: 2.0, y: 64.0, z: 0.0 };
    let hurt = |entity_id: i64, name: &str| EntityObservation {
        id: Some(entity_id),
        kind: "mob".to_string(),
        name: Some(name.to_string()),
        position: Some(near),
    };
    client.hurt_entity(hurt(1, "zombie"));
    client.hurt_entity(hurt(2, "skeleton"));
    // Same entity again inside the per-entity window: suppressed.
    client.hurt_entity(hurt(1, "zombie"));

    let first = next_event_of(&mut rx, "entity-hurt").await;
    let second = next_event_of(&mut rx, "entity-hurt").await;
    assert_eq!(
        serde_json::to_value(&first.event).unwrap()["target"],
        "zombie"
    );
    assert_eq!(
        serde_json::to_value(&second.event).unwrap()["target"],
        "skeleton"
    );

    // No third entity-hurt arrives for the repeated zombie hit.
    let extra = tokio::time::timeout(Duration::from_millis(200), async {
        next_event_of(&mut rx, "entity-hurt").await
    })
    .await;
    assert!(extra.is_err());
}

#[tokio::test]
async fn test_chat_bypasses_guards_and_caps_buffer() {
    let (manager, connector) = setup();
    let (id, _) = manager.create(config("Scout")).unwrap();
    let client = login(&manager, &connector, &id).await;

    for i in 0..60 {
        client.emit(botdeck_backend::client::RawClientEvent::Chat {
            message: format!("line {i}"),
        });
    }

    wait_until(|| {
        manager
            .get_state(&id)
            .map(|s| s.chat_messages.len() == CHAT_BUFFER_CAP)
            .unwrap_or(false)
    })
    .await;

    let state = manager.get_state(&id).unwrap();
    // Newest first, oldest ten evicted.
    assert_eq!(state.chat_messages[0].text, "line 59");
    assert_eq!(state.chat_messages[CHAT_BUFFER_CAP - 1].text, "line 10");
}

// ── Inventory actions ─────────────────────────────────────────────────

#[tokio::test]
async fn test_equip_rejects_non_armor() {
    let (manager, connector) = setup();
    let (id, _) = manager.create(config("Scout")).unwrap();
    login(&manager, &connector, &id).await;
    let mut rx = manager.subscribe();

    // Slot 36 holds bread.
    let err = manager.equip_by_slot(&id, 36).await.unwrap_err();
    assert_eq!(err.to_string(), "Only armor can be equipped");

    // Rejected before the client is touched: no equip event of any kind.
    let extra = tokio::time::timeout(Duration::from_millis(200), async {
        loop {
            let envelope = rx.recv().await.unwrap();
            if matches!(envelope.event.type_key(), "equip" | "equip-error") {
                return envelope;
            }
        }
    })
    .await;
    assert!(extra.is_err());

    let state = manager.get_state(&id).unwrap();
    assert_eq!(state.armor_points, 0);
    assert!(state.inventory.iter().any(|i| i.slot == 36));
}

#[tokio::test]
async fn test_equip_armor_by_name_updates_equipped_view() {
    let (manager, connector) = setup();
    let (id, _) = manager.create(config("Scout")).unwrap();
    let client = login(&manager, &connector, &id).await;
    let mut rx = manager.subscribe();

    client.with_world(|w| {
        w.observation.inventory.push(InventoryItem {
            name: "iron_helmet".to_string(),
            display_name: "Iron Helmet".to_string(),
            slot: 10,
            count: 1,
        })
    });

    manager.equip_by_name(&id, "Iron Helmet").await.unwrap();

    let envelope = next_event_of(&mut rx, "equip").await;
    let json = serde_json::to_value(&envelope.event).unwrap();
    assert_eq!(json["item"], "Iron Helmet");
    assert_eq!(json["dest"], "head");

    let state = manager.get_state(&id).unwrap();
    assert_eq!(state.equipped.head.as_ref().unwrap().name, "iron_helmet");
    assert_eq!(state.armor_points, 2);
    // The helmet left the generic inventory list when it hit slot 5.
    assert!(state.inventory.iter().all(|i| i.name != "iron_helmet"));
}

#[tokio::test]
async fn test_consume_food_restores_hunger() {
    let (manager, connector) = setup();
    let (id, _) = manager.create(config("Scout")).unwrap();
    let client = login(&manager, &connector, &id).await;
    let mut rx = manager.subscribe();

    client.with_world(|w| w.observation.food = 14.0);

    manager
        .consume_food(&id, ItemSelector::Slot(36))
        .await
        .unwrap();

    next_event_of(&mut rx, "consume").await;
    let state = manager.get_state(&id).unwrap();
    assert_eq!(state.food, 18.0);
    let bread = state.inventory.iter().find(|i| i.slot == 36).unwrap();
    assert_eq!(bread.count, 2);
}

#[tokio::test]
async fn test_consume_rejects_non_food() {
    let (manager, connector) = setup();
    let (id, _) = manager.create(config("Scout")).unwrap();
    let client = login(&manager, &connector, &id).await;

    client.with_world(|w| {
        w.observation.inventory.push(InventoryItem {
            name: "iron_sword".to_string(),
            display_name: "Iron Sword".to_string(),
            slot: 37,
            count: 1,
        })
    });

    let err = manager
        .consume_food(&id, ItemSelector::Slot(37))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Only food can be consumed");
}

// ── Scripted tasks ────────────────────────────────────────────────────

#[tokio::test]
async fn test_afk_task_pause_resume_cycle() {
    let (manager, connector) = setup();
    let (id, _) = manager.create(config("Scout")).unwrap();
    login(&manager, &connector, &id).await;
    let mut rx = manager.subscribe();

    manager.start_task(&id, "afk").unwrap();
    next_event_of(&mut rx, "task-start").await;
    let state = manager.get_state(&id).unwrap();
    let task = state.current_task.as_ref().unwrap();
    assert_eq!(task.name, "AFK");
    assert!(!task.paused);

    manager.pause_task(&id).unwrap();
    next_event_of(&mut rx, "task-pause").await;
    let state = manager.get_state(&id).unwrap();
    assert!(state.current_task.as_ref().unwrap().paused);

    manager.resume_task(&id).unwrap();
    next_event_of(&mut rx, "task-resume").await;
    let state = manager.get_state(&id).unwrap();
    assert!(!state.current_task.as_ref().unwrap().paused);

    manager.stop_task(&id).unwrap();
    next_event_of(&mut rx, "task-stop").await;
    assert!(manager.get_state(&id).unwrap().current_task.is_none());
}

#[tokio::test]
async fn test_pause_releases_controls_and_silences_progress() {
    let (manager, connector) = setup();
    let (id, _) = manager.create(config("Scout")).unwrap();
    let client = login(&manager, &connector, &id).await;
    let mut rx = manager.subscribe();

    manager.start_task(&id, "afk").unwrap();
    // Wait for the loop to be mid-tick, with a movement control held.
    wait_until(|| client.with_world(|w| !w.held_controls.is_empty())).await;

    manager.pause_task(&id).unwrap();
    next_event_of(&mut rx, "task-pause").await;

    // Pausing mid-tick must not leave the bot walking.
    wait_until(|| client.with_world(|w| w.held_controls.is_empty())).await;

    // And the paused loop publishes no further progress.
    let progress = tokio::time::timeout(Duration::from_millis(1500), async {
        next_event_of(&mut rx, "task-progress").await
    })
    .await;
    assert!(progress.is_err(), "progress published while paused");

    // Resuming brings the progress stream back.
    manager.resume_task(&id).unwrap();
    next_event_of(&mut rx, "task-resume").await;
    next_event_of(&mut rx, "task-progress").await;
}

#[tokio::test]
async fn test_task_error_paths() {
    let (manager, connector) = setup();
    let (id, _) = manager.create(config("Scout")).unwrap();
    login(&manager, &connector, &id).await;

    assert!(matches!(
        manager.start_task(&id, "fish"),
        Err(ManagerError::UnknownTask(_))
    ));
    assert!(matches!(
        manager.pause_task(&id),
        Err(ManagerError::NoTaskToPause)
    ));
    assert!(matches!(
        manager.resume_task(&id),
        Err(ManagerError::NoTaskToResume)
    ));

    manager.start_task(&id, "afk").unwrap();
    // Resuming a task that is not paused is rejected.
    assert!(matches!(
        manager.resume_task(&id),
        Err(ManagerError::TaskNotPaused)
    ));

    // Stop with no task is a silent no-op.
    manager.stop_task(&id).unwrap();
    manager.stop_task(&id).unwrap();
    assert!(manager.get_state(&id).unwrap().current_task.is_none());
}

#[tokio::test]
async fn test_start_task_requires_connection() {
    let (manager, connector) = setup();
    let (id, _) = manager.create(config("Scout")).unwrap();
    login(&manager, &connector, &id).await;
    manager.disconnect(&id).unwrap();

    assert!(matches!(
        manager.start_task(&id, "afk"),
        Err(ManagerError::NotConnected)
    ));
}

#[tokio::test]
async fn test_starting_a_task_replaces_the_running_one() {
    let (manager, connector) = setup();
    let (id, _) = manager.create(config("Scout")).unwrap();
    let client = login(&manager, &connector, &id).await;
    let mut rx = manager.subscribe();

    // Give the follow task someone to look for so it has work.
    client.add_player(
        "Wanderer",
        30,
        Some(Position { x: 4.0, y: 64.0, z: 0.0 }),
    );

    manager.start_task(&id, "afk").unwrap();
    next_event_of(&mut rx, "task-start").await;

    manager.start_task(&id, "follow").unwrap();
    // The implicit stop of AFK precedes the new start.
    next_event_of(&mut rx, "task-stop").await;
    next_event_of(&mut rx, "task-start").await;

    let state = manager.get_state(&id).unwrap();
    assert_eq!(state.current_task.as_ref().unwrap().name, "FOLLOW");
}
