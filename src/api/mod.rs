// HTTP API routes: bot lifecycle, state queries, capability actions, tasks.

pub mod sse;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::client::{AuthMode, ConnectionConfig, EquipDestination};
use crate::core::manager::{BotManager, ItemSelector, ManagerError, ReconnectOverrides};
use crate::core::snapshot::StateSnapshot;
use crate::metrics;

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBotRequest {
    pub username: String,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub version: Option<String>,
    pub auth: Option<AuthMode>,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Deserialize)]
pub struct EquipRequest {
    pub slot: Option<u8>,
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct UnequipRequest {
    pub slot: Option<u8>,
    pub dest: Option<String>,
}

#[derive(Deserialize)]
pub struct ConsumeRequest {
    pub slot: Option<u8>,
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct StartTaskRequest {
    pub name: String,
    /// Opaque task parameters. The built-in behaviors take none, but callers
    /// sending one are not rejected.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<BotManager>,
}

// ── Error helpers ─────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": msg })))
}

fn manager_error(e: ManagerError) -> impl IntoResponse {
    let status = if e.is_not_found() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::BAD_REQUEST
    };
    json_error(status, &e.to_string())
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(manager: Arc<BotManager>) -> Router {
    let state = AppState { manager };

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        // Bots
        .route("/api/bots", get(list_bots).post(create_bot))
        .route("/api/bots/{id}", get(get_bot).delete(delete_bot))
        // Bot state queries
        .route("/api/bots/{id}/health", get(get_bot_health))
        .route("/api/bots/{id}/position", get(get_bot_position))
        .route("/api/bots/{id}/inventory", get(get_bot_inventory))
        .route("/api/bots/{id}/players", get(get_bot_players))
        .route("/api/bots/{id}/entities", get(get_bot_entities))
        .route("/api/bots/{id}/status", get(get_bot_status))
        // Live events stream (SSE)
        .route("/api/bots/{id}/events", get(sse::stream_bot_events))
        // Connection controls
        .route("/api/bots/{id}/disconnect", post(disconnect_bot))
        .route("/api/bots/{id}/reconnect", post(reconnect_bot))
        .route("/api/bots/{id}/force-kill", post(force_kill_bot))
        // Actions
        .route("/api/bots/{id}/chat", post(send_chat))
        .route("/api/bots/{id}/inventory/equip", post(equip_item))
        .route("/api/bots/{id}/inventory/unequip", post(unequip_item))
        .route("/api/bots/{id}/inventory/consume", post(consume_item))
        // Tasks
        .route("/api/bots/{id}/task", post(start_task))
        .route("/api/bots/{id}/task/stop", post(stop_task))
        .route("/api/bots/{id}/task/pause", post(pause_task))
        .route("/api/bots/{id}/task/resume", post(resume_task))
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "botdeck-backend" }))
}

async fn get_metrics() -> String {
    metrics::gather()
}

// ── Bot handlers ──────────────────────────────────────────────────────

async fn list_bots(State(state): State<AppState>) -> impl IntoResponse {
    let bots = state.manager.list_states();
    Json(json!({ "count": bots.len(), "bots": bots }))
}

async fn create_bot(
    State(state): State<AppState>,
    Json(req): Json<CreateBotRequest>,
) -> impl IntoResponse {
    if req.username.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "username is required").into_response();
    }
    let defaults = ConnectionConfig::default();
    let config = ConnectionConfig {
        host: req.server_host.unwrap_or(defaults.host),
        port: req.server_port.unwrap_or(defaults.port),
        username: req.username,
        version: req.version.unwrap_or(defaults.version),
        auth: req.auth.unwrap_or(defaults.auth),
        auth_cache: None,
    };
    match state.manager.create(config) {
        Ok((id, snapshot)) => (
            StatusCode::CREATED,
            Json(json!({ "success": true, "botId": id, "state": snapshot })),
        )
            .into_response(),
        Err(e) => manager_error(e).into_response(),
    }
}

async fn get_bot(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.manager.get_state(&id) {
        Some(snapshot) => Json(status_payload(&snapshot)).into_response(),
        None => json_error(StatusCode::NOT_FOUND, "Bot not found").into_response(),
    }
}

async fn delete_bot(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.manager.delete(&id) {
        Ok(()) => Json(json!({ "success": true, "message": "Bot deleted" })).into_response(),
        Err(e) => manager_error(e).into_response(),
    }
}

// ── State query handlers ──────────────────────────────────────────────

/// Unified status payload so the dashboard can fetch once.
fn status_payload(snapshot: &StateSnapshot) -> serde_json::Value {
    let health = snapshot.health.clamp(0.0, 20.0);
    json!({
        "id": snapshot.id,
        "username": snapshot.username,
        "connected": snapshot.connected,
        "status": if snapshot.connected { "online" } else { "offline" },
        "health": {
            "value": snapshot.health,
            "hearts": (health / 2.0).ceil() as i32,
            "armor": snapshot.armor_points,
            "food": snapshot.food,
        },
        "position": {
            "x": snapshot.position.x.floor(),
            "y": snapshot.position.y.floor(),
            "z": snapshot.position.z.floor(),
            "dimension": snapshot.dimension,
        },
        "inventory": {
            "items": snapshot.inventory,
            "count": snapshot.inventory.len(),
        },
        "equipped": snapshot.equipped,
        "currentTask": snapshot.current_task,
        "players": snapshot.players,
        "entities": snapshot.entities,
        "chatMessages": snapshot.chat_messages,
        "time": snapshot.time,
        "weather": snapshot.weather,
        "lastUpdate": snapshot.last_update,
    })
}

async fn get_bot_status(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.manager.get_state(&id) {
        Some(snapshot) => Json(status_payload(&snapshot)).into_response(),
        None => json_error(StatusCode::NOT_FOUND, "Bot not found").into_response(),
    }
}

async fn get_bot_health(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.manager.get_state(&id) {
        Some(snapshot) => {
            let health = snapshot.health.clamp(0.0, 20.0);
            Json(json!({
                "health": snapshot.health,
                "food": snapshot.food,
                "connected": snapshot.connected,
                "hearts": (health / 2.0).ceil() as i32,
                "armor": snapshot.armor_points,
            }))
            .into_response()
        }
        None => json_error(StatusCode::NOT_FOUND, "Bot not found").into_response(),
    }
}

async fn get_bot_position(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.get_state(&id) {
        Some(snapshot) => Json(json!({
            "x": snapshot.position.x.floor(),
            "y": snapshot.position.y.floor(),
            "z": snapshot.position.z.floor(),
            "dimension": snapshot.dimension,
        }))
        .into_response(),
        None => json_error(StatusCode::NOT_FOUND, "Bot not found").into_response(),
    }
}

async fn get_bot_inventory(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.get_state(&id) {
        Some(snapshot) => Json(json!({
            "items": snapshot.inventory,
            "count": snapshot.inventory.len(),
        }))
        .into_response(),
        None => json_error(StatusCode::NOT_FOUND, "Bot not found").into_response(),
    }
}

async fn get_bot_players(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.get_state(&id) {
        Some(snapshot) => Json(json!({
            "players": snapshot.players,
            "count": snapshot.players.len(),
        }))
        .into_response(),
        None => json_error(StatusCode::NOT_FOUND, "Bot not found").into_response(),
    }
}

async fn get_bot_entities(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.get_state(&id) {
        Some(snapshot) => Json(json!({
            "entities": snapshot.entities,
            "count": snapshot.entities.len(),
        }))
        .into_response(),
        None => json_error(StatusCode::NOT_FOUND, "Bot not found").into_response(),
    }
}

// ── Connection control handlers ───────────────────────────────────────

async fn disconnect_bot(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.manager.disconnect(&id) {
        Ok(()) => Json(json!({ "success": true, "message": "Bot disconnected" })).into_response(),
        Err(e) => manager_error(e).into_response(),
    }
}

async fn reconnect_bot(
    State(state): State<AppState>,
    Path(id): Path<String>,
    overrides: Option<Json<ReconnectOverrides>>,
) -> impl IntoResponse {
    let overrides = overrides.map(|Json(o)| o).unwrap_or_default();
    match state.manager.reconnect(&id, overrides) {
        Ok(snapshot) => {
            Json(json!({ "success": true, "botId": id, "state": snapshot })).into_response()
        }
        Err(e) => manager_error(e).into_response(),
    }
}

async fn force_kill_bot(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.manager.force_kill(&id) {
        Ok(()) => Json(json!({ "success": true, "message": "Bot terminated" })).into_response(),
        Err(e) => manager_error(e).into_response(),
    }
}

// ── Action handlers ───────────────────────────────────────────────────

async fn send_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    if req.message.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "Message is required").into_response();
    }
    match state.manager.send_chat(&id, &req.message).await {
        Ok(()) => Json(json!({ "success": true, "message": format!("Sent: {}", req.message) }))
            .into_response(),
        Err(e) => manager_error(e).into_response(),
    }
}

async fn equip_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<EquipRequest>,
) -> impl IntoResponse {
    let result = match (req.slot, req.name) {
        (Some(slot), _) => state.manager.equip_by_slot(&id, slot).await,
        (None, Some(name)) => state.manager.equip_by_name(&id, &name).await,
        (None, None) => {
            return json_error(StatusCode::BAD_REQUEST, "slot or name is required").into_response()
        }
    };
    match result {
        Ok(()) => {
            let snapshot = state.manager.get_state(&id);
            Json(json!({ "success": true, "state": snapshot })).into_response()
        }
        Err(e) => manager_error(e).into_response(),
    }
}

async fn unequip_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UnequipRequest>,
) -> impl IntoResponse {
    let dest = match (req.dest, req.slot) {
        (Some(dest), _) => EquipDestination::parse(&dest),
        (None, Some(slot)) => EquipDestination::from_armor_slot(slot),
        (None, None) => {
            return json_error(StatusCode::BAD_REQUEST, "slot or dest is required").into_response()
        }
    };
    let Some(dest) = dest else {
        return manager_error(ManagerError::InvalidDestination).into_response();
    };
    match state.manager.unequip(&id, dest).await {
        Ok(()) => {
            let snapshot = state.manager.get_state(&id);
            Json(json!({ "success": true, "state": snapshot })).into_response()
        }
        Err(e) => manager_error(e).into_response(),
    }
}

async fn consume_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ConsumeRequest>,
) -> impl IntoResponse {
    let selector = match (req.slot, req.name) {
        (Some(slot), _) => ItemSelector::Slot(slot),
        (None, Some(name)) => ItemSelector::Name(name),
        (None, None) => {
            return json_error(StatusCode::BAD_REQUEST, "slot or name is required").into_response()
        }
    };
    match state.manager.consume_food(&id, selector).await {
        Ok(()) => {
            let snapshot = state.manager.get_state(&id);
            Json(json!({ "success": true, "state": snapshot })).into_response()
        }
        Err(e) => manager_error(e).into_response(),
    }
}

// ── Task handlers ─────────────────────────────────────────────────────

async fn start_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<StartTaskRequest>,
) -> impl IntoResponse {
    if req.name.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "Task name is required").into_response();
    }
    match state.manager.start_task(&id, &req.name) {
        Ok(()) => {
            let snapshot = state.manager.get_state(&id);
            Json(json!({ "success": true, "started": req.name.to_uppercase(), "state": snapshot }))
                .into_response()
        }
        Err(e) => manager_error(e).into_response(),
    }
}

async fn stop_task(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.manager.stop_task(&id) {
        Ok(()) => Json(json!({ "success": true, "stopped": true })).into_response(),
        Err(e) => manager_error(e).into_response(),
    }
}

async fn pause_task(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.manager.pause_task(&id) {
        Ok(()) => Json(json!({ "success": true, "paused": true })).into_response(),
        Err(e) => manager_error(e).into_response(),
    }
}

async fn resume_task(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.manager.resume_task(&id) {
        Ok(()) => Json(json!({ "success": true, "resumed": true })).into_response(),
        Err(e) => manager_error(e).into_response(),
    }
}
