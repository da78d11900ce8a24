//! Driver-specific JSON control panel.
//!
//! ASCOM's Alpaca surface has no verb for picking a serial port, adjusting
//! the zero point, or reading recent logs, so this is a small separate
//! axum router bound on [`crate::config::GuiConfig::port`] alongside the
//! Alpaca server, talking to the same [`FocuserController`].

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::config::OperatingMode;
use crate::controller::FocuserController;
use crate::logging::LogRing;

#[derive(Clone)]
pub struct GuiState {
    pub controller: Arc<FocuserController>,
    pub logs: LogRing,
    pub scan_timeout: std::time::Duration,
}

pub fn router(state: GuiState) -> Router {
    Router::new()
        .route("/gui/status", get(status_handler))
        .route("/gui/ports", get(ports_handler))
        .route("/gui/scan", get(ports_handler))
        .route("/gui/connect", post(connect_handler))
        .route("/gui/disconnect", post(disconnect_handler))
        .route("/gui/move", post(move_handler))
        .route("/gui/halt", post(halt_handler))
        .route("/gui/set-zero", post(set_zero_handler))
        .route("/gui/set-max", post(set_max_handler))
        .route("/gui/set-min", post(set_min_handler))
        .route("/gui/set-max-increment", post(set_max_increment_handler))
        .route("/gui/set-backlash", post(set_backlash_handler))
        .route("/gui/logs", get(logs_handler))
        .route("/gui/logs/clear", post(logs_clear_handler))
        .route("/gui/mode", get(get_mode_handler).post(set_mode_handler))
        .with_state(state)
}

fn ok() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

fn err(message: impl std::fmt::Display) -> impl IntoResponse {
    (
        axum::http::StatusCode::BAD_REQUEST,
        Json(json!({ "ok": false, "error": message.to_string() })),
    )
}

async fn status_handler(State(state): State<GuiState>) -> impl IntoResponse {
    let cached = state.controller.get_cached_state().await;
    Json(json!({
        "connected": state.controller.is_available(),
        "is_moving": cached.is_moving,
        "position": cached.position,
        "target": cached.target,
    }))
}

/// Probe available serial ports. Blocking
/// enumeration runs off the async executor via `spawn_blocking`.
async fn ports_handler(State(state): State<GuiState>) -> impl IntoResponse {
    let result = tokio::time::timeout(
        state.scan_timeout,
        tokio::task::spawn_blocking(tokio_serial::available_ports),
    )
    .await;

    match result {
        Ok(Ok(Ok(ports))) => {
            let names: Vec<String> = ports.into_iter().map(|p| p.port_name).collect();
            Json(json!({ "ports": names })).into_response()
        }
        Ok(Ok(Err(e))) => err(e).into_response(),
        Ok(Err(e)) => err(e).into_response(),
        Err(_) => err("port scan timed out").into_response(),
    }
}

#[derive(Deserialize)]
struct ConnectRequest {
    port: Option<String>,
}

async fn connect_handler(
    State(state): State<GuiState>,
    Json(req): Json<ConnectRequest>,
) -> impl IntoResponse {
    if let Some(port) = req.port {
        if let Err(e) = state.controller.set_port(port).await {
            return err(e).into_response();
        }
    }
    match state.controller.connect().await {
        Ok(()) => ok().into_response(),
        Err(e) => err(e).into_response(),
    }
}

async fn disconnect_handler(State(state): State<GuiState>) -> impl IntoResponse {
    match state.controller.disconnect().await {
        Ok(()) => ok().into_response(),
        Err(e) => err(e).into_response(),
    }
}

#[derive(Deserialize)]
struct MoveRequest {
    target: i32,
}

async fn move_handler(
    State(state): State<GuiState>,
    Json(req): Json<MoveRequest>,
) -> impl IntoResponse {
    match state.controller.move_absolute(req.target).await {
        Ok(()) => ok().into_response(),
        Err(e) => err(e).into_response(),
    }
}

async fn halt_handler(State(state): State<GuiState>) -> impl IntoResponse {
    match state.controller.halt().await {
        Ok(()) => ok().into_response(),
        Err(e) => err(e).into_response(),
    }
}

#[derive(Deserialize)]
struct LogicalValueRequest {
    value: i32,
}

async fn set_zero_handler(
    State(state): State<GuiState>,
    Json(req): Json<LogicalValueRequest>,
) -> impl IntoResponse {
    match state.controller.set_zero(req.value).await {
        Ok(()) => ok().into_response(),
        Err(e) => err(e).into_response(),
    }
}

#[derive(Deserialize)]
struct U32ValueRequest {
    value: u32,
}

async fn set_max_handler(
    State(state): State<GuiState>,
    Json(req): Json<U32ValueRequest>,
) -> impl IntoResponse {
    match state.controller.set_max_travel(req.value).await {
        Ok(()) => ok().into_response(),
        Err(e) => err(e).into_response(),
    }
}

async fn set_min_handler(
    State(state): State<GuiState>,
    Json(req): Json<U32ValueRequest>,
) -> impl IntoResponse {
    match state.controller.set_min_position(req.value).await {
        Ok(()) => ok().into_response(),
        Err(e) => err(e).into_response(),
    }
}

async fn set_max_increment_handler(
    State(state): State<GuiState>,
    Json(req): Json<U32ValueRequest>,
) -> impl IntoResponse {
    match state.controller.set_max_increment(req.value).await {
        Ok(()) => ok().into_response(),
        Err(e) => err(e).into_response(),
    }
}

#[derive(Deserialize)]
struct BacklashRequest {
    value: i16,
}

async fn set_backlash_handler(
    State(state): State<GuiState>,
    Json(req): Json<BacklashRequest>,
) -> impl IntoResponse {
    match state.controller.set_backlash(req.value).await {
        Ok(()) => ok().into_response(),
        Err(e) => err(e).into_response(),
    }
}

async fn logs_handler(State(state): State<GuiState>) -> impl IntoResponse {
    Json(state.logs.snapshot())
}

async fn logs_clear_handler(State(state): State<GuiState>) -> impl IntoResponse {
    state.logs.clear();
    ok()
}

async fn get_mode_handler(State(state): State<GuiState>) -> impl IntoResponse {
    Json(json!({ "mode": state.controller.get_mode().await }))
}

#[derive(Deserialize)]
struct ModeRequest {
    mode: OperatingMode,
}

async fn set_mode_handler(
    State(state): State<GuiState>,
    Json(req): Json<ModeRequest>,
) -> impl IntoResponse {
    match state.controller.set_mode(req.mode).await {
        Ok(()) => ok().into_response(),
        Err(e) => err(e).into_response(),
    }
}
