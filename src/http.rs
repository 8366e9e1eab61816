// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The plain-HTTP surface alongside the WebSocket endpoint: a health check
//! and the Wake-on-LAN trigger.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    state::AppState,
    wol::{DEFAULT_WOL_PORT, send_magic_packet},
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/status", get(status))
        .route("/wol", post(wake_on_lan))
        .with_state(state)
}

#[derive(Serialize)]
struct RootResponse {
    service: &'static str,
    version: &'static str,
    features: Vec<&'static str>,
}

async fn root() -> impl IntoResponse {
    Json(RootResponse {
        service: "relay-server",
        version: VERSION,
        features: vec![
            "host-registration",
            "controller-relay",
            "file-transfer",
            "file-browsing",
            "file-watching",
            "trusted-devices",
            "wake-on-lan",
        ],
    })
}

#[derive(Serialize)]
struct SessionsSummary {
    total: usize,
    active: usize,
    expired: usize,
    #[serde(rename = "uniqueUsers")]
    unique_users: usize,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
    computers: usize,
    clients: usize,
    sessions: SessionsSummary,
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let total = state.sessions.len();
    Json(StatusResponse {
        status: "online",
        version: VERSION,
        computers: state.registry.host_count(),
        clients: state.registry.controller_count(),
        sessions: SessionsSummary {
            total,
            // Every session retained past the periodic sweep is, by
            // construction, not idle-expired, so `active == total` here.
            active: total,
            expired: 0,
            unique_users: state.sessions.unique_passwords(),
        },
    })
}

#[derive(Deserialize)]
struct WolRequest {
    mac: String,
    #[serde(rename = "broadcastIp", default = "default_broadcast_ip")]
    broadcast_ip: String,
    #[serde(default = "default_wol_port")]
    port: u16,
}

fn default_broadcast_ip() -> String {
    "255.255.255.255".to_string()
}

fn default_wol_port() -> u16 {
    DEFAULT_WOL_PORT
}

#[derive(Serialize)]
struct WolSuccessResponse {
    success: bool,
    mac: String,
    target: String,
}

#[derive(Serialize)]
struct WolErrorResponse {
    error: &'static str,
    details: String,
}

async fn wake_on_lan(Json(req): Json<WolRequest>) -> impl IntoResponse {
    let target = format!("{}:{}", req.broadcast_ip, req.port);
    match send_magic_packet(&req.mac, &req.broadcast_ip, req.port).await {
        Ok(()) => {
            info!(mac = %req.mac, %target, "sent wake-on-lan magic packet");
            Json(WolSuccessResponse {
                success: true,
                mac: req.mac,
                target,
            })
            .into_response()
        },
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(WolErrorResponse {
                error: "Failed to send wake-on-lan packet",
                details: err.to_string(),
            }),
        )
            .into_response(),
    }
}
