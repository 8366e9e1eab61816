// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Heartbeat sweeps, idle-session cleanup, and presence broadcast.
//!
//! Two independent periodic tasks are spawned from `main`, each running
//! alongside the socket tasks rather than being folded into per-message
//! handling.

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    error::SessionDestroyReason,
    relay::messages::{ServerMessage, SessionSummary},
    state::AppState,
};

/// Every `heartbeat_interval`, clears each socket's alive flag and pings it;
/// anything still not marked alive by the *next* sweep (i.e. that sent
/// nothing, not even a `pong`, for a full interval) is dropped and reaped
/// from the registry.
pub fn spawn_heartbeat_task(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.heartbeat_interval);
        loop {
            ticker.tick().await;
            let dead: Vec<_> = state
                .sockets
                .iter()
                .filter(|e| !e.value().take_alive())
                .map(|e| *e.key())
                .collect();

            for conn_id in dead {
                reap_connection(&state, conn_id);
            }

            for entry in state.sockets.iter() {
                entry.value().send(ServerMessage::Ping);
            }
        }
    });
}

/// Every `cleanup_interval`, destroys every idle-expired session and, if its
/// transport is still attached, notifies it.
pub fn spawn_cleanup_task(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.cleanup_interval);
        loop {
            ticker.tick().await;
            let expired = state.sessions.sweep_expired();
            if expired.is_empty() {
                continue;
            }
            debug!(count = expired.len(), "swept expired sessions");
            for session_id in expired {
                if let Some(password) = state.registry.controller_by_session_password(&session_id)
                {
                    let handle = state.registry.controller_by_session(&password, &session_id);
                    if let Some(handle) = &handle {
                        handle.send(ServerMessage::SessionExpired {
                            reason: SessionDestroyReason::Expired,
                            message: SessionDestroyReason::Expired.message().to_string(),
                        });
                    }
                    if let Some(conn_id) = handle.as_ref().map(|h| h.id) {
                        state.registry.remove_controller(conn_id);
                        broadcast_users_changed(&state, &password);
                    }
                }
            }
        }
    });
}

/// Removes `conn_id` from every index it could be present in and, if it was
/// attached as a Controller, broadcasts the updated presence list to the
/// rest of that Host's controllers. Used by the heartbeat sweep and by the
/// WebSocket task's own disconnect path.
pub fn reap_connection(state: &AppState, conn_id: crate::connection::ConnId) {
    state.sockets.remove(&conn_id);
    if let Some(password) = state.registry.remove_controller(conn_id) {
        broadcast_users_changed(state, &password);
        return;
    }
    if let Some(password) = state.registry.host_password_of(conn_id) {
        let notified = state.registry.remove_host(&password);
        for handle in notified {
            handle.send(ServerMessage::ComputerDisconnected {
                message: "The computer has disconnected".to_string(),
            });
        }
        info!(password = %password, "host disconnected, controllers detached");
    }
}

/// Builds the current `{sessionId, deviceInfo}` roster for `password`'s
/// controllers and sends `users_changed` to the Host and, independently, to
/// every attached Controller.
pub fn broadcast_users_changed(state: &AppState, password: &str) {
    let users = connected_users_summary(state, password);
    let total_count = users.len();
    let msg = ServerMessage::UsersChanged {
        users,
        total_count,
    };
    if let Some(host) = state.registry.host_handle(password) {
        host.send(msg.clone());
    }
    for handle in state.registry.controller_handles(password) {
        handle.send(msg.clone());
    }
}

pub fn connected_users_summary(state: &AppState, password: &str) -> Vec<SessionSummary> {
    state
        .registry
        .controller_session_ids(password)
        .into_iter()
        .filter_map(|session_id| state.sessions.get(&session_id))
        .map(|s| SessionSummary {
            session_id: s.id,
            device_info: s.device_info,
        })
        .collect()
}
