// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The single dispatch point every inbound frame passes through. One
//! function, one big match on the message `type`.

use serde_json::{Map, Value, json};
use tracing::warn;

use crate::{
    auth::validate_format_or_err,
    connection::{Connection, ConnectionHandle},
    error::SessionDestroyReason,
    lifecycle::broadcast_users_changed,
    relay::messages::{ClientMessage, ServerMessage, directed_response_outgoing_type},
    state::AppState,
};

/// What the socket task should do after a message has been handled.
pub enum RouterOutcome {
    Continue,
    Close,
}

fn send_error(handle: &ConnectionHandle, message: impl Into<String>) {
    handle.send(ServerMessage::Error {
        message: message.into(),
    });
}

fn inject_requester(mut extra: Map<String, Value>, session_id: &str) -> Map<String, Value> {
    extra.insert("requesterId".to_string(), Value::String(session_id.to_string()));
    extra
}

fn build_directed_response(incoming_type: &str, extra: Map<String, Value>) -> ServerMessage {
    match directed_response_outgoing_type(incoming_type) {
        "browse_result" => ServerMessage::BrowseResult { extra },
        "file_operation_result" => ServerMessage::FileOperationResult { extra },
        "watcher_result" => ServerMessage::WatcherResult { extra },
        "watched_folders" => ServerMessage::WatchedFolders { extra },
        "file_download_response" => ServerMessage::FileDownloadResponse { extra },
        _ => ServerMessage::Error {
            message: "internal relay error".to_string(),
        },
    }
}

/// Delivers a Host's directed response to the one Controller whose session
/// matches `requester_id`. Silently dropped if that controller is no longer
/// attached.
fn deliver_directed(state: &AppState, password: &str, requester_id: &str, msg: ServerMessage) {
    if let Some(handle) = state.registry.controller_by_session(password, requester_id) {
        handle.send(msg);
    }
}

pub fn dispatch(
    state: &AppState,
    conn_id: crate::connection::ConnId,
    connection: &mut Connection,
    handle: &ConnectionHandle,
    msg: ClientMessage,
) -> RouterOutcome {
    match msg {
        ClientMessage::Ping => handle.send(ServerMessage::Pong),
        ClientMessage::Pong => handle.mark_alive(),

        ClientMessage::RegisterComputer { password, info } => {
            if let Err(err) = validate_format_or_err(&password) {
                send_error(handle, err.to_string());
                return RouterOutcome::Continue;
            }
            let evicted = state
                .registry
                .register_host(password.clone(), info, conn_id, handle.clone());
            if let Some(evicted) = evicted {
                evicted.send(ServerMessage::Replaced {
                    message: "Another computer connected with same password".to_string(),
                });
                evicted.force_close();
            }
            *connection = Connection::Host { password: password.clone() };
            handle.send(ServerMessage::Registered { success: true });
            state.auth.log_security_event(
                &password,
                "host_registered",
                json!({ "connId": conn_id }),
                None,
            );
        },

        ClientMessage::ConnectToComputer {
            password,
            trust_device,
            device_info,
        } => {
            if let Err(err) = validate_format_or_err(&password) {
                send_error(handle, err.to_string());
                return RouterOutcome::Continue;
            }
            let lockout = state.auth.check_lockout(&password);
            if lockout.locked {
                send_error(
                    handle,
                    format!(
                        "Too many attempts. Try again in {} minutes",
                        lockout.remaining_minutes
                    ),
                );
                return RouterOutcome::Continue;
            }
            if !state.registry.host_exists(&password) {
                state.auth.record_failed_attempt(&password);
                state.auth.log_security_event(
                    &password,
                    "connect_failed",
                    json!({ "reason": "computer_not_found" }),
                    None,
                );
                send_error(handle, "Computer not found or offline");
                return RouterOutcome::Continue;
            }
            state.auth.clear_failed_attempts(&password);
            connect_controller(state, conn_id, connection, handle, &password, device_info, trust_device);
        },

        ClientMessage::AutoLogin { device_id, password } => {
            if let Err(err) = state.auth.validate_trusted_device(&password, &device_id) {
                handle.send(ServerMessage::AutoLoginFailed {
                    reason: err.to_string(),
                });
                return RouterOutcome::Continue;
            }
            if !state.registry.host_exists(&password) {
                handle.send(ServerMessage::AutoLoginFailed {
                    reason: "Computer not found or offline".to_string(),
                });
                return RouterOutcome::Continue;
            }
            connect_controller(state, conn_id, connection, handle, &password, Value::Null, false);
        },

        ClientMessage::Relay { data } => match connection.as_controller() {
            Some((password, session_id)) => {
                if !state.sessions.validate_session(session_id) {
                    handle.send(ServerMessage::SessionExpired {
                        reason: SessionDestroyReason::Expired,
                        message: SessionDestroyReason::Expired.message().to_string(),
                    });
                    state.registry.remove_controller(conn_id);
                    return RouterOutcome::Close;
                }
                state.sessions.touch_session(session_id);
                if let Some(host) = state.registry.host_handle(password) {
                    host.send(ServerMessage::Command {
                        session_id: session_id.to_string(),
                        data,
                    });
                }
            },
            None => send_error(handle, "Not connected to a computer"),
        },

        ClientMessage::Screenshot { data } => broadcast_from_host(state, connection, handle, |_| {
            ServerMessage::Screenshot { data: data.clone() }
        }),

        ClientMessage::Result { data } => broadcast_from_host(state, connection, handle, |_| {
            ServerMessage::Result { data: data.clone() }
        }),

        ClientMessage::GetSessions => match connection.as_controller() {
            Some((password, _)) => {
                let sessions = state.sessions.sessions_for_password(password);
                handle.send(ServerMessage::SessionsList { sessions });
            },
            None => send_error(handle, "Not connected to a computer"),
        },

        ClientMessage::KickSession { session_id } => match connection.as_controller() {
            Some((password, _)) => {
                let target = state.registry.controller_by_session(password, &session_id);
                let success = target.is_some();
                if let Some(target) = &target {
                    state.sessions.destroy_session(
                        &session_id,
                        SessionDestroyReason::Kicked,
                        Some(target),
                    );
                    state.registry.remove_controller(target.id);
                    target.force_close();
                }
                if success {
                    broadcast_users_changed(state, password);
                }
                handle.send(ServerMessage::KickResult { success, session_id });
            },
            None => send_error(handle, "Not connected to a computer"),
        },

        ClientMessage::Logout => {
            if let Some((password, session_id)) = connection.as_controller() {
                let password = password.to_string();
                state.sessions.destroy_session(
                    session_id,
                    SessionDestroyReason::Manual,
                    None,
                );
                state.registry.remove_controller(conn_id);
                broadcast_users_changed(state, &password);
            }
            return RouterOutcome::Close;
        },

        ClientMessage::GetSecurityLog => match connection_password(connection) {
            Some(password) => {
                let entries = state.auth.security_log_snapshot(password);
                handle.send(ServerMessage::SecurityLog { entries });
            },
            None => send_error(handle, "Not registered"),
        },

        ClientMessage::GetTrustedDevices => match connection_password(connection) {
            Some(password) => {
                let devices = state.auth.trusted_devices_for(password);
                handle.send(ServerMessage::TrustedDevices { devices });
            },
            None => send_error(handle, "Not registered"),
        },

        ClientMessage::GetConnectedUsers => match connection_password(connection) {
            Some(password) => {
                let users = crate::lifecycle::connected_users_summary(state, password);
                let total_count = users.len();
                handle.send(ServerMessage::ConnectedUsers { users, total_count });
            },
            None => send_error(handle, "Not registered"),
        },

        ClientMessage::FileUploadStart {
            file_name,
            file_size,
            file_type,
        } => {
            if connection.as_controller().is_none() {
                send_error(handle, "Not connected to a computer");
                return RouterOutcome::Continue;
            }
            match state
                .transfers
                .start_upload(&state.config, &file_name, file_size, &file_type)
            {
                Ok(transfer_id) => handle.send(ServerMessage::FileUploadReady {
                    success: true,
                    transfer_id,
                }),
                Err(err) => send_error(handle, err.to_string()),
            }
        },

        ClientMessage::FileChunk {
            transfer_id,
            chunk_index,
            data,
        } => {
            if connection.as_controller().is_none() {
                send_error(handle, "Not connected to a computer");
                return RouterOutcome::Continue;
            }
            match state.transfers.add_chunk(&transfer_id, chunk_index, &data) {
                Ok(progress) => handle.send(ServerMessage::FileProgress {
                    transfer_id,
                    progress: progress.progress,
                    speed: progress.speed,
                }),
                Err(err) => send_error(handle, err.to_string()),
            }
        },

        ClientMessage::FileUploadComplete { transfer_id } => {
            let Some(password) = connection.as_controller().map(|(password, _)| password.to_string()) else {
                send_error(handle, "Not connected to a computer");
                return RouterOutcome::Continue;
            };
            match state.transfers.complete_upload(&transfer_id, &password) {
                Ok(completed) => {
                    if let Some(host) = state.registry.host_handle(&password) {
                        let payload =
                            crate::transfer::file_receive_payload(&transfer_id, &completed);
                        let extra = match payload {
                            Value::Object(map) => map,
                            _ => Map::new(),
                        };
                        host.send(ServerMessage::FileCommand {
                            command: "file_receive".to_string(),
                            extra,
                        });
                    }
                    state.transfers.schedule_purge(transfer_id.clone());
                    handle.send(ServerMessage::FileUploadSuccess { transfer_id });
                },
                Err(err) => send_error(handle, err.to_string()),
            }
        },

        ClientMessage::FileCancel { transfer_id } => {
            if connection.as_controller().is_none() {
                send_error(handle, "Not connected to a computer");
                return RouterOutcome::Continue;
            }
            state.transfers.cancel(&transfer_id);
        },

        ClientMessage::FileDownloadRequest { file_path, extra } => {
            forward_to_host(state, connection, handle, "file_download_request", {
                let mut map = extra;
                map.insert("filePath".to_string(), Value::String(file_path));
                map
            });
        },

        ClientMessage::BrowseFiles { path, extra } => {
            forward_to_host(state, connection, handle, "browse_files", {
                let mut map = extra;
                map.insert("path".to_string(), Value::String(path));
                map
            });
        },

        ClientMessage::FileOperation { extra } => {
            forward_to_host(state, connection, handle, "file_operation", extra);
        },

        ClientMessage::StartFileWatcher { extra } => {
            forward_to_host(state, connection, handle, "start_file_watcher", extra);
        },

        ClientMessage::StopFileWatcher { extra } => {
            forward_to_host(state, connection, handle, "stop_file_watcher", extra);
        },

        ClientMessage::GetWatchedFolders => {
            forward_to_host(state, connection, handle, "get_watched_folders", Map::new());
        },

        ClientMessage::FileDownloadResponse { requester_id, extra } => {
            deliver_host_response(state, connection, "file_download_response", &requester_id, extra);
        },
        ClientMessage::FileOperationResult { requester_id, extra } => {
            deliver_host_response(state, connection, "file_operation_result", &requester_id, extra);
        },
        ClientMessage::BrowseResultRelay { requester_id, extra } => {
            deliver_host_response(state, connection, "browse_result_relay", &requester_id, extra);
        },
        ClientMessage::WatcherResult { requester_id, extra } => {
            deliver_host_response(state, connection, "watcher_result", &requester_id, extra);
        },
        ClientMessage::WatchedFolders { requester_id, extra } => {
            deliver_host_response(state, connection, "watched_folders", &requester_id, extra);
        },

        ClientMessage::FileChangeEvent { extra } => {
            broadcast_from_host(state, connection, handle, move |_| ServerMessage::FileChangeEvent {
                extra: extra.clone(),
            });
        },
    }

    RouterOutcome::Continue
}

/// A Host's directed response (`file_download_response`, `file_operation_result`,
/// `browse_result_relay`, `watcher_result`, `watched_folders`) delivered to
/// the single Controller named by `requester_id`, under the outgoing `type`
/// [`directed_response_outgoing_type`] maps it to.
fn deliver_host_response(
    state: &AppState,
    connection: &Connection,
    incoming_type: &str,
    requester_id: &str,
    extra: Map<String, Value>,
) {
    match connection.as_host_password() {
        Some(password) => {
            deliver_directed(
                state,
                password,
                requester_id,
                build_directed_response(incoming_type, extra),
            );
        },
        None => warn!("directed response from a non-host connection, dropped"),
    }
}

fn connection_password(connection: &Connection) -> Option<&str> {
    match connection {
        Connection::Host { password } => Some(password),
        Connection::Controller { password, .. } => Some(password),
        Connection::Unassigned => None,
    }
}

fn connect_controller(
    state: &AppState,
    conn_id: crate::connection::ConnId,
    connection: &mut Connection,
    handle: &ConnectionHandle,
    password: &str,
    device_info: Value,
    trust_device: bool,
) {
    let outcome = state.sessions.create_session(password, device_info.clone());
    if let Some(evicted) = outcome.evicted {
        if let Some(evicted_handle) = state.registry.controller_by_session(password, &evicted.id) {
            evicted_handle.send(ServerMessage::SessionExpired {
                reason: SessionDestroyReason::MaxSessionsExceeded,
                message: SessionDestroyReason::MaxSessionsExceeded.message().to_string(),
            });
            state.registry.remove_controller(evicted_handle.id);
        }
    }

    state
        .registry
        .attach_controller(password, conn_id, &outcome.session.id, handle.clone());
    *connection = Connection::Controller {
        password: password.to_string(),
        session_id: outcome.session.id.clone(),
    };

    let device_id = if trust_device {
        Some(state.auth.register_trusted_device(password, &device_info))
    } else {
        None
    };

    handle.send(ServerMessage::Connected {
        session_id: outcome.session.id,
        device_id,
        expires_in: state.config.session_timeout.as_secs(),
    });
    broadcast_users_changed(state, password);
    state.auth.log_security_event(
        password,
        "controller_connected",
        json!({ "connId": conn_id }),
        None,
    );
}

fn broadcast_from_host(
    state: &AppState,
    connection: &Connection,
    handle: &ConnectionHandle,
    build: impl Fn(&str) -> ServerMessage,
) {
    match connection.as_host_password() {
        Some(password) => {
            let msg = build(password);
            for controller in state.registry.controller_handles(password) {
                controller.send(msg.clone());
            }
        },
        None => send_error(handle, "Only the registered computer may broadcast"),
    }
}

fn forward_to_host(
    state: &AppState,
    connection: &Connection,
    handle: &ConnectionHandle,
    command: &str,
    extra: Map<String, Value>,
) {
    match connection.as_controller() {
        Some((password, session_id)) => {
            let Some(host) = state.registry.host_handle(password) else {
                send_error(handle, "Computer not found or offline");
                return;
            };
            host.send(ServerMessage::FileCommand {
                command: command.to_string(),
                extra: inject_requester(extra, session_id),
            });
        },
        None => send_error(handle, "Not connected to a computer"),
    }
}
