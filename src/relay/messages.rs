// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Wire schema for the relay's single WebSocket endpoint.
//!
//! Every inbound frame decodes into [`ClientMessage`] by its `type` field;
//! an unrecognized `type` fails to deserialize and the caller logs + drops
//! the frame rather than closing the connection. Every outbound frame is a
//! [`ServerMessage`]. Passthrough payloads that this server never interprets
//! (file-browse results, watcher events, arbitrary `data` blobs) are kept as
//! `serde_json::Value`/`Map` rather than modeled field-by-field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SessionDestroyReason;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    Pong,
    RegisterComputer {
        password: String,
        #[serde(default)]
        info: Value,
    },
    ConnectToComputer {
        password: String,
        #[serde(default, rename = "trustDevice")]
        trust_device: bool,
        #[serde(default, rename = "deviceInfo")]
        device_info: Value,
    },
    AutoLogin {
        #[serde(rename = "deviceId")]
        device_id: String,
        password: String,
    },
    Relay {
        data: Value,
    },
    Screenshot {
        data: Value,
    },
    Result {
        data: Value,
    },
    GetSessions,
    KickSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Logout,
    GetSecurityLog,
    GetTrustedDevices,
    GetConnectedUsers,
    FileUploadStart {
        #[serde(rename = "fileName")]
        file_name: String,
        #[serde(rename = "fileSize")]
        file_size: u64,
        #[serde(rename = "fileType")]
        file_type: String,
    },
    FileChunk {
        #[serde(rename = "transferId")]
        transfer_id: String,
        #[serde(rename = "chunkIndex")]
        chunk_index: u64,
        data: String,
    },
    FileUploadComplete {
        #[serde(rename = "transferId")]
        transfer_id: String,
    },
    FileCancel {
        #[serde(rename = "transferId")]
        transfer_id: String,
    },
    FileDownloadRequest {
        #[serde(rename = "filePath")]
        file_path: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    BrowseFiles {
        path: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    FileOperation {
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    StartFileWatcher {
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    StopFileWatcher {
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    GetWatchedFolders,
    FileDownloadResponse {
        #[serde(rename = "requesterId")]
        requester_id: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    FileOperationResult {
        #[serde(rename = "requesterId")]
        requester_id: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    BrowseResultRelay {
        #[serde(rename = "requesterId")]
        requester_id: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    WatcherResult {
        #[serde(rename = "requesterId")]
        requester_id: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    WatchedFolders {
        #[serde(rename = "requesterId")]
        requester_id: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    FileChangeEvent {
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
}

/// One entry of a `sessions_list` / `connected_users` / `users_changed`
/// payload.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "deviceInfo")]
    pub device_info: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityLogEntry {
    /// Which password's Host/Controller activity this entry belongs to.
    /// Never sent on the wire — `get_security_log` scopes by it, but the
    /// caller already knows its own password and must not learn anyone
    /// else's.
    #[serde(skip)]
    pub password: String,
    pub timestamp: i64,
    pub event: String,
    pub details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrustedDeviceSummary {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub name: String,
    pub browser: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "lastUsed")]
    pub last_used: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ping,
    Pong,
    Registered {
        success: bool,
    },
    Replaced {
        message: String,
    },
    Connected {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "deviceId", skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
        #[serde(rename = "expiresIn")]
        expires_in: u64,
    },
    AutoLoginFailed {
        reason: String,
    },
    Error {
        message: String,
    },
    Command {
        #[serde(rename = "sessionId")]
        session_id: String,
        data: Value,
    },
    Screenshot {
        data: Value,
    },
    Result {
        data: Value,
    },
    SessionsList {
        sessions: Vec<SessionSummary>,
    },
    KickResult {
        success: bool,
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    SessionExpired {
        reason: SessionDestroyReason,
        message: String,
    },
    SecurityLog {
        entries: Vec<SecurityLogEntry>,
    },
    TrustedDevices {
        devices: Vec<TrustedDeviceSummary>,
    },
    ConnectedUsers {
        users: Vec<SessionSummary>,
        #[serde(rename = "totalCount")]
        total_count: usize,
    },
    FileUploadReady {
        success: bool,
        #[serde(rename = "transferId")]
        transfer_id: String,
    },
    FileProgress {
        #[serde(rename = "transferId")]
        transfer_id: String,
        progress: u8,
        speed: f64,
    },
    FileUploadSuccess {
        #[serde(rename = "transferId")]
        transfer_id: String,
    },
    FileCommand {
        command: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    BrowseResult {
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    FileOperationResult {
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    WatcherResult {
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    WatchedFolders {
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    FileDownloadResponse {
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    FileChangeEvent {
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    UsersChanged {
        users: Vec<SessionSummary>,
        #[serde(rename = "totalCount")]
        total_count: usize,
    },
    ComputerDisconnected {
        message: String,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .expect("ServerMessage variants are always representable as JSON")
    }
}

/// Maps a Host's directed-response `type` to the `type` delivered to the
/// matching controller. Every row except `browse_result_relay` is delivered
/// under its own name; `browse_result_relay` drops the `_relay` marker, so
/// the requester receives `browse_result`, not `browse_result_relay`.
pub fn directed_response_outgoing_type(incoming: &str) -> &'static str {
    match incoming {
        "browse_result_relay" => "browse_result",
        "file_operation_result" => "file_operation_result",
        "watcher_result" => "watcher_result",
        "watched_folders" => "watched_folders",
        "file_download_response" => "file_download_response",
        other => {
            debug_assert!(false, "unexpected directed response type: {other}");
            "error"
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_roundtrips() {
        let v: ClientMessage =
            serde_json::from_str(r#"{"type":"ping"}"#).expect("decode");
        assert!(matches!(v, ClientMessage::Ping));
    }

    #[test]
    fn connect_to_computer_decodes_camel_case_fields() {
        let raw = r#"{"type":"connect_to_computer","password":"alpha","trustDevice":true,"deviceInfo":{"name":"phone"}}"#;
        let v: ClientMessage = serde_json::from_str(raw).expect("decode");
        match v {
            ClientMessage::ConnectToComputer {
                password,
                trust_device,
                device_info,
            } => {
                assert_eq!(password, "alpha");
                assert!(trust_device);
                assert_eq!(device_info["name"], "phone");
            },
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_fails_to_decode() {
        let raw = r#"{"type":"not_a_real_type"}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn browse_result_relay_renames_to_browse_result() {
        assert_eq!(
            directed_response_outgoing_type("browse_result_relay"),
            "browse_result"
        );
        assert_eq!(
            directed_response_outgoing_type("file_operation_result"),
            "file_operation_result"
        );
    }

    #[test]
    fn server_message_serializes_tagged() {
        let msg = ServerMessage::Registered { success: true };
        let json: Value = serde_json::from_str(&msg.to_json()).expect("valid json");
        assert_eq!(json["type"], "registered");
        assert_eq!(json["success"], true);
    }
}
