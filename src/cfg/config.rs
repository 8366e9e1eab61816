// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime limits and timers for the relay server.
///
/// Every field has a default matching the literal values used throughout the
/// spec's end-to-end scenarios, but all of them may be overridden (e.g. in
/// tests that want a short `session_timeout` to exercise expiry without
/// sleeping for 30 minutes).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Idle duration after which a session is destroyed.
    pub session_timeout: Duration,
    /// Maximum concurrent sessions per password; oldest is evicted on
    /// overflow.
    pub max_sessions_per_user: usize,
    /// Failed `connect_to_computer` attempts within `lockout_duration`
    /// before a password is locked out.
    pub max_failed_attempts: u32,
    /// Window during which failed attempts accumulate / a lockout holds.
    pub lockout_duration: Duration,
    /// Lifetime of a trusted-device credential from its creation.
    pub trusted_device_expiry: Duration,
    /// Capacity of the newest-first security log ring buffer.
    pub security_log_limit: usize,
    /// Capacity of the per-password recent-files FIFO.
    pub recent_files_limit: usize,
    /// Interval between heartbeat ping sweeps.
    pub heartbeat_interval: Duration,
    /// Interval between idle-session sweeps.
    pub cleanup_interval: Duration,
    /// Grace period a completed file transfer is retained before purge.
    pub transfer_grace_period: Duration,
    /// Largest allowed upload, in bytes.
    pub max_file_size: u64,
    /// MIME types allowed verbatim, in addition to any `text/*` prefix.
    pub allowed_mime_types: Vec<String>,
    /// Maximum accepted WebSocket frame size.
    pub max_ws_message_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(30 * 60),
            max_sessions_per_user: 5,
            max_failed_attempts: 5,
            lockout_duration: Duration::from_secs(15 * 60),
            trusted_device_expiry: Duration::from_secs(30 * 24 * 60 * 60),
            security_log_limit: 500,
            recent_files_limit: 50,
            heartbeat_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(60),
            transfer_grace_period: Duration::from_secs(60),
            max_file_size: 500 * 1024 * 1024,
            allowed_mime_types: default_allowed_mime_types(),
            max_ws_message_size: 10 * 1024 * 1024,
        }
    }
}

fn default_allowed_mime_types() -> Vec<String> {
    [
        "application/pdf",
        "application/zip",
        "application/json",
        "application/octet-stream",
        "image/png",
        "image/jpeg",
        "image/gif",
        "image/webp",
        "audio/mpeg",
        "video/mp4",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Config {
    /// True if `mime` may be uploaded: an exact allowlist match, or any
    /// `text/*` type.
    pub fn mime_allowed(&self, mime: &str) -> bool {
        mime.starts_with("text/") || self.allowed_mime_types.iter().any(|m| m == mime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_prefix_always_allowed() {
        let cfg = Config::default();
        assert!(cfg.mime_allowed("text/plain"));
        assert!(cfg.mime_allowed("text/csv"));
    }

    #[test]
    fn allowlisted_mime_is_allowed() {
        let cfg = Config::default();
        assert!(cfg.mime_allowed("image/png"));
        assert!(!cfg.mime_allowed("application/x-msdownload"));
    }
}
