// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Password format checks, lockout, trusted devices, and the security log.

use std::{
    collections::VecDeque,
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{
    cfg::config::Config,
    error::{AuthError, TrustedDeviceError},
    relay::messages::{SecurityLogEntry, TrustedDeviceSummary},
    utils::generate_token,
};

/// True iff `password` is a non-empty string of at least 4 characters.
pub fn validate_password_format(password: &str) -> bool {
    password.chars().count() >= 4
}

struct FailedAttemptsEntry {
    count: u32,
    last_attempt: DateTime<Utc>,
}

struct TrustedDeviceEntry {
    password_hash: String,
    name: String,
    browser: String,
    created_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
}

pub struct LockoutStatus {
    pub locked: bool,
    pub remaining_minutes: u64,
}

pub struct AuthModule {
    failed_attempts: DashMap<String, FailedAttemptsEntry>,
    trusted_devices: DashMap<String, TrustedDeviceEntry>,
    security_log: Mutex<VecDeque<SecurityLogEntry>>,
    log_limit: usize,
    lockout_duration: chrono::Duration,
    max_failed_attempts: u32,
    trusted_device_expiry: chrono::Duration,
}

fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

impl AuthModule {
    pub fn new(cfg: &Config) -> Self {
        Self {
            failed_attempts: DashMap::new(),
            trusted_devices: DashMap::new(),
            security_log: Mutex::new(VecDeque::with_capacity(cfg.security_log_limit)),
            log_limit: cfg.security_log_limit,
            lockout_duration: chrono::Duration::from_std(cfg.lockout_duration)
                .unwrap_or(chrono::Duration::minutes(15)),
            max_failed_attempts: cfg.max_failed_attempts,
            trusted_device_expiry: chrono::Duration::from_std(
                cfg.trusted_device_expiry,
            )
            .unwrap_or(chrono::Duration::days(30)),
        }
    }

    /// Checks whether `password` is currently locked out. A stale entry
    /// (past the lockout window with no new attempts) is cleared as a side
    /// effect.
    pub fn check_lockout(&self, password: &str) -> LockoutStatus {
        let Some(entry) = self.failed_attempts.get(password) else {
            return LockoutStatus {
                locked: false,
                remaining_minutes: 0,
            };
        };
        let elapsed = Utc::now() - entry.last_attempt;
        if entry.count >= self.max_failed_attempts && elapsed < self.lockout_duration {
            let remaining = self.lockout_duration - elapsed;
            // Ceil to whole minutes so "15 minutes remaining" doesn't tick
            // down to 14 a few milliseconds after the lockout starts.
            let remaining_minutes =
                ((remaining.num_seconds().max(0) + 59) / 60).max(1) as u64;
            return LockoutStatus {
                locked: true,
                remaining_minutes,
            };
        }
        if elapsed >= self.lockout_duration {
            drop(entry);
            self.failed_attempts.remove(password);
        }
        LockoutStatus {
            locked: false,
            remaining_minutes: 0,
        }
    }

    pub fn record_failed_attempt(&self, password: &str) {
        let mut entry =
            self.failed_attempts
                .entry(password.to_string())
                .or_insert(FailedAttemptsEntry {
                    count: 0,
                    last_attempt: Utc::now(),
                });
        entry.count += 1;
        entry.last_attempt = Utc::now();
    }

    /// Clears any failed-attempt history for `password` on explicit
    /// success; nothing else clears it early.
    pub fn clear_failed_attempts(&self, password: &str) {
        self.failed_attempts.remove(password);
    }

    /// Stores a hash of `password`, not the password itself, so a later
    /// password rotation silently invalidates the trust rather than
    /// leaving a stale plaintext credential behind.
    pub fn register_trusted_device(&self, password: &str, device_info: &Value) -> String {
        let device_id = generate_token();
        let now = Utc::now();
        let name = device_info
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unknown device")
            .to_string();
        let browser = device_info
            .get("browser")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        self.trusted_devices.insert(device_id.clone(), TrustedDeviceEntry {
            password_hash: hash_password(password),
            name,
            browser,
            created_at: now,
            last_used: now,
        });
        device_id
    }

    /// Validates a previously registered trusted device against the
    /// password it was bound to, rejecting expired or rotated bindings.
    pub fn validate_trusted_device(
        &self,
        password: &str,
        device_id: &str,
    ) -> Result<(), TrustedDeviceError> {
        let mut entry = self
            .trusted_devices
            .get_mut(device_id)
            .ok_or(TrustedDeviceError::NotFound)?;

        if Utc::now() - entry.created_at >= self.trusted_device_expiry {
            drop(entry);
            self.trusted_devices.remove(device_id);
            return Err(TrustedDeviceError::Expired);
        }

        if entry.password_hash != hash_password(password) {
            return Err(TrustedDeviceError::PasswordChanged);
        }

        entry.last_used = Utc::now();
        Ok(())
    }

    /// Invalidates every trusted device bound to `password` (e.g. on a
    /// password rotation the relay itself is told about). Keeps
    /// `validate_trusted_device`'s "Password changed" branch reachable from
    /// outside this process's own registration flow.
    pub fn revoke_trusted_devices_for(&self, password: &str) {
        let target_hash = hash_password(password);
        self.trusted_devices
            .retain(|_, entry| entry.password_hash != target_hash);
    }

    pub fn trusted_devices_for(&self, password: &str) -> Vec<TrustedDeviceSummary> {
        let target_hash = hash_password(password);
        self.trusted_devices
            .iter()
            .filter(|e| e.password_hash == target_hash)
            .map(|e| TrustedDeviceSummary {
                device_id: e.key().clone(),
                name: e.name.clone(),
                browser: e.browser.clone(),
                created_at: e.created_at.timestamp_millis(),
                last_used: e.last_used.timestamp_millis(),
            })
            .collect()
    }

    pub fn log_security_event(
        &self,
        password: &str,
        event: &str,
        details: Value,
        ip: Option<String>,
    ) {
        let mut log = self.security_log.lock().expect("security log poisoned");
        log.push_front(SecurityLogEntry {
            password: password.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            event: event.to_string(),
            details,
            ip,
        });
        while log.len() > self.log_limit {
            log.pop_back();
        }
    }

    /// Entries belonging to `password` only, newest-first — a Controller
    /// must never see another password's Host/Controller activity.
    pub fn security_log_snapshot(&self, password: &str) -> Vec<SecurityLogEntry> {
        self.security_log
            .lock()
            .expect("security log poisoned")
            .iter()
            .filter(|e| e.password == password)
            .cloned()
            .collect()
    }
}

/// Standalone format check used by the `connect_to_computer` handler before
/// it ever looks at the host registry: a malformed password is rejected
/// without touching the Host or its lockout state.
pub fn validate_format_or_err(password: &str) -> Result<(), AuthError> {
    if validate_password_format(password) {
        Ok(())
    } else {
        Err(AuthError::InvalidPasswordFormat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_format_requires_four_chars() {
        assert!(!validate_password_format(""));
        assert!(!validate_password_format("abc"));
        assert!(validate_password_format("abcd"));
    }

    #[test]
    fn lockout_triggers_after_max_attempts() {
        let cfg = Config::default();
        let auth = AuthModule::new(&cfg);
        for _ in 0..cfg.max_failed_attempts {
            assert!(!auth.check_lockout("zzzz").locked);
            auth.record_failed_attempt("zzzz");
        }
        let status = auth.check_lockout("zzzz");
        assert!(status.locked);
        assert_eq!(status.remaining_minutes, 15);
    }

    #[test]
    fn success_clears_failed_attempts() {
        let cfg = Config::default();
        let auth = AuthModule::new(&cfg);
        auth.record_failed_attempt("zzzz");
        auth.record_failed_attempt("zzzz");
        auth.clear_failed_attempts("zzzz");
        assert!(!auth.check_lockout("zzzz").locked);
    }

    #[test]
    fn trusted_device_round_trip() {
        let cfg = Config::default();
        let auth = AuthModule::new(&cfg);
        let id = auth.register_trusted_device("alpha", &serde_json::json!({"name": "phone"}));
        assert!(auth.validate_trusted_device("alpha", &id).is_ok());
        assert_eq!(
            auth.validate_trusted_device("alpha", "no-such-device"),
            Err(TrustedDeviceError::NotFound)
        );
    }

    #[test]
    fn trusted_device_rejects_changed_password() {
        let cfg = Config::default();
        let auth = AuthModule::new(&cfg);
        let id = auth.register_trusted_device("alpha", &serde_json::json!({}));
        assert_eq!(
            auth.validate_trusted_device("beta", &id),
            Err(TrustedDeviceError::PasswordChanged)
        );
    }

    #[test]
    fn security_log_caps_at_limit() {
        let mut cfg = Config::default();
        cfg.security_log_limit = 3;
        let auth = AuthModule::new(&cfg);
        for i in 0..5 {
            auth.log_security_event("alpha", "test_event", serde_json::json!({"i": i}), None);
        }
        let snapshot = auth.security_log_snapshot("alpha");
        assert_eq!(snapshot.len(), 3);
        // newest-first
        assert_eq!(snapshot[0].details["i"], 4);
    }

    #[test]
    fn security_log_is_scoped_per_password() {
        let cfg = Config::default();
        let auth = AuthModule::new(&cfg);
        auth.log_security_event("alpha", "connect_failed", serde_json::json!({}), None);
        auth.log_security_event("beta", "connect_failed", serde_json::json!({}), None);

        let alpha_only = auth.security_log_snapshot("alpha");
        assert_eq!(alpha_only.len(), 1);
        assert!(auth.security_log_snapshot("gamma").is_empty());
    }
}
