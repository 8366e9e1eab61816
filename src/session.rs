// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Session creation, validation, touch, expiry, and eviction.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;

use crate::{
    cfg::config::Config,
    connection::ConnectionHandle,
    error::SessionDestroyReason,
    relay::messages::{ServerMessage, SessionSummary},
    utils::generate_token,
};

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub password: String,
    pub device_info: Value,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Outcome of [`SessionManager::create_session`]: the new session plus, if
/// the per-password cap was exceeded, the session that was evicted to make
/// room (the oldest by `createdAt`).
pub struct CreateOutcome {
    pub session: Session,
    pub evicted: Option<Session>,
}

pub struct SessionManager {
    sessions: DashMap<String, Session>,
    /// password -> session ids in creation order, oldest first. Kept in
    /// lock-step with `sessions` so "oldest session for this password" and
    /// "every session for this password" are O(k) rather than a full scan.
    by_password: DashMap<String, Vec<String>>,
    max_sessions_per_user: usize,
    session_timeout: chrono::Duration,
}

impl SessionManager {
    pub fn new(cfg: &Config) -> Self {
        Self {
            sessions: DashMap::new(),
            by_password: DashMap::new(),
            max_sessions_per_user: cfg.max_sessions_per_user,
            session_timeout: chrono::Duration::from_std(cfg.session_timeout)
                .unwrap_or(chrono::Duration::minutes(30)),
        }
    }

    /// Creates a new session for `password`. If the password is already at
    /// capacity, the oldest session is evicted from both indices before the
    /// new one is inserted.
    pub fn create_session(&self, password: &str, device_info: Value) -> CreateOutcome {
        let now = Utc::now();
        let session = Session {
            id: generate_token(),
            password: password.to_string(),
            device_info,
            created_at: now,
            last_activity: now,
        };

        let mut evicted = None;
        {
            let mut ids = self.by_password.entry(password.to_string()).or_default();
            if ids.len() >= self.max_sessions_per_user {
                let oldest_id = ids.remove(0);
                if let Some((_, s)) = self.sessions.remove(&oldest_id) {
                    evicted = Some(s);
                }
            }
            ids.push(session.id.clone());
        }
        self.sessions.insert(session.id.clone(), session.clone());

        CreateOutcome { session, evicted }
    }

    /// False if absent or idle-expired. An expired session is destroyed as
    /// a side effect.
    pub fn validate_session(&self, id: &str) -> bool {
        let Some(session) = self.sessions.get(id) else {
            return false;
        };
        if Utc::now() - session.last_activity > self.session_timeout {
            drop(session);
            self.remove_session(id);
            return false;
        }
        true
    }

    pub fn touch_session(&self, id: &str) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.last_activity = Utc::now();
        }
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|s| s.clone())
    }

    fn remove_session(&self, id: &str) -> Option<Session> {
        let (_, session) = self.sessions.remove(id)?;
        if let Some(mut ids) = self.by_password.get_mut(&session.password) {
            ids.retain(|sid| sid != id);
        }
        Some(session)
    }

    /// Removes from all indices and, if `handle` is still open, sends it
    /// `session_expired{reason}`.
    pub fn destroy_session(
        &self,
        id: &str,
        reason: SessionDestroyReason,
        handle: Option<&ConnectionHandle>,
    ) -> Option<Session> {
        let session = self.remove_session(id)?;
        if let Some(handle) = handle {
            handle.send(ServerMessage::SessionExpired {
                reason,
                message: reason.message().to_string(),
            });
        }
        Some(session)
    }

    pub fn sessions_for_password(&self, password: &str) -> Vec<SessionSummary> {
        self.by_password
            .get(password)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.sessions.get(id.as_str()))
                    .map(|s| SessionSummary {
                        session_id: s.id.clone(),
                        device_info: s.device_info.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count_for_password(&self, password: &str) -> usize {
        self.by_password.get(password).map(|ids| ids.len()).unwrap_or(0)
    }

    /// Total number of live sessions across every password, for the status
    /// endpoint.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of distinct passwords with at least one live session, for the
    /// `/status` snapshot's `uniqueUsers` field.
    pub fn unique_passwords(&self) -> usize {
        self.by_password.iter().filter(|e| !e.value().is_empty()).count()
    }

    /// Periodic sweep: destroys every expired session, returning their ids
    /// so the caller can notify whatever transport handle is still
    /// attached to them.
    pub fn sweep_expired(&self) -> Vec<String> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| now - e.last_activity > self.session_timeout)
            .map(|e| e.id.clone())
            .collect();
        for id in &expired {
            self.remove_session(id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_evicts_oldest() {
        let mut cfg = Config::default();
        cfg.max_sessions_per_user = 2;
        let mgr = SessionManager::new(&cfg);

        let a = mgr.create_session("alpha", Value::Null).session;
        let b = mgr.create_session("alpha", Value::Null).session;
        let outcome = mgr.create_session("alpha", Value::Null);

        assert_eq!(outcome.evicted.as_ref().map(|s| &s.id), Some(&a.id));
        assert!(!mgr.validate_session(&a.id));
        assert!(mgr.validate_session(&b.id));
        assert!(mgr.validate_session(&outcome.session.id));
        assert_eq!(mgr.count_for_password("alpha"), 2);
    }

    #[test]
    fn touch_extends_validity() {
        let cfg = Config::default();
        let mgr = SessionManager::new(&cfg);
        let s = mgr.create_session("alpha", Value::Null).session;
        mgr.touch_session(&s.id);
        assert!(mgr.validate_session(&s.id));
    }

    #[test]
    fn destroy_removes_from_every_index() {
        let cfg = Config::default();
        let mgr = SessionManager::new(&cfg);
        let s = mgr.create_session("alpha", Value::Null).session;
        mgr.destroy_session(&s.id, SessionDestroyReason::Manual, None);
        assert!(!mgr.validate_session(&s.id));
        assert_eq!(mgr.count_for_password("alpha"), 0);
    }

    #[test]
    fn unknown_session_is_invalid() {
        let cfg = Config::default();
        let mgr = SessionManager::new(&cfg);
        assert!(!mgr.validate_session("does-not-exist"));
    }
}
