// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The connection registry: which password a Host is registered under,
//! and which Controllers are currently attached to it.
//!
//! Two top-level maps — `hosts: password -> HostRecord` and
//! `controllers: ConnId -> ControllerRecord` — plus, inside each
//! `HostRecord`, the set of controllers currently attached to it. Multi-map
//! mutations (register, attach, detach) are serialized under one coarse
//! `std::sync::Mutex`; the lock is never held across an `.await` — every
//! method here clones the handles it needs to notify out of the map before
//! the guard drops, and only sends afterwards.

use std::sync::Mutex;

use dashmap::DashMap;
use serde_json::Value;

use crate::connection::{ConnId, ConnectionHandle};

#[derive(Debug, Clone)]
pub struct HostRecord {
    pub conn_id: ConnId,
    pub handle: ConnectionHandle,
    pub info: Value,
    pub controllers: DashMap<ConnId, ControllerRecord>,
}

#[derive(Debug, Clone)]
pub struct ControllerRecord {
    pub conn_id: ConnId,
    pub handle: ConnectionHandle,
    pub password: String,
    pub session_id: String,
}

#[derive(Default)]
pub struct Registry {
    hosts: DashMap<String, HostRecord>,
    /// Reverse index: which password (if any) a controller connection is
    /// attached to, so detach-by-conn-id doesn't need a full scan of
    /// `hosts`.
    controller_password: DashMap<ConnId, String>,
    /// Reverse index: which password a Host connection is currently
    /// registered under, for heartbeat-driven disconnect handling.
    host_password: DashMap<ConnId, String>,
    lock: Mutex<()>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host_exists(&self, password: &str) -> bool {
        self.hosts.contains_key(password)
    }

    /// Number of currently registered Hosts, for the `/status` snapshot.
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Number of currently attached Controllers across every Host, for the
    /// `/status` snapshot.
    pub fn controller_count(&self) -> usize {
        self.controller_password.len()
    }

    pub fn host_handle(&self, password: &str) -> Option<ConnectionHandle> {
        self.hosts.get(password).map(|h| h.handle.clone())
    }

    pub fn host_info(&self, password: &str) -> Option<Value> {
        self.hosts.get(password).map(|h| h.info.clone())
    }

    /// Registers `handle` as the Host for `password`. At most one Host
    /// record exists per password: if one already exists, it is evicted
    /// first, and the evicted handle is returned so the caller can send it
    /// a `replaced` notice and close the socket outside the lock.
    pub fn register_host(
        &self,
        password: String,
        info: Value,
        conn_id: ConnId,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let _guard = self.lock.lock().expect("registry lock poisoned");
        let previous = self.hosts.remove(&password).map(|(_, rec)| {
            self.host_password.remove(&rec.conn_id);
            rec.handle
        });
        self.host_password.insert(conn_id, password.clone());
        self.hosts.insert(password, HostRecord {
            conn_id,
            handle,
            info,
            controllers: DashMap::new(),
        });
        previous
    }

    /// Attaches `handle` as a Controller of the Host for `password`. Fails
    /// (returns `false`) if no Host is currently registered for it.
    pub fn attach_controller(
        &self,
        password: &str,
        conn_id: ConnId,
        session_id: &str,
        handle: ConnectionHandle,
    ) -> bool {
        let _guard = self.lock.lock().expect("registry lock poisoned");
        let Some(host) = self.hosts.get(password) else {
            return false;
        };
        host.controllers.insert(conn_id, ControllerRecord {
            conn_id,
            handle,
            password: password.to_string(),
            session_id: session_id.to_string(),
        });
        self.controller_password
            .insert(conn_id, password.to_string());
        true
    }

    /// All controller handles currently attached to the Host for
    /// `password`, for broadcast.
    pub fn controller_handles(&self, password: &str) -> Vec<ConnectionHandle> {
        self.hosts
            .get(password)
            .map(|h| h.controllers.iter().map(|e| e.handle.clone()).collect())
            .unwrap_or_default()
    }

    /// Snapshot of `{sessionId, deviceInfo}` pairs for presence/listing
    /// replies; `deviceInfo` itself is carried by the session manager, not
    /// the registry, so callers join against [`crate::session::SessionManager`].
    pub fn controller_session_ids(&self, password: &str) -> Vec<String> {
        self.hosts
            .get(password)
            .map(|h| {
                h.controllers
                    .iter()
                    .map(|e| e.session_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The single controller handle whose session id matches `session_id`,
    /// for directed-response delivery.
    pub fn controller_by_session(
        &self,
        password: &str,
        session_id: &str,
    ) -> Option<ConnectionHandle> {
        let host = self.hosts.get(password)?;
        host.controllers
            .iter()
            .find(|e| e.session_id == session_id)
            .map(|e| e.handle.clone())
    }

    /// Removes the Host for `password`, returning every controller handle
    /// that was attached to it so the caller can notify and unattach them
    /// outside the lock. The controllers themselves stay connected but
    /// unassigned.
    pub fn remove_host(&self, password: &str) -> Vec<ConnectionHandle> {
        let _guard = self.lock.lock().expect("registry lock poisoned");
        let Some((_, rec)) = self.hosts.remove(password) else {
            return Vec::new();
        };
        self.host_password.remove(&rec.conn_id);
        let handles = rec.controllers.iter().map(|e| e.handle.clone()).collect();
        for entry in rec.controllers.iter() {
            self.controller_password.remove(&entry.conn_id);
        }
        handles
    }

    /// Which password (if any) `conn_id` is currently the live Host for.
    pub fn host_password_of(&self, conn_id: ConnId) -> Option<String> {
        self.host_password.get(&conn_id).map(|e| e.clone())
    }

    /// Which password (if any) a Controller with this `session_id` is
    /// attached under. A linear scan over Hosts, acceptable since this only
    /// runs from the idle-session cleanup sweep, not the hot message path.
    pub fn controller_by_session_password(&self, session_id: &str) -> Option<String> {
        self.hosts
            .iter()
            .find(|h| h.controllers.iter().any(|c| c.session_id == session_id))
            .map(|h| h.key().clone())
    }

    /// Removes a Controller by connection id. Returns the password it was
    /// attached to, if any, so the caller can broadcast a presence change.
    pub fn remove_controller(&self, conn_id: ConnId) -> Option<String> {
        let _guard = self.lock.lock().expect("registry lock poisoned");
        let (_, password) = self.controller_password.remove(&conn_id)?;
        if let Some(host) = self.hosts.get(&password) {
            host.controllers.remove(&conn_id);
        }
        Some(password)
    }

    /// True only if `conn_id` is still the live Host connection for
    /// `password` — used to reject a stale Host socket that lost a race
    /// against a takeover (S1).
    pub fn is_current_host(&self, password: &str, conn_id: ConnId) -> bool {
        self.hosts
            .get(password)
            .is_some_and(|h| h.conn_id == conn_id)
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::connection::next_conn_id;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<crate::relay::messages::ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(next_conn_id(), tx), rx)
    }

    #[test]
    fn register_host_evicts_previous() {
        let reg = Registry::new();
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();

        let prev = reg.register_host("alpha".into(), Value::Null, h1.id, h1.clone());
        assert!(prev.is_none());
        assert!(reg.is_current_host("alpha", h1.id));

        let prev = reg.register_host("alpha".into(), Value::Null, h2.id, h2.clone());
        assert_eq!(prev.unwrap().id, h1.id);
        assert!(reg.is_current_host("alpha", h2.id));
        assert!(!reg.is_current_host("alpha", h1.id));
    }

    #[test]
    fn attach_controller_requires_existing_host() {
        let reg = Registry::new();
        let (ctrl, _rx) = handle();
        assert!(!reg.attach_controller("alpha", ctrl.id, "sess-1", ctrl.clone()));

        let (host, _rx2) = handle();
        reg.register_host("alpha".into(), Value::Null, host.id, host);
        assert!(reg.attach_controller("alpha", ctrl.id, "sess-1", ctrl));
        assert_eq!(reg.controller_handles("alpha").len(), 1);
    }

    #[test]
    fn remove_host_returns_its_controllers_and_unassigns_them() {
        let reg = Registry::new();
        let (host, _rx) = handle();
        let (c1, _rx1) = handle();
        let (c2, _rx2) = handle();
        reg.register_host("alpha".into(), Value::Null, host.id, host);
        reg.attach_controller("alpha", c1.id, "s1", c1.clone());
        reg.attach_controller("alpha", c2.id, "s2", c2.clone());

        let notified = reg.remove_host("alpha");
        assert_eq!(notified.len(), 2);
        assert!(!reg.host_exists("alpha"));
        // Controllers remain indexed as detached (no password) so a later
        // remove_controller call is a harmless no-op, not a dangling ref.
        assert!(reg.remove_controller(c1.id).is_none());
    }

    #[test]
    fn remove_controller_returns_its_password_once() {
        let reg = Registry::new();
        let (host, _rx) = handle();
        let (ctrl, _rx2) = handle();
        reg.register_host("alpha".into(), Value::Null, host.id, host);
        reg.attach_controller("alpha", ctrl.id, "s1", ctrl.clone());

        assert_eq!(reg.remove_controller(ctrl.id).as_deref(), Some("alpha"));
        assert_eq!(reg.controller_handles("alpha").len(), 0);
        assert!(reg.remove_controller(ctrl.id).is_none());
    }

    #[test]
    fn directed_lookup_finds_exactly_one() {
        let reg = Registry::new();
        let (host, _rx) = handle();
        let (c1, _rx1) = handle();
        let (c2, _rx2) = handle();
        reg.register_host("alpha".into(), Value::Null, host.id, host);
        reg.attach_controller("alpha", c1.id, "s1", c1.clone());
        reg.attach_controller("alpha", c2.id, "s2", c2.clone());

        let found = reg.controller_by_session("alpha", "s1").expect("found");
        assert_eq!(found.id, c1.id);
        assert!(reg.controller_by_session("alpha", "no-such-session").is_none());
    }
}
