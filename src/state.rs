// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared application state handed to every axum handler, tying the five
//! components together into the one object `main.rs` builds and threads
//! through every background task and socket handler.

use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    auth::AuthModule, cfg::config::Config, connection::ConnId, connection::ConnectionHandle,
    registry::Registry, session::SessionManager, transfer::TransferEngine,
};

pub struct AppState {
    pub config: Config,
    pub registry: Registry,
    pub auth: AuthModule,
    pub sessions: SessionManager,
    pub transfers: Arc<TransferEngine>,
    /// Every live transport, Host/Controller/Unassigned alike, keyed by its
    /// connection id — the heartbeat sweep walks this rather than the
    /// registry, since an unassigned socket has no password to be found
    /// under.
    pub sockets: DashMap<ConnId, ConnectionHandle>,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        let transfers = Arc::new(TransferEngine::new(&config));
        let sessions = SessionManager::new(&config);
        let auth = AuthModule::new(&config);
        Arc::new(Self {
            registry: Registry::new(),
            auth,
            sessions,
            transfers,
            sockets: DashMap::new(),
            config,
        })
    }
}
