// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-socket bookkeeping shared by every component.
//!
//! `ConnId` is the server-local, never-client-visible key into the
//! registry maps, separate from the client-visible `sessionId` (see
//! [`crate::session`]), which is the correlation token that survives a
//! reconnect within its lifetime even though the underlying socket (and
//! its `ConnId`) does not.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::relay::messages::ServerMessage;

/// Monotonically increasing, process-local connection identifier. Never
/// sent to a client.
pub type ConnId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_conn_id() -> ConnId {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// What a transport has become. A transport is latched the first time it
/// successfully registers or attaches and may never change classification
/// afterwards.
#[derive(Debug, Clone)]
pub enum Connection {
    Unassigned,
    Host {
        password: String,
    },
    Controller {
        password: String,
        session_id: String,
    },
}

impl Connection {
    pub fn is_unassigned(&self) -> bool {
        matches!(self, Connection::Unassigned)
    }

    pub fn as_host_password(&self) -> Option<&str> {
        match self {
            Connection::Host { password } => Some(password),
            _ => None,
        }
    }

    pub fn as_controller(&self) -> Option<(&str, &str)> {
        match self {
            Connection::Controller {
                password,
                session_id,
            } => Some((password, session_id)),
            _ => None,
        }
    }
}

/// A handle to one live transport: an outbound queue plus heartbeat state.
///
/// Sending through `outbound` never blocks the registry lock that handed it
/// out — the channel is unbounded on the producer side, so handler code
/// never writes to the socket directly, only ever hands a message to this
/// queue and moves on.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnId,
    pub outbound: mpsc::UnboundedSender<ServerMessage>,
    is_alive: Arc<AtomicBool>,
    /// Cancelled to force this socket's read loop to exit even though
    /// nothing arrived from the peer — used to close a Host that has just
    /// been evicted by a takeover (spec.md §4.A: "send it a `replaced`
    /// notice and close it").
    cancel: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(id: ConnId, outbound: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            id,
            outbound,
            is_alive: Arc::new(AtomicBool::new(true)),
            cancel: CancellationToken::new(),
        }
    }

    /// Best-effort send; a closed/dropped receiver means the socket task has
    /// already exited, so the failure is silently swallowed rather than
    /// propagated.
    pub fn send(&self, msg: ServerMessage) {
        let _ = self.outbound.send(msg);
    }

    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Clears the alive flag and reports whether it was set, for the
    /// heartbeat sweep: it clears-and-pings every interval, then terminates
    /// whatever didn't get marked alive again by the next sweep.
    pub fn take_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Forces this connection's socket task to exit on its next poll,
    /// regardless of what the peer sends (or never sends).
    pub fn force_close(&self) {
        self.cancel.cancel();
    }

    /// A clone of the token the socket task selects on to notice a forced
    /// close from elsewhere in the process.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether [`ConnectionHandle::force_close`] has been called on this
    /// connection (or any of its clones) yet.
    pub fn is_force_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
