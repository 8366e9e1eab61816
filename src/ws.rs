// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The single WebSocket endpoint every Host and Controller connects
//! through. One task per socket: a read loop that deserializes and
//! dispatches inbound frames, and a writer loop draining the connection's
//! outbound queue, so a slow or malicious peer can never block a send
//! meant for somebody else.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use tracing::warn;

use crate::{
    connection::{Connection, ConnectionHandle, next_conn_id},
    lifecycle::reap_connection,
    relay::{messages::ClientMessage, router as relay_router},
    state::AppState,
};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.config.max_ws_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = next_conn_id();
    let (tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = ConnectionHandle::new(conn_id, tx);
    state.sockets.insert(conn_id, handle.clone());

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if sink.send(Message::Text(msg.to_json())).await.is_err() {
                break;
            }
        }
    });

    let mut connection = Connection::Unassigned;
    let cancel = handle.cancellation();

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.next() => frame,
        };
        let Some(frame) = frame else {
            break;
        };
        let Ok(frame) = frame else {
            break;
        };
        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    handle.mark_alive();
                    if let relay_router::RouterOutcome::Close = relay_router::dispatch(
                        &state,
                        conn_id,
                        &mut connection,
                        &handle,
                        client_msg,
                    ) {
                        break;
                    }
                },
                Err(err) => {
                    warn!(%err, conn_id, "dropping frame with unrecognized type");
                },
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {
                handle.mark_alive();
            },
        }
    }

    // A forced close (S1 host takeover) enqueues a notice on `outbound`
    // immediately before cancelling; give the writer task a brief window to
    // drain and flush it before its socket is torn down.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    writer.abort();
    reap_connection(&state, conn_id);
}
