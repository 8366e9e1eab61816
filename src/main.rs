// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use relay_server::{
    cfg::{cli::resolve_port, config::Config, logger::init_logger},
    http, lifecycle, state::AppState, ws,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _logger_guard = init_logger().context("failed to initialize logging")?;

    let config = Config::default();
    let state = AppState::new(config);

    lifecycle::spawn_heartbeat_task(Arc::clone(&state));
    lifecycle::spawn_cleanup_task(Arc::clone(&state));

    let app = http::router(Arc::clone(&state))
        .merge(ws::router(Arc::clone(&state)))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let port = resolve_port();
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, "relay server listening");
    axum::serve(listener, app)
        .await
        .context("server error")?;

    Ok(())
}
