//! Escrow backend — entry point.
//!
//! Wires the settlement core to an HTTP settlement collaborator, drains
//! the core's journal stream into SQLite through a background task, and
//! exposes an Axum REST API for frontend / admin consumption.

mod api;
mod config;
mod db;
mod errors;
mod journal;
mod settlement;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use escrow_protocol::{AccountId, EscrowProtocol, SystemClock};
use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use settlement::HttpSettlementGateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    // Load config from environment.
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    // HTTP client shared by every settlement call.
    let client = Client::builder()
        .timeout(Duration::from_secs(config.settlement_timeout_secs))
        .build()?;
    let gateway = HttpSettlementGateway::new(client, config.settlement_url.clone());

    let protocol = EscrowProtocol::new(
        gateway,
        SystemClock,
        AccountId::new(config.platform_account.clone()),
    )
    .with_settlement_timeout(Duration::from_secs(config.settlement_timeout_secs));

    // ─── Background journal writer ────────────────────────
    let journal_rx = protocol.ledger().subscribe().await;
    tokio::spawn(journal::run(pool.clone(), journal_rx));

    // ─── REST API ─────────────────────────────────────────
    let state = Arc::new(api::ApiState { protocol, pool });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/projects", post(api::create_project))
        .route("/projects/:id", get(api::get_project))
        .route("/projects/:id/deposits", post(api::deposit))
        .route("/projects/:id/worker", post(api::assign_worker))
        .route(
            "/projects/:id/milestones/:index/submit",
            post(api::submit_milestone),
        )
        .route(
            "/projects/:id/milestones/:index/approve",
            post(api::approve_milestone),
        )
        .route(
            "/projects/:id/milestones/:index/reject",
            post(api::reject_milestone),
        )
        .route(
            "/projects/:id/milestones/:index/release",
            post(api::release_milestone),
        )
        .route("/projects/:id/cancel", post(api::cancel_project))
        .route("/projects/:id/events", get(api::get_project_events))
        .route("/events", get(api::get_all_events))
        .route("/accounts/:id/withdrawable", get(api::get_withdrawable))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
