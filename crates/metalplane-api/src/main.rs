// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Metalplane API server.
//!
//! Serves the VPC and instance provisioning endpoints backed by PostgreSQL.
//!
//! The binary starts without a workflow backend. No site gateway ships with
//! it, so [`UnconfiguredGateway`] is installed and every create, update,
//! reboot and delete fails with "Failed to retrieve client for Site" (500)
//! after its transaction is rolled back. Deployments embed the library and
//! pass their own [`WorkflowGateway`] to [`Coordinator::new`].

use std::sync::Arc;

use tracing::{info, warn};

use metalplane_api::config::Config;
use metalplane_api::coordinator::Coordinator;
use metalplane_api::http::{self, AppState};
use metalplane_api::workflow::{UnconfiguredGateway, WorkflowGateway};
use metalplane_core::migrations;
use metalplane_core::store::PostgresStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "metalplane_api=info,metalplane_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        workflow_timeout_secs = config.coordinator.workflow_timeout.as_secs(),
        "Starting Metalplane API"
    );

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;

    info!("Connected to database");

    migrations::run(&pool).await?;

    info!("Database migrations applied");

    let gateway: Arc<dyn WorkflowGateway> = Arc::new(UnconfiguredGateway);
    warn!(
        gateway = gateway.gateway_type(),
        "No site workflow gateway configured, provisioning requests will fail"
    );

    let store = Arc::new(PostgresStore::new(pool));
    let coordinator = Coordinator::new(store, gateway, config.coordinator.clone());
    let app = http::router(AppState::new(coordinator));

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "HTTP server ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await?;

    info!("Metalplane API shut down");

    Ok(())
}
