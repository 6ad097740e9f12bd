#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Caixa API Server
//!
//! HTTP front door for the billing reconciliation service: the provider
//! webhook endpoint plus a health check.

mod config;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use caixa_billing::{BillingService, PgStore};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{config::Config, routes::create_router, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,caixa_api=debug,caixa_billing=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Caixa API Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Connect the document store
    tracing::info!("Connecting to database...");
    let store = PgStore::connect(&config.database_url).await?;
    tracing::info!("Database connection established");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(store.pool()).await?;
    tracing::info!("Database migrations complete");

    // Build the billing service from the environment
    let billing = Arc::new(BillingService::from_env(Arc::new(store))?);
    tracing::info!("Billing service initialized");

    let state = AppState::new(config.clone(), billing);

    // Build the router
    let app = create_router(state).layer(TraceLayer::new_for_http());

    // Parse bind address
    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    // Start the server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
