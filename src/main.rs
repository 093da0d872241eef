//! JiraniPay Reconciliation Service - Main Application Entry Point
//!
//! REST API server that initiates payments through two external
//! processors (a card/mobile-money gateway and a crypto on-ramp
//! aggregator) and reconciles their webhook confirmations against the
//! internal ledger and order state.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Processors**: one `PaymentProcessor` implementation per integration
//! - **Format**: JSON requests/responses; webhook bodies verified as raw bytes
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations
//! 4. Construct the processor clients
//! 5. Build HTTP router with routes and middleware
//! 6. Start server on configured port

mod config;
mod currency;
mod db;
mod error;
mod handlers;
mod models;
mod processors;
mod reference;
mod services;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::db::DbPool;
use crate::processors::gateway::GatewayProcessor;
use crate::processors::onramp::OnrampProcessor;

/// Shared application state, cloned per request.
///
/// Processors are behind `Arc` so the router clone stays cheap; they are
/// constructed once at startup and never reconfigured.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub gateway: Arc<GatewayProcessor>,
    pub onramp: Arc<OnrampProcessor>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    // Construct processor clients
    let state = AppState {
        gateway: Arc::new(GatewayProcessor::new(pool.clone(), &config)?),
        onramp: Arc::new(OnrampProcessor::new(pool.clone(), &config)?),
        pool,
    };

    let app = Router::new()
        // Public health endpoint
        .route("/health", get(handlers::health::health_check))
        // Payment API
        .route(
            "/api/v1/payments/gateway/initiate",
            post(handlers::payments::initiate_gateway_payment),
        )
        .route(
            "/api/v1/payments/onramp/initiate",
            post(handlers::payments::initiate_onramp_payment),
        )
        .route(
            "/api/v1/payments/{id}/retry",
            post(handlers::payments::retry_payment),
        )
        .route(
            "/api/v1/payments/{id}",
            get(handlers::payments::get_payment),
        )
        // Processor callback endpoints
        .route(
            "/webhooks/gateway",
            post(handlers::webhooks::gateway_webhook),
        )
        .route("/webhooks/onramp", post(handlers::webhooks::onramp_webhook))
        // Add distributed tracing middleware for observability
        .layer(TraceLayer::new_for_http())
        // Share pool and processors with all handlers via State extraction
        .with_state(state);

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Start serving HTTP requests
    // This blocks forever, handling requests concurrently with tokio
    axum::serve(listener, app).await?;

    Ok(())
}
