//! tunnel-store HTTP Server
//!
//! Axum-based server tying the pieces together: the WebSocket gateway the
//! storefront talks to, the settlement webhook the payment collaborator
//! posts to, and the periodic purge of expired invoices.

mod config;
mod fulfill;
mod gateway;
mod handlers;
mod notify;
mod state;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tunnel_core::InvoiceRegistry;
use tunnel_payments::{HttpRateSource, LnbitsClient, PriceOracle};
use tunnel_wgapi::HttpVpnManager;

use crate::config::ServerConfig;
use crate::fulfill::Orchestrator;
use crate::gateway::{ConnectionMap, ws_handler};
use crate::handlers::{health_check, invoice_webhook};
use crate::notify::{LogMailSink, Notifier, NoopNotifier, TelegramNotifier};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();
    let config = ServerConfig::from_env()?;

    // Collaborator clients
    let payments = Arc::new(LnbitsClient::from_env()?);
    let oracle = Arc::new(PriceOracle::new(Arc::new(HttpRateSource::from_env()?)));
    let vpn = Arc::new(HttpVpnManager::from_env()?);

    let notifier: Arc<dyn Notifier> = match TelegramNotifier::from_env() {
        Some(telegram) => {
            tracing::info!("✓ Telegram notifications configured");
            Arc::new(telegram)
        }
        None => {
            tracing::warn!("⚠ Telegram not configured - operator notifications disabled");
            tracing::warn!("  Set TELEGRAM_TOKEN and TELEGRAM_CHATID in .env");
            Arc::new(NoopNotifier)
        }
    };

    // Shared state
    let registry = Arc::new(InvoiceRegistry::new(config.max_pending_invoices));
    let connections = Arc::new(ConnectionMap::new());
    let orchestrator = Arc::new(Orchestrator::new(
        registry.clone(),
        connections.clone(),
        payments,
        oracle.clone(),
        vpn,
        notifier,
        config.prices.clone(),
        config.webhook_url.clone(),
        config.bw_limit_mb,
    ));

    // Periodic sweep of expired invoices
    {
        let registry = registry.clone();
        let period = std::time::Duration::from_secs(config.purge_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                registry.purge_expired(chrono::Utc::now());
            }
        });
    }

    let state = AppState {
        connections,
        orchestrator,
        registry,
        oracle,
        mail: Arc::new(LogMailSink),
    };

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .route(&config.webhook_path, post(invoice_webhook))
        // Static files (storefront assets)
        .nest_service(
            "/",
            tower_http::services::ServeDir::new(&config.static_dir),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 tunnel-store server running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health  - Health check");
    tracing::info!("  GET  /ws      - Storefront WebSocket");
    tracing::info!("  POST {}  - Settlement webhook", config.webhook_path);
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
