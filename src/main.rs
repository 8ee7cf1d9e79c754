//! lease-gateway server entry point.
//!
//! Wires the stores, the event transport, and the cloud client into the
//! service graph, starts the background consumers, and serves the REST
//! API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use lease_gateway::api;
use lease_gateway::app_state::AppState;
use lease_gateway::cloud::aws::AwsClient;
use lease_gateway::cloud::broker::InProcessBroker;
use lease_gateway::cloud::{AccountManager, Transport};
use lease_gateway::config::{EventTransport, GatewayConfig};
use lease_gateway::persistence::Stores;
use lease_gateway::persistence::memory::MemoryStore;
use lease_gateway::persistence::postgres::PostgresStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = GatewayConfig::from_env().context("failed to load configuration")?;
    tracing::info!(
        addr = %config.listen_addr,
        transport = %config.event_transport,
        persistence = config.persistence_enabled,
        "starting lease-gateway"
    );

    let stores = connect_stores(&config).await?;

    let aws = Arc::new(AwsClient::from_config(&config).await);
    let manager: Arc<dyn AccountManager> = Arc::clone(&aws) as Arc<dyn AccountManager>;

    let broker = InProcessBroker::new(config.event_bus_capacity);
    let transport: Arc<dyn Transport> = match config.event_transport {
        EventTransport::InProcess => Arc::new(broker.clone()) as Arc<dyn Transport>,
        EventTransport::Aws => aws as Arc<dyn Transport>,
    };

    let app_state = AppState::new(&config, &stores, &transport, &manager);

    if config.event_transport == EventTransport::InProcess {
        tokio::spawn(Arc::clone(&app_state.metrics).run(broker.subscribe()));
    }
    if config.lease_expiry_check_interval_secs > 0 {
        let period = Duration::from_secs(config.lease_expiry_check_interval_secs);
        tokio::spawn(Arc::clone(&app_state.leases).run_expiry_sweep(period));
    }

    let app = Router::new()
        .merge(api::build_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("server stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn connect_stores(config: &GatewayConfig) -> anyhow::Result<Stores> {
    if !config.persistence_enabled {
        tracing::info!("using in-memory store");
        return Ok(Stores::shared(&Arc::new(MemoryStore::new())));
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .min_connections(config.database_min_connections)
        .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
        .connect(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;
    let store = PostgresStore::new(pool);
    store.migrate().await.context("failed to run migrations")?;
    tracing::info!("using PostgreSQL store");
    Ok(Stores::shared(&Arc::new(store)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
