//! Twin Event Bridge Binary
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin twin-bridge
//! ```
//!
//! # Configuration
//!
//! `./config/config.yaml` (or `DIGITAL_EGIZ_CONFIG`), overridden by
//! `DIGITAL_EGIZ_<SECTION>_<KEY>` variables, e.g.
//! `DIGITAL_EGIZ_KAFKA_BROKERS`. A `.env` file in the working directory or
//! any ancestor is loaded first.
//!
//! ## Tracing
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint
//! - `OTEL_SERVICE_NAME`: Service name
//! - `RUST_LOG`: Overrides `log.level`

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use twin_bridge::application::services::MlPolicy;
use twin_bridge::infrastructure::broker::BrokerManager;
use twin_bridge::infrastructure::health::{HealthServer, HealthServerState};
use twin_bridge::infrastructure::notifications::NotificationHub;
use twin_bridge::infrastructure::persistence::{self, PgCatalog, PgTimeSeriesStore};
use twin_bridge::infrastructure::registry::{
    RegistryHttpClient, RegistryWsClient, RegistryWsConfig,
};
use twin_bridge::infrastructure::telemetry;
use twin_bridge::{Bridge, Config, Pipeline, PipelineDeps, init_metrics};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Twin bridge failed to start: {e:#}");
            eprintln!("twin-bridge: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();
    let config = Config::load().context("loading configuration")?;

    let _telemetry_guard = telemetry::init(&config.log).context("initializing telemetry")?;
    init_metrics().context("installing metrics recorder")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.server.environment,
        "Starting twin bridge"
    );
    log_config(&config);

    let pool = persistence::connect(&config.database)
        .await
        .context("connecting to database")?;
    persistence::run_migrations(&pool)
        .await
        .context("running migrations")?;

    let broker = Arc::new(BrokerManager::new(&config.kafka).context("creating broker client")?);

    let shutdown_token = CancellationToken::new();
    let ws_config = RegistryWsConfig::from_settings(&config.ditto).context("registry WebSocket")?;
    let registry = Arc::new(RegistryWsClient::new(ws_config, CancellationToken::new()));
    let registry_http = RegistryHttpClient::new(&config.ditto).context("registry HTTP client")?;
    tokio::spawn(probe_registry(registry_http));

    let hub = Arc::new(NotificationHub::new());
    let catalog = Arc::new(PgCatalog::new(pool.clone()));
    let pipeline = Pipeline::new(PipelineDeps {
        twins: catalog.clone(),
        projects: catalog.clone(),
        twin_types: catalog,
        store: Arc::new(PgTimeSeriesStore::new(pool.clone())),
        publisher: broker.publisher(),
        notifier: hub.clone(),
        ml_policy: MlPolicy::from_features(config.ml.enabled_features.clone()),
    });
    let bridge = Bridge::new(Arc::clone(&broker), Arc::clone(&registry), pipeline, Some(pool));

    bridge.start().await.context("starting bridge")?;

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        registry,
        broker,
        hub,
    ));
    let http_server = HealthServer::new(
        config.server.host.clone(),
        config.server.port,
        health_state,
        shutdown_token.clone(),
    );
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!("Twin bridge ready");

    await_shutdown(&shutdown_token).await;
    bridge.shutdown().await;
    if let Err(e) = http_task.await {
        tracing::warn!(error = %e, "HTTP server task ended abnormally");
    }

    tracing::info!("Twin bridge stopped");
    Ok(())
}

/// Log how many twins the registry holds. Failure is not fatal.
async fn probe_registry(client: RegistryHttpClient) {
    match client.search_things(None, &[]).await {
        Ok(things) => tracing::info!(things = things.len(), "Registry reachable"),
        Err(e) => tracing::warn!(error = %e, "Registry HTTP API unreachable"),
    }
}

fn log_config(config: &Config) {
    tracing::info!(
        port = config.server.port,
        kafka_brokers = %config.kafka.brokers,
        consumer_group = %config.kafka.consumer_group,
        ditto_url = %config.ditto.url,
        db_host = %config.database.host,
        db_name = %config.database.dbname,
        "Configuration loaded"
    );
}

/// Load .env from the current directory or any ancestor.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGINT or SIGTERM, then cancel `shutdown_token`.
async fn await_shutdown(shutdown_token: &CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
