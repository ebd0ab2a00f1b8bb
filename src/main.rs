use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pin_relay::config::RelayConfig;
use pin_relay::gateway::TelegramGateway;
use pin_relay::relay::{ActorDeps, ActorRegistry, ActorSettings, EventRouter};
use pin_relay::server::{AppState, relay_routes};
use pin_relay::store::{LibSqlBackend, StateStore};
use pin_relay::telemetry::monitor::spawn_evaluation_task;
use pin_relay::telemetry::{FanoutSink, RollbackMonitor, TelemetrySink, TracingSink};

/// How often the rollback monitor re-judges each deployment version.
const MONITOR_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = RelayConfig::from_env().context("invalid configuration")?;

    eprintln!("📌 Pin Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Deployment: {}", config.deployment_version);
    eprintln!("   Routes: {} (+ default)", config.routes.len());
    eprintln!("   Webhook: http://0.0.0.0:{}/webhook/{{hint}}", config.port);

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn StateStore> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Messaging gateway ────────────────────────────────────────────────
    let gateway = TelegramGateway::new(config.bot_token.clone(), config.retry.clone())
        .with_api_base(config.telegram_api_base.clone());
    if let Err(e) = gateway.health_check().await {
        tracing::warn!(error = %e, "Telegram health check failed; continuing");
    }

    // ── Telemetry ────────────────────────────────────────────────────────
    let monitor = Arc::new(RollbackMonitor::new(config.monitor.clone()));
    let telemetry: Arc<dyn TelemetrySink> = Arc::new(
        FanoutSink::new()
            .with(Arc::new(TracingSink))
            .with(monitor.clone()),
    );
    let _monitor_handle = spawn_evaluation_task(monitor, MONITOR_INTERVAL);

    // ── Relay core ───────────────────────────────────────────────────────
    let settings = ActorSettings {
        deployment_version: config.deployment_version.clone(),
        store_timeout: config.store_timeout,
        gateway_timeout: config.retry.total_budget(),
        pin_retries: config.pin_retries,
    };
    let registry = ActorRegistry::new(ActorDeps {
        store: Arc::clone(&store),
        gateway: Arc::new(gateway),
        telemetry: Arc::clone(&telemetry),
        settings,
    });
    let router = EventRouter::new(
        config.routes,
        registry,
        telemetry,
        config.deployment_version.clone(),
    );

    // ── HTTP server ──────────────────────────────────────────────────────
    let app = relay_routes(AppState {
        router: Arc::new(router),
        store,
        auth_token: Arc::new(config.auth_token),
        version: config.deployment_version,
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "Relay server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("server error")?;

    Ok(())
}
