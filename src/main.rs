use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use feedcast_core::{BackoffPolicy, DeliveryTarget};
use feedcast_push::{FcmConfig, FcmCredentials, FcmProvider, NotificationDispatcher, ServiceAccountKey};
use feedcast_relay::{RelayHandle, RelayLoop};
use feedcast_settings::FeedcastSettings;
use feedcast_store::{Database, SqliteChangeSource, SqliteCursorStore};
use feedcast_telemetry::TelemetryConfig;

/// Store records over HTTP and push a notification for each new one.
#[derive(Debug, Parser)]
#[command(name = "feedcast", version)]
struct Cli {
    /// Settings file (default: ~/.feedcast/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port for the ingestion server.
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database file.
    #[arg(long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => feedcast_settings::load_settings_from_path(path),
        None => feedcast_settings::load_settings(),
    }
    .context("failed to load settings")?;

    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(database) = cli.database {
        settings.storage.database_path = database;
    }
    settings.validate().context("invalid settings")?;

    let log_level = settings
        .logging
        .level
        .parse()
        .context("invalid logging.level")?;
    let telemetry = feedcast_telemetry::init_telemetry(TelemetryConfig {
        log_level,
        json: settings.logging.json,
        ..Default::default()
    });
    let metrics = telemetry.metrics();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting feedcast");

    let db_path = &settings.storage.database_path;
    let ingest_db = Database::open(db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    let relay_db = Database::open(db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;

    let provider = build_provider(&settings)?;
    let retry = BackoffPolicy {
        base_delay: settings.retry.base_delay(),
        max_delay: settings.retry.max_delay(),
        max_attempts: settings.retry.max_attempts,
    };
    let dispatcher = NotificationDispatcher::new(Arc::new(provider), retry.clone());

    let source = SqliteChangeSource::new(
        relay_db.clone(),
        settings.storage.poll_interval(),
        settings.storage.batch_size,
    );
    let cursor = SqliteCursorStore::new(relay_db, SqliteCursorStore::DEFAULT_NAME);
    let relay = RelayLoop::new(
        Arc::new(source),
        Arc::new(cursor),
        dispatcher,
        DeliveryTarget::new(settings.delivery.target.clone()),
    )
    .with_reconnect_policy(retry)
    .with_metrics(metrics.clone());

    let cancel = CancellationToken::new();

    let server_config = feedcast_server::ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        request_timeout: Duration::from_millis(settings.server.request_timeout_ms),
    };
    let server = feedcast_server::start(server_config, ingest_db, cancel.child_token())
        .await
        .with_context(|| {
            format!(
                "failed to bind {}:{}",
                settings.server.host, settings.server.port
            )
        })?;

    let relay = RelayHandle::spawn(relay, cancel.child_token());

    let reporter = (settings.logging.metrics_interval_secs > 0).then(|| {
        feedcast_telemetry::start_reporter(
            metrics,
            Duration::from_secs(settings.logging.metrics_interval_secs),
            cancel.child_token(),
        )
    });

    tracing::info!(port = server.port, "feedcast ready");

    shutdown_signal().await?;

    tracing::info!("shutting down");
    cancel.cancel();

    let stats = relay.shutdown().await;
    server.stopped().await;
    if let Some(reporter) = reporter {
        let _ = reporter.await;
    }

    tracing::info!(
        delivered = stats.delivered,
        retry_exhausted = stats.retry_exhausted,
        rejected = stats.rejected,
        skipped = stats.skipped,
        reconnects = stats.reconnects,
        "relay stopped"
    );
    Ok(())
}

/// Wait for ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("failed to listen for ctrl+c")?,
            _ = terminate.recv() => tracing::info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    Ok(())
}

fn build_provider(settings: &FeedcastSettings) -> anyhow::Result<FcmProvider> {
    let delivery = &settings.delivery;

    let credentials = match (&delivery.access_token, &delivery.credentials_file) {
        (Some(token), _) if !token.trim().is_empty() => FcmCredentials::access_token(token.clone()),
        (_, Some(path)) => {
            let key = ServiceAccountKey::from_file(path)
                .with_context(|| format!("failed to load service account key {}", path.display()))?;
            FcmCredentials::ServiceAccount(key)
        }
        _ => bail!("no FCM credentials configured"),
    };

    let project_id = match delivery
        .project_id
        .clone()
        .or_else(|| credentials.project_id().map(str::to_string))
    {
        Some(id) => id,
        None => bail!("no FCM project id: set delivery.projectId or use a key that carries one"),
    };

    let config = FcmConfig {
        endpoint: delivery.endpoint.clone(),
        request_timeout: delivery.request_timeout(),
        ..FcmConfig::new(project_id)
    };
    FcmProvider::new(config, credentials).context("failed to build FCM client")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sigterm_ends_shutdown_wait() {
        let waiter = tokio::spawn(shutdown_signal());
        // Let the task install its handlers before signalling.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
