//! notify-sidecar: heap dump collector running next to a JVM container
//!
//! Usage:
//!   notify-sidecar [--config /etc/heap-dump/config.json]
//!
//! The config path defaults to `$APP_CONFIG_FILE`.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use hdm_broker::{CredentialProvider, ServiceAccountCredentials, SigningClient};
use hdm_core::config::{SidecarConfig, CONFIG_ENV_VAR};
use hdm_sidecar::daemon;
use hdm_sidecar::detector::{CompletionDetector, DirectoryScanner};
use hdm_sidecar::metrics::{self, SidecarMetrics};
use hdm_sidecar::orchestrator::{pod_name, Orchestrator, OrchestratorSettings};
use hdm_sidecar::upload::HttpUploader;
use prometheus_client::registry::Registry;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "notify-sidecar", version, about = "Heap dump notify sidecar")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "NOTIFY_SIDECAR_LOG_LEVEL", default_value = "warn")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "NOTIFY_SIDECAR_LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log, &cli.log_format);

    let config = match &cli.config {
        Some(path) => SidecarConfig::load_from_file(path)?,
        None => SidecarConfig::load_from_env(CONFIG_ENV_VAR)?,
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        watch_path = %config.watch_path.path.display(),
        tenant = %config.service_owner.tenant,
        "notify-sidecar starting"
    );

    // Metrics
    let mut registry = Registry::default();
    let sidecar_metrics = SidecarMetrics::register(&mut registry);
    let registry = Arc::new(registry);

    let metrics_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.metrics.port));
    let metrics_path = config.metrics.path.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::serve(metrics_addr, metrics_path, registry).await {
            error!(caller = "serve_metrics", "{e:#}");
        }
    });

    // Identity
    let credentials = ServiceAccountCredentials::from_config(&config.credentials);
    let namespace = credentials
        .namespace()
        .context("could not determine current namespace")?;
    let pod = pod_name();
    info!(namespace = %namespace, pod = %pod, "workload identity resolved");

    let signing = SigningClient::new(config.middleware.endpoint.clone(), credentials)?;
    let orchestrator = Orchestrator::new(
        signing,
        HttpUploader::new()?,
        OrchestratorSettings {
            tenant: config.service_owner.tenant.clone(),
            namespace,
            pod_name: pod,
            tmp_dir: config.tmp_dir.clone(),
        },
        sidecar_metrics,
    );

    daemon::run(
        DirectoryScanner::new(&config.watch_path.path),
        CompletionDetector::new(config.detection.clone()),
        orchestrator,
        config.detection.poll_interval(),
        shutdown_signal(),
    )
    .await
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            }
        }
        Err(e) => {
            error!("registering SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

/// logrus-style level names ("WARNING") are accepted as well.
fn normalize_level(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "fatal" | "panic" => "error".to_string(),
        other => other.to_string(),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(normalize_level(level)));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
