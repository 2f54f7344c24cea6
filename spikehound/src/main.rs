//! Spikehound Main Binary
//!
//! Wires the investigation pipeline into the HTTP service:
//! - Coordinator: parallel investigators, diagnosis and remediation
//! - Ingress: per-alert idempotency and transient-error retry
//! - Approvals: gated remediation execution
//! - Notifications: webhook sinks for reports and follow-ups

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spikehound_agents::prelude::*;
use spikehound_agents::NoopActionExecutor;
use spikehound_api::prelude::*;
use spikehound_api::SystemClock;
use spikehound_core::{AlertSummary, Config};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Spikehound CLI arguments
#[derive(Debug, Parser)]
#[clap(name = "spikehound", version, about = "Cloud cost anomaly investigation service")]
struct Cli {
    /// Configuration file path; defaults apply when it does not exist
    #[clap(short, long, env = "SPIKEHOUND_CONFIG", default_value = "config/spikehound.yaml", global = true)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[clap(long, env = "SPIKEHOUND_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Enable JSON logging
    #[clap(long, env = "SPIKEHOUND_LOG_JSON", global = true)]
    log_json: bool,

    /// Validate configuration and exit
    #[clap(long, global = true)]
    dry_run: bool,

    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the HTTP service (default if no subcommand given)
    Serve,
    /// Investigate one alert payload from a file and print the report
    Investigate {
        /// Alert payload (JSON)
        #[clap(long)]
        payload_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    info!("Starting Spikehound v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(Some(cli.config.as_path())).context("Failed to load configuration")?;
    if cli.dry_run {
        info!("Dry run mode - configuration validated, exiting");
        return Ok(());
    }

    match &cli.command {
        Some(Commands::Investigate { payload_file }) => run_investigate_command(&config, payload_file).await,
        Some(Commands::Serve) | None => run_serve_command(&config).await,
    }
}

/// Coordinator over the offline agents, with webhook notifications when configured
fn build_coordinator(config: &Config) -> Result<Arc<Coordinator>> {
    let agents = PipelineAgents::offline(config).context("Failed to build pipeline agents")?;
    let runner = TaskRunner::new(Duration::from_secs(config.pipeline.agent_timeout_secs));
    let mut coordinator = Coordinator::new(agents, runner);

    if let Some(sink) = WebhookNotificationSink::from_config(&config.notifications)
        .context("Failed to build webhook notifications")?
    {
        info!(urls = config.notifications.webhook_urls.len(), "Webhook notifications enabled");
        coordinator = coordinator.with_sink(Arc::new(sink));
    }

    Ok(Arc::new(coordinator))
}

/// Run the investigate subcommand
async fn run_investigate_command(config: &Config, payload_file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(payload_file).context("Failed to read payload file")?;
    let payload: serde_json::Value =
        serde_json::from_str(&content).context("Failed to parse payload JSON")?;

    let coordinator = build_coordinator(config)?;
    let summary = AlertSummary::from_payload(&payload, chrono::Utc::now());
    info!(alert_id = %summary.alert_id, "Investigating alert from file");

    let report = coordinator.investigate(Arc::new(payload), summary).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Run the serve subcommand (default behavior)
async fn run_serve_command(config: &Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let coordinator = build_coordinator(config)?;
    let state = Arc::new(InvestigationState::new(Duration::from_secs(
        config.pipeline.idempotency_ttl_secs,
    )));
    let clock = Arc::new(SystemClock);

    let ingress = Arc::new(
        IngressService::new(coordinator.clone(), state.clone())
            .with_pipeline_config(&config.pipeline)
            .with_clock(clock.clone()),
    );
    ingress.start();

    if config.remediation.execution_enabled {
        warn!("Remediation execution is enabled but no cloud executor is configured; approved actions will report errors");
    }
    let gate = Arc::new(ExecutionGate::new(
        Arc::new(NoopActionExecutor),
        config.remediation.execution_enabled,
    ));
    let approvals = Arc::new(ApprovalWorkflow::new(state.clone(), gate, coordinator, clock));

    let app_state = Arc::new(AppState {
        ingress: ingress.clone(),
        approvals,
        investigations: state,
        version: env!("CARGO_PKG_VERSION").to_string(),
    });
    let api_config = ApiConfig {
        bind_addr: addr,
        timeout_secs: config.server.request_timeout_secs,
    };
    let app = create_router(&api_config, app_state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("API server listening on {}", addr);

    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            result.context("API server failed")?;
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    ingress.shutdown().await;
    info!("API server shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("Received Ctrl+C, shutting down..."); },
        _ = terminate => { info!("Received SIGTERM, shutting down..."); },
    }
}

/// Initialize logging based on CLI arguments
fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .context("Invalid log level")?;

    if cli.log_json {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(log_level.into()))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_line_number(true),
            )
            .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(log_level.into()))
            .init();
    }

    info!("Logging initialized at level: {}", log_level);

    Ok(())
}
