//! Flowdeck - control plane for an interactive interception proxy
//!
//! Keeps the flows a protocol engine observed, holds and releases
//! intercepted ones, and serves everything to web observers over HTTP and
//! a WebSocket push channel.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use flowdeck::api::WebServer;
use flowdeck::app::Config;
use flowdeck::engine::{replay_copy, ReplayConsumer, ReplayQueue};
use flowdeck::error::UserHint;
use flowdeck::session::Session;

/// Control plane for an interactive interception proxy
#[derive(Parser, Debug)]
#[command(name = "flowdeck")]
#[command(author, version, about = "Control plane for an interactive interception proxy", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "FLOWDECK_CONFIG")]
    config: Option<String>,

    /// Web API listen address
    #[arg(long, env = "FLOWDECK_LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Web API port
    #[arg(short, long, env = "FLOWDECK_PORT")]
    port: Option<u16>,

    /// Options file read at startup and written by `POST /options/save`
    #[arg(long, env = "FLOWDECK_OPTIONS_FILE")]
    options_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "FLOWDECK_LOG_LEVEL")]
    log_level: String,

    /// Log file path (enables file logging)
    #[arg(long, env = "FLOWDECK_LOG_FILE")]
    log_file: Option<String>,

    /// Enable JSON structured logging
    #[arg(long, env = "FLOWDECK_LOG_JSON")]
    log_json: bool,

    /// Generate default configuration and exit
    #[arg(long)]
    generate_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        return generate_default_config();
    }

    init_logging(&cli)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Flowdeck");

    let config = load_config(&cli)?;

    if cli.validate_config {
        tracing::info!("Configuration is valid");
        return Ok(());
    }

    let result = run(config).await;

    tracing::info!("Flowdeck shutting down gracefully");

    result
}

/// Initialize the logging system
fn init_logging(cli: &Cli) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if let Some(log_path) = &cli.log_file {
        // File-based logging with rotation
        let file_appender = if log_path.contains('/') || log_path.contains('\\') {
            let path = std::path::Path::new(log_path);
            let dir = path.parent().unwrap_or(std::path::Path::new("."));
            let filename = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("flowdeck.log");
            RollingFileAppender::new(Rotation::DAILY, dir, filename)
        } else {
            let log_dir = Config::data_dir()
                .map(|d| d.join("logs"))
                .unwrap_or_else(|_| std::path::PathBuf::from("."));
            std::fs::create_dir_all(&log_dir).ok();
            RollingFileAppender::new(Rotation::DAILY, log_dir, log_path)
        };

        if cli.log_json {
            let file_layer = fmt::layer().json().with_writer(file_appender).with_ansi(false);
            subscriber.with(file_layer).init();
        } else {
            let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false);
            subscriber.with(file_layer).init();
        }
    } else if cli.log_json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }

    Ok(())
}

/// Load configuration with CLI overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(addr) = &cli.listen_addr {
        config.web.listen_addr = addr.clone();
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(path) = &cli.options_file {
        config.general.options_file = Some(std::path::PathBuf::from(path));
    }

    if let Err(e) = config.validate() {
        anyhow::bail!("{} ({})", e, e.user_hint());
    }

    Ok(config)
}

/// Generate default configuration file
fn generate_default_config() -> Result<()> {
    let config = Config::default();
    let toml = toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

    println!("{}", toml);
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {
                        tracing::info!("Received SIGINT, initiating shutdown");
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM, initiating shutdown");
                    }
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("Failed to register signal handlers: {}", e);
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        return;
    }
    tracing::info!("Received Ctrl+C, initiating shutdown");
}

/// Drain the bundled replay queue. Each replay shows up as a new flow
/// marked as a replay of the original request.
async fn run_replays(session: Arc<Session>, mut consumer: ReplayConsumer) {
    while let Some(flow) = consumer.next().await {
        let copy = replay_copy(&flow);
        let url = copy.request().map(|r| r.url()).unwrap_or_default();
        match session.ingest(copy) {
            Ok(Some(_gate)) => {
                tracing::debug!(flow = %flow.id, url = %url, "replayed, held by intercept filter")
            }
            Ok(None) => tracing::debug!(flow = %flow.id, url = %url, "replayed"),
            Err(e) => {
                session.events().warn(format!("Replay of {} failed: {}", flow.id, e));
            }
        }
        consumer.finish(&flow.id);
    }
    tracing::debug!("replay queue closed");
}

/// Run the control plane until a shutdown signal arrives
async fn run(config: Config) -> Result<()> {
    let (engine, consumer) = ReplayQueue::new(config.general.replay_queue_size);
    let session = Session::new(config.session_config(), Arc::new(engine));

    match session.load_options() {
        Ok(changed) if !changed.is_empty() => {
            tracing::info!(options = ?changed, "Applied saved options");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Ignoring saved options: {} ({})", e, e.user_hint()),
    }

    let replays = tokio::spawn(run_replays(session.clone(), consumer));

    let server = WebServer::new(&config.web, session.clone());
    server.start().await?;

    wait_for_signal().await;

    // Closing the session first ends every observer socket, so the
    // graceful shutdown below does not wait on them.
    session.close();
    if server.is_running() {
        server.stop().await?;
    }
    replays.abort();

    Ok(())
}
