use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use wdp_core::{Config, ValidationResult};
use wdp_server::App;

/// Upper bound for the HTTP server and aggregator to drain on shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "wdp", version, about = "Weather aggregation service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server
    Server {
        /// Config file (defaults to ./config.{toml,yaml,json} if present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Server { config } => serve(config.as_deref()).await,
        Command::Config { config } => print_config(config.as_deref()),
    }
}

async fn serve(path: Option<&Path>) -> Result<()> {
    let (config, validation) = Config::load_validated(path)?;
    wdp_core::init_logging(&config.logging)?;
    log_warnings(&validation);

    let app = App::new(config)?;
    let root = CancellationToken::new();
    app.start(root.clone())?;

    let (addr, server) = app.bind(root.clone())?;
    let mut server = tokio::spawn(server);
    tracing::info!(%addr, version = env!("CARGO_PKG_VERSION"), "wdp started");

    tokio::select! {
        result = &mut server => {
            root.cancel();
            app.shutdown(DRAIN_TIMEOUT).await;
            return result.context("HTTP server task failed")?;
        }
        () = wait_for_shutdown(&app, path) => {}
    }

    tracing::info!(drain_timeout_secs = DRAIN_TIMEOUT.as_secs(), "Shutdown requested");
    root.cancel();

    let deadline = Instant::now() + DRAIN_TIMEOUT;
    let served = match tokio::time::timeout_at(deadline, &mut server).await {
        Ok(joined) => joined.context("HTTP server task failed")?,
        Err(_) => {
            tracing::warn!("HTTP server did not drain before the deadline");
            server.abort();
            Ok(())
        }
    };
    app.shutdown(deadline.saturating_duration_since(Instant::now()))
        .await;

    tracing::info!("wdp stopped");
    served
}

/// Resolves on SIGINT or SIGTERM; SIGHUP reloads configuration in place.
#[cfg(unix)]
async fn wait_for_shutdown(app: &App, path: Option<&Path>) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut terminate, mut hangup) =
        match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
            (Ok(terminate), Ok(hangup)) => (terminate, hangup),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "Signal handlers unavailable; only Ctrl+C stops the server");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return,
            _ = terminate.recv() => return,
            _ = hangup.recv() => reload(app, path),
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_app: &App, _path: Option<&Path>) {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg_attr(not(unix), allow(dead_code))]
fn reload(app: &App, path: Option<&Path>) {
    tracing::info!("Reloading configuration");
    let result = Config::load_validated(path).and_then(|(config, validation)| {
        log_warnings(&validation);
        app.reload(config)
    });
    match result {
        Ok(()) => tracing::info!("Configuration reloaded"),
        Err(e) => tracing::error!(error = %format!("{e:#}"), "Configuration reload failed; keeping current settings"),
    }
}

fn log_warnings(validation: &ValidationResult) {
    for warning in &validation.warnings {
        tracing::warn!(field = %warning.field, "{}", warning.message);
    }
}

fn print_config(path: Option<&Path>) -> Result<()> {
    let mut config = Config::load(path)?;
    for service in config.weather.services.values_mut() {
        if service.has_api_key() {
            service.api_key = "<redacted>".into();
        }
    }

    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    print!("{rendered}");

    let validation = config.validate();
    for warning in &validation.warnings {
        eprintln!("warning: {}: {}", warning.field, warning.message);
    }
    if !validation.is_valid() {
        anyhow::bail!("Configuration validation failed: {}", validation.error_summary());
    }
    Ok(())
}
