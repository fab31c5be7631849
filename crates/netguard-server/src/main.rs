//! netguard: allowlist-based HTTP access gateway.
//!
//! Starts a headless control surface: commands arrive as JSON lines on
//! stdin, notifications leave as JSON lines on stdout, logs go to stderr.

use anyhow::Context;
use clap::Parser;
use netguard_core::ControlCommand;
use netguard_server::config::{ConfigOverrides, GatewayConfig};
use netguard_server::control::{self, Controller};
use netguard_server::gateway::{Allowlist, Gateway, PageSource};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;

/// netguard — allowlist-based HTTP access gateway
#[derive(Parser, Debug)]
#[command(name = "netguard", version, about = "Allowlist-based HTTP access gateway")]
struct Cli {
    /// Listen port (default 8080)
    #[arg(short, long)]
    port: Option<u16>,

    /// HTML page served to allowed peers
    #[arg(long)]
    page: Option<String>,

    /// Allowed peer address (repeatable; replaces the config file list)
    #[arg(short, long = "allow", value_name = "IP")]
    allow: Vec<String>,

    /// Start the listener immediately instead of waiting for a command
    #[arg(long)]
    autostart: bool,

    /// Config file path
    #[arg(long, default_value = "~/.netguard/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for notifications.
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting netguard");

    let config_path = PathBuf::from(&cli.config);
    let config = GatewayConfig::load(
        Some(&config_path),
        ConfigOverrides {
            port: cli.port,
            page: cli.page,
            allowlist: cli.allow,
            autostart: cli.autostart,
        },
    )
    .context("failed to load config")?;

    info!(page = %config.page_path.display(), "serving page content");

    let gateway = Arc::new(Gateway::new(
        Allowlist::new(&config.allowlist),
        PageSource::File(config.page_path.clone()),
    ));
    let controller = Controller::new(gateway, config.port);

    if config.autostart {
        controller
            .dispatch(ControlCommand::ToggleServer {
                running: true,
                port: Some(config.port),
            })
            .await;
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    control::serve_lines(&controller, stdin, stdout, shutdown_signal())
        .await
        .context("control channel failed")?;

    info!("netguard stopped");
    // The stdin reader may still be parked in a blocking read.
    std::process::exit(0)
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
