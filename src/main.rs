//! tcpfwd - TCP port forwarder
//!
//! Relays each connection accepted on a local port to the target address
//! configured for that port.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use tcpfwd::{
    config::DEFAULT_PORT, logging::init_tracing, ConfigManager, ConnectionManager,
    ForwardingRule, ShutdownCoordinator,
};

/// CLI arguments for tcpfwd
#[derive(Parser, Debug)]
#[command(name = "tcpfwd")]
#[command(about = "tcpfwd - TCP port forwarder")]
#[command(version)]
#[command(long_about = "
tcpfwd - TCP port forwarder

Listens on one or more local ports and relays every accepted connection to
the target configured for that port.

Either forward a single port:
  tcpfwd --target 10.0.0.5:3389 --port 13389

or load a list of rules from a JSON file:
  tcpfwd --inifile rules.json

  [
    { \"target\": \"10.0.0.5:3389\", \"port\": 13389 },
    { \"target\": \"db.internal:5432\", \"port\": 15432 }
  ]

Settings priority (highest to lowest):
1. Command-line arguments
2. Environment variables
3. Settings file
4. Built-in defaults

Environment variables:
  TCPFWD_LISTEN_HOST   - Interface to listen on (e.g., 0.0.0.0)
  TCPFWD_BUFFER_SIZE   - Copy buffer size in bytes
  TCPFWD_LOG_LEVEL     - Log level (trace, debug, info, warn, error)
  TCPFWD_LOG_DIR       - Directory for daily log files
  TCPFWD_LOG_TO_FILE   - Write log files (true/false)
")]
pub struct CliArgs {
    /// Target address
    #[arg(short, long, help = "Target (<host>:<port>)")]
    pub target: Option<String>,

    /// Local port for the single target
    #[arg(short, long, default_value_t = DEFAULT_PORT, help = "Port to listen on")]
    pub port: u16,

    /// JSON file with forwarding rules
    #[arg(short, long, value_name = "FILE", help = "Rules file (JSON list of {target, port})")]
    pub inifile: Option<PathBuf>,

    /// Settings file path
    #[arg(
        short,
        long,
        default_value = "tcpfwd.toml",
        help = "Path to settings file"
    )]
    pub config: PathBuf,

    /// Listen host (overrides settings)
    #[arg(long, help = "Interface to listen on")]
    pub listen_host: Option<String>,

    /// Buffer size in bytes
    #[arg(long, help = "Copy buffer size in bytes")]
    pub buffer_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Directory for daily log files
    #[arg(long, value_name = "DIR", help = "Directory for daily log files")]
    pub log_dir: Option<PathBuf>,

    /// Only log to stdout
    #[arg(long, help = "Do not write log files")]
    pub no_log_file: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let mut settings = ConfigManager::load_settings_from_file(&args.config)?;
    ConfigManager::apply_env_overrides(&mut settings)?;
    settings.merge_with_cli_args(
        args.listen_host.as_deref(),
        args.buffer_size,
        args.log_level.as_deref(),
        args.log_dir.as_deref(),
        args.no_log_file,
    );
    settings
        .validate()
        .context("Settings validation failed")?;

    let log_path = init_tracing(&settings, args.verbose)?;

    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = log_path {
        info!("Logging to {}", path.display());
    }
    if args.config.exists() {
        info!("Loaded settings from {}", args.config.display());
    } else {
        debug!(
            "Settings file not found at {}, using defaults",
            args.config.display()
        );
    }
    debug!("Effective settings: {:?}", settings);

    let rules = resolve_rules(&args)?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Listen host: {}", settings.listen_host);
        info!("  Buffer size: {} bytes", settings.buffer_size);
        for rule in &rules {
            info!("  Rule: {}", rule);
        }
        return Ok(());
    }

    let manager = ConnectionManager::new(&settings, rules)?;
    let mut forwarder = manager.start().await;

    let has_loops = forwarder.running_loops() > 0;
    if !has_loops {
        error!("No forwarding rule could be started, waiting for shutdown");
    }

    let coordinator = ShutdownCoordinator::new();
    let mut shutdown_rx = coordinator.subscribe();
    tokio::spawn(async move {
        if let Err(e) = coordinator.listen_for_signals().await {
            error!("Error setting up signal handlers: {}", e);
        }
    });

    info!("waiting for requests!");

    tokio::select! {
        _ = forwarder.wait(), if has_loops => {
            warn!("All accept loops stopped");
        }
        Ok(()) = shutdown_rx.recv() => {
            info!("Stopping {} accept loops", forwarder.running_loops());
        }
        else => {
            warn!("No accept loops and no signal handler left, exiting");
        }
    }
    forwarder.abort();

    let stats = manager.stats();
    info!(
        "Shutdown complete: {} sessions served, {} active, {} failed",
        stats.total_sessions, stats.active_sessions, stats.failed_sessions
    );

    Ok(())
}

/// Rules come from the rules file when given, otherwise from --target/--port
fn resolve_rules(args: &CliArgs) -> Result<Vec<ForwardingRule>> {
    if let Some(path) = &args.inifile {
        let rules = ConfigManager::load_rules_from_file(path)?;
        info!("Loaded {} rules from {}", rules.len(), path.display());
        return Ok(rules);
    }

    match &args.target {
        Some(target) => Ok(vec![ForwardingRule::new(target.clone(), args.port)]),
        None => bail!("Either --target or --inifile must be given"),
    }
}
