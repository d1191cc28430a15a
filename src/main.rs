//! # banwatch - CLI Entry Point
//!
//! Commands:
//! - `start`       - Start the scan engine and control plane
//! - `status`      - Show daemon, backend and ledger status
//! - `stop`        - Stop the running daemon
//! - `init-config` - Generate a default configuration file

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use banwatch::api;
use banwatch::enforce::backend::{BanBackend, Fail2banClient};
use banwatch::enforce::ledger::BanLedger;
use banwatch::engine::ScanEngine;
use banwatch::{BanwatchConfig, BanwatchError, BanwatchResult};

/// banwatch - intrusion-response engine driving fail2ban.
///
/// Tails SSH and web logs, scores attackers, bans the worst offenders.
#[derive(Parser, Debug)]
#[command(name = "banwatch")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "banwatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the banwatch daemon.
    Start,

    /// Show current daemon status.
    Status,

    /// Stop the running daemon.
    Stop,

    /// Generate a default configuration file.
    InitConfig,
}

#[tokio::main]
async fn main() -> BanwatchResult<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => cmd_start(&cli.config).await,
        Commands::Status => cmd_status(&cli.config).await,
        Commands::Stop => cmd_stop(&cli.config).await,
        Commands::InitConfig => cmd_init_config(&cli.config),
    }
}

/// Start the daemon: engine drivers plus the HTTP control plane.
async fn cmd_start(config_path: &Path) -> BanwatchResult<()> {
    info!("banwatch starting...");

    let config = load_config(config_path)?;

    std::fs::create_dir_all(&config.general.data_dir)?;

    let pid_path = config.general.data_dir.join("banwatch.pid");
    write_pid_file(&pid_path)?;
    info!("PID file written to: {}", pid_path.display());

    let ledger = Arc::new(BanLedger::open(
        &config.general.data_dir.join("banwatch.db"),
    )?);
    let (total, active) = ledger.counts()?;
    info!("Ban ledger open ({} rows, {} active)", total, active);

    let backend = Arc::new(Fail2banClient::probe(&config.backend).await);
    match backend.ping().await {
        Ok(()) => info!("Banning backend is reachable"),
        Err(e) => warn!("Banning backend unreachable at startup: {}", e),
    }

    let engine = ScanEngine::new(config.clone(), backend, ledger);
    engine.start().await;

    let bind = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Control plane listening on http://{}", bind);
    if config.backend.dev_mode {
        info!("Dev mode: scanning synthetic log streams");
    }

    let app = api::router(engine.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown signal received, stopping engine...");
    engine.stop().await;

    if let Err(e) = std::fs::remove_file(&pid_path) {
        warn!("Could not remove PID file: {}", e);
    }

    info!("banwatch stopped.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Could not install signal handler: {}", e);
    }
}

/// Show the current status of the daemon, backend and ledger.
async fn cmd_status(config_path: &Path) -> BanwatchResult<()> {
    let config = load_config(config_path)?;
    let pid_path = config.general.data_dir.join("banwatch.pid");

    match read_pid_file(&pid_path) {
        Some(pid) => {
            if is_process_running(pid) {
                println!("banwatch is RUNNING (PID: {})", pid);
            } else {
                println!("banwatch is NOT RUNNING (stale PID file, PID {} not found)", pid);
                println!("  The daemon may have crashed. Remove {} to clear.", pid_path.display());
            }
        }
        None => {
            println!("banwatch is NOT RUNNING (no PID file)");
        }
    }

    // Backend reachability and version
    let backend = Fail2banClient::probe(&config.backend).await;
    match backend.ping().await {
        Ok(()) => {
            let version = backend.version().await.unwrap_or_else(|_| "unknown".to_string());
            println!("Backend: reachable (fail2ban {})", version);
            match backend.jails().await {
                Ok(jails) if jails.is_empty() => println!("  Jails: none"),
                Ok(jails) => println!("  Jails: {}", jails.join(", ")),
                Err(e) => println!("  Jails: unavailable ({})", e),
            }
        }
        Err(e) => println!("Backend: unreachable ({})", e),
    }

    // Ledger counts
    let db_path = config.general.data_dir.join("banwatch.db");
    if db_path.exists() {
        let ledger = BanLedger::open(&db_path)?;
        let (total, active) = ledger.counts()?;
        println!("Ledger: {} ({} bans recorded, {} active)", db_path.display(), total, active);
    } else {
        println!("Ledger: not found (daemon may not have run yet)");
    }

    println!();
    println!("Configuration:");
    println!("  Scan interval: {}s", config.engine.scan_interval_secs);
    println!("  Decision interval: {}s", config.engine.decision_interval_secs);
    println!("  Analysis interval: {}s", config.engine.analysis_interval_secs);
    println!("  Ban duration: {}s", config.engine.ban_duration_secs);
    println!("  SSH log: {}", config.log_sources.ssh_log_path.display());
    println!("  Access log: {}", config.log_sources.access_log_path.display());
    println!("  Error log: {}", config.log_sources.error_log_path.display());
    println!("  Control plane: http://{}:{}", config.server.bind_address, config.server.port);
    println!("  Dev mode: {}", config.backend.dev_mode);

    Ok(())
}

/// Stop the running daemon.
async fn cmd_stop(config_path: &Path) -> BanwatchResult<()> {
    let config = load_config(config_path)?;
    let pid_path = config.general.data_dir.join("banwatch.pid");

    match read_pid_file(&pid_path) {
        Some(pid) => {
            if !is_process_running(pid) {
                println!("Process {} is not running (stale PID file). Cleaning up.", pid);
                let _ = std::fs::remove_file(&pid_path);
                return Ok(());
            }

            println!("Sending stop signal to banwatch (PID: {})...", pid);

            #[cfg(unix)]
            {
                use std::process::Command;
                let status = Command::new("kill")
                    .args(["-TERM", &pid.to_string()])
                    .status();
                match status {
                    Ok(s) if s.success() => {
                        println!("Stop signal sent. Daemon should shut down gracefully.");
                    }
                    Ok(s) => {
                        println!("Kill command exited with: {}. You may need to stop it manually.", s);
                    }
                    Err(e) => {
                        println!("Failed to send signal: {}. Try: kill {} manually.", e, pid);
                    }
                }
            }

            #[cfg(not(unix))]
            {
                println!("Automatic stop is only supported on Unix. Kill PID {} manually.", pid);
            }
        }
        None => {
            println!("No PID file found at {}. Is the daemon running?", pid_path.display());
        }
    }

    Ok(())
}

/// Generate a default configuration file.
fn cmd_init_config(config_path: &Path) -> BanwatchResult<()> {
    if config_path.exists() {
        return Err(BanwatchError::Config(format!(
            "Configuration file already exists: {}. Remove it first or use a different path.",
            config_path.display()
        )));
    }

    BanwatchConfig::write_default(config_path)?;
    println!("Default configuration written to: {}", config_path.display());
    println!("Key settings to configure:");
    println!("  [log_sources] - Point to your actual log files");
    println!("  [backend]     - fail2ban socket path; set dev_mode for a dry run");
    println!("  [engine]      - Scan/decision/analysis intervals, ban duration");
    println!("  [server]      - Control plane binds to 127.0.0.1:8092 by default");

    Ok(())
}

fn load_config(config_path: &Path) -> BanwatchResult<BanwatchConfig> {
    if config_path.exists() {
        info!("Loading configuration from: {}", config_path.display());
        BanwatchConfig::from_file(config_path)
    } else {
        info!("No config file found, using defaults. Run 'init-config' to generate one.");
        Ok(BanwatchConfig::default())
    }
}

// ---------------------------------------------------------------------------
// PID file management
// ---------------------------------------------------------------------------

/// Write the current process PID to a file.
fn write_pid_file(path: &Path) -> BanwatchResult<()> {
    let pid = std::process::id();
    std::fs::write(path, pid.to_string())?;
    Ok(())
}

/// Read a PID from a PID file. Returns None if file doesn't exist or is invalid.
fn read_pid_file(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()?
        .trim()
        .parse::<u32>()
        .ok()
}

/// Check if a process with the given PID is still running.
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use std::process::Command;
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}
