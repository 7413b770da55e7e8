//! relayd - line-oriented multi-user chat relay
//!
//! Clients connect over TCP, pick a unique name and exchange lines that
//! are relayed to every other connected client.
//!
//! # Usage
//!
//! ```bash
//! # Start the relay (foreground)
//! relayd start --port 4000
//!
//! # Start the relay (background/daemonized)
//! relayd start -d
//!
//! # Stop the relay
//! relayd stop
//!
//! # Check relay status
//! relayd status
//! ```

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relayd::config::{ConfigOverrides, RelayConfig};
use relayd::registry::spawn_registry;
use relayd::server::RelayServer;

/// Chat relay daemon
#[derive(Parser, Debug)]
#[command(name = "relayd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

impl Args {
    /// Resolves the command to run; a bare `relayd` starts in the foreground.
    fn into_command(self) -> Result<Command> {
        match self.command {
            Some(command) => Ok(command),
            None => {
                // Parse an empty command line so RELAY_* variables still apply
                let defaults = DefaultStart::try_parse_from(["relayd"])
                    .context("Failed to read settings from the environment")?;
                Ok(Command::Start {
                    daemon: false,
                    settings: defaults.settings,
                })
            }
        }
    }
}

/// Settings for a bare `relayd` invocation.
#[derive(Parser, Debug)]
#[command(name = "relayd")]
struct DefaultStart {
    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the relay
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        #[command(flatten)]
        settings: Settings,
    },
    /// Stop the running relay
    Stop,
    /// Show relay status
    Status,
}

/// Settings that override the configuration file.
#[derive(ClapArgs, Debug)]
struct Settings {
    /// Configuration file (defaults to <config_dir>/chat-relay/relayd.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "RELAY_BIND_ADDRESS")]
    bind_address: Option<String>,

    /// TCP port to listen on
    #[arg(short, long, env = "RELAY_PORT")]
    port: Option<u16>,

    /// Maximum number of connected users
    #[arg(long, env = "RELAY_MAX_CLIENTS")]
    max_clients: Option<usize>,

    /// Disconnect users after this many idle seconds (0 disables)
    #[arg(long, env = "RELAY_IDLE_TIMEOUT")]
    idle_timeout: Option<u64>,

    /// Longest accepted message in bytes
    #[arg(long)]
    max_frame_len: Option<usize>,
}

impl Settings {
    fn resolve(self) -> Result<RelayConfig> {
        let config = RelayConfig::load(self.config.as_deref())
            .context("Failed to load configuration")?
            .apply(ConfigOverrides {
                bind_address: self.bind_address,
                port: self.port,
                max_clients: self.max_clients,
                idle_timeout_secs: self.idle_timeout,
                max_frame_len: self.max_frame_len,
            });
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

const DEFAULT_LOG_FILTER: &str = "relayd=info,relay_core=info,relay_protocol=info";

/// `RUST_LOG` when set, the crate-level info defaults otherwise.
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("chat-relay")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("relayd.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("relayd.log")
}

fn read_pid() -> Option<u32> {
    let path = pid_file_path();
    let mut file = File::open(&path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

fn running_pid() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

fn stop_relay(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn main() -> Result<()> {
    let command = Args::parse().into_command()?;

    match command {
        Command::Start { daemon, settings } => {
            if let Some(pid) = running_pid() {
                eprintln!("Relay is already running (PID {pid})");
                eprintln!("Use 'relayd stop' to stop it first.");
                process::exit(1);
            }

            // Resolve before forking so configuration errors reach the terminal
            let config = settings.resolve()?;

            if daemon {
                daemonize()?;
            }

            write_pid()?;
            let result = run_relay(config);
            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = running_pid() {
                println!("Stopping relay (PID {pid})...");
                stop_relay(pid)?;

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Relay stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Relay did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Relay is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = running_pid() {
                println!("Relay is running (PID {pid})");
                println!("PID file: {}", pid_file_path().display());
                Ok(())
            } else {
                println!("Relay is not running.");
                process::exit(1);
            }
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_relay(config: RelayConfig) -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(log_filter()).init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        bind_address = %config.bind_address,
        port = config.port,
        max_clients = config.max_clients,
        idle_timeout_secs = config.idle_timeout_secs,
        max_frame_len = config.max_frame_len,
        "Chat relay starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let registry = spawn_registry(config.max_clients);
    info!("Session registry started");

    let server = RelayServer::bind(&config, registry, cancel_token).await?;

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Chat relay stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::prelude::*;

    #[test]
    fn test_start_flags_parse() {
        let args = Args::try_parse_from([
            "relayd", "start", "-d", "--port", "5000", "--max-clients", "3",
        ])
        .unwrap();

        match args.command {
            Some(Command::Start { daemon, settings }) => {
                assert!(daemon);
                assert_eq!(settings.port, Some(5000));
                assert_eq!(settings.max_clients, Some(3));
            }
            other => panic!("Expected Start, got {other:?}"),
        }
    }

    #[test]
    fn test_bare_invocation_reads_environment() {
        std::env::set_var("RELAY_PORT", "5055");
        let command = Args::try_parse_from(["relayd"])
            .unwrap()
            .into_command()
            .unwrap();
        std::env::remove_var("RELAY_PORT");

        match command {
            Command::Start { daemon, settings } => {
                assert!(!daemon);
                assert_eq!(settings.port, Some(5055));
                assert_eq!(settings.resolve().unwrap().port, 5055);
            }
            other => panic!("Expected Start, got {other:?}"),
        }
    }

    #[test]
    fn test_rust_log_overrides_default_filter() {
        std::env::set_var("RUST_LOG", "relayd=debug");
        let filter = log_filter();
        std::env::remove_var("RUST_LOG");

        let subscriber = tracing_subscriber::registry().with(filter);
        tracing::subscriber::with_default(subscriber, || {
            assert!(tracing::enabled!(target: "relayd::dispatcher", tracing::Level::DEBUG));
            assert!(!tracing::enabled!(target: "relayd::dispatcher", tracing::Level::TRACE));
        });
    }

    #[test]
    fn test_pid_file_in_state_dir() {
        let path = pid_file_path();
        assert!(path.ends_with("chat-relay/relayd.pid"));
    }
}
