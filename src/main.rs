//! Warden CLI entry point.
//!
//! `start` runs the agent until the session is terminated, the memory
//! watchdog fires, or Ctrl-C arrives. `logout` clears stored credentials.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use warden::config::{runtime_paths, Config, RuntimePaths};
use warden::credentials::{CredentialStore, FileCredentialStore};
use warden::moderation::ModerationState;
use warden::monitor::{ProcSampler, ResourceMonitor};
use warden::router::EventRouter;
use warden::supervisor::{LoginMethod, SessionSupervisor, SupervisorExit, SupervisorSettings};
use warden::whatsapp::BridgeTransport;

/// Moderation agent for a WhatsApp bridge.
#[derive(Parser)]
#[command(name = "warden", version, about)]
struct Cli {
    /// Path to `config.toml` (default: `~/.warden/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the agent.
    Start {
        /// Link a new device for this phone number (with country code).
        #[arg(long, conflicts_with = "session_id")]
        phone: Option<String>,
        /// Request a pairing code instead of printing a QR code.
        #[arg(long, requires = "phone")]
        pairing_code: bool,
        /// Seed the session from a session id.
        #[arg(long)]
        session_id: Option<String>,
    },
    /// Clear stored credentials.
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut paths = runtime_paths()?;
    if let Some(config_path) = cli.config {
        paths.config_toml = config_path;
    }
    if let Err(e) = dotenvy::from_path(&paths.env_file) {
        if !e.not_found() {
            eprintln!("warning: failed to read {}: {e}", paths.env_file.display());
        }
    }

    match cli.command {
        Command::Start {
            phone,
            pairing_code,
            session_id,
        } => handle_start(paths, phone, pairing_code, session_id).await,
        Command::Logout => handle_logout(paths).await.map(|()| ExitCode::SUCCESS),
    }
}

async fn handle_start(
    paths: RuntimePaths,
    phone: Option<String>,
    pairing_code: bool,
    session_id: Option<String>,
) -> anyhow::Result<ExitCode> {
    let _logging_guard = warden::logging::init_production(&paths.logs_dir)?;

    let config = Config::load(&paths.config_toml)
        .with_context(|| format!("failed to load {}", paths.config_toml.display()))?;

    let login = match (phone, session_id) {
        (Some(raw), _) => {
            LoginMethod::phone(&raw, &config.session.default_country_code, pairing_code)
        }
        (None, Some(id)) => LoginMethod::SessionId(id),
        (None, None) => LoginMethod::Existing,
    };

    let state = if config.moderation.persist {
        ModerationState::open(&paths.moderation_json).await
    } else {
        ModerationState::new()
    };

    let router = EventRouter::new(config.bot.command_prefix.clone(), state);
    let store: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::new(&paths.session_dir));
    let transport = Arc::new(BridgeTransport::from_config(&config.bridge));
    let settings = SupervisorSettings::from_config(&config.bot.name, &config.session);
    let mut supervisor = SessionSupervisor::new(transport, store, router, login, settings);

    let monitor = ResourceMonitor::new(
        ProcSampler,
        config.monitor.interval(),
        config.monitor.rss_limit_bytes(),
    );
    let monitor_task = tokio::spawn(monitor.run());

    info!(
        bot = %config.bot.name,
        session_dir = %paths.session_dir.display(),
        "warden started"
    );

    let code = tokio::select! {
        exit = supervisor.run() => {
            match exit {
                SupervisorExit::ReauthRequired(reason) => {
                    error!(%reason, "session ended; run `warden start --phone <number>` to re-authenticate");
                }
                SupervisorExit::SetupFailed(message) => {
                    error!(%message, "setup failed");
                }
            }
            ExitCode::FAILURE
        }
        exhaustion = monitor_task => {
            match exhaustion {
                Ok(_) => error!("exiting for restart after memory limit breach"),
                Err(e) => error!(error = %e, "resource monitor stopped unexpectedly"),
            }
            ExitCode::FAILURE
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            ExitCode::SUCCESS
        }
    };

    Ok(code)
}

async fn handle_logout(paths: RuntimePaths) -> anyhow::Result<()> {
    warden::logging::init_cli();
    let store = FileCredentialStore::new(&paths.session_dir);
    store
        .clear()
        .await
        .with_context(|| format!("failed to clear {}", paths.session_dir.display()))?;
    info!(session_dir = %paths.session_dir.display(), "credentials cleared");
    Ok(())
}
