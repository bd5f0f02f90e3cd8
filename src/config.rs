//! Configuration loading and runtime path resolution.
//!
//! Warden reads `~/.warden/config.toml` (or `$WARDEN_CONFIG_PATH`). Every
//! section uses `#[serde(default)]`, so a missing or empty file is valid.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bot identity and command surface.
    pub bot: BotConfig,
    /// HTTP bridge to the protocol sidecar.
    pub bridge: BridgeConfig,
    /// Session supervision timing and login normalisation.
    pub session: SessionConfig,
    /// Resource watchdog.
    pub monitor: MonitorConfig,
    /// Moderation state persistence.
    pub moderation: ModerationConfig,
}

/// Bot identity and command surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Display name used in log lines.
    pub name: String,
    /// Prefix in front of every command (e.g. `.antistatus on`).
    pub command_prefix: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "Warden".to_owned(),
            command_prefix: ".".to_owned(),
        }
    }
}

/// HTTP bridge configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Base URL of the sidecar.
    pub base_url: String,
    /// Long-poll timeout for the event stream, in seconds.
    pub poll_timeout_secs: u64,
    /// Timeout for outbound requests (send, delete, pairing), in seconds.
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3001".to_owned(),
            poll_timeout_secs: 60,
            request_timeout_secs: 30,
        }
    }
}

/// Session supervision configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Fixed delay before every reconnect attempt, in seconds.
    pub reconnect_backoff_secs: u64,
    /// Delay before exiting on an irrecoverable setup error, in seconds.
    pub setup_failure_delay_secs: u64,
    /// Delay between connecting and requesting a pairing code, in seconds.
    pub pairing_code_delay_secs: u64,
    /// Country code prepended to bare 10-digit phone numbers.
    pub default_country_code: String,
    /// Prefix every session id must carry.
    pub session_id_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff_secs: 5,
            setup_failure_delay_secs: 5,
            pairing_code_delay_secs: 3,
            default_country_code: "91".to_owned(),
            session_id_prefix: "WARDEN:~".to_owned(),
        }
    }
}

impl SessionConfig {
    /// Reconnect backoff as a [`Duration`].
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    /// Setup failure delay as a [`Duration`].
    pub fn setup_failure_delay(&self) -> Duration {
        Duration::from_secs(self.setup_failure_delay_secs)
    }

    /// Pairing code delay as a [`Duration`].
    pub fn pairing_code_delay(&self) -> Duration {
        Duration::from_secs(self.pairing_code_delay_secs)
    }
}

/// Resource watchdog configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between memory samples.
    pub interval_secs: u64,
    /// Resident set size limit in megabytes.
    pub rss_limit_mb: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            rss_limit_mb: 400,
        }
    }
}

impl MonitorConfig {
    /// Sampling interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Limit in bytes.
    pub fn rss_limit_bytes(&self) -> u64 {
        self.rss_limit_mb.saturating_mul(1024 * 1024)
    }
}

/// Moderation state persistence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    /// Persist flags to `moderation.json` after every change.
    pub persist: bool,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self { persist: true }
    }
}

impl Config {
    /// Load configuration from `path` (if present), apply env overrides and
    /// validate the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if a value fails [`Config::validate`].
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = load_config(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first period or timeout set to zero.
    pub fn validate(&self) -> anyhow::Result<()> {
        let periods = [
            ("session.reconnect_backoff_secs", self.session.reconnect_backoff_secs),
            ("monitor.interval_secs", self.monitor.interval_secs),
            ("bridge.poll_timeout_secs", self.bridge.poll_timeout_secs),
            ("bridge.request_timeout_secs", self.bridge.request_timeout_secs),
        ];
        for (key, value) in periods {
            anyhow::ensure!(value > 0, "{key} must be at least 1 second");
        }
        Ok(())
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error when the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Apply environment variable overrides.
    ///
    /// Takes a resolver function so tests never touch the process env.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("WARDEN_BRIDGE_URL") {
            self.bridge.base_url = v;
        }
        if let Some(v) = env("WARDEN_COMMAND_PREFIX") {
            self.bot.command_prefix = v;
        }
        if let Some(v) = env("WARDEN_RSS_LIMIT_MB") {
            match v.parse() {
                Ok(n) => self.monitor.rss_limit_mb = n,
                Err(_) => tracing::warn!(
                    var = "WARDEN_RSS_LIMIT_MB",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }
}

/// Load the config file, returning defaults when it does not exist.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            tracing::info!(path = %path.display(), "loading config from file");
            toml::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(anyhow::anyhow!(
            "failed to read config at {}: {e}",
            path.display()
        )),
    }
}

/// Resolve the default config directory (`~/.warden/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".warden"))
}

/// Filesystem locations used at runtime.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Runtime root (`~/.warden`).
    pub root: PathBuf,
    /// Human-owned `config.toml`.
    pub config_toml: PathBuf,
    /// Optional `.env` with overrides.
    pub env_file: PathBuf,
    /// Credential store directory.
    pub session_dir: PathBuf,
    /// Rotated log files.
    pub logs_dir: PathBuf,
    /// Persisted moderation flags.
    pub moderation_json: PathBuf,
}

impl RuntimePaths {
    /// Lay out runtime paths under `root`.
    pub fn under(root: PathBuf) -> Self {
        Self {
            config_toml: root.join("config.toml"),
            env_file: root.join(".env"),
            session_dir: root.join("session"),
            logs_dir: root.join("logs"),
            moderation_json: root.join("moderation.json"),
            root,
        }
    }
}

/// Resolve runtime paths, honouring `$WARDEN_CONFIG_PATH` for the config file.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn runtime_paths() -> anyhow::Result<RuntimePaths> {
    let mut paths = RuntimePaths::under(config_dir()?);
    if let Ok(p) = std::env::var("WARDEN_CONFIG_PATH") {
        paths.config_toml = PathBuf::from(p);
    }
    Ok(paths)
}
