//! Configuration system for the `chatwire` relay server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/chatwire-relay/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the relay.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
}

/// `[server]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_event_size: Option<usize>,
    ping_interval_secs: Option<u64>,
    ping_timeout_secs: Option<u64>,
    allowed_origins: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "chatwire relay server")]
pub struct RelayCliArgs {
    /// Address to bind the relay server to.
    #[arg(short, long, env = "CHATWIRE_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/chatwire-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum inbound event frame size in bytes.
    #[arg(long)]
    pub max_event_size: Option<usize>,

    /// Seconds between keepalive pings.
    #[arg(long)]
    pub ping_interval_secs: Option<u64>,

    /// Seconds of extra silence tolerated after a ping before disconnecting.
    #[arg(long)]
    pub ping_timeout_secs: Option<u64>,

    /// Browser origin allowed to connect (repeatable).
    #[arg(long = "allowed-origin")]
    pub allowed_origins: Vec<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CHATWIRE_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:4000`).
    pub bind_addr: String,
    /// Maximum accepted inbound frame size in bytes.
    pub max_event_size: usize,
    /// Seconds between keepalive pings.
    pub ping_interval_secs: u64,
    /// Seconds of extra silence tolerated after a ping.
    pub ping_timeout_secs: u64,
    /// Browser origins allowed to connect. Empty allows every origin.
    pub allowed_origins: Vec<String>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4000".to_string(),
            max_event_size: 1_000_000,
            ping_interval_secs: 25,
            ping_timeout_secs: 60,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `RelayConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &RelayCliArgs, file: &RelayConfigFile) -> Self {
        let defaults = Self::default();

        let allowed_origins = if cli.allowed_origins.is_empty() {
            file.server
                .allowed_origins
                .clone()
                .unwrap_or(defaults.allowed_origins)
        } else {
            cli.allowed_origins.clone()
        };

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            max_event_size: cli
                .max_event_size
                .or(file.server.max_event_size)
                .unwrap_or(defaults.max_event_size),
            ping_interval_secs: cli
                .ping_interval_secs
                .or(file.server.ping_interval_secs)
                .unwrap_or(defaults.ping_interval_secs),
            ping_timeout_secs: cli
                .ping_timeout_secs
                .or(file.server.ping_timeout_secs)
                .unwrap_or(defaults.ping_timeout_secs),
            allowed_origins,
            log_level: cli.log_level.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the relay.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<RelayConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(RelayConfigFile::default());
        };
        config_dir.join("chatwire-relay").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
