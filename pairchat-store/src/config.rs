//! Configuration system for the `PairChat` store server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/pairchat-store/config.toml`)
//! 4. Compiled defaults
//!
//! The config file also seeds the user and chat-code directories:
//!
//! ```toml
//! [server]
//! bind_addr = "127.0.0.1:9100"
//!
//! [directory.passwords]
//! alice = "wonderland"
//! bob = "builder"
//!
//! [directory.chat_pairs]
//! "1" = "alice_bob"
//! ```

use std::path::PathBuf;

use crate::database::Directory;

/// Errors that can occur when loading store configuration.
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

/// Top-level TOML config file structure for the store.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StoreConfigFile {
    server: ServerFileConfig,
    directory: Directory,
}

/// `[server]` section of the store config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_payload_size: Option<usize>,
}

/// CLI arguments for the store server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "PairChat realtime store")]
pub struct StoreCliArgs {
    /// Address to bind the store server to.
    #[arg(short, long, env = "PAIRCHAT_STORE_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/pairchat-store/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum frame size in bytes.
    #[arg(long)]
    pub max_payload_size: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "PAIRCHAT_STORE_LOG")]
    pub log_level: String,
}

/// Fully resolved store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:9100`).
    pub bind_addr: String,
    /// Maximum accepted frame size in bytes.
    pub max_payload_size: usize,
    /// Log level filter string.
    pub log_level: String,
    /// Users and chat codes to seed.
    pub directory: Directory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9100".to_string(),
            max_payload_size: 64 * 1024,
            log_level: "info".to_string(),
            directory: Directory::default(),
        }
    }
}

impl StoreConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and a missing
    /// file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &StoreCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, file))
    }

    /// Resolve a `StoreConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &StoreCliArgs, file: StoreConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            max_payload_size: cli
                .max_payload_size
                .or(file.server.max_payload_size)
                .unwrap_or(defaults.max_payload_size),
            log_level: cli.log_level.clone(),
            directory: file.directory,
        }
    }
}

/// Load and parse a TOML config file for the store.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<StoreConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(StoreConfigFile::default());
        };
        config_dir.join("pairchat-store").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
