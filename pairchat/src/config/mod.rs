//! Client configuration.
//!
//! Each setting comes from the first of: CLI flag, `PAIRCHAT_*` environment
//! variable, `~/.config/pairchat/config.toml`, built-in default. A missing
//! default file just means defaults; a missing `--config` file is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::backend::remote::RemoteConfig;
use crate::chat::SessionConfig;

/// Errors that can occur when loading configuration.
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

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    chat: ChatFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    store_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    register_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

/// `[chat]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    number: Option<String>,
    typing_timeout_ms: Option<u64>,
    event_buffer: Option<usize>,
}

/// Fully resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Store server WebSocket URL.
    pub store_url: String,
    /// Timeout for connecting to the store.
    pub connect_timeout: Duration,
    /// Timeout for the store's registration acknowledgment.
    pub register_timeout: Duration,
    /// Timeout for each store request.
    pub request_timeout: Duration,

    /// Password, if given up front (otherwise prompted).
    pub password: Option<String>,
    /// Chat number, if given up front (otherwise prompted).
    pub chat_number: Option<String>,

    /// Idle time after the last keystroke before typing ends.
    pub typing_timeout: Duration,
    /// Capacity of the chat event channel.
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let remote = RemoteConfig::default();
        let session = SessionConfig::default();
        Self {
            store_url: "ws://127.0.0.1:9100/ws".to_string(),
            connect_timeout: remote.connect_timeout,
            register_timeout: remote.register_timeout,
            request_timeout: remote.request_timeout,
            password: None,
            chat_number: None,
            typing_timeout: session.typing_timeout,
            event_buffer: session.event_buffer,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// CLI args and env vars are parsed via `clap`. If `--config` is given
    /// and the file does not exist, returns an error. If no `--config` is
    /// given, the default path (`~/.config/pairchat/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            store_url: cli
                .store_url
                .clone()
                .or_else(|| file.network.store_url.clone())
                .unwrap_or(defaults.store_url),
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            register_timeout: file
                .network
                .register_timeout_secs
                .map_or(defaults.register_timeout, Duration::from_secs),
            request_timeout: file
                .network
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            password: cli.password.clone(),
            chat_number: cli.chat.clone().or_else(|| file.chat.number.clone()),
            typing_timeout: cli
                .typing_timeout_ms
                .or(file.chat.typing_timeout_ms)
                .map_or(defaults.typing_timeout, Duration::from_millis),
            event_buffer: file.chat.event_buffer.unwrap_or(defaults.event_buffer),
        }
    }

    /// Timeouts for the store connection.
    #[must_use]
    pub const fn remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            connect_timeout: self.connect_timeout,
            register_timeout: self.register_timeout,
            request_timeout: self.request_timeout,
        }
    }

    /// Tunables for the chat session.
    #[must_use]
    pub const fn session_config(&self) -> SessionConfig {
        SessionConfig {
            typing_timeout: self.typing_timeout,
            event_buffer: self.event_buffer,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Two-party terminal chat")]
pub struct CliArgs {
    /// WebSocket URL of the store server.
    #[arg(long, env = "PAIRCHAT_STORE_URL")]
    pub store_url: Option<String>,

    /// Login password (prompted when absent).
    #[arg(long, env = "PAIRCHAT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Chat number to open (prompted when absent).
    #[arg(long, env = "PAIRCHAT_CHAT")]
    pub chat: Option<String>,

    /// Typing indicator idle timeout in milliseconds.
    #[arg(long)]
    pub typing_timeout_ms: Option<u64>,

    /// Path to config file (default: `~/.config/pairchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "PAIRCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/pairchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("pairchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
