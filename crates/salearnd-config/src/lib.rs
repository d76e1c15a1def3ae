//! Shared configuration for the `salearnd` daemon.
//!
//! The daemon resolves its configuration from four layers, lowest to highest
//! precedence: built-in defaults, a TOML file, `SALEARND_*` environment
//! variables, and command line flags. The resolved [`Config`] is immutable
//! for the life of the process.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

mod defaults;
mod logging;
mod socket;

pub use defaults::{
    DEFAULT_LEARN_COMMAND, DEFAULT_LISTEN_BACKLOG, DEFAULT_LOG_FILTER, default_learn_command,
    default_log_filter, default_log_format, default_socket_endpoint,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{DaemonSocket, SocketParseError, SocketPreparationError};

/// Configuration file consulted when no explicit path is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/salearnd.toml";

const ENV_CONFIG_PATH: &str = "SALEARND_CONFIG_PATH";
const ENV_DAEMON_SOCKET: &str = "SALEARND_DAEMON_SOCKET";
const ENV_LEARN_COMMAND: &str = "SALEARND_LEARN_COMMAND";
const ENV_LISTEN_BACKLOG: &str = "SALEARND_LISTEN_BACKLOG";
const ENV_LOG_FILE: &str = "SALEARND_LOG_FILE";
const ENV_LOG_FILTER: &str = "SALEARND_LOG_FILTER";
const ENV_LOG_FORMAT: &str = "SALEARND_LOG_FORMAT";

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Unix socket the daemon listens on.
    pub daemon_socket: DaemonSocket,
    /// Training command spawned for each accepted request.
    pub learn_command: Utf8PathBuf,
    /// Listen backlog applied to the socket.
    pub listen_backlog: i32,
    /// Append-mode log file; stderr when unset.
    pub log_file: Option<Utf8PathBuf>,
    /// Tracing filter expression.
    pub log_filter: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon_socket: default_socket_endpoint(),
            learn_command: default_learn_command(),
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            log_file: None,
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Loads configuration from the process environment and command line.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_iter(env::args_os())
    }

    /// Loads configuration from the supplied command line.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = CliArgs::try_parse_from(args).map_err(|source| ConfigError::Cli { source })?;

        let mut config = Self::default();
        if let Some(file) = load_file_layer(cli.config_path.as_deref())? {
            config.apply_file(file)?;
        }
        config.apply_env()?;
        config.apply_cli(cli)?;

        if config.listen_backlog <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "listen_backlog",
                message: format!("must be positive, got {}", config.listen_backlog),
            });
        }
        Ok(config)
    }

    /// Socket the daemon listens on.
    #[must_use]
    pub fn daemon_socket(&self) -> &DaemonSocket {
        &self.daemon_socket
    }

    /// Path of the training command.
    #[must_use]
    pub fn learn_command(&self) -> &Utf8Path {
        self.learn_command.as_ref()
    }

    /// Listen backlog applied to the socket.
    #[must_use]
    pub fn listen_backlog(&self) -> i32 {
        self.listen_backlog
    }

    /// Append-mode log file, when configured.
    #[must_use]
    pub fn log_file(&self) -> Option<&Utf8Path> {
        self.log_file.as_deref()
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    fn apply_file(&mut self, file: FileConfig) -> Result<(), ConfigError> {
        if let Some(socket) = file.daemon_socket {
            self.daemon_socket = parse_socket(&socket)?;
        }
        if let Some(command) = file.learn_command {
            self.learn_command = command;
        }
        if let Some(backlog) = file.listen_backlog {
            self.listen_backlog = backlog;
        }
        if let Some(log_file) = file.log_file {
            self.log_file = Some(log_file);
        }
        if let Some(filter) = file.log_filter {
            self.log_filter = filter;
        }
        if let Some(format) = file.log_format {
            self.log_format = format;
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(socket) = env_value(ENV_DAEMON_SOCKET) {
            self.daemon_socket = parse_socket(&socket)?;
        }
        if let Some(command) = env_value(ENV_LEARN_COMMAND) {
            self.learn_command = Utf8PathBuf::from(command);
        }
        if let Some(backlog) = env_value(ENV_LISTEN_BACKLOG) {
            self.listen_backlog = parse_backlog(&backlog)?;
        }
        if let Some(log_file) = env_value(ENV_LOG_FILE) {
            self.log_file = Some(Utf8PathBuf::from(log_file));
        }
        if let Some(filter) = env_value(ENV_LOG_FILTER) {
            self.log_filter = filter;
        }
        if let Some(format) = env_value(ENV_LOG_FORMAT) {
            self.log_format = parse_log_format(&format)?;
        }
        Ok(())
    }

    fn apply_cli(&mut self, cli: CliArgs) -> Result<(), ConfigError> {
        if let Some(socket) = cli.daemon_socket {
            self.daemon_socket = parse_socket(&socket)?;
        }
        if let Some(command) = cli.learn_command {
            self.learn_command = command;
        }
        if let Some(backlog) = cli.listen_backlog {
            self.listen_backlog = backlog;
        }
        if let Some(log_file) = cli.log_file {
            self.log_file = Some(log_file);
        }
        if let Some(filter) = cli.log_filter {
            self.log_filter = filter;
        }
        if let Some(format) = cli.log_format {
            self.log_format = format;
        }
        Ok(())
    }
}

/// Errors surfaced while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Command line arguments failed to parse.
    #[error("invalid command line: {source}")]
    Cli {
        /// Underlying parser error.
        #[source]
        source: clap::Error,
    },
    /// Configuration file could not be read.
    #[error("failed to read configuration file '{path}': {source}")]
    File {
        /// File that failed to read.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file '{path}': {source}")]
    Parse {
        /// File that failed to parse.
        path: Utf8PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
    /// A configuration value was rejected.
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// Field the value was destined for.
        field: &'static str,
        /// Human-readable rejection reason.
        message: String,
    },
}

#[derive(Debug, Parser)]
#[command(
    name = "salearnd",
    version,
    about = "Privilege-separation daemon feeding a local training command"
)]
struct CliArgs {
    /// Path to a TOML configuration file.
    #[arg(long, value_name = "PATH")]
    config_path: Option<Utf8PathBuf>,

    /// Unix socket path (or unix:// URL) to listen on.
    #[arg(long, value_name = "SOCKET")]
    daemon_socket: Option<String>,

    /// Path of the training command to exec per request.
    #[arg(long, value_name = "PATH")]
    learn_command: Option<Utf8PathBuf>,

    /// Listen backlog applied to the socket.
    #[arg(long, value_name = "N")]
    listen_backlog: Option<i32>,

    /// Append-mode log file; stderr when unset.
    #[arg(long, value_name = "PATH")]
    log_file: Option<Utf8PathBuf>,

    /// Tracing filter expression, e.g. "info" or "salearnd=debug".
    #[arg(long, value_name = "FILTER")]
    log_filter: Option<String>,

    /// Log output format: json or compact.
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    daemon_socket: Option<String>,
    learn_command: Option<Utf8PathBuf>,
    listen_backlog: Option<i32>,
    log_file: Option<Utf8PathBuf>,
    log_filter: Option<String>,
    log_format: Option<LogFormat>,
}

/// Reads the file layer: an explicit path must exist, the default may not.
fn load_file_layer(cli_path: Option<&Utf8Path>) -> Result<Option<FileConfig>, ConfigError> {
    let explicit = cli_path
        .map(Utf8Path::to_path_buf)
        .or_else(|| env_value(ENV_CONFIG_PATH).map(Utf8PathBuf::from));

    let path = match explicit {
        Some(path) => path,
        None => {
            let default = Utf8PathBuf::from(DEFAULT_CONFIG_PATH);
            if !default.as_std_path().exists() {
                return Ok(None);
            }
            default
        }
    };

    let text = fs::read_to_string(path.as_std_path()).map_err(|source| ConfigError::File {
        path: path.clone(),
        source,
    })?;
    let file = toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?;
    Ok(Some(file))
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn parse_socket(text: &str) -> Result<DaemonSocket, ConfigError> {
    DaemonSocket::from_str(text).map_err(|error| ConfigError::InvalidValue {
        field: "daemon_socket",
        message: error.to_string(),
    })
}

fn parse_backlog(text: &str) -> Result<i32, ConfigError> {
    text.parse::<i32>().map_err(|error| ConfigError::InvalidValue {
        field: "listen_backlog",
        message: format!("'{text}': {error}"),
    })
}

fn parse_log_format(text: &str) -> Result<LogFormat, ConfigError> {
    LogFormat::from_str(text).map_err(|error| ConfigError::InvalidValue {
        field: "log_format",
        message: format!("'{text}': {error}"),
    })
}
