use serde::{Deserialize, Serialize};
use std::{env, fmt, fs, path::PathBuf, str::FromStr};
use thiserror::Error;

/// Overrides `server.port`.
pub const ENV_PORT: &str = "TOKENRELAY_PORT";
/// Overrides `logging.level`.
pub const ENV_LOG_LEVEL: &str = "TOKENRELAY_LOG_LEVEL";
/// Overrides `logging.format`.
pub const ENV_LOG_FORMAT: &str = "TOKENRELAY_LOG_FORMAT";
/// Overrides `sse.session_prefix`.
pub const ENV_SESSION_PREFIX: &str = "TOKENRELAY_SESSION_PREFIX";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    /// The YAML file does not match the model.
    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yml::Error),
    /// The JSON file does not match the model.
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
    /// The file extension is neither YAML nor JSON.
    #[error("Unsupported configuration format '{0}'. Use 'yaml' or 'json'.")]
    UnsupportedFormat(String),
    /// An environment override holds an unusable value.
    #[error("Invalid {var} value '{value}': {reason}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Value found.
        value: String,
        /// What a valid value looks like.
        reason: &'static str,
    },
    /// Validation failed; one message per problem.
    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Output format of the log subscriber.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Cross-origin settings for the HTTP surface.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; empty allows any origin.
    pub allowed_origins: Vec<String>,
    /// How long browsers may cache a preflight answer.
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            max_age_seconds: 600,
        }
    }
}

/// Listener settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    /// Address to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Header carrying the per-request correlation id.
    pub request_id_header: String,
    /// Cross-origin policy.
    pub cors: CorsConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_id_header: "x-request-id".to_string(),
            cors: CorsConfig::default(),
        }
    }
}

/// Log subscriber settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Settings for the live stream endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SseConfig {
    /// Interval between keep-alive comments on an idle stream.
    pub keep_alive_seconds: u64,
    /// Prefix joining a thread id into a session id.
    pub session_prefix: String,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            keep_alive_seconds: 15,
            session_prefix: "thread-".to_string(),
        }
    }
}

/// Producer-side settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    /// How long a completed session stays readable before its producer removes it.
    pub completed_linger_ms: u64,
    /// Characters per fragment emitted by the demo producer.
    pub demo_chunk_chars: usize,
    /// Upper bound of the random pause between demo fragments.
    pub demo_max_delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            completed_linger_ms: 5_000,
            demo_chunk_chars: 4,
            demo_max_delay_ms: 60,
        }
    }
}

/// The main configuration structure for the tokenrelay server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP listener.
    pub server: HttpConfig,
    /// Logging.
    pub logging: LoggingConfig,
    /// Stream endpoint.
    pub sse: SseConfig,
    /// Producers and session lifetime.
    pub stream: StreamConfig,
}

impl Config {
    /// Generates a default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// Environment variables only fill values the file left at their defaults;
    /// `port_override` wins over both.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, an environment
    /// variable holds an invalid value, or the result fails validation.
    pub fn load_config(
        config_path: Option<PathBuf>,
        port_override: Option<u16>,
    ) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::from_file(&path)?,
            None => Self::with_defaults(),
        };

        config.apply_env_overrides()?;

        if let Some(port) = port_override {
            config.server.port = port;
        }

        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Ok(serde_yml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or_default().to_string(),
            )),
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let defaults = Self::with_defaults();

        if self.server.port == defaults.server.port {
            if let Ok(port) = env::var(ENV_PORT) {
                self.server.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    var: ENV_PORT,
                    value: port.clone(),
                    reason: "must be a valid number between 1 and 65535",
                })?;
            }
        }
        if self.logging.level == defaults.logging.level {
            if let Ok(level) = env::var(ENV_LOG_LEVEL) {
                self.logging.level = level;
            }
        }
        if self.logging.format == defaults.logging.format {
            if let Ok(format) = env::var(ENV_LOG_FORMAT) {
                self.logging.format =
                    format.parse().map_err(|_| ConfigError::InvalidEnv {
                        var: ENV_LOG_FORMAT,
                        value: format.clone(),
                        reason: "must be 'text' or 'json'",
                    })?;
            }
        }
        if self.sse.session_prefix == defaults.sse.session_prefix {
            if let Ok(prefix) = env::var(ENV_SESSION_PREFIX) {
                self.sse.session_prefix = prefix;
            }
        }

        Ok(())
    }

    /// Validates the configuration, collecting every problem found.
    ///
    /// # Errors
    /// Returns the list of validation messages when any check fails.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("Invalid server port. Must be greater than 0.".to_string());
        }
        if self.sse.keep_alive_seconds == 0 {
            errors.push("sse.keep_alive_seconds must be greater than 0.".to_string());
        }
        if self.stream.demo_chunk_chars == 0 {
            errors.push("stream.demo_chunk_chars must be greater than 0.".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Joins a thread id into the registry's session id.
    #[must_use]
    pub fn session_id(&self, thread_id: &str) -> String {
        format!("{}{thread_id}", self.sse.session_prefix)
    }
}
