//! Configuration loading from file and environment variables.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Top-level configuration shared by the client and the issuer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Voice client settings.
    #[serde(default)]
    pub client: ClientConfig,

    /// Local credential issuer settings.
    #[serde(default)]
    pub issuer: IssuerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Endpoints and limits used by a voice session.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Where ephemeral credentials are requested.
    #[serde(default = "default_issuer_url")]
    pub issuer_url: String,

    /// Where the SDP offer is posted.
    #[serde(default = "default_signaling_url")]
    pub signaling_url: String,

    /// Label of the control data channel.
    #[serde(default = "default_channel_label")]
    pub channel_label: String,

    /// Upper bound for the whole connect sequence.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Local address for the media socket. Auto-selected when absent.
    #[serde(default)]
    pub bind_address: Option<IpAddr>,
}

/// The issuer keeps the long-lived API key away from clients.
#[derive(Clone, Deserialize)]
pub struct IssuerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Upstream endpoint minting ephemeral secrets.
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_voice")]
    pub voice: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "voice_rtc=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_issuer_url() -> String {
    "http://localhost:8000/api/session".to_string()
}

fn default_signaling_url() -> String {
    "https://api.openai.com/v1/realtime/calls".to_string()
}

fn default_channel_label() -> String {
    "oai-events".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

fn default_upstream_url() -> String {
    "https://api.openai.com/v1/realtime/client_secrets".to_string()
}

fn default_model() -> String {
    "gpt-realtime".to_string()
}

fn default_voice() -> String {
    "marin".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            issuer_url: default_issuer_url(),
            signaling_url: default_signaling_url(),
            channel_label: default_channel_label(),
            connect_timeout_secs: default_connect_timeout_secs(),
            bind_address: None,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            upstream_url: default_upstream_url(),
            api_key: String::new(),
            model: default_model(),
            voice: default_voice(),
        }
    }
}

impl fmt::Debug for IssuerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuerConfig")
            .field("listen", &self.listen)
            .field("upstream_url", &self.upstream_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("voice", &self.voice)
            .finish()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is outside its allowed range.
    #[error("invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl Config {
    /// Checks values that parse but cannot work.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "client.connect_timeout_secs",
                reason: "must be at least 1 second".to_string(),
            });
        }
        Ok(())
    }
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides (see [`apply_env`]).
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the merged configuration fails [`Config::validate`].
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Environment variable overrides:
/// - `VOICE_ISSUER_URL`, `VOICE_SIGNALING_URL`, `VOICE_CHANNEL_LABEL`,
///   `VOICE_CONNECT_TIMEOUT_SECS`, `VOICE_BIND_ADDRESS` override `client.*`
/// - `VOICE_ISSUER_LISTEN`, `VOICE_UPSTREAM_URL`, `OPENAI_API_KEY`,
///   `VOICE_MODEL`, `VOICE_VOICE` override `issuer.*`
/// - `VOICE_LOG_LEVEL` overrides `logging.level`
///
/// Unparsable numeric or address values are ignored.
pub fn apply_env(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(url) = var("VOICE_ISSUER_URL") {
        config.client.issuer_url = url;
    }
    if let Some(url) = var("VOICE_SIGNALING_URL") {
        config.client.signaling_url = url;
    }
    if let Some(label) = var("VOICE_CHANNEL_LABEL") {
        config.client.channel_label = label;
    }
    if let Some(secs) = var("VOICE_CONNECT_TIMEOUT_SECS") {
        if let Ok(parsed) = secs.parse() {
            config.client.connect_timeout_secs = parsed;
        }
    }
    if let Some(addr) = var("VOICE_BIND_ADDRESS") {
        if let Ok(parsed) = addr.parse() {
            config.client.bind_address = Some(parsed);
        }
    }
    if let Some(listen) = var("VOICE_ISSUER_LISTEN") {
        if let Ok(parsed) = listen.parse() {
            config.issuer.listen = parsed;
        }
    }
    if let Some(url) = var("VOICE_UPSTREAM_URL") {
        config.issuer.upstream_url = url;
    }
    if let Some(key) = var("OPENAI_API_KEY") {
        config.issuer.api_key = key;
    }
    if let Some(model) = var("VOICE_MODEL") {
        config.issuer.model = model;
    }
    if let Some(voice) = var("VOICE_VOICE") {
        config.issuer.voice = voice;
    }
    if let Some(level) = var("VOICE_LOG_LEVEL") {
        config.logging.level = level;
    }
}
