use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub backlog: BacklogConfig,
}

/// Push gateway endpoint and sender credential.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Server key sent as `Authorization: key=<key>`
    pub key: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
    /// Request timeout in seconds (the only bound on an in-flight batch)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Retry policy of the backlog owner.
#[derive(Debug, Clone, Deserialize)]
pub struct BacklogConfig {
    /// Attempts per notification before it is given up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Wait before retrying a notification that found the connection busy
    #[serde(default = "default_busy_delay_ms")]
    pub busy_delay_ms: u64,
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_host() -> String {
    "android.googleapis.com".to_string()
}

fn default_port() -> u16 {
    443
}

fn default_path() -> String {
    "/gcm/send".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000 // 1 minute
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.1
}

fn default_busy_delay_ms() -> u64 {
    50
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("gateway.scheme", default_scheme())?
            .set_default("gateway.host", default_host())?
            .set_default("gateway.port", 443)?
            .set_default("gateway.path", default_path())?
            .set_default("gateway.timeout_seconds", 30)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // GATEWAY__KEY, GATEWAY__TIMEOUT_SECONDS, BACKLOG__MAX_ATTEMPTS, etc.
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.key.trim().is_empty() {
            return Err(ConfigError::Message(
                "gateway.key must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl GatewayConfig {
    /// Config with default endpoint for the given credential
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            scheme: default_scheme(),
            host: default_host(),
            port: default_port(),
            path: default_path(),
            timeout_seconds: default_timeout_seconds(),
        }
    }

    pub fn endpoint_url(&self) -> String {
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter_factor: default_jitter_factor(),
            busy_delay_ms: default_busy_delay_ms(),
        }
    }
}
