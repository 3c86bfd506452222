use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// How structured commands reach the target machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// `POST machines/send_message/<operator>`.
    Rest,
    /// An `execute` frame on the session channel.
    Channel,
}

impl std::str::FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rest" => Ok(DispatchMode::Rest),
            "channel" | "ws" => Ok(DispatchMode::Channel),
            other => Err(format!("'{}' is not one of rest, channel", other)),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub backend_host: String,
    pub use_tls: bool,
    pub operator_email: String,
    pub dispatch_mode: DispatchMode,
    pub reconnect_delay: Duration,
    pub default_machine: Option<String>,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(&[])
    }

    /// Loads configuration, letting `overrides` (variable, value) take
    /// precedence over the environment.
    pub fn from_env_with(overrides: &[(&str, String)]) -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::load(|key| {
            overrides
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.clone())
                .or_else(|| std::env::var(key).ok())
        })
    }

    fn load(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend_host =
            var("BACKEND_HOST").ok_or_else(|| ConfigError::MissingVar("BACKEND_HOST".to_string()))?;
        let backend_host = backend_host.trim().trim_end_matches('/').to_string();
        if backend_host.is_empty() || backend_host.contains("://") {
            return Err(ConfigError::InvalidValue(
                "BACKEND_HOST".to_string(),
                "expected host[:port] without a scheme".to_string(),
            ));
        }

        let use_tls_str = var("BACKEND_TLS").unwrap_or_else(|| "false".to_string());
        let use_tls = use_tls_str.parse::<bool>().map_err(|_| {
            ConfigError::InvalidValue(
                "BACKEND_TLS".to_string(),
                format!("'{}' is not true or false", use_tls_str),
            )
        })?;

        let operator_email = var("OPERATOR_EMAIL")
            .ok_or_else(|| ConfigError::MissingVar("OPERATOR_EMAIL".to_string()))?;

        let dispatch_mode = var("DISPATCH_MODE")
            .unwrap_or_else(|| "rest".to_string())
            .parse::<DispatchMode>()
            .map_err(|e| ConfigError::InvalidValue("DISPATCH_MODE".to_string(), e))?;

        let delay_str = var("RECONNECT_DELAY_SECS").unwrap_or_else(|| "5".to_string());
        let reconnect_delay = delay_str
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| {
                ConfigError::InvalidValue("RECONNECT_DELAY_SECS".to_string(), e.to_string())
            })?;

        let default_machine = var("DEFAULT_MACHINE").filter(|m| !m.trim().is_empty());

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            backend_host,
            use_tls,
            operator_email,
            dispatch_mode,
            reconnect_delay,
            default_machine,
            log_level,
        })
    }

    /// Session channel URL for one operator.
    pub fn channel_url(&self, operator_id: &str) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!("{}://{}/ws/v1/frontend/{}", scheme, self.backend_host, operator_id)
    }

    /// Base URL of the REST API, always ending in `/`.
    pub fn api_base(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}/api/v1/", scheme, self.backend_host)
    }
}
