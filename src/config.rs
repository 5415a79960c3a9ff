use std::env;
use std::net::IpAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

/// Runtime configuration, read from `QC_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Secret used to verify client auth tokens and, absent an explicit
    /// `QC_ENCRYPTION_KEY`, to derive the message cipher key.
    pub secret_key: String,
    /// Base64 AES-256 key for message content at rest.
    pub encryption_key: Option<String>,
    pub max_events_per_minute: usize,
    pub max_events_per_hour: usize,
    /// Outbound queue capacity per connection; overflow drops the newest event.
    pub queue_capacity: usize,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: parse_var("QC_HOST", "0.0.0.0")?,
            port: parse_var("QC_PORT", "2052")?,
            secret_key: env::var("QC_SECRET_KEY")
                .unwrap_or_else(|_| "change-me-in-production".to_string()),
            encryption_key: env::var("QC_ENCRYPTION_KEY").ok(),
            max_events_per_minute: parse_var("QC_MAX_EVENTS_PER_MINUTE", "10")?,
            max_events_per_hour: parse_var("QC_MAX_EVENTS_PER_HOUR", "100")?,
            queue_capacity: parse_var("QC_QUEUE_CAPACITY", "256")?,
            tls_cert_path: env::var("QC_TLS_CERT").ok(),
            tls_key_path: env::var("QC_TLS_KEY").ok(),
        })
    }
}

fn parse_var<T>(name: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue(name, e.to_string()))
}
