use crate::alerts::AlertTarget;
use crate::extract::DEFAULT_MAX_MULTIPART_BYTES;
use crate::forward::DEFAULT_FORWARD_TIMEOUT;
use crate::lid::DEFAULT_CONVERTER_TIMEOUT;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("forward_timeout_secs cannot be 0")]
    ZeroForwardTimeout,

    #[error("max_multipart_bytes cannot be 0")]
    ZeroMultipartLimit,

    #[error("lid_converter.base_url is empty")]
    EmptyConverterUrl,

    #[error("alert target field is empty: {0}")]
    EmptyAlertField(&'static str),
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LidConverterConfig {
    pub base_url: String,
    #[serde(default = "default_converter_timeout_secs")]
    pub timeout_secs: u64,
}

impl LidConverterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_converter_timeout_secs() -> u64 {
    DEFAULT_CONVERTER_TIMEOUT.as_secs()
}

fn default_forward_timeout_secs() -> u64 {
    DEFAULT_FORWARD_TIMEOUT.as_secs()
}

fn default_max_multipart_bytes() -> usize {
    DEFAULT_MAX_MULTIPART_BYTES
}

/// Webhook ingestion configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for webhook traffic
    pub listener: Listener,
    /// Admin listener for health and readiness probes
    pub admin_listener: Listener,
    #[serde(default = "default_forward_timeout_secs")]
    pub forward_timeout_secs: u64,
    /// Largest request body read, multipart or not
    #[serde(default = "default_max_multipart_bytes")]
    pub max_multipart_bytes: usize,
    /// Enables `POST /admin/cache/purge/{secret_id}` when set
    #[serde(default)]
    pub admin_token: Option<String>,
    #[serde(default)]
    pub enforce_rate_limits: bool,
    #[serde(default)]
    pub lid_converter: Option<LidConverterConfig>,
    #[serde(default)]
    pub alerts: Option<AlertTarget>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.forward_timeout_secs == 0 {
            return Err(ValidationError::ZeroForwardTimeout);
        }
        if self.max_multipart_bytes == 0 {
            return Err(ValidationError::ZeroMultipartLimit);
        }

        if let Some(converter) = &self.lid_converter
            && converter.base_url.trim().is_empty()
        {
            return Err(ValidationError::EmptyConverterUrl);
        }

        match &self.alerts {
            Some(AlertTarget::Webhook { url }) if url.trim().is_empty() => {
                Err(ValidationError::EmptyAlertField("url"))
            }
            Some(AlertTarget::Bot { token, .. }) if token.trim().is_empty() => {
                Err(ValidationError::EmptyAlertField("token"))
            }
            Some(AlertTarget::Bot { channel, .. }) if channel.trim().is_empty() => {
                Err(ValidationError::EmptyAlertField("channel"))
            }
            _ => Ok(()),
        }
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }

    /// The purge token, if one is configured and not blank.
    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}
