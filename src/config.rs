use std::{env, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation::ValidationMode;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_OWNER: &str = "default_user";

pub const ENV_BASE_URL: &str = "GENAI_STACK_API_URL";
pub const ENV_OWNER: &str = "GENAI_STACK_OWNER";
pub const ENV_TIMEOUT_SECS: &str = "GENAI_STACK_TIMEOUT_SECS";
pub const ENV_VALIDATION: &str = "GENAI_STACK_VALIDATION";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("Base url must not be empty")]
    EmptyBaseUrl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Prefix every endpoint path is appended to, e.g. `http://localhost:8000/api`.
    pub base_url: String,
    /// Recorded as the owner of saved workflows.
    pub owner: String,
    /// `None` leaves the transport default in place.
    pub timeout: Option<Duration>,
    pub validation: ValidationMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            owner: DEFAULT_OWNER.to_owned(),
            timeout: None,
            validation: ValidationMode::default(),
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Defaults overridden by whichever `GENAI_STACK_*` variables are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut builder = Self::builder();

        if let Some(base_url) = lookup(ENV_BASE_URL) {
            builder = builder.base_url(base_url);
        }
        if let Some(owner) = lookup(ENV_OWNER) {
            builder = builder.owner(owner);
        }
        if let Some(value) = lookup(ENV_TIMEOUT_SECS) {
            let secs = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: ENV_TIMEOUT_SECS,
                    value: value.clone(),
                })?;
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(value) = lookup(ENV_VALIDATION) {
            let mode = match value.trim().to_ascii_lowercase().as_str() {
                "permissive" => ValidationMode::Permissive,
                "strict" => ValidationMode::Strict,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: ENV_VALIDATION,
                        value,
                    });
                }
            };
            builder = builder.validation(mode);
        }

        builder.build()
    }

    /// Full url of an endpoint path such as `/workflows`.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.config.owner = owner.into();
        self
    }

    pub fn timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.config.timeout = timeout.into();
        self
    }

    pub fn validation(mut self, validation: ValidationMode) -> Self {
        self.config.validation = validation;
        self
    }

    pub fn strict_validation(self) -> Self {
        self.validation(ValidationMode::Strict)
    }

    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        if self.config.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyBaseUrl);
        }
        Ok(self.config)
    }
}
