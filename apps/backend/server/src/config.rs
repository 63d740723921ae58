use course_hub_api::config::{ApiConfig, ConfigError as ApiConfigError};
use std::env;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub api: ApiConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
            api: ApiConfig::from_env()?,
        })
    }

    pub fn payments_enabled(&self) -> bool {
        self.api.stripe_secret_key.is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for: {0}")]
    InvalidValue(String),
    #[error(transparent)]
    Api(#[from] ApiConfigError),
}
