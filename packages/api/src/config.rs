use std::{env, time::Duration};

const DEFAULT_TOKEN_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_MAPPING_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_BCRYPT_COST: u32 = bcrypt::DEFAULT_COST;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

/// Runtime settings of the API. Holds secrets, so no `Debug`.
#[derive(Clone)]
pub struct ApiConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub mapping_cache_ttl: Duration,
    /// Base for checkout success/cancel redirects
    pub frontend_url: String,
    pub bcrypt_cost: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid value for: {0}")]
    InvalidValue(String),
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::MissingVar(key))
        };
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(ApiConfig {
            database_url: required("DATABASE_URL")?,
            db_max_connections: parse_or(&optional, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            stripe_secret_key: optional("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: optional("STRIPE_WEBHOOK_SECRET"),
            jwt_secret: required("JWT_SECRET")?,
            token_ttl: Duration::from_secs(parse_or(
                &optional,
                "TOKEN_TTL_SECS",
                DEFAULT_TOKEN_TTL_SECS,
            )?),
            mapping_cache_ttl: Duration::from_secs(parse_or(
                &optional,
                "MAPPING_CACHE_TTL_SECS",
                DEFAULT_MAPPING_CACHE_TTL_SECS,
            )?),
            frontend_url: optional("FRONTEND_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            bcrypt_cost: parse_or(&optional, "BCRYPT_COST", DEFAULT_BCRYPT_COST)?,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    optional: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match optional(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}: {raw}"))),
        None => Ok(default),
    }
}
