use std::{env, net::SocketAddr, str::FromStr};
use thiserror::Error;

use crate::ApiSettings;

pub const DEFAULT_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid environment variable format for {0}: {1}")]
    InvalidVar(String, String),
}

/// AWS resources backing the persistent store.
#[derive(Clone, Debug)]
pub struct AwsSettings {
    pub table_name: String,
    pub bucket_name: String,
    // Store region as string for simplicity here, aws_clients can convert
    pub region: String,
    // Optional endpoint for LocalStack
    pub endpoint_url: Option<String>,
}

#[derive(Clone, Debug)]
pub enum StoreBackend {
    DynamoDb(AwsSettings),
    /// Process-local maps; contents vanish on restart.
    Memory,
}

#[derive(Clone, Debug)]
pub struct AuthSettings {
    pub firebase_project_id: String,
    pub jwks_url: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub store: StoreBackend,
    pub auth: AuthSettings,
    pub api: ApiSettings,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignores errors, relies on env vars otherwise)
        dotenvy::dotenv().ok();

        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:5000");
        let bind_address = SocketAddr::from_str(&bind_address_str)
            .map_err(|e| ConfigError::InvalidVar("BIND_ADDRESS".into(), e.to_string()))?;

        let store = match var_or("STORE_BACKEND", "dynamodb").to_ascii_lowercase().as_str() {
            "dynamodb" => StoreBackend::DynamoDb(AwsSettings {
                table_name: var_or("MEMES_TABLE", "memes"),
                bucket_name: required("MEME_BUCKET_NAME")?,
                region: var_or("AWS_DEFAULT_REGION", "ca-central-1"),
                // Allow overriding endpoint for localstack/testing
                endpoint_url: env::var("AWS_ENDPOINT_URL").ok(),
            }),
            "memory" => StoreBackend::Memory,
            other => {
                return Err(ConfigError::InvalidVar(
                    "STORE_BACKEND".into(),
                    format!("expected 'dynamodb' or 'memory', got '{}'", other),
                ));
            }
        };

        let auth = AuthSettings {
            firebase_project_id: required("FIREBASE_PROJECT_ID")?,
            jwks_url: var_or("FIREBASE_JWKS_URL", DEFAULT_JWKS_URL),
        };

        let defaults = ApiSettings::default();
        let api = ApiSettings {
            require_auth_for_create: parsed("REQUIRE_AUTH_FOR_CREATE", defaults.require_auth_for_create)?,
            default_page_size: parsed("DEFAULT_PAGE_SIZE", defaults.default_page_size)?,
            cors_origins: env::var("CORS_ORIGINS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            body_limit_bytes: parsed("BODY_LIMIT_BYTES", defaults.body_limit_bytes)?,
        };

        Ok(Config {
            bind_address,
            store,
            auth,
            api,
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVar(key.into()))
}

fn parsed<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidVar(key.into(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Comma-separated list, blanks dropped.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(
            split_list(" http://localhost:5173, ,https://memes.example "),
            vec!["http://localhost:5173", "https://memes.example"]
        );
        assert!(split_list("").is_empty());
    }
}
