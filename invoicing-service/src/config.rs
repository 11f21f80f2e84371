//! Configuration module for invoicing-service.

use crate::services::NumberingPolicy;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct InvoicingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub numbering: NumberingPolicy,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl InvoicingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = NumberingPolicy::default();

        let numbering = NumberingPolicy {
            prefix: env::var("INVOICE_NUMBER_PREFIX").unwrap_or(defaults.prefix),
            width: parse_var("INVOICE_NUMBER_WIDTH", defaults.width)?,
            max_attempts: parse_var("INVOICE_NUMBER_MAX_ATTEMPTS", defaults.max_attempts)?,
        };
        if numbering.width == 0 || numbering.width > 9 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "INVOICE_NUMBER_WIDTH must be between 1 and 9, got {}",
                numbering.width
            )));
        }

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "invoicing-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            },
            numbering,
        })
    }
}

/// Parse an optional variable; a present but malformed value is an error.
fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", name, raw))
        }),
        Err(_) => Ok(default),
    }
}
