//! Configuration module for receivables-service.

use crate::models::CreditNotePolicy;
use crate::services::LedgerSettings;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReceivablesConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub ledger: LedgerSettings,
    /// Period of the overdue status sweep; `None` disables it.
    pub overdue_sweep_interval: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl ReceivablesConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = LedgerSettings::default();

        let credit_note_policy = match env::var("CREDIT_NOTE_POLICY") {
            Ok(value) => CreditNotePolicy::from_string(&value).ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!(
                    "CREDIT_NOTE_POLICY must be 'as_observed' or 'balanced', got '{}'",
                    value
                ))
            })?,
            Err(_) => defaults.credit_note_policy,
        };

        let sweep_secs: u64 = parse_or("OVERDUE_SWEEP_INTERVAL_SECS", 3600);

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "receivables-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: parse_or("DATABASE_MIN_CONNECTIONS", 2),
            },
            ledger: LedgerSettings {
                credit_note_policy,
                number_allocation_attempts: parse_or(
                    "NUMBER_ALLOCATION_ATTEMPTS",
                    defaults.number_allocation_attempts,
                ),
                write_retries: parse_or("WRITE_RETRY_ATTEMPTS", defaults.write_retries),
                due_soon_days: parse_or("DUE_SOON_DAYS", defaults.due_soon_days),
            },
            overdue_sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        })
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
