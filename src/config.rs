//! Layered application configuration
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. optional `config/recharge.toml`
//! 3. environment variables prefixed with `RECHARGE_`, nested with `__`
//!    (e.g. `RECHARGE_BANK__BASE_URL`, `RECHARGE_DATABASE__URL`)

use bigdecimal::BigDecimal;
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use config::{Config, ConfigError, Environment, File};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub bank: BankConfig,
    pub recharge: RechargeConfig,
    pub workers: WorkerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres URL; the in-memory store is used when absent
    #[serde(default)]
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize)]
pub struct BankConfig {
    pub base_url: String,
    #[serde(default)]
    pub dni: Option<String>,
    #[serde(default, deserialize_with = "optional_secret")]
    pub password: Option<SecretString>,
    #[serde(default, deserialize_with = "optional_secret")]
    pub access_token: Option<SecretString>,
    #[serde(default, deserialize_with = "optional_secret")]
    pub refresh_token: Option<SecretString>,
    /// Epoch seconds at which `access_token` stops being accepted
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub refresh_margin_secs: i64,
    pub request_timeout_secs: u64,
    pub history_min_interval_secs: u64,
    /// Offset of the partner's local calendar from UTC
    pub utc_offset_hours: i32,
}

impl BankConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn history_min_interval(&self) -> Duration {
        Duration::from_secs(self.history_min_interval_secs)
    }

    /// Wall-clock time at the partner bank
    pub fn local_now(&self) -> NaiveDateTime {
        Utc::now().naive_utc() + ChronoDuration::hours(i64::from(self.utc_offset_hours))
    }

    /// Calendar date at the partner bank right now
    pub fn today(&self) -> NaiveDate {
        self.local_now().date()
    }
}

fn optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(SecretString::from))
}

#[derive(Debug, Clone, Deserialize)]
pub struct RechargeConfig {
    pub search_window_days: u32,
    pub amount_tolerance: String,
    pub request_ttl_hours: i64,
}

impl RechargeConfig {
    pub fn tolerance(&self) -> Result<BigDecimal, ConfigError> {
        BigDecimal::from_str(&self.amount_tolerance).map_err(|e| {
            ConfigError::Message(format!(
                "recharge.amount_tolerance '{}' is not a decimal: {}",
                self.amount_tolerance, e
            ))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub expiry_sweep_interval_secs: u64,
    pub history_backfill_enabled: bool,
    pub history_backfill_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let cfg = Self::builder()?
            .add_source(File::with_name("config/recharge").required(false))
            .add_source(
                Environment::with_prefix("RECHARGE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<AppConfig>()?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults only, no files or environment
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::builder()?.build()?.try_deserialize()
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("database.max_connections", 10)?
            .set_default("bank.base_url", "http://localhost:9090")?
            .set_default("bank.refresh_margin_secs", 300)?
            .set_default("bank.request_timeout_secs", 15)?
            .set_default("bank.history_min_interval_secs", 600)?
            .set_default("bank.utc_offset_hours", -4)?
            .set_default("recharge.search_window_days", 3)?
            .set_default("recharge.amount_tolerance", "0.01")?
            .set_default("recharge.request_ttl_hours", 24)?
            .set_default("workers.expiry_sweep_interval_secs", 300)?
            .set_default("workers.history_backfill_enabled", false)?
            .set_default("workers.history_backfill_interval_secs", 600)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recharge.search_window_days == 0 {
            return Err(ConfigError::Message(
                "recharge.search_window_days must be at least 1".to_string(),
            ));
        }
        if self.recharge.tolerance()? < BigDecimal::from(0) {
            return Err(ConfigError::Message(
                "recharge.amount_tolerance must not be negative".to_string(),
            ));
        }
        if self.bank.utc_offset_hours.abs() > 14 {
            return Err(ConfigError::Message(format!(
                "bank.utc_offset_hours {} is out of range",
                self.bank.utc_offset_hours
            )));
        }
        if self.workers.history_backfill_enabled
            && self.workers.history_backfill_interval_secs < self.bank.history_min_interval_secs
        {
            return Err(ConfigError::Message(format!(
                "workers.history_backfill_interval_secs must be >= {} (partner rate limit)",
                self.bank.history_min_interval_secs
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_partner_limits() {
        let cfg = AppConfig::defaults().unwrap();
        assert_eq!(cfg.recharge.search_window_days, 3);
        assert_eq!(cfg.bank.refresh_margin_secs, 300);
        assert_eq!(cfg.bank.history_min_interval(), Duration::from_secs(600));
        assert_eq!(cfg.recharge.tolerance().unwrap(), BigDecimal::from_str("0.01").unwrap());
        assert!(cfg.database.url.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn backfill_faster_than_rate_limit_is_rejected() {
        let mut cfg = AppConfig::defaults().unwrap();
        cfg.workers.history_backfill_enabled = true;
        cfg.workers.history_backfill_interval_secs = 60;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partner_clock_defaults_to_caracas_time() {
        let cfg = AppConfig::defaults().unwrap();
        assert_eq!(cfg.bank.utc_offset_hours, -4);
        let skew = Utc::now().naive_utc() - cfg.bank.local_now();
        assert!((skew.num_minutes() - 240).abs() <= 1);
    }
}
