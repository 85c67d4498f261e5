//! Logging and tracing configuration for the recharge backend
//!
//! Provides structured logging with JSON formatting in production and
//! human-readable output in development. Includes redaction of partner bank
//! credentials and masking of customer phone numbers.

use regex::Regex;
use std::env;
use std::sync::OnceLock;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Deployment tier, read from `ENVIRONMENT` (or `ENV`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        env::var("ENVIRONMENT")
            .or_else(|_| env::var("ENV"))
            .map(|value| Self::parse(&value))
            .unwrap_or(Self::Development)
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "staging" | "stage" => Self::Staging,
            _ => Self::Development,
        }
    }

    /// Level applied to this crate when `RUST_LOG` is unset
    pub fn default_log_level(&self) -> Level {
        if *self == Self::Development {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }

    pub fn is_production(&self) -> bool {
        *self == Self::Production
    }
}

/// Output encoding of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// `LOG_FORMAT` wins; otherwise production logs JSON
    pub fn resolve(explicit: Option<&str>, environment: Environment) -> Self {
        match explicit.map(|f| f.trim().to_ascii_lowercase()) {
            Some(f) if f == "json" => Self::Json,
            Some(f) if f == "pretty" => Self::Pretty,
            _ if environment.is_production() => Self::Json,
            _ => Self::Pretty,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
        }
    }
}

/// Directives used when `RUST_LOG` is unset
///
/// Partner HTTP and pool chatter stays at warn; the request-id layers are
/// kept at debug so correlation problems can be traced.
fn default_directives(environment: Environment) -> String {
    let crate_target = env!("CARGO_PKG_NAME").replace('-', "_");
    [
        format!("{}={}", crate_target, environment.default_log_level()),
        "tower_http=debug".to_string(),
        "axum=info".to_string(),
        "sqlx=warn".to_string(),
        "hyper=warn".to_string(),
        "reqwest=warn".to_string(),
    ]
    .join(",")
}

/// Install the global subscriber
///
/// Reads `ENVIRONMENT`/`ENV`, `RUST_LOG` and `LOG_FORMAT`.
pub fn init_tracing() {
    let environment = Environment::from_env();
    let format = LogFormat::resolve(env::var("LOG_FORMAT").ok().as_deref(), environment);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(environment)));

    let json = (format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
    });
    let pretty = (format == LogFormat::Pretty).then(|| {
        fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .init();

    tracing::info!(
        environment = ?environment,
        format = format.as_str(),
        "Tracing initialized"
    );
}

/// Mask a customer phone number for logging
///
/// Keeps the operator prefix and the last 3 digits.
///
/// # Examples
/// ```
/// use recharge_backend::logging::mask_phone;
/// assert_eq!(mask_phone("04141234567"), "0414****567");
/// ```
pub fn mask_phone(phone: &str) -> String {
    if phone.len() < 8 || !phone.is_ascii() {
        return "****".to_string();
    }
    format!("{}****{}", &phone[..4], &phone[phone.len() - 3..])
}

fn sensitive_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            "token",
            "refresh_token",
            "access_token",
            "Pass",
            "password",
            "secret",
            "authorization",
            "Dni",
        ]
        .iter()
        .filter_map(|key| Regex::new(&format!(r#""({})"\s*:\s*"[^"]*""#, key)).ok())
        .collect()
    })
}

/// Redact credentials from partner request/response bodies before logging
pub fn redact_sensitive_data(text: &str) -> String {
    let mut result = text.to_string();
    for re in sensitive_patterns() {
        result = re.replace_all(&result, r#""$1": "[REDACTED]""#).to_string();
    }
    result
}

/// Log a wallet credit with consistent structure
///
/// # Examples
/// ```no_run
/// # use recharge_backend::log_transaction;
/// log_transaction!(
///     event = "wallet_credit",
///     request_id = "3f0c...",
///     reference = "000123454321",
///     amount_ves = "100.00",
/// );
/// ```
#[macro_export]
macro_rules! log_transaction {
    ($($key:tt = $value:expr),* $(,)?) => {
        tracing::info!(
            event_type = "transaction",
            $($key = tracing::field::display(&$value)),*
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_detection() {
        assert_eq!(Environment::parse("production"), Environment::Production);
        assert!(Environment::parse("prod").is_production());
        assert_eq!(Environment::parse("stage"), Environment::Staging);
        assert_eq!(Environment::parse("anything"), Environment::Development);
    }

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("04141234567"), "0414****567");
        assert_eq!(mask_phone("0414"), "****");
    }

    #[test]
    fn test_log_format_resolution() {
        assert_eq!(LogFormat::resolve(None, Environment::Production), LogFormat::Json);
        assert_eq!(LogFormat::resolve(None, Environment::Staging), LogFormat::Pretty);
        assert_eq!(
            LogFormat::resolve(Some("JSON"), Environment::Development),
            LogFormat::Json
        );
        assert_eq!(
            LogFormat::resolve(Some("pretty"), Environment::Production),
            LogFormat::Pretty
        );
    }

    #[test]
    fn test_default_directives_cover_the_crate() {
        let directives = default_directives(Environment::Production);
        assert!(directives.starts_with("recharge_backend=INFO"));
        assert!(directives.contains("reqwest=warn"));
    }

    #[test]
    fn test_default_log_levels() {
        assert_eq!(Environment::Development.default_log_level(), Level::DEBUG);
        assert_eq!(Environment::Production.default_log_level(), Level::INFO);
        assert_eq!(Environment::Staging.default_log_level(), Level::INFO);
    }

    #[test]
    fn test_redact_sensitive_data() {
        let data = r#"{"Code": 200, "token": "eyJhbGciOi", "refresh_token":"r-123", "Amount": "100.00"}"#;
        let redacted = redact_sensitive_data(data);
        assert!(redacted.contains("[REDACTED]"));
        assert!(!redacted.contains("eyJhbGciOi"));
        assert!(!redacted.contains("r-123"));
        assert!(redacted.contains("100.00"));
    }
}
