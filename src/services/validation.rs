//! Claim validation
//!
//! Everything here runs before any network call or write.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

use crate::error::{AppError, ValidationError};

/// Participant codes of the pago móvil network
pub const KNOWN_BANKS: &[&str] = &[
    "0102", "0104", "0105", "0108", "0114", "0115", "0128", "0134", "0137", "0138", "0146",
    "0151", "0156", "0157", "0163", "0166", "0168", "0169", "0171", "0172", "0174", "0175",
    "0177", "0178", "0191",
];

fn mobile_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:\+?58|0)(4(?:12|14|16|24|26)\d{7})$").ok())
        .as_ref()
}

pub fn validate_last_four(value: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.len() == 4 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        Ok(trimmed.to_string())
    } else {
        Err(AppError::validation(ValidationError::InvalidLastFour {
            value: value.to_string(),
        }))
    }
}

pub fn validate_amount(amount: &BigDecimal) -> Result<(), AppError> {
    if *amount <= BigDecimal::from(0) {
        return Err(AppError::validation(ValidationError::InvalidAmount {
            amount: amount.to_string(),
            reason: "amount must be greater than zero".to_string(),
        }));
    }
    // Balances are stored with two decimals
    let (_, scale) = amount.normalized().as_bigint_and_exponent();
    if scale > 2 {
        return Err(AppError::validation(ValidationError::InvalidAmount {
            amount: amount.to_string(),
            reason: "amount must have at most two decimals".to_string(),
        }));
    }
    Ok(())
}

pub fn validate_bank(code: &str) -> Result<String, AppError> {
    let trimmed = code.trim();
    if KNOWN_BANKS.contains(&trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(AppError::validation(ValidationError::UnknownBank {
            code: code.to_string(),
        }))
    }
}

/// Normalize a Venezuelan mobile number to the local `04XXXXXXXXX` form
///
/// Accepts `04141234567`, `584141234567` and `+584141234567`, ignoring spaces
/// and dashes.
pub fn normalize_phone(value: &str) -> Result<String, AppError> {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();

    mobile_regex()
        .and_then(|re| re.captures(&compact))
        .and_then(|caps| caps.get(1))
        .map(|national| format!("0{}", national.as_str()))
        .ok_or_else(|| {
            AppError::validation(ValidationError::InvalidPhone {
                value: value.to_string(),
            })
        })
}

pub fn parse_date(value: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        AppError::validation(ValidationError::InvalidDate {
            value: value.to_string(),
        })
    })
}

pub fn require(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(ValidationError::MissingField {
            field: field.to_string(),
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn last_four_must_be_four_ascii_digits() {
        assert_eq!(validate_last_four("4321").unwrap(), "4321");
        assert_eq!(validate_last_four(" 0007 ").unwrap(), "0007");
        assert!(validate_last_four("432").is_err());
        assert!(validate_last_four("43210").is_err());
        assert!(validate_last_four("43a1").is_err());
        assert!(validate_last_four("٤٣٢١").is_err());
    }

    #[test]
    fn amount_must_be_positive() {
        assert!(validate_amount(&BigDecimal::from_str("0.01").unwrap()).is_ok());
        assert!(validate_amount(&BigDecimal::from(0)).is_err());
        assert!(validate_amount(&BigDecimal::from(-5)).is_err());
    }

    #[test]
    fn amount_has_at_most_two_decimals() {
        assert!(validate_amount(&BigDecimal::from_str("100.50").unwrap()).is_ok());
        assert!(validate_amount(&BigDecimal::from_str("100.500").unwrap()).is_ok());
        assert!(validate_amount(&BigDecimal::from_str("1000").unwrap()).is_ok());
        assert!(validate_amount(&BigDecimal::from_str("100.005").unwrap()).is_err());
        assert!(validate_amount(&BigDecimal::from_str("0.001").unwrap()).is_err());
    }

    #[test]
    fn only_known_banks_are_accepted() {
        assert_eq!(validate_bank("0172").unwrap(), "0172");
        assert!(validate_bank("9999").is_err());
        assert_eq!(validate_bank("9999").unwrap_err().status_code(), 400);
    }

    #[test]
    fn phone_numbers_are_normalized() {
        assert_eq!(normalize_phone("04141234567").unwrap(), "04141234567");
        assert_eq!(normalize_phone("+58 414-123-4567").unwrap(), "04141234567");
        assert_eq!(normalize_phone("584241234567").unwrap(), "04241234567");
        assert!(normalize_phone("02121234567").is_err());
        assert!(normalize_phone("0414123456").is_err());
    }

    #[test]
    fn dates_use_iso_format() {
        assert_eq!(
            parse_date("2026-10-18").unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
        );
        assert!(parse_date("18/10/2026").is_err());
    }
}
