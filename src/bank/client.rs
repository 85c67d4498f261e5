//! Pago móvil movements client
//!
//! Every call obtains a valid token first. Non-2xx statuses and application
//! codes other than 200 are errors; nothing is retried here, the caller
//! decides.

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::token_manager::CredentialStore;
use super::types::{BankEnvelope, BankPayment, HistoryRequest, MobileFindRequest};
use super::BankError;
use crate::config::BankConfig;
use crate::logging::{mask_phone, redact_sensitive_data};
use crate::middleware::logging::log_external_call;

const MOBILE_FIND_PATH: &str = "/movements/mobile/find";
const HISTORY_PATH: &str = "/movements/history";

pub struct BankClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialStore>,
    timeout: Duration,
    history_min_interval: Duration,
    last_history_call: Mutex<Option<Instant>>,
}

impl BankClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<CredentialStore>,
        timeout: Duration,
        history_min_interval: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            timeout,
            history_min_interval,
            last_history_call: Mutex::new(None),
        }
    }

    pub fn from_config(config: &BankConfig, credentials: Arc<CredentialStore>) -> Self {
        Self::new(
            config.base_url.clone(),
            credentials,
            config.request_timeout(),
            config.history_min_interval(),
        )
    }

    /// Payments received from one origin phone and bank on one calendar day
    #[instrument(skip(self, phone), fields(phone = %mask_phone(phone)))]
    pub async fn search_payments(
        &self,
        phone: &str,
        bank: &str,
        date: NaiveDate,
    ) -> Result<Vec<BankPayment>, BankError> {
        let body = MobileFindRequest {
            phone,
            bank,
            date: date.format("%Y-%m-%d").to_string(),
        };

        let payments = self.post_movements(MOBILE_FIND_PATH, &body).await?;
        debug!(count = payments.len(), "Mobile movements fetched");
        Ok(payments)
    }

    /// All payments received on a day, limited by the partner to one call per interval
    #[instrument(skip(self))]
    pub async fn search_history(&self, date: NaiveDate) -> Result<Vec<BankPayment>, BankError> {
        {
            let mut last = self.last_history_call.lock().await;
            if let Some(previous) = *last {
                let elapsed = previous.elapsed();
                if elapsed < self.history_min_interval {
                    let retry_after_secs = (self.history_min_interval - elapsed).as_secs().max(1);
                    warn!(retry_after_secs, "History lookup refused locally");
                    return Err(BankError::RateLimited { retry_after_secs });
                }
            }
            *last = Some(Instant::now());
        }

        let body = HistoryRequest {
            date: date.format("%Y-%m-%d").to_string(),
        };
        self.post_movements(HISTORY_PATH, &body).await
    }

    async fn post_movements<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Vec<BankPayment>, BankError> {
        let token = self.credentials.ensure_valid().await?;
        let url = format!("{}{}", self.base_url, path);
        let timeout_secs = self.timeout.as_secs();

        let text = log_external_call("bancamiga", path, async {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&token)
                .timeout(self.timeout)
                .json(body)
                .send()
                .await
                .map_err(|e| BankError::from_reqwest(e, timeout_secs))?;

            let status = response.status();
            if !status.is_success() {
                return Err(BankError::Status {
                    status: status.as_u16(),
                });
            }

            response
                .text()
                .await
                .map_err(|e| BankError::from_reqwest(e, timeout_secs))
        })
        .await?;

        debug!(body = %redact_sensitive_data(&text), path, "Movements response");

        BankEnvelope::parse(&text)?.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::token_manager::Credentials;

    fn client(min_interval: Duration) -> BankClient {
        let creds = Arc::new(CredentialStore::new(
            "http://127.0.0.1:9",
            Some(Credentials::new("t", "r", chrono::Utc::now().timestamp() + 3_600)),
            300,
            Duration::from_millis(200),
        ));
        BankClient::new(
            "http://127.0.0.1:9",
            creds,
            Duration::from_millis(200),
            min_interval,
        )
    }

    #[tokio::test]
    async fn second_history_call_inside_interval_is_refused_locally() {
        let client = client(Duration::from_secs(600));
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();

        // First call reaches the (unreachable) partner and fails on transport
        let first = client.search_history(date).await;
        assert!(!matches!(first, Err(BankError::RateLimited { .. })));

        let second = client.search_history(date).await;
        assert!(matches!(
            second,
            Err(BankError::RateLimited { retry_after_secs }) if retry_after_secs > 0
        ));
    }
}
