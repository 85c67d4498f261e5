//! Partner bank credential lifecycle
//!
//! The access token, refresh token and expiry always change together. They
//! live behind one async mutex that stays locked for the duration of a
//! refresh, so concurrent callers near expiry trigger a single `/token/refresh`
//! and then all observe the new token.

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::types::{RefreshRequest, TokenRequest, TokenResponse, SUCCESS_CODE};
use super::BankError;
use crate::config::BankConfig;
use crate::logging::redact_sensitive_data;
use crate::middleware::logging::log_external_call;

/// The credential triple issued by the partner
pub struct Credentials {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    /// Epoch seconds
    pub expires_at: i64,
}

impl Credentials {
    pub fn new(access_token: &str, refresh_token: &str, expires_at: i64) -> Self {
        Self {
            access_token: SecretString::from(access_token.to_string()),
            refresh_token: SecretString::from(refresh_token.to_string()),
            expires_at,
        }
    }

    pub fn needs_refresh(&self, now: i64, margin_secs: i64) -> bool {
        self.expires_at - now < margin_secs
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub struct CredentialStore {
    http: reqwest::Client,
    base_url: String,
    dni: Option<String>,
    password: Option<SecretString>,
    refresh_margin_secs: i64,
    timeout: Duration,
    credentials: Mutex<Option<Credentials>>,
}

impl CredentialStore {
    pub fn new(
        base_url: impl Into<String>,
        initial: Option<Credentials>,
        refresh_margin_secs: i64,
        timeout: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            dni: None,
            password: None,
            refresh_margin_secs,
            timeout,
            credentials: Mutex::new(initial),
        }
    }

    /// Build from configuration; the triple is seeded only when both tokens are set
    pub fn from_config(config: &BankConfig) -> Self {
        let initial = match (&config.access_token, &config.refresh_token) {
            (Some(access), Some(refresh)) => Some(Credentials::new(
                access.expose_secret(),
                refresh.expose_secret(),
                // Unknown expiry forces a refresh on first use
                config.expires_at.unwrap_or(0),
            )),
            _ => None,
        };

        let mut store = Self::new(
            config.base_url.clone(),
            initial,
            config.refresh_margin_secs,
            config.request_timeout(),
        );
        store.dni = config.dni.clone();
        store.password = config
            .password
            .as_ref()
            .map(|p| SecretString::from(p.expose_secret().to_string()));
        store
    }

    pub fn with_login(mut self, dni: impl Into<String>, password: SecretString) -> Self {
        self.dni = Some(dni.into());
        self.password = Some(password);
        self
    }

    pub async fn has_credentials(&self) -> bool {
        self.credentials.lock().await.is_some()
    }

    /// Return an access token valid for at least the refresh margin
    ///
    /// Any failure here is fatal for the caller's current resolution.
    #[instrument(skip(self))]
    pub async fn ensure_valid(&self) -> Result<String, BankError> {
        let mut guard = self.credentials.lock().await;
        let now = Utc::now().timestamp();

        if let Some(creds) = guard.as_ref() {
            if !creds.needs_refresh(now, self.refresh_margin_secs) {
                return Ok(creds.access_token.expose_secret().to_string());
            }
        }

        let held_refresh = guard
            .as_ref()
            .map(|c| (c.refresh_token.expose_secret().to_string(), c.expires_at - now));

        let fresh = match held_refresh {
            Some((refresh_token, expires_in_secs)) => {
                info!(expires_in_secs, "Bank token near expiry, refreshing");
                self.refresh(&refresh_token).await?
            }
            None => {
                let password = self.password.as_ref().ok_or_else(|| {
                    BankError::Credential("no bank credentials provisioned".to_string())
                })?;
                warn!("No bank token held, issuing a new one");
                self.issue(password.expose_secret()).await?
            }
        };

        let token = fresh.access_token.expose_secret().to_string();
        *guard = Some(fresh);
        Ok(token)
    }

    /// Full issuance from the login password, replacing any held triple
    #[instrument(skip(self, password))]
    pub async fn generate(&self, password: &SecretString) -> Result<(), BankError> {
        let mut guard = self.credentials.lock().await;
        let fresh = self.issue(password.expose_secret()).await?;
        *guard = Some(fresh);
        info!("Bank credentials issued");
        Ok(())
    }

    async fn issue(&self, password: &str) -> Result<Credentials, BankError> {
        let dni = self
            .dni
            .as_deref()
            .ok_or_else(|| BankError::Credential("bank.dni is not configured".to_string()))?;

        let body = TokenRequest { dni, password };
        self.post_token("/token", &body).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Credentials, BankError> {
        let body = RefreshRequest { refresh_token };
        self.post_token("/token/refresh", &body).await
    }

    async fn post_token<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Credentials, BankError> {
        let url = format!("{}{}", self.base_url, path);
        let timeout_secs = self.timeout.as_secs();

        let text = log_external_call("bancamiga", path, async {
            let response = self
                .http
                .post(&url)
                .timeout(self.timeout)
                .json(body)
                .send()
                .await
                .map_err(|e| BankError::from_reqwest(e, timeout_secs))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| BankError::from_reqwest(e, timeout_secs))?;

            if !status.is_success() {
                return Err(BankError::Status {
                    status: status.as_u16(),
                });
            }
            Ok(text)
        })
        .await
        .map_err(|e| BankError::Credential(e.to_string()))?;

        debug!(body = %redact_sensitive_data(&text), "Token endpoint response");

        let parsed: TokenResponse = serde_json::from_str(&text)
            .map_err(|e| BankError::Credential(format!("invalid token response: {}", e)))?;

        if parsed.code != Some(SUCCESS_CODE) {
            return Err(BankError::Credential(format!(
                "token endpoint returned code {:?}: {}",
                parsed.code,
                parsed.message.unwrap_or_default()
            )));
        }

        match (parsed.token, parsed.refresh_token, parsed.expires_at) {
            (Some(token), Some(refresh), Some(expires_at)) => {
                Ok(Credentials::new(&token, &refresh, expires_at))
            }
            _ => Err(BankError::Credential(
                "token response is missing token, refresh_token or expires_at".to_string(),
            )),
        }
    }
}
