//! Session exchange: trades a proof token for the backend's HTTP-only session cookie and asks
//! the backend to tear that session down again on sign-out.

use async_trait::async_trait;
use tracing::debug;

use crate::client::describe_failure;
use crate::config::ClientConfig;
use crate::error::{ExchangeError, SessionError};

use super::principal::Identity;

pub const SESSION_LOGIN_PATH: &str = "/auth/sessionLogin";
pub const SESSION_LOGOUT_PATH: &str = "/auth/sessionLogout";

/// No retries happen behind this trait; the state machine decides whether a retry is still
/// meaningful for the current generation.
#[async_trait]
pub trait SessionExchange: Send + Sync {
    async fn login(&self, identity: &dyn Identity) -> Result<(), ExchangeError>;
    async fn logout(&self) -> Result<(), ExchangeError>;
}

/// Exchange over the backend's JSON session endpoints. The `reqwest::Client` must be the same
/// cookie-storing client the API client uses so the cookie set here rides on later requests.
#[derive(Clone)]
pub struct HttpSessionExchange {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpSessionExchange {
    pub fn new(client: reqwest::Client, config: ClientConfig) -> Self { Self { client, config } }

    async fn post_empty_ok(&self, path: &str, body: serde_json::Value) -> Result<(), ExchangeError> {
        let url = self.config.absolute(path);
        let resp = self.client.post(&url).json(&body).send().await.map_err(SessionError::from)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let reason = status.canonical_reason().unwrap_or("");
        let text = resp.text().await.unwrap_or_default();
        let message = describe_failure(status.as_u16(), reason, &text);
        // The exchange itself never reports Unauthorized: a refused token is a rejected exchange.
        Err(SessionError::BackendRejected { status: status.as_u16(), message })
    }
}

#[async_trait]
impl SessionExchange for HttpSessionExchange {
    async fn login(&self, identity: &dyn Identity) -> Result<(), ExchangeError> {
        let token = identity.proof_token(true).await.map_err(|e| match e {
            SessionError::TokenUnavailable { .. } => e,
            other => SessionError::token_unavailable(other.message().to_string()),
        })?;
        if token.is_empty() {
            return Err(SessionError::token_unavailable("identity produced an empty token"));
        }
        debug!(target: "opsconsole::exchange", uid = identity.uid(), "exchange.login");
        self.post_empty_ok(SESSION_LOGIN_PATH, serde_json::json!({ "idToken": token.expose() })).await
    }

    async fn logout(&self) -> Result<(), ExchangeError> {
        // Failures are logged by the caller, which owns the teardown policy.
        debug!(target: "opsconsole::exchange", "exchange.logout");
        self.post_empty_ok(SESSION_LOGOUT_PATH, serde_json::json!({})).await
    }
}
