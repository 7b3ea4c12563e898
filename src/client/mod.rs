//! Credentialed request client: the one path every screen uses to reach the JSON API.
//!
//! Each call carries the session cookie (shared cookie store) and, while an identity is known,
//! a freshly minted bearer token, so a backend trusting either credential accepts it, including
//! the window where the exchange has not set the cookie yet. 401/403 answers are reported to the
//! credential source before the error is returned. Nothing is retried here.

mod decode;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{RequestError, SessionError};
use crate::identity::SharedIdentity;

pub use decode::{decode_body, describe_failure};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Where the client gets its bearer identity from, and where it reports rejected credentials.
pub trait CredentialSource: Send + Sync {
    fn current_identity(&self) -> Option<SharedIdentity>;
    fn report_unauthorized(&self, error: &SessionError);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ClientConfig,
    credentials: Option<Arc<dyn CredentialSource>>,
}

impl ApiClient {
    /// `http` should be the cookie-storing client shared with the session exchange.
    pub fn new(http: reqwest::Client, config: ClientConfig) -> Self {
        Self { http, config, credentials: None }
    }

    pub fn with_credentials(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(source);
        self
    }

    pub fn config(&self) -> &ClientConfig { &self.config }

    pub async fn request<T, B>(&self, method: HttpMethod, path: &str, body: Option<&B>) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.config.absolute(path);
        let request_id = Uuid::new_v4().to_string();
        let mut req = self
            .http
            .request(method.as_reqwest(), &url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(REQUEST_ID_HEADER, request_id.as_str());
        if let Some(b) = body {
            req = req.json(b);
        }

        let mut bearer = false;
        if let Some(identity) = self.credentials.as_ref().and_then(|c| c.current_identity()) {
            match identity.proof_token(false).await {
                Ok(token) => {
                    req = req.bearer_auth(token.expose());
                    bearer = true;
                }
                // cookie alone may still be accepted
                Err(e) => debug!(target: "opsconsole::client", request_id = %request_id, error = %e, "no bearer token"),
            }
        }
        debug!(target: "opsconsole::client", request_id = %request_id, method = ?method, path, bearer, "request");

        let resp = req.send().await.map_err(SessionError::from)?;
        let status = resp.status();
        let text = resp.text().await.map_err(SessionError::from)?;

        if !status.is_success() {
            let message = describe_failure(status.as_u16(), status.canonical_reason().unwrap_or(""), &text);
            let err = SessionError::from_status(status.as_u16(), message);
            warn!(target: "opsconsole::client", request_id = %request_id, status = status.as_u16(), path, "request failed");
            if matches!(err, SessionError::Unauthorized { .. }) {
                if let Some(src) = &self.credentials {
                    src.report_unauthorized(&err);
                }
            }
            return Err(err);
        }
        decode_body(&text)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RequestError> {
        self.request::<T, ()>(HttpMethod::Get, path, None).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T, RequestError> {
        self.request(HttpMethod::Post, path, Some(body)).await
    }

    pub async fn patch_json<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T, RequestError> {
        self.request(HttpMethod::Patch, path, Some(body)).await
    }

    pub async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RequestError> {
        self.request::<T, ()>(HttpMethod::Delete, path, None).await
    }
}
