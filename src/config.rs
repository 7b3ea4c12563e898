//! Client configuration, read from the environment the same way the binaries read
//! their ports and roots: plain env vars with defaults.

use std::time::Duration;

use anyhow::{Context, Result};

pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1:5000";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_EXCHANGE_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL every relative API path is resolved against, e.g. `https://console.example/api`.
    pub api_base: String,
    /// Transport timeout for each request.
    pub request_timeout: Duration,
    /// Deadline for a whole exchange (token mint plus backend call).
    pub exchange_timeout: Duration,
    pub user_agent: String,
}

impl ClientConfig {
    pub fn new<S: Into<String>>(api_base: S) -> Self {
        Self {
            api_base: trim_base(api_base.into()),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            exchange_timeout: Duration::from_millis(DEFAULT_EXCHANGE_TIMEOUT_MS),
            user_agent: format!("opsconsole/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// `OPSCONSOLE_API_BASE` wins when set (emulator function URLs carry their own path);
    /// otherwise the API lives under `/api` of `OPSCONSOLE_ORIGIN`.
    pub fn from_env() -> Result<Self> {
        let api_base = match std::env::var("OPSCONSOLE_API_BASE") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => {
                let origin = std::env::var("OPSCONSOLE_ORIGIN").unwrap_or_else(|_| DEFAULT_ORIGIN.to_string());
                format!("{}/api", origin.trim_end_matches('/'))
            }
        };
        let mut cfg = Self::new(api_base);
        if let Ok(v) = std::env::var("OPSCONSOLE_TIMEOUT_MS") {
            let ms: u64 = v.trim().parse().context("OPSCONSOLE_TIMEOUT_MS must be an integer")?;
            cfg.request_timeout = Duration::from_millis(ms);
        }
        if let Ok(v) = std::env::var("OPSCONSOLE_EXCHANGE_TIMEOUT_MS") {
            let ms: u64 = v.trim().parse().context("OPSCONSOLE_EXCHANGE_TIMEOUT_MS must be an integer")?;
            cfg.exchange_timeout = Duration::from_millis(ms);
        }
        Ok(cfg)
    }

    pub fn with_base<S: Into<String>>(mut self, api_base: S) -> Self {
        self.api_base = trim_base(api_base.into());
        self
    }

    pub fn with_exchange_timeout(mut self, t: Duration) -> Self {
        self.exchange_timeout = t;
        self
    }

    pub fn with_request_timeout(mut self, t: Duration) -> Self {
        self.request_timeout = t;
        self
    }

    /// Resolve an API path. Absolute URLs pass through untouched.
    pub fn absolute(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.api_base, path)
        } else {
            format!("{}/{}", self.api_base, path)
        }
    }

    /// Build the shared HTTP client. Both the exchange service and the API client must use
    /// clones of this one client so the session cookie set by the exchange is sent on every call.
    pub fn build_http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .cookie_store(true)
            .timeout(self.request_timeout)
            .user_agent(self.user_agent.clone())
            .build()
            .context("failed to build HTTP client")
    }
}

fn trim_base(s: String) -> String {
    s.trim().trim_end_matches('/').to_string()
}
