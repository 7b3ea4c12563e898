//! Wiring for the application shell: one cookie-storing HTTP client shared by the session
//! exchange and the API client, one session machine, and an API client that reports 401/403
//! back to that machine.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::client::ApiClient;
use crate::config::ClientConfig;
use crate::identity::{HttpSessionExchange, IdentityProvider, SessionMachine};

#[derive(Clone)]
pub struct Console {
    pub session: SessionMachine,
    pub api: ApiClient,
}

impl Console {
    /// Build the stack without following the provider yet; call [`Console::start`] for that.
    pub fn new(config: ClientConfig, provider: Arc<dyn IdentityProvider>) -> Result<Self> {
        let http = config.build_http_client()?;
        let exchange = Arc::new(HttpSessionExchange::new(http.clone(), config.clone()));
        let session = SessionMachine::with_timeout(provider, exchange, config.exchange_timeout);
        let api = ApiClient::new(http, config.clone()).with_credentials(Arc::new(session.clone()));
        info!(target: "opsconsole::session", api_base = %config.api_base, "console initialised");
        Ok(Self { session, api })
    }

    pub fn start(&self) { self.session.start(); }
}
