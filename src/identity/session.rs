//! Session state machine. The single owner of the session entity: it applies identity events
//! and exchange outcomes, and publishes a read-only [`SessionView`] on every transition.
//!
//! Ordering rests on `generation` alone. Every identity change bumps it; an exchange captures
//! the value it started under and its result is dropped if the value moved on meanwhile.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::CredentialSource;
use crate::config::DEFAULT_EXCHANGE_TIMEOUT_MS;
use crate::error::{SessionError, SessionResult};

use super::exchange::SessionExchange;
use super::observer::{IdentityObserver, Unsubscribe};
use super::principal::{same_principal, Principal, SharedIdentity};
use super::provider::IdentityProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Unauthenticated,
    Exchanging,
    Authenticated,
    ExchangeFailed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Unauthenticated => "unauthenticated",
            SessionStatus::Exchanging => "exchanging",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::ExchangeFailed => "exchange-failed",
        }
    }
}

/// Read model handed to renderers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub status: SessionStatus,
    pub identity: Option<Principal>,
    pub last_error: Option<SessionError>,
    pub generation: u64,
    /// False until the first identity event has been applied.
    pub ready: bool,
    pub updated_at: DateTime<Utc>,
}

impl SessionView {
    pub fn can_render_privileged(&self) -> bool { self.ready && self.status == SessionStatus::Authenticated }

    pub fn needs_retry(&self) -> bool { self.status == SessionStatus::ExchangeFailed }
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    identity: Option<SharedIdentity>,
    last_error: Option<SessionError>,
    generation: u64,
    ready: bool,
}

impl SessionState {
    fn view(&self) -> SessionView {
        SessionView {
            status: self.status,
            identity: self.identity.as_ref().map(|i| Principal::of(i.as_ref())),
            last_error: self.last_error.clone(),
            generation: self.generation,
            ready: self.ready,
            updated_at: Utc::now(),
        }
    }

    fn reset(&mut self, last_error: Option<SessionError>) {
        self.generation += 1;
        self.identity = None;
        self.status = SessionStatus::Unauthenticated;
        self.last_error = last_error;
    }
}

struct Inner {
    state: Mutex<SessionState>,
    tx: watch::Sender<SessionView>,
    provider: Arc<dyn IdentityProvider>,
    exchange: Arc<dyn SessionExchange>,
    exchange_timeout: Duration,
    subscription: Mutex<Option<Unsubscribe>>,
    teardown: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap-to-clone handle to the one session of the application.
#[derive(Clone)]
pub struct SessionMachine {
    inner: Arc<Inner>,
}

impl SessionMachine {
    pub fn new(provider: Arc<dyn IdentityProvider>, exchange: Arc<dyn SessionExchange>) -> Self {
        Self::with_timeout(provider, exchange, Duration::from_millis(DEFAULT_EXCHANGE_TIMEOUT_MS))
    }

    pub fn with_timeout(
        provider: Arc<dyn IdentityProvider>,
        exchange: Arc<dyn SessionExchange>,
        exchange_timeout: Duration,
    ) -> Self {
        let state = SessionState {
            status: SessionStatus::Unauthenticated,
            identity: None,
            last_error: None,
            generation: 0,
            ready: false,
        };
        let (tx, _rx) = watch::channel(state.view());
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                tx,
                provider,
                exchange,
                exchange_timeout,
                subscription: Mutex::new(None),
                teardown: Mutex::new(None),
            }),
        }
    }

    /// Start following the provider. The current identity is applied before this returns.
    pub fn start(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let observer = IdentityObserver::new(self.inner.provider.clone());
        let sub = observer.subscribe(move |identity| {
            if let Some(inner) = weak.upgrade() {
                let _ = SessionMachine { inner }.on_identity(identity);
            }
        });
        if let Some(prev) = self.inner.subscription.lock().replace(sub) {
            prev.unsubscribe();
        }
    }

    pub fn stop(&self) {
        if let Some(sub) = self.inner.subscription.lock().take() {
            sub.unsubscribe();
        }
    }

    pub fn view(&self) -> SessionView { self.inner.tx.borrow().clone() }

    /// Change notification for renderers; the receiver always holds the latest view.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> { self.inner.tx.subscribe() }

    pub fn status(&self) -> SessionStatus { self.inner.state.lock().status }

    pub fn generation(&self) -> u64 { self.inner.state.lock().generation }

    /// The identity handle credentials are minted from. The observer collapses events for an
    /// unchanged principal, so a newer handle for the held uid is picked up from the provider here.
    pub fn current_identity(&self) -> Option<SharedIdentity> {
        let latest = self.latest_from_provider();
        let mut st = self.inner.state.lock();
        adopt_handle(&mut st, latest);
        st.identity.clone()
    }

    /// Apply an identity event. Returns the handle of the exchange this event started, if any.
    ///
    /// An event for the principal the machine already holds (exchanging, authenticated or
    /// failed) only swaps the identity handle. Credential refreshes never cause another
    /// exchange, and a failed exchange is only restarted by [`SessionMachine::retry`].
    pub fn on_identity(&self, identity: Option<SharedIdentity>) -> Option<JoinHandle<()>> {
        let mut st = self.inner.state.lock();
        let was_ready = std::mem::replace(&mut st.ready, true);
        match identity {
            None => {
                if st.status != SessionStatus::Unauthenticated || st.identity.is_some() {
                    st.reset(None);
                    info!(target: "opsconsole::session", generation = st.generation, "session.signed_out");
                    self.publish(&st);
                } else if !was_ready {
                    self.publish(&st);
                }
                None
            }
            Some(id) => {
                if st.status != SessionStatus::Unauthenticated && same_principal(st.identity.as_ref(), Some(&id)) {
                    debug!(target: "opsconsole::session", uid = id.uid(), "session.identity_refreshed");
                    let before = st.identity.as_ref().map(|i| Principal::of(i.as_ref()));
                    let after = Principal::of(id.as_ref());
                    st.identity = Some(id);
                    if !was_ready || before.as_ref() != Some(&after) {
                        self.publish(&st);
                    }
                    return None;
                }
                Some(self.begin_exchange(&mut st, id))
            }
        }
    }

    /// Restart the exchange after a failure. No-op in every other state.
    pub fn retry(&self) -> Option<JoinHandle<()>> {
        let latest = self.latest_from_provider();
        let mut st = self.inner.state.lock();
        if st.status != SessionStatus::ExchangeFailed {
            return None;
        }
        adopt_handle(&mut st, latest);
        let id = st.identity.clone()?;
        Some(self.begin_exchange(&mut st, id))
    }

    /// Sign in through the provider and wait for the session to settle. An exchange starts only
    /// when the machine is unauthenticated or holds a different principal; the observer's own
    /// event for the same identity then lands on a machine that already holds it.
    pub async fn sign_in(&self) -> SessionResult<SessionView> {
        let identity = self.inner.provider.sign_in().await?;
        if let Some(h) = self.on_identity(Some(identity)) {
            let _ = h.await;
        }
        Ok(self.settled().await)
    }

    /// Sign out. Local state drops to unauthenticated before anything is awaited; backend
    /// teardown runs detached and its outcome is only logged.
    pub async fn logout(&self) -> SessionResult<()> {
        {
            let mut st = self.inner.state.lock();
            st.ready = true;
            st.reset(None);
            info!(target: "opsconsole::session", generation = st.generation, "session.logout");
            self.publish(&st);
        }

        let exchange = self.inner.exchange.clone();
        let deadline = self.inner.exchange_timeout;
        let teardown = tokio::spawn(async move {
            match tokio::time::timeout(deadline, exchange.logout()).await {
                Ok(Ok(())) => debug!(target: "opsconsole::session", "session.backend_logout ok"),
                Ok(Err(e)) => warn!(target: "opsconsole::session", error = %e, "backend session teardown failed; continuing"),
                Err(_) => warn!(target: "opsconsole::session", "backend session teardown timed out; continuing"),
            }
        });
        *self.inner.teardown.lock() = Some(teardown);

        let local = self.inner.provider.sign_out_local().await;
        if let Err(e) = &local {
            warn!(target: "opsconsole::session", error = %e, "provider sign-out failed");
        }
        local
    }

    /// Wait for the detached backend teardown of the last `logout`, if one is still running.
    /// Only useful for short-lived processes that would otherwise exit before it is sent.
    pub async fn flush_teardown(&self) {
        let handle = self.inner.teardown.lock().take();
        if let Some(h) = handle {
            let _ = h.await;
        }
    }

    /// Drop to unauthenticated because the backend refused a credentialed request.
    pub fn force_unauthenticated(&self, reason: SessionError) {
        let mut st = self.inner.state.lock();
        let was = st.status;
        st.ready = true;
        st.reset(Some(reason));
        warn!(target: "opsconsole::session", from = was.as_str(), generation = st.generation, "session.forced_sign_out");
        self.publish(&st);
    }

    /// Wait until the first identity event was applied and no exchange is in flight.
    pub async fn settled(&self) -> SessionView {
        let mut rx = self.subscribe();
        loop {
            {
                let v = rx.borrow_and_update();
                if v.ready && v.status != SessionStatus::Exchanging {
                    return v.clone();
                }
            }
            if rx.changed().await.is_err() {
                return self.view();
            }
        }
    }

    fn latest_from_provider(&self) -> Option<SharedIdentity> {
        let rx = self.inner.provider.watch_identity();
        let latest = rx.borrow().clone();
        latest
    }

    fn begin_exchange(&self, st: &mut SessionState, identity: SharedIdentity) -> JoinHandle<()> {
        st.generation += 1;
        st.identity = Some(identity.clone());
        st.status = SessionStatus::Exchanging;
        let generation = st.generation;
        info!(target: "opsconsole::session", uid = identity.uid(), generation, "session.exchanging");
        self.publish(st);

        let me = self.clone();
        let exchange = self.inner.exchange.clone();
        let deadline = self.inner.exchange_timeout;
        tokio::spawn(async move {
            let result = match tokio::time::timeout(deadline, exchange.login(identity.as_ref())).await {
                Ok(r) => r,
                Err(elapsed) => Err(SessionError::from(elapsed)),
            };
            me.complete_exchange(generation, result);
        })
    }

    fn complete_exchange(&self, generation: u64, result: Result<(), SessionError>) {
        let mut st = self.inner.state.lock();
        if st.generation != generation {
            debug!(target: "opsconsole::session", captured = generation, current = st.generation, "session.stale_exchange_discarded");
            return;
        }
        match result {
            Ok(()) => {
                st.status = SessionStatus::Authenticated;
                st.last_error = None;
                info!(target: "opsconsole::session", generation, "session.authenticated");
            }
            Err(e) => {
                warn!(target: "opsconsole::session", generation, error = %e, "session.exchange_failed");
                st.status = SessionStatus::ExchangeFailed;
                st.last_error = Some(e);
            }
        }
        self.publish(&st);
    }

    // Called with the state lock held so views go out in transition order.
    fn publish(&self, st: &SessionState) {
        self.inner.tx.send_replace(st.view());
    }
}

// Swap in the provider's newer handle when it names the principal already held.
fn adopt_handle(st: &mut SessionState, latest: Option<SharedIdentity>) {
    if let Some(latest) = latest {
        if st.identity.is_some() && same_principal(st.identity.as_ref(), Some(&latest)) {
            st.identity = Some(latest);
        }
    }
}

impl CredentialSource for SessionMachine {
    fn current_identity(&self) -> Option<SharedIdentity> { SessionMachine::current_identity(self) }

    fn report_unauthorized(&self, error: &SessionError) { self.force_unauthenticated(error.clone()); }
}
