use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{SessionError, SessionResult};

use super::principal::{Identity, ProofToken, SharedIdentity};

/// The external identity provider. Its internals are opaque; the core only needs the
/// current identity with change notification, sign-in, and local sign-out.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Receiver holding the current identity; every provider-side change is sent on it.
    fn watch_identity(&self) -> watch::Receiver<Option<SharedIdentity>>;
    async fn sign_in(&self) -> SessionResult<SharedIdentity>;
    /// Drop the provider's locally held identity.
    async fn sign_out_local(&self) -> SessionResult<()>;
}

/// In-process identity with a fixed token. `expire()` simulates a lapsed credential.
#[derive(Debug)]
pub struct LocalIdentity {
    uid: String,
    display_name: Option<String>,
    email: Option<String>,
    token: Mutex<Option<String>>,
    minted: AtomicUsize,
}

impl LocalIdentity {
    pub fn new<S: Into<String>>(uid: S, token: S) -> Self {
        Self {
            uid: uid.into(),
            display_name: None,
            email: None,
            token: Mutex::new(Some(token.into())),
            minted: AtomicUsize::new(0),
        }
    }

    pub fn with_display_name<S: Into<String>>(mut self, name: S) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_email<S: Into<String>>(mut self, email: S) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn shared(self) -> SharedIdentity { Arc::new(self) }

    pub fn set_token<S: Into<String>>(&self, token: S) { *self.token.lock() = Some(token.into()); }

    pub fn expire(&self) { *self.token.lock() = None; }

    /// Number of tokens handed out so far.
    pub fn minted(&self) -> usize { self.minted.load(Ordering::SeqCst) }
}

#[async_trait]
impl Identity for LocalIdentity {
    fn uid(&self) -> &str { &self.uid }
    fn display_name(&self) -> Option<&str> { self.display_name.as_deref() }
    fn email(&self) -> Option<&str> { self.email.as_deref() }

    async fn proof_token(&self, _force_refresh: bool) -> SessionResult<ProofToken> {
        let tok = self.token.lock().clone();
        match tok {
            Some(t) => {
                self.minted.fetch_add(1, Ordering::SeqCst);
                Ok(ProofToken::new(t))
            }
            None => Err(SessionError::token_unavailable(format!("credential for {} expired", self.uid))),
        }
    }
}

/// Provider backed by a watch channel. `sign_in` signs in whichever identity is pending,
/// `publish` simulates a provider-driven change (token revocation, another tab signing out).
pub struct LocalIdentityProvider {
    tx: watch::Sender<Option<SharedIdentity>>,
    pending: Mutex<Option<SharedIdentity>>,
}

impl Default for LocalIdentityProvider {
    fn default() -> Self { Self::new() }
}

impl LocalIdentityProvider {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx, pending: Mutex::new(None) }
    }

    pub fn with_pending(identity: SharedIdentity) -> Self {
        let p = Self::new();
        p.set_pending(Some(identity));
        p
    }

    /// Identity the next `sign_in` will produce.
    pub fn set_pending(&self, identity: Option<SharedIdentity>) { *self.pending.lock() = identity; }

    pub fn publish(&self, identity: Option<SharedIdentity>) { self.tx.send_replace(identity); }

    pub fn current(&self) -> Option<SharedIdentity> { self.tx.borrow().clone() }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    fn watch_identity(&self) -> watch::Receiver<Option<SharedIdentity>> { self.tx.subscribe() }

    async fn sign_in(&self) -> SessionResult<SharedIdentity> {
        let Some(identity) = self.pending.lock().clone() else {
            return Err(SessionError::provider("no identity available to sign in"));
        };
        self.tx.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out_local(&self) -> SessionResult<()> {
        self.tx.send_replace(None);
        Ok(())
    }
}
