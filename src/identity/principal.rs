use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SessionResult;

/// Short-lived credential minted from an [`Identity`]. Never persisted and never logged:
/// `Debug` prints a placeholder and there is no `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct ProofToken(String);

impl ProofToken {
    pub fn new<S: Into<String>>(raw: S) -> Self { Self(raw.into()) }

    /// The raw token, for placing on the wire only.
    pub fn expose(&self) -> &str { &self.0 }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl fmt::Debug for ProofToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProofToken(<redacted>)")
    }
}

/// A signed-in principal as held by the external identity provider.
#[async_trait]
pub trait Identity: Send + Sync + fmt::Debug {
    /// Stable identifier; two identities with the same uid are the same principal.
    fn uid(&self) -> &str;
    fn display_name(&self) -> Option<&str>;
    fn email(&self) -> Option<&str> { None }
    /// Mint a proof token. May hit the network; fails when the underlying credential expired.
    async fn proof_token(&self, force_refresh: bool) -> SessionResult<ProofToken>;
}

pub type SharedIdentity = Arc<dyn Identity>;

/// Plain snapshot of an identity's attributes, safe to publish and serialize.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub uid: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Principal {
    pub fn of(identity: &dyn Identity) -> Self {
        Self {
            uid: identity.uid().to_string(),
            display_name: identity.display_name().map(str::to_string),
            email: identity.email().map(str::to_string),
        }
    }
}

pub(crate) fn same_principal(a: Option<&SharedIdentity>, b: Option<&SharedIdentity>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.uid() == b.uid(),
        _ => false,
    }
}
