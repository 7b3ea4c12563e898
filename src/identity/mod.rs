//! Identity and session synchronization: observer over the external provider, the cookie
//! exchange with the backend, and the session state machine that owns the session.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod provider;
mod observer;
mod exchange;
mod session;

pub use principal::{Identity, Principal, ProofToken, SharedIdentity};
pub use provider::{IdentityProvider, LocalIdentity, LocalIdentityProvider};
pub use observer::{IdentityObserver, Unsubscribe};
pub use exchange::{HttpSessionExchange, SessionExchange, SESSION_LOGIN_PATH, SESSION_LOGOUT_PATH};
pub use session::{SessionMachine, SessionStatus, SessionView};
