pub mod error;
pub mod config;
pub mod identity;
pub mod client;
pub mod console;

pub use client::{ApiClient, CredentialSource, HttpMethod};
pub use config::ClientConfig;
pub use console::Console;
pub use error::{ErrorKind, ExchangeError, RequestError, SessionError, SessionResult};
pub use identity::{SessionMachine, SessionStatus, SessionView};
