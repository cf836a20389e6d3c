//! Shared state of the chat server
//!
//! The registry owns the session table and the credential store; both are
//! constructed once at server start and shared by every connection task.

pub mod credentials;
pub mod registry;

pub use credentials::CredentialStore;
pub use registry::{Connection, Departure, SessionHandle, SessionInfo, SessionRegistry};
