//! Protocol logic of the chat server
//!
//! - `auth`: per-connection challenge-response handshake
//! - `router`: broadcast and unicast delivery
//! - `dispatcher`: command handling for authenticated sessions

pub mod auth;
pub mod dispatcher;
pub mod router;

pub use auth::{AuthOutcome, AuthState, AuthStateMachine, AuthStep};
pub use dispatcher::{CommandDispatcher, Flow, SessionContext};
pub use router::{DeliveryReport, MessageRouter};
