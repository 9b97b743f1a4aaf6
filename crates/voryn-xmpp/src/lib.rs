//! # voryn-xmpp
//!
//! Native XMPP session machinery for the Voryn presence/messaging relay.
//!
//! This crate holds everything transport-independent: the stanza codec,
//! the per-connection state machine, the process-wide client registry,
//! MUC room membership, presence fan-out, and the party exit notifier.
//! It depends on nothing about HTTP or WebSockets — `voryn-server` wires
//! this up to an `axum` WebSocket route and provides the concrete
//! [`AccountRepository`] backing.
//!
//! ## Architecture
//!
//! ```text
//! WebSocket frame -> parser::parse_frame -> Stanza -> ClientSession::handle_stanza
//!                                                           |
//!                              registry::ClientRegistry, presence::PresenceStore,
//!                              muc::MucTable, account::AccountRepository
//! ```

pub mod account;
pub mod error;
pub mod muc;
pub mod parser;
pub mod party;
pub mod presence;
pub mod registry;
pub mod session;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use account::{AccountId, AccountRepository, UserProfile};
pub use error::XmppError;
pub use parser::{ns, Stanza};
pub use registry::{ClientRegistry, OutboundStanza};
pub use session::{ClientSession, Directive, SessionContext};
pub use types::SessionState;
