//! Client Registry for real-time stanza routing.
//!
//! Tracks active sessions keyed by account ID, each holding the outbound
//! channel its writer task drains.
//!
//! ```text
//! session task (alice)  <-> ClientRegistry <-> session task (bob)
//!        |                        |                   |
//!        v                        v                   v
//!   mpsc::Sender         DashMap<AccountId,      mpsc::Sender
//!                        mpsc::Sender>
//! ```

mod client_registry;

pub use client_registry::{ClientRegistry, OutboundStanza, SendResult};
