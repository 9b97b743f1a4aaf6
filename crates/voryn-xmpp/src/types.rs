//! Common types shared across the session state machine and registries.

use std::fmt;

/// Stage of the XMPP stream lifecycle a connection has reached.
///
/// Transitions only move forward: `Anonymous` -> `Authenticated` -> `Bound`
/// -> `Active` -> `Closed`. There is no renegotiation once `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Stream opened, no SASL exchange yet.
    Anonymous,
    /// SASL PLAIN succeeded, resource not yet bound.
    Authenticated,
    /// Resource bound, session IQ not yet acknowledged.
    Bound,
    /// Session established; presence/message/IQ traffic is accepted.
    Active,
    /// Stream closed or connection torn down.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Anonymous => write!(f, "anonymous"),
            SessionState::Authenticated => write!(f, "authenticated"),
            SessionState::Bound => write!(f, "bound"),
            SessionState::Active => write!(f, "active"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}
