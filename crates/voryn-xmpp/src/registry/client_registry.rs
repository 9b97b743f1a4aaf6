//! Client Registry implementation.
//!
//! Tracks active sessions by account ID for stanza routing. Every
//! registered session owns exactly one writer task draining its
//! `mpsc::Receiver<OutboundStanza>`, so the registry only ever needs to
//! hand out clones of the matching `Sender` — no code outside a
//! session's own writer task ever touches its WebSocket sink.

use std::fmt;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::account::AccountId;

/// A fully rendered XML stanza queued for delivery to one session.
///
/// Rendering happens before the send so the writer task never needs to
/// touch anything but a channel and the WebSocket sink.
#[derive(Debug, Clone)]
pub struct OutboundStanza(pub String);

impl OutboundStanza {
    pub fn new(xml: impl Into<String>) -> Self {
        Self(xml.into())
    }
}

/// Result of attempting to route a stanza to a connected account.
#[derive(Debug, PartialEq, Eq)]
pub enum SendResult {
    /// Stanza was successfully queued for delivery.
    Sent,
    /// The recipient has no active session.
    NotConnected,
    /// The recipient's outbound channel is full (backpressure).
    ChannelFull,
    /// The recipient's outbound channel is closed; the stale entry was
    /// removed from the registry.
    ChannelClosed,
}

/// One registered session's routing entry: where to send it stanzas, and
/// the display name the `/clients` listing and presence replay reports
/// for it.
struct Connection {
    sender: mpsc::Sender<OutboundStanza>,
    display_name: String,
    jid: String,
}

/// Registry of active sessions, keyed by account ID.
///
/// Thread-safe via `DashMap`; lookups and inserts never block on network
/// I/O. The registry lock (really, the per-shard DashMap lock) must
/// never be held across a `.await` that sends on a channel or calls out
/// to the account repository.
pub struct ClientRegistry {
    connections: DashMap<AccountId, Connection>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        info!("creating client registry");
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a session's outbound channel.
    ///
    /// Replaces any existing registration for the same account, which is
    /// how a reconnect under the same account evicts a stale session —
    /// the old writer task will simply find its channel closed on next send.
    #[instrument(skip(self, sender), fields(account_id = %account_id))]
    pub fn register(
        &self,
        account_id: AccountId,
        display_name: String,
        jid: String,
        sender: mpsc::Sender<OutboundStanza>,
    ) {
        let existing = self.connections.insert(
            account_id,
            Connection {
                sender,
                display_name,
                jid,
            },
        );
        if existing.is_some() {
            debug!("replaced existing session registration");
        } else {
            debug!("registered new session");
        }
    }

    /// Remove a session's registration.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub fn unregister(&self, account_id: &str) {
        if self.connections.remove(account_id).is_some() {
            debug!("unregistered session");
        }
    }

    /// Whether an account currently has an active session.
    pub fn is_connected(&self, account_id: &str) -> bool {
        self.connections.contains_key(account_id)
    }

    /// Number of active sessions.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// All currently connected account IDs, for internal routing use.
    pub fn list_connections(&self) -> Vec<AccountId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Display names of every currently connected session, in registration
    /// order of the underlying map (unspecified) — matches the shape the
    /// `/clients` endpoint reports.
    pub fn list_display_names(&self) -> Vec<String> {
        self.connections
            .iter()
            .map(|e| e.value().display_name.clone())
            .collect()
    }

    /// The full bound JID (`accountId@domain/resource`) of `account_id`'s
    /// active session, if connected. Used by the admin injection API to
    /// address stanzas the same way the session itself would.
    pub fn jid_for(&self, account_id: &str) -> Option<String> {
        self.connections.get(account_id).map(|e| e.value().jid.clone())
    }

    /// Clone of the raw outbound sender for `account_id`, if connected.
    ///
    /// Used only by the party-exit notifier, which needs a real
    /// backpressured `send().await` (bounded by a write deadline) rather
    /// than the non-blocking `try_send` behind [`Self::send_to`].
    pub fn sender_for(&self, account_id: &str) -> Option<mpsc::Sender<OutboundStanza>> {
        self.connections.get(account_id).map(|e| e.value().sender.clone())
    }

    /// Queue a rendered stanza for delivery to `account_id`.
    ///
    /// Non-blocking: uses `try_send` so a slow or wedged peer applies
    /// backpressure to itself, never to the sender's own session task.
    #[instrument(skip(self, xml), fields(to = %account_id))]
    pub fn send_to(&self, account_id: &str, xml: impl Into<String>) -> SendResult {
        let sender = match self.connections.get(account_id) {
            Some(entry) => entry.value().sender.clone(),
            None => {
                debug!("recipient not connected");
                return SendResult::NotConnected;
            }
        };

        match sender.try_send(OutboundStanza::new(xml)) {
            Ok(()) => SendResult::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("outbound channel full, applying backpressure");
                SendResult::ChannelFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("outbound channel closed, removing stale registration");
                self.connections.remove(account_id);
                SendResult::ChannelClosed
            }
        }
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("connection_count", &self.connections.len())
            .finish()
    }
}
