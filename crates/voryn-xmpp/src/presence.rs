//! Presence tracking and fan-out.
//!
//! Tracks the last presence each online account announced and renders
//! outbound `<presence/>` stanzas. Routing itself goes through
//! [`crate::registry::ClientRegistry`]; this module only builds XML and
//! decides who receives it.

use dashmap::DashMap;

use crate::account::AccountId;
use crate::parser::escape_xml;
use crate::registry::ClientRegistry;

/// The most recently broadcast presence for one account.
///
/// `status_payload` is kept verbatim (not parsed) except by the party
/// exit notifier, which inspects it for a game-party identifier.
#[derive(Debug, Clone, Default)]
pub struct LastPresence {
    pub unavailable: bool,
    pub away: bool,
    pub status_payload: String,
}

/// Concurrent cache of the last presence announced by each online account.
///
/// Kept separate from the Client Registry: the registry answers "is this
/// account reachable and how", this answers "what should I tell a peer
/// about this account's presence".
pub struct PresenceStore {
    entries: DashMap<AccountId, LastPresence>,
}

impl PresenceStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn set(&self, account_id: AccountId, presence: LastPresence) {
        self.entries.insert(account_id, presence);
    }

    pub fn remove(&self, account_id: &str) {
        self.entries.remove(account_id);
    }

    pub fn get(&self, account_id: &str) -> Option<LastPresence> {
        self.entries.get(account_id).map(|e| e.value().clone())
    }
}

impl Default for PresenceStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a `<presence/>` stanza from `from_jid` to `to` (or broadcast,
/// when `to` is `None`, which omits the `to` attribute entirely).
pub fn render(from_jid: &str, to: Option<&str>, presence: &LastPresence) -> String {
    let mut attrs = format!("from='{}'", escape_xml(from_jid));
    if let Some(to) = to {
        attrs.push_str(&format!(" to='{}'", escape_xml(to)));
    }
    attrs.push_str(if presence.unavailable {
        " type='unavailable'"
    } else {
        " type='available'"
    });

    let mut children = String::new();
    if presence.away {
        children.push_str("<show>away</show>");
    }
    if !presence.status_payload.is_empty() {
        children.push_str(&format!(
            "<status>{}</status>",
            escape_xml(&presence.status_payload)
        ));
    }

    format!("<presence xmlns='jabber:client' {attrs}>{children}</presence>")
}

/// Broadcast `presence` from `from_account_id` to every other currently
/// connected account.
///
/// Matches the original platform's behavior: presence changes fan out to
/// every connected peer, not just accepted friends. This is intentionally
/// inconsistent with the friend-scoped initial replay on bind (see
/// [`replay_friends`]) but is carried over rather than "fixed", since
/// narrowing fan-out would be an undocumented behavior change for any
/// existing client relying on seeing all peers' presence.
pub fn broadcast(
    registry: &ClientRegistry,
    from_account_id: &str,
    from_jid: &str,
    presence: &LastPresence,
) {
    for account_id in registry.list_connections() {
        if account_id == from_account_id {
            continue;
        }
        let Some(peer_jid) = registry.jid_for(&account_id) else {
            continue;
        };
        registry.send_to(&account_id, render(from_jid, Some(&peer_jid), presence));
    }
}

/// Send the bound session the current presence of each already-online
/// friend, so its roster reflects reality immediately instead of waiting
/// for each friend's next presence change.
pub fn replay_friends(
    registry: &ClientRegistry,
    store: &PresenceStore,
    to_account_id: &str,
    friend_ids: &[AccountId],
) {
    for friend_id in friend_ids {
        let Some(friend_jid) = registry.jid_for(friend_id) else {
            continue;
        };
        let Some(presence) = store.get(friend_id) else {
            continue;
        };
        registry.send_to(to_account_id, render(&friend_jid, None, &presence));
    }
}
