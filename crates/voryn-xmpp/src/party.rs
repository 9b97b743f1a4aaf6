//! Party exit notifier.
//!
//! The game client embeds party membership inside a presence's status
//! payload as opaque JSON. When a session disconnects, if its last
//! broadcast status carried a party identifier, every other connected
//! peer gets a synthetic `com.epicgames.party.memberexited` message.
//!
//! The original backend spawned one unbounded goroutine per peer on
//! every disconnect. Here the fan-out is bounded by a `JoinSet` sized to
//! the registry snapshot, so a disconnect storm can't spawn an unbounded
//! number of tasks.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::warn;

use crate::parser::escape_xml;
use crate::presence::LastPresence;
use crate::registry::{ClientRegistry, OutboundStanza};

const PARTY_EXIT_WRITE_DEADLINE: Duration = Duration::from_secs(2);

/// Find the `partyId` carried in a status payload, if any.
///
/// The payload is expected to be a JSON object with a `Properties` object
/// whose keys are opaque except that exactly one begins
/// (case-insensitively) with `party.joininfo` and carries a `partyId`
/// field. Any other shape (not JSON, no `Properties`, no matching key)
/// yields `None` and the caller skips notification entirely.
pub fn extract_party_id(status_payload: &str) -> Option<String> {
    let value: Value = serde_json::from_str(status_payload).ok()?;
    let properties = value.get("Properties")?.as_object()?;
    let (_, joininfo) = properties
        .iter()
        .find(|(key, _)| key.to_lowercase().starts_with("party.joininfo"))?;
    joininfo
        .get("partyId")?
        .as_str()
        .map(str::to_string)
}

fn render_member_exited(from_jid: &str, to_jid: &str, party_id: &str, member_id: &str) -> String {
    let body = json!({
        "type": "com.epicgames.party.memberexited",
        "payload": {
            "partyId": party_id,
            "memberId": member_id,
            "wasKicked": false,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
    .to_string();

    format!(
        "<message xmlns='jabber:client' from='{}' to='{}'><body>{}</body></message>",
        escape_xml(from_jid),
        escape_xml(to_jid),
        escape_xml(&body)
    )
}

/// Notify every other registered peer that `departing_account_id` left its
/// party, if `last_presence` carried a party identifier. No-op (and no
/// task spawned) if it didn't. `departing_jid` is the departing session's
/// own bound JID, passed in rather than looked up, since the registry entry
/// is already gone by the time this runs (deregistration happens first).
pub async fn notify_party_exit(
    registry: &ClientRegistry,
    departing_jid: &str,
    departing_account_id: &str,
    last_presence: &LastPresence,
) {
    let Some(party_id) = extract_party_id(&last_presence.status_payload) else {
        return;
    };

    let mut tasks = JoinSet::new();

    for peer_id in registry.list_connections() {
        if peer_id == departing_account_id {
            continue;
        }
        let Some(sender) = registry.sender_for(&peer_id) else {
            continue;
        };
        let Some(peer_jid) = registry.jid_for(&peer_id) else {
            continue;
        };
        let stanza = OutboundStanza::new(render_member_exited(
            departing_jid,
            &peer_jid,
            &party_id,
            departing_account_id,
        ));
        tasks.spawn(async move {
            let result = timeout(PARTY_EXIT_WRITE_DEADLINE, sender.send(stanza)).await;
            (peer_id, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((peer_id, Ok(Ok(())))) => {
                tracing::debug!(peer = %peer_id, party_id = %party_id, "delivered party exit notice");
            }
            Ok((peer_id, Ok(Err(_)))) => {
                warn!(peer = %peer_id, "party exit notice dropped: channel closed");
            }
            Ok((peer_id, Err(_))) => {
                warn!(peer = %peer_id, "party exit notice dropped: write deadline exceeded");
            }
            Err(join_error) => {
                warn!(error = %join_error, "party exit notifier task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn extracts_party_id_from_matching_property() {
        let payload = r#"{"Properties":{"party.joininfoDATA_abc123":{"partyId":"p-1"}}}"#;
        assert_eq!(extract_party_id(payload), Some("p-1".to_string()));
    }

    #[test]
    fn returns_none_without_party_property() {
        let payload = r#"{"Properties":{"unrelated":"value"}}"#;
        assert_eq!(extract_party_id(payload), None);
    }

    #[test]
    fn returns_none_for_non_json_status() {
        assert_eq!(extract_party_id("just a status message"), None);
    }

    #[tokio::test]
    async fn notifies_other_peers_when_party_id_present() {
        let registry = ClientRegistry::new();
        let (alice_tx, _alice_rx) = mpsc::channel(8);
        let (bob_tx, mut bob_rx) = mpsc::channel(8);
        registry.register("alice".to_string(), "Alice".to_string(), "alice@prod.example.com/test".to_string(), alice_tx);
        registry.register("bob".to_string(), "Bob".to_string(), "bob@prod.example.com/test".to_string(), bob_tx);

        let presence = LastPresence {
            status_payload: r#"{"Properties":{"party.joininfoX":{"partyId":"p-1"}}}"#.to_string(),
            ..Default::default()
        };

        notify_party_exit(&registry, "alice@prod.example.com/test", "alice", &presence).await;

        let received = bob_rx.recv().await.unwrap();
        assert!(received.0.contains("com.epicgames.party.memberexited"));
        assert!(received.0.contains("p-1"));
    }

    #[tokio::test]
    async fn skips_entirely_when_no_party_id() {
        let registry = ClientRegistry::new();
        let (bob_tx, mut bob_rx) = mpsc::channel(8);
        registry.register("bob".to_string(), "Bob".to_string(), "bob@prod.example.com/test".to_string(), bob_tx);

        notify_party_exit(
            &registry,
            "alice@prod.example.com/test",
            "alice",
            &LastPresence::default(),
        )
        .await;

        assert!(bob_rx.try_recv().is_err());
    }
}
