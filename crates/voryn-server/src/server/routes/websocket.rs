//! XMPP over WebSocket (RFC 7395).
//!
//! One task reads frames and drives the session state machine; a second,
//! dedicated task owns the WebSocket sink and drains the session's
//! outbound channel. No other code ever writes to `ws_sender` directly —
//! that's what keeps concurrent sends (registry fan-out, party exit
//! notices, the session's own replies) from interleaving mid-frame.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use voryn_xmpp::registry::OutboundStanza;
use voryn_xmpp::session::{ClientSession, Directive, SessionContext};
use voryn_xmpp::parser::parse_frame;

use crate::server::AppState;

const OUTBOUND_CHANNEL_SIZE: usize = 256;

pub async fn handle_xmpp_websocket(socket: WebSocket, state: Arc<AppState>) {
    info!("XMPP WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundStanza>(OUTBOUND_CHANNEL_SIZE);

    let writer = tokio::spawn(async move {
        while let Some(stanza) = outbound_rx.recv().await {
            if let Err(error) = ws_sender.send(Message::Text(stanza.0)).await {
                error!(%error, "failed to write outbound stanza, closing writer task");
                break;
            }
        }
    });

    let mut session = ClientSession::new(outbound_tx);
    let ctx = SessionContext {
        registry: &state.registry,
        presence_store: &state.presence_store,
        muc: &state.muc,
        repository: state.repository.as_ref(),
        domain: &state.domain,
    };

    loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!(len = text.len(), "received XMPP WebSocket frame");
                let stanza = match parse_frame(&text) {
                    Ok(Some(stanza)) => stanza,
                    Ok(None) => continue,
                    Err(error) => {
                        warn!(%error, "malformed XML frame, closing connection");
                        session.handle_parse_error(&ctx).await;
                        break;
                    }
                };
                if session.handle_stanza(stanza, &ctx).await == Directive::Close {
                    break;
                }
            }
            Some(Ok(Message::Close(_))) => {
                info!("WebSocket close frame received");
                break;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // axum answers pings automatically; pongs need no action.
            }
            Some(Ok(Message::Binary(_))) => {
                warn!("ignoring binary WebSocket frame (XMPP over WebSocket is text-only)");
            }
            Some(Err(error)) => {
                error!(%error, "WebSocket error, tearing down session");
                break;
            }
            None => {
                debug!("WebSocket stream ended");
                break;
            }
        }
    }

    session.handle_disconnect(&ctx).await;
    writer.abort();
    info!("XMPP WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use voryn_xmpp::parser::Stanza;
    use voryn_xmpp::testing::InMemoryAccountRepository;
    use voryn_xmpp::muc::MucTable;
    use voryn_xmpp::presence::PresenceStore;
    use voryn_xmpp::ClientRegistry;

    #[tokio::test]
    async fn parse_frame_feeds_session_state_machine() {
        let registry = ClientRegistry::new();
        let presence_store = PresenceStore::new();
        let muc = MucTable::new();
        let repo = InMemoryAccountRepository::new();
        repo.add_account("tok-alice", "alice", "Alice", vec![]).await;

        let ctx = SessionContext {
            registry: &registry,
            presence_store: &presence_store,
            muc: &muc,
            repository: &repo,
            domain: "prod.example.com",
        };

        let (tx, mut rx) = mpsc::channel(8);
        let mut session = ClientSession::new(tx);

        let stanza = parse_frame("<open xmlns='urn:ietf:params:xml:ns:xmpp-framing'/>")
            .unwrap()
            .unwrap();
        assert!(matches!(stanza, Stanza::Open { .. }));
        assert_eq!(session.handle_stanza(stanza, &ctx).await, Directive::Continue);

        assert!(rx.recv().await.unwrap().0.contains("open"));
        assert!(rx.recv().await.unwrap().0.contains("mechanism"));
    }
}
