//! Admin injection API.
//!
//! Lets a trusted internal caller (the game backend, not an XMPP client)
//! push a message or presence update into a session's outbound channel
//! directly, bypassing the stanza state machine. There is no
//! authentication on these routes; deployments are expected to keep them
//! off the public listener or behind a network boundary.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use voryn_xmpp::parser::escape_xml;
use voryn_xmpp::registry::SendResult;

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct PresenceQuery {
    #[serde(default)]
    offline: bool,
}

/// Render the `500` body the admin API returns on any failure: a JSON
/// object carrying a human-readable `message`.
fn error_response(message: impl Into<String>) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": message.into() })),
    )
        .into_response()
}

fn send_result_response(result: SendResult, account_id: &str, action: &str) -> Response {
    match result {
        SendResult::Sent => StatusCode::NO_CONTENT.into_response(),
        SendResult::NotConnected => {
            warn!(%account_id, action, "admin injection target not connected");
            error_response(format!("account {account_id} is not connected"))
        }
        SendResult::ChannelFull | SendResult::ChannelClosed => {
            warn!(%account_id, action, "admin injection failed to deliver");
            error_response(format!("failed to deliver to {account_id}"))
        }
    }
}

/// `POST /api/voryn/message/send/:accountId`
///
/// The request body becomes the message's `<body>` verbatim — it is not
/// XML-escaped. This is intentional: the body is opaque JSON payload data
/// from a trusted internal caller, not untrusted client-facing markup.
/// (This means a caller able to reach this route can break out of the
/// `<body>` element; it is not exposed to untrusted input.)
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    body: String,
) -> Response {
    let Some(to) = state.registry.jid_for(&account_id) else {
        return send_result_response(SendResult::NotConnected, &account_id, "message");
    };
    let from = format!("xmpp-admin@{}", state.domain);
    let xml = format!(
        "<message xmlns='jabber:client' from='{}' to='{}'><body>{}</body></message>",
        escape_xml(&from),
        escape_xml(&to),
        body
    );

    let result = state.registry.send_to(&account_id, xml);
    send_result_response(result, &account_id, "message")
}

/// `POST /api/voryn/presence/send/:accountId/:receiverId?offline=bool`
///
/// Sends `accountId`'s last known presence to `receiverId`. The sender
/// need not itself be connected right now — only its last broadcast
/// presence is used — but if it never broadcast one, an empty status is
/// sent rather than failing the request (the source's behavior here for
/// an offline sender is undocumented; this is the least surprising choice).
pub async fn send_presence(
    State(state): State<Arc<AppState>>,
    Path((account_id, receiver_id)): Path<(String, String)>,
    Query(query): Query<PresenceQuery>,
) -> Response {
    let Some(to_jid) = state.registry.jid_for(&receiver_id) else {
        return send_result_response(SendResult::NotConnected, &receiver_id, "presence");
    };
    let from_jid = state
        .registry
        .jid_for(&account_id)
        .unwrap_or_else(|| format!("{account_id}@{}", state.domain));

    let mut presence = state.presence_store.get(&account_id).unwrap_or_default();
    presence.unavailable = query.offline;

    let xml = voryn_xmpp::presence::render(&from_jid, Some(&to_jid), &presence);

    let result = state.registry.send_to(&receiver_id, xml);
    send_result_response(result, &receiver_id, "presence")
}
