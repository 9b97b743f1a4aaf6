//! XML framing and stanza projection.
//!
//! Each inbound WebSocket text frame carries exactly one complete XML
//! element (RFC 7395 framing) rather than a fragment of a long-lived
//! stream, so parsing is a single `minidom::Element::parse` call per
//! frame instead of the incremental buffering a raw-TCP transport would
//! need. [`project`] then turns that generic element tree into the
//! closed [`Stanza`] enum the session state machine matches on, so no
//! code past this module ever inspects element names or attributes by
//! string comparison.

use minidom::Element;

use crate::XmppError;

/// Namespace URIs used by the subset of XMPP this relay understands.
pub mod ns {
    /// XMPP client namespace
    pub const JABBER_CLIENT: &str = "jabber:client";
    /// XMPP streams namespace
    pub const STREAM: &str = "http://etherx.jabber.org/streams";
    /// SASL namespace
    pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
    /// Resource binding namespace
    pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
    /// Session namespace
    pub const SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
    /// WebSocket framing namespace (RFC 7395)
    pub const FRAMING: &str = "urn:ietf:params:xml:ns:xmpp-framing";
}

/// A received presence's `<show/>` payload, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceKind {
    /// No `type` attribute: the client is available.
    Available,
    /// `type='unavailable'`.
    Unavailable,
}

/// A single XMPP unit of work, projected from a parsed [`Element`].
///
/// This is the only shape the session state machine and handlers operate
/// on; everything that was minidom attribute/child lookups lives in
/// [`project`] and nowhere else.
#[derive(Debug, Clone)]
pub enum Stanza {
    /// Opening `<open/>` framing element (RFC 7395) or legacy `<stream:stream>`.
    Open { to: Option<String> },
    /// Closing `<close/>` framing element or `</stream:stream>`.
    Close,
    /// SASL `<auth/>` request.
    Auth { mechanism: String, payload: String },
    /// `<iq type='set'><bind/></iq>` resource binding request.
    IqBind { id: String, resource: Option<String> },
    /// `<iq type='set'><session/></iq>` legacy session establishment request.
    IqSession { id: String },
    /// Any other `<iq/>` the relay doesn't special-case; acknowledged generically.
    IqOther { id: String },
    /// `<presence/>` stanza.
    Presence {
        kind: PresenceKind,
        show: Option<String>,
        status: Option<String>,
        to: Option<String>,
    },
    /// `<message/>` stanza.
    Message {
        to: Option<String>,
        kind: Option<String>,
        body: Option<String>,
    },
    /// Anything that doesn't match a known shape. Carries the element name
    /// purely for logging; the relay does not act on it.
    Unknown { name: String },
}

/// Parse one complete WebSocket text frame into a [`Stanza`].
///
/// A whitespace-only frame is tolerated and silently skipped (`Ok(None)`),
/// matching the keep-alive padding some WebSocket clients send. Anything
/// else that fails to parse as a single XML element is a fatal stream
/// error per the caller's disposition.
pub fn parse_frame(frame: &str) -> Result<Option<Stanza>, XmppError> {
    let trimmed = frame.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let element: Element = trimmed
        .parse()
        .map_err(|e| XmppError::xml_parse(format!("malformed XML: {e}")))?;
    Ok(Some(project(&element)))
}

/// Project a generic XML element tree into the closed [`Stanza`] enum.
pub fn project(element: &Element) -> Stanza {
    match element.name() {
        "open" => Stanza::Open {
            to: element.attr("to").map(str::to_string),
        },
        "close" => Stanza::Close,
        "auth" => Stanza::Auth {
            mechanism: element.attr("mechanism").unwrap_or_default().to_string(),
            payload: element.text(),
        },
        "iq" => project_iq(element),
        "presence" => project_presence(element),
        "message" => project_message(element),
        other => Stanza::Unknown {
            name: other.to_string(),
        },
    }
}

fn project_iq(element: &Element) -> Stanza {
    let id = element.attr("id").unwrap_or_default().to_string();
    let iq_type = element.attr("type").unwrap_or_default();

    // Only `type="set"` is ever processed; `get`/`result`/`error` IQs (and
    // one missing an id) are silently dropped rather than answered.
    if iq_type != "set" || id.is_empty() {
        return Stanza::Unknown {
            name: "iq".to_string(),
        };
    }

    if let Some(bind) = element.get_child("bind", ns::BIND) {
        let resource = bind
            .get_child("resource", ns::BIND)
            .map(|r| r.text())
            .filter(|s| !s.is_empty());
        return Stanza::IqBind { id, resource };
    }
    if element.get_child("session", ns::SESSION).is_some() {
        return Stanza::IqSession { id };
    }

    Stanza::IqOther { id }
}

fn project_presence(element: &Element) -> Stanza {
    let kind = match element.attr("type") {
        Some("unavailable") => PresenceKind::Unavailable,
        _ => PresenceKind::Available,
    };
    let show = element
        .get_child("show", ns::JABBER_CLIENT)
        .map(|e| e.text())
        .filter(|s| !s.is_empty());
    let status = element
        .get_child("status", ns::JABBER_CLIENT)
        .map(|e| e.text())
        .filter(|s| !s.is_empty());
    let to = element.attr("to").map(str::to_string);

    Stanza::Presence {
        kind,
        show,
        status,
        to,
    }
}

fn project_message(element: &Element) -> Stanza {
    let to = element.attr("to").map(str::to_string);
    let kind = element.attr("type").map(str::to_string);
    let body = element
        .get_child("body", ns::JABBER_CLIENT)
        .map(|e| e.text())
        .filter(|s| !s.is_empty());

    Stanza::Message { to, kind, body }
}

/// Serialize a minidom [`Element`] back to an XML string.
pub fn element_to_string(element: &Element) -> Result<String, XmppError> {
    let mut output = Vec::new();
    element
        .write_to(&mut output)
        .map_err(|e| XmppError::xml_parse(format!("failed to serialize element: {e}")))?;
    String::from_utf8(output).map_err(|e| XmppError::xml_parse(format!("invalid UTF-8: {e}")))
}

/// Minimal XML-escape for text inserted into hand-built outbound stanzas.
pub fn escape_xml(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_auth() {
        let stanza = parse_frame(
            "<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='PLAIN'>AGFsaWNlAHNlY3JldA==</auth>",
        )
        .unwrap()
        .unwrap();
        match stanza {
            Stanza::Auth { mechanism, payload } => {
                assert_eq!(mechanism, "PLAIN");
                assert_eq!(payload, "AGFsaWNlAHNlY3JldA==");
            }
            other => panic!("expected Auth, got {other:?}"),
        }
    }

    #[test]
    fn parses_bind_request() {
        let stanza = parse_frame(
            "<iq xmlns='jabber:client' type='set' id='bind1'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><resource>game</resource></bind></iq>",
        )
        .unwrap()
        .unwrap();
        match stanza {
            Stanza::IqBind { id, resource } => {
                assert_eq!(id, "bind1");
                assert_eq!(resource.as_deref(), Some("game"));
            }
            other => panic!("expected IqBind, got {other:?}"),
        }
    }

    #[test]
    fn non_set_iq_is_dropped_not_answered() {
        let stanza = parse_frame("<iq xmlns='jabber:client' type='get' id='ping1'/>")
            .unwrap()
            .unwrap();
        match stanza {
            Stanza::Unknown { name } => assert_eq!(name, "iq"),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn parses_presence_with_status() {
        let stanza = parse_frame(
            "<presence xmlns='jabber:client'><show>away</show><status>brb</status></presence>",
        )
        .unwrap()
        .unwrap();
        match stanza {
            Stanza::Presence {
                kind,
                show,
                status,
                ..
            } => {
                assert_eq!(kind, PresenceKind::Available);
                assert_eq!(show.as_deref(), Some("away"));
                assert_eq!(status.as_deref(), Some("brb"));
            }
            other => panic!("expected Presence, got {other:?}"),
        }
    }

    #[test]
    fn parses_chat_message() {
        let stanza = parse_frame(
            "<message xmlns='jabber:client' to='123' type='chat'><body>hi</body></message>",
        )
        .unwrap()
        .unwrap();
        match stanza {
            Stanza::Message { to, kind, body } => {
                assert_eq!(to.as_deref(), Some("123"));
                assert_eq!(kind.as_deref(), Some("chat"));
                assert_eq!(body.as_deref(), Some("hi"));
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn unknown_elements_carry_only_the_name() {
        let stanza = parse_frame("<ping xmlns='urn:xmpp:ping'/>").unwrap().unwrap();
        assert!(matches!(stanza, Stanza::Unknown { name } if name == "ping"));
    }

    #[test]
    fn rejects_malformed_xml() {
        assert!(parse_frame("<presence>").is_err());
    }

    #[test]
    fn whitespace_only_frame_is_skipped_not_an_error() {
        assert!(parse_frame("   \n\t  ").unwrap().is_none());
    }
}
