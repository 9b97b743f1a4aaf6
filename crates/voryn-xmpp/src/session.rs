//! Per-connection session state machine.
//!
//! One [`ClientSession`] is created per WebSocket upgrade and lives for
//! the life of that connection. It owns no transport: the caller (the
//! WebSocket route handler in `voryn-server`) feeds it [`Stanza`] values
//! decoded from inbound frames and is responsible for writing whatever
//! this session enqueues on its own outbound channel, plus anything the
//! Client Registry routes to it from other sessions.

use std::time::Duration;

use base64::Engine;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::account::{AccountId, AccountRepository};
use crate::muc::MucTable;
use crate::parser::{escape_xml, ns, PresenceKind, Stanza};
use crate::party;
use crate::presence::{self, LastPresence, PresenceStore};
use crate::registry::{ClientRegistry, OutboundStanza};
use crate::types::SessionState;

const REPOSITORY_CALL_DEADLINE: Duration = Duration::from_secs(5);

/// Shared, process-wide collaborators a session needs to act on a stanza.
///
/// Borrowed for the duration of a single `handle_stanza` call; nothing
/// here is held across `.await` points longer than one repository call
/// or one channel send.
pub struct SessionContext<'a> {
    pub registry: &'a ClientRegistry,
    pub presence_store: &'a PresenceStore,
    pub muc: &'a MucTable,
    pub repository: &'a dyn AccountRepository,
    pub domain: &'a str,
}

/// What the caller should do after a stanza has been processed.
#[derive(Debug, PartialEq, Eq)]
pub enum Directive {
    /// Keep reading from this connection.
    Continue,
    /// Close the connection. The session has already deregistered itself
    /// and any outstanding cleanup has run.
    Close,
}

/// Per-connection XMPP session state.
pub struct ClientSession {
    state: SessionState,
    account_id: Option<AccountId>,
    display_name: Option<String>,
    resource: Option<String>,
    jid: Option<String>,
    last_presence: LastPresence,
    joined_rooms: Vec<String>,
    self_tx: mpsc::Sender<OutboundStanza>,
}

impl ClientSession {
    /// `self_tx` must be the same sender the caller's writer task drains,
    /// and the same sender later registered with the Client Registry once
    /// the session reaches `Active`.
    pub fn new(self_tx: mpsc::Sender<OutboundStanza>) -> Self {
        Self {
            state: SessionState::Anonymous,
            account_id: None,
            display_name: None,
            resource: None,
            jid: None,
            last_presence: LastPresence::default(),
            joined_rooms: Vec::new(),
            self_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    pub fn jid(&self) -> Option<&str> {
        self.jid.as_deref()
    }

    fn self_send(&self, xml: String) {
        if self.self_tx.try_send(OutboundStanza::new(xml)).is_err() {
            warn!("dropped reply: own outbound channel unavailable");
        }
    }

    /// Process one inbound stanza, performing whatever registry/presence/
    /// MUC side effects and outbound sends it implies.
    #[instrument(skip(self, ctx), fields(account_id = self.account_id.as_deref().unwrap_or("-")))]
    pub async fn handle_stanza(
        &mut self,
        stanza: Stanza,
        ctx: &SessionContext<'_>,
    ) -> Directive {
        if self.state == SessionState::Closed {
            return Directive::Close;
        }

        match stanza {
            Stanza::Open { .. } => {
                self.handle_open(ctx.domain);
                Directive::Continue
            }
            Stanza::Auth { mechanism, payload } => {
                self.handle_auth(&mechanism, &payload, ctx).await;
                Directive::Continue
            }
            Stanza::IqBind { id, resource } => self.handle_iq_bind(&id, resource, ctx.domain),
            Stanza::IqSession { id } => self.handle_iq_session(&id, ctx).await,
            Stanza::IqOther { id } => self.handle_iq_other(&id),
            Stanza::Presence {
                kind,
                show,
                status,
                to,
            } => self.handle_presence(kind, show, status, to, ctx),
            Stanza::Message { to, kind, body } => self.handle_message(to, kind, body, ctx),
            Stanza::Close => {
                self.deregister(ctx).await;
                Directive::Close
            }
            Stanza::Unknown { name } => {
                warn!(element = %name, "ignoring unsupported top-level element");
                Directive::Continue
            }
        }
    }

    /// Cleanup path for abnormal disconnects (read error, stream end)
    /// where no `<close/>` stanza was ever received.
    pub async fn handle_disconnect(&mut self, ctx: &SessionContext<'_>) {
        if self.state != SessionState::Closed {
            self.deregister(ctx).await;
        }
    }

    fn handle_open(&self, domain: &str) {
        let stream_id = Uuid::new_v4().to_string();
        self.self_send(render_open(domain, &stream_id));
        self.self_send(render_features(self.account_id.is_some()));
    }

    async fn handle_auth(&mut self, mechanism: &str, payload: &str, ctx: &SessionContext<'_>) {
        if self.account_id.is_some() {
            // Already authenticated: replaying auth is a no-op.
            return;
        }
        if mechanism != "PLAIN" {
            self.self_send(render_sasl_failure("invalid-mechanism"));
            return;
        }

        let token = match decode_sasl_plain(payload) {
            Some(token) => token,
            None => {
                self.self_send(render_sasl_failure("not-authorized"));
                return;
            }
        };

        let account_id = match timeout(REPOSITORY_CALL_DEADLINE, ctx.repository.resolve_token(&token)).await
        {
            Ok(Ok(Some(account_id))) => account_id,
            Ok(Ok(None)) => {
                self.self_send(render_sasl_failure("not-authorized"));
                return;
            }
            Ok(Err(error)) => {
                tracing::error!(%error, "account repository error resolving token");
                self.self_send(render_sasl_failure("not-authorized"));
                return;
            }
            Err(_) => {
                tracing::error!("account repository timed out resolving token");
                self.self_send(render_sasl_failure("not-authorized"));
                return;
            }
        };

        let profile = match timeout(REPOSITORY_CALL_DEADLINE, ctx.repository.get_user(&account_id)).await {
            Ok(Ok(Some(profile))) => profile,
            Ok(Ok(None)) => {
                self.self_send(render_sasl_failure("not-authorized"));
                return;
            }
            Ok(Err(error)) => {
                tracing::error!(%error, "account repository error fetching user (possibly banned)");
                self.self_send(render_sasl_failure("not-authorized"));
                return;
            }
            Err(_) => {
                tracing::error!("account repository timed out fetching user");
                self.self_send(render_sasl_failure("not-authorized"));
                return;
            }
        };

        if ctx.registry.is_connected(&account_id) {
            self.self_send(render_sasl_failure("conflict"));
            return;
        }

        self.account_id = Some(account_id.clone());
        self.display_name = Some(profile.display_name);
        self.state = SessionState::Authenticated;
        info!(%account_id, "authenticated");
        self.self_send(render_sasl_success());
    }

    /// Protocol violations are fatal: emit `<close/>` and let the caller
    /// tear down the transport.
    fn protocol_error(&self) -> Directive {
        self.self_send(render_close());
        Directive::Close
    }

    fn handle_iq_bind(&mut self, id: &str, resource: Option<String>, domain: &str) -> Directive {
        if self.state != SessionState::Authenticated || self.resource.is_some() {
            warn!("bind attempted outside the Authenticated state");
            return self.protocol_error();
        }
        let Some(resource) = resource.filter(|r| !r.is_empty()) else {
            warn!("bind request missing a resource");
            return self.protocol_error();
        };

        let account_id = self.account_id.clone().expect("Authenticated implies account_id");
        let jid = format!("{account_id}@{domain}/{resource}");
        self.resource = Some(resource);
        self.jid = Some(jid.clone());
        self.state = SessionState::Bound;

        self.self_send(render_bind_result(id, &jid));
        Directive::Continue
    }

    async fn handle_iq_session(&mut self, id: &str, ctx: &SessionContext<'_>) -> Directive {
        if self.state != SessionState::Bound {
            warn!("session request outside the Bound state");
            return self.protocol_error();
        }
        let account_id = self.account_id.clone().expect("Bound implies account_id");
        let display_name = self.display_name.clone().unwrap_or_else(|| account_id.clone());
        let jid = self.jid.clone().expect("Bound implies jid");

        self.state = SessionState::Active;
        self.self_send(render_iq_result_empty(id));

        ctx.registry
            .register(account_id.clone(), display_name, jid, self.self_tx.clone());

        match timeout(
            REPOSITORY_CALL_DEADLINE,
            ctx.repository.get_accepted_friends(&account_id),
        )
        .await
        {
            Ok(Ok(friends)) => {
                presence::replay_friends(
                    ctx.registry,
                    ctx.presence_store,
                    &account_id,
                    &friends,
                );
            }
            Ok(Err(error)) => {
                warn!(%error, "failed to load friend list for presence replay");
            }
            Err(_) => {
                warn!("account repository timed out loading friend list");
            }
        }

        Directive::Continue
    }

    fn handle_iq_other(&self, id: &str) -> Directive {
        if self.state != SessionState::Active {
            warn!("iq received outside the Active state");
            return self.protocol_error();
        }
        self.self_send(render_iq_result_empty(id));
        Directive::Continue
    }

    fn handle_presence(
        &mut self,
        kind: PresenceKind,
        show: Option<String>,
        status: Option<String>,
        to: Option<String>,
        ctx: &SessionContext<'_>,
    ) -> Directive {
        if self.state != SessionState::Active {
            warn!("presence received outside the Active state");
            return self.protocol_error();
        }
        let account_id = self.account_id.clone().expect("Active implies account_id");
        let jid = self.jid.clone().expect("Active implies jid");

        self.last_presence = LastPresence {
            unavailable: matches!(kind, PresenceKind::Unavailable),
            away: show.is_some(),
            status_payload: status.unwrap_or_default(),
        };
        ctx.presence_store
            .set(account_id.clone(), self.last_presence.clone());

        if let Some(to) = &to {
            let room = to.split('@').next().unwrap_or(to).to_string();
            let display_name = self.display_name.clone().unwrap_or_else(|| account_id.clone());
            if self.last_presence.unavailable {
                ctx.muc.leave(&room, &account_id);
                self.joined_rooms.retain(|r| r != &room);
            } else {
                ctx.muc.join(&room, &account_id, &display_name);
                // Duplicates are intentional here: re-sending directed
                // presence to a room already joined appends again rather
                // than deduping, matching the original's minimal model.
                self.joined_rooms.push(room);
            }
        }

        // Local echo goes out before the fan-out loop touches any peer
        // connection, so the sender always sees its own state change first.
        self.self_send(presence::render(&jid, None, &self.last_presence));
        presence::broadcast(ctx.registry, &account_id, &jid, &self.last_presence);

        Directive::Continue
    }

    fn handle_message(
        &self,
        to: Option<String>,
        kind: Option<String>,
        body: Option<String>,
        ctx: &SessionContext<'_>,
    ) -> Directive {
        if self.state != SessionState::Active {
            warn!("message received outside the Active state");
            return self.protocol_error();
        }
        let Some(to) = to else {
            return Directive::Continue;
        };
        let Some(target_account_id) = to.split('@').next().filter(|s| !s.is_empty()) else {
            return Directive::Continue;
        };
        let from_jid = self.jid.clone().expect("Active implies jid");
        let xml = render_message(
            &from_jid,
            &to,
            kind.as_deref().unwrap_or("chat"),
            body.as_deref().unwrap_or(""),
        );
        ctx.registry.send_to(target_account_id, xml);
        Directive::Continue
    }

    /// Idempotent teardown: deregister from the Client Registry, leave
    /// every joined MUC room, fire the party exit notifier, and forget
    /// this account's cached presence.
    async fn deregister(&mut self, ctx: &SessionContext<'_>) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;

        let Some(account_id) = self.account_id.clone() else {
            return;
        };

        let departing_jid = self.jid.clone().unwrap_or_else(|| format!("{account_id}@{}", ctx.domain));

        ctx.registry.unregister(&account_id);
        ctx.muc.leave_all(&account_id);
        self.joined_rooms.clear();
        ctx.presence_store.remove(&account_id);

        party::notify_party_exit(ctx.registry, &departing_jid, &account_id, &self.last_presence).await;
    }

    /// A frame the codec couldn't parse is a fatal stream error: emit
    /// `<close/>` and tear the connection down the same as any other
    /// protocol violation.
    pub async fn handle_parse_error(&mut self, ctx: &SessionContext<'_>) -> Directive {
        self.self_send(render_close());
        self.deregister(ctx).await;
        Directive::Close
    }
}

/// Decode a SASL PLAIN `auth` payload and return the bearer token carried
/// as its password field. Returns `None` for anything that doesn't decode
/// to exactly three NUL-separated parts.
fn decode_sasl_plain(payload: &str) -> Option<String> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let mut parts = text.split('\0');
    let _authzid = parts.next()?;
    let _authcid = parts.next()?;
    let password = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some(password.to_string())
}

fn render_open(domain: &str, stream_id: &str) -> String {
    format!(
        "<open xmlns='{}' from='{}' id='{}' version='1.0'/>",
        ns::FRAMING,
        escape_xml(domain),
        escape_xml(stream_id)
    )
}

fn render_features(authenticated: bool) -> String {
    if authenticated {
        format!(
            "<stream:features xmlns:stream='{}'><bind xmlns='{}'/><session xmlns='{}'/></stream:features>",
            ns::STREAM,
            ns::BIND,
            ns::SESSION
        )
    } else {
        format!(
            "<stream:features xmlns:stream='{}'><mechanisms xmlns='{}'><mechanism>PLAIN</mechanism></mechanisms></stream:features>",
            ns::STREAM,
            ns::SASL
        )
    }
}

fn render_sasl_success() -> String {
    format!("<success xmlns='{}'/>", ns::SASL)
}

fn render_sasl_failure(condition: &str) -> String {
    format!("<failure xmlns='{}'><{}/></failure>", ns::SASL, condition)
}

fn render_bind_result(id: &str, jid: &str) -> String {
    format!(
        "<iq type='result' id='{}'><bind xmlns='{}'><jid>{}</jid></bind></iq>",
        escape_xml(id),
        ns::BIND,
        escape_xml(jid)
    )
}

fn render_iq_result_empty(id: &str) -> String {
    format!("<iq type='result' id='{}'/>", escape_xml(id))
}

fn render_close() -> String {
    format!("<close xmlns='{}'/>", ns::FRAMING)
}

fn render_message(from: &str, to: &str, kind: &str, body: &str) -> String {
    format!(
        "<message xmlns='jabber:client' from='{}' to='{}' type='{}'><body>{}</body></message>",
        escape_xml(from),
        escape_xml(to),
        escape_xml(kind),
        escape_xml(body)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryAccountRepository;

    fn ctx<'a>(
        registry: &'a ClientRegistry,
        presence_store: &'a PresenceStore,
        muc: &'a MucTable,
        repository: &'a InMemoryAccountRepository,
    ) -> SessionContext<'a> {
        SessionContext {
            registry,
            presence_store,
            muc,
            repository,
            domain: "prod.example.com",
        }
    }

    fn sasl_plain(token: &str) -> String {
        let raw = format!("\0alice\0{token}");
        base64::engine::general_purpose::STANDARD.encode(raw)
    }

    async fn bind_and_activate(
        session: &mut ClientSession,
        ctx: &SessionContext<'_>,
        token: &str,
        resource: &str,
    ) {
        session
            .handle_stanza(
                Stanza::Auth {
                    mechanism: "PLAIN".to_string(),
                    payload: sasl_plain(token),
                },
                ctx,
            )
            .await;
        assert_eq!(session.state(), SessionState::Authenticated);

        session
            .handle_stanza(
                Stanza::IqBind {
                    id: "bind1".to_string(),
                    resource: Some(resource.to_string()),
                },
                ctx,
            )
            .await;
        assert_eq!(session.state(), SessionState::Bound);

        session
            .handle_stanza(
                Stanza::IqSession {
                    id: "sess1".to_string(),
                },
                ctx,
            )
            .await;
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn happy_path_bind_reaches_active_and_registers() {
        let registry = ClientRegistry::new();
        let presence_store = PresenceStore::new();
        let muc = MucTable::new();
        let repo = InMemoryAccountRepository::new();
        repo.add_account("tok-alice", "alice", "Alice", vec![]).await;

        let (tx, mut rx) = mpsc::channel(16);
        let mut session = ClientSession::new(tx);
        let context = ctx(&registry, &presence_store, &muc, &repo);

        bind_and_activate(&mut session, &context, "tok-alice", "game").await;

        assert!(registry.is_connected("alice"));
        assert_eq!(session.jid(), Some("alice@prod.example.com/game"));
        // success, bind result, session result were all enqueued.
        assert!(rx.recv().await.unwrap().0.contains("success"));
        assert!(rx.recv().await.unwrap().0.contains("bind"));
        assert!(rx.recv().await.unwrap().0.contains("result"));
    }

    #[tokio::test]
    async fn duplicate_login_is_rejected_with_conflict() {
        let registry = ClientRegistry::new();
        let presence_store = PresenceStore::new();
        let muc = MucTable::new();
        let repo = InMemoryAccountRepository::new();
        repo.add_account("tok-alice", "alice", "Alice", vec![]).await;
        let context = ctx(&registry, &presence_store, &muc, &repo);

        let (tx1, _rx1) = mpsc::channel(16);
        let mut first = ClientSession::new(tx1);
        bind_and_activate(&mut first, &context, "tok-alice", "game").await;

        let (tx2, mut rx2) = mpsc::channel(16);
        let mut second = ClientSession::new(tx2);
        second
            .handle_stanza(
                Stanza::Auth {
                    mechanism: "PLAIN".to_string(),
                    payload: sasl_plain("tok-alice"),
                },
                &context,
            )
            .await;

        assert_eq!(second.state(), SessionState::Anonymous);
        let reply = rx2.recv().await.unwrap();
        assert!(reply.0.contains("conflict"));
    }

    #[tokio::test]
    async fn banned_user_cannot_authenticate() {
        let registry = ClientRegistry::new();
        let presence_store = PresenceStore::new();
        let muc = MucTable::new();
        let repo = InMemoryAccountRepository::new();
        repo.add_account("tok-alice", "alice", "Alice", vec![]).await;
        repo.ban("alice").await;
        let context = ctx(&registry, &presence_store, &muc, &repo);

        let (tx, mut rx) = mpsc::channel(16);
        let mut session = ClientSession::new(tx);
        session
            .handle_stanza(
                Stanza::Auth {
                    mechanism: "PLAIN".to_string(),
                    payload: sasl_plain("tok-alice"),
                },
                &context,
            )
            .await;

        assert_eq!(session.state(), SessionState::Anonymous);
        assert!(!registry.is_connected("alice"));
        let reply = rx.recv().await.unwrap();
        assert!(reply.0.contains("not-authorized"));
    }

    #[tokio::test]
    async fn presence_broadcast_reaches_other_peers_and_self_echo() {
        let registry = ClientRegistry::new();
        let presence_store = PresenceStore::new();
        let muc = MucTable::new();
        let repo = InMemoryAccountRepository::new();
        repo.add_account("tok-alice", "alice", "Alice", vec![]).await;
        repo.add_account("tok-bob", "bob", "Bob", vec![]).await;
        let context = ctx(&registry, &presence_store, &muc, &repo);

        let (alice_tx, mut alice_rx) = mpsc::channel(16);
        let mut alice = ClientSession::new(alice_tx);
        bind_and_activate(&mut alice, &context, "tok-alice", "game").await;
        // drain the handshake replies
        for _ in 0..3 {
            alice_rx.recv().await;
        }

        let (bob_tx, mut bob_rx) = mpsc::channel(16);
        let mut bob = ClientSession::new(bob_tx);
        bind_and_activate(&mut bob, &context, "tok-bob", "game").await;
        for _ in 0..3 {
            bob_rx.recv().await;
        }

        alice
            .handle_stanza(
                Stanza::Presence {
                    kind: PresenceKind::Available,
                    show: Some("away".to_string()),
                    status: Some("brb".to_string()),
                    to: None,
                },
                &context,
            )
            .await;

        let echoed = alice_rx.recv().await.unwrap();
        assert!(echoed.0.contains("alice@prod.example.com"));

        let forwarded = bob_rx.recv().await.unwrap();
        assert!(forwarded.0.contains("alice@prod.example.com"));
        assert!(forwarded.0.contains("brb"));
    }

    #[tokio::test]
    async fn disconnect_deregisters_and_clears_muc_membership() {
        let registry = ClientRegistry::new();
        let presence_store = PresenceStore::new();
        let muc = MucTable::new();
        let repo = InMemoryAccountRepository::new();
        repo.add_account("tok-alice", "alice", "Alice", vec![]).await;
        let context = ctx(&registry, &presence_store, &muc, &repo);

        let (tx, mut rx) = mpsc::channel(16);
        let mut session = ClientSession::new(tx);
        bind_and_activate(&mut session, &context, "tok-alice", "game").await;
        for _ in 0..3 {
            rx.recv().await;
        }

        session
            .handle_stanza(
                Stanza::Presence {
                    kind: PresenceKind::Available,
                    show: None,
                    status: None,
                    to: Some("lobby@conference.prod.example.com".to_string()),
                },
                &context,
            )
            .await;
        assert!(muc.is_member("lobby", "alice"));

        session.handle_disconnect(&context).await;

        assert!(!registry.is_connected("alice"));
        assert!(!muc.is_member("lobby", "alice"));
        assert_eq!(session.state(), SessionState::Closed);
    }
}
