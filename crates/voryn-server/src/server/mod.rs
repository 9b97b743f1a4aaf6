use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use voryn_xmpp::muc::MucTable;
use voryn_xmpp::presence::PresenceStore;
use voryn_xmpp::{AccountRepository, ClientRegistry};

mod routes;

use crate::config::Config;
use routes::{admin, websocket};

/// Shared state handed to every route: the in-process registries plus the
/// account store adapter. Cheap to clone (everything behind an `Arc`).
pub struct AppState {
    pub registry: ClientRegistry,
    pub presence_store: PresenceStore,
    pub muc: MucTable,
    pub repository: Arc<dyn AccountRepository>,
    pub domain: String,
}

impl AppState {
    pub fn new(repository: Arc<dyn AccountRepository>, domain: String) -> Self {
        Self {
            registry: ClientRegistry::new(),
            presence_store: PresenceStore::new(),
            muc: MucTable::new(),
            repository,
            domain,
        }
    }
}

/// Start the HTTP/WebSocket server and block until it receives a shutdown
/// signal. Existing WebSocket connections drain on their own; in-flight
/// session handlers are not forcibly cancelled.
pub async fn start(config: Config, repository: Arc<dyn AccountRepository>) -> Result<()> {
    let state = Arc::new(AppState::new(repository, config.xmpp_domain.clone()));
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "starting voryn-server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let stop_token = CancellationToken::new();
    let shutdown_token = stop_token.clone();

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal");
        stop_token.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
            info!("HTTP accept loop draining");
        })
        .await?;

    Ok(())
}

fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/clients", get(clients_handler))
        .route("/api/voryn/message/send/:account_id", post(admin::send_message))
        .route(
            "/api/voryn/presence/send/:account_id/:receiver_id",
            post(admin::send_presence),
        )
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}

/// `GET /` serves double duty: a WebSocket upgrade for XMPP clients, or a
/// plain-text greeting for anything else (load balancer health checks,
/// curious operators). Distinguished by the `Upgrade` header rather than
/// a separate path, matching how the game client is wired to dial it.
async fn root_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let wants_upgrade = request
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));

    if !wants_upgrade {
        return greeting();
    }

    let (mut parts, _body) = request.into_parts();
    match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => upgrade
            .protocols(["xmpp"])
            .on_upgrade(move |socket| websocket::handle_xmpp_websocket(socket, state)),
        Err(rejection) => rejection.into_response(),
    }
}

fn greeting() -> Response {
    (StatusCode::OK, "Voryn XMPP relay is running.").into_response()
}

async fn clients_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let display_names = state.registry.list_display_names();
    Json(json!({
        "usersAmount": display_names.len(),
        "Clients": display_names,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;
    use voryn_xmpp::testing::InMemoryAccountRepository;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(
            Arc::new(InMemoryAccountRepository::new()),
            "prod.example.com".to_string(),
        ))
    }

    #[tokio::test]
    async fn root_without_upgrade_header_returns_greeting() {
        let app = create_router(test_state());

        let response = app
            .oneshot(HttpRequest::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn clients_endpoint_reports_empty_registry() {
        let app = create_router(test_state());

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/clients")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
