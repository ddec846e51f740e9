//! HTTP surface: document CRUD, health, and the WebSocket upgrade.
//!
//! ```text
//! POST /create                   → 201 {id, name, content, version}
//! GET  /document?id=…            → 200 {id, name, content, version} | 404
//! GET  /health                   → 200 "ok"
//! GET  /ws?docId=…&clientId=…    → WebSocket upgrade into run_session
//! ```
//!
//! `docID` is accepted as an alias for `docId`; a missing `clientId`
//! defaults to `"anonymous"`. A CORS layer allows the local dev origins
//! and answers preflight requests directly.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::registry::HubRegistry;
use crate::session::{run_session, SessionConfig};

/// Browser origins allowed during development.
const ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:5173",
    "http://localhost:3000",
    "http://localhost:5174",
    "http://127.0.0.1:5173",
];

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<HubRegistry>,
    pub session: SessionConfig,
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/create", post(create_document))
        .route("/document", get(get_document))
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CreateRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    content: String,
    // `type` and `password` are accepted on the wire but have no effect.
}

async fn create_document(
    State(state): State<AppState>,
    Json(request): Json<CreateRequest>,
) -> Response {
    if request.name.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing document name").into_response();
    }

    let hub = state.registry.create(&request.name, &request.content).await;
    let snapshot = hub.snapshot();
    log::info!("created document {} ({})", snapshot.id, snapshot.name);
    (StatusCode::CREATED, Json(snapshot)).into_response()
}

#[derive(Debug, Deserialize)]
struct DocumentQuery {
    id: String,
}

async fn get_document(
    State(state): State<AppState>,
    Query(query): Query<DocumentQuery>,
) -> Response {
    match state.registry.get(&query.id).await {
        Some(hub) => Json(hub.snapshot()).into_response(),
        None => (StatusCode::NOT_FOUND, "document not found").into_response(),
    }
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    #[serde(default, rename = "docId", alias = "docID")]
    doc_id: Option<String>,
    #[serde(default, rename = "clientId")]
    client_id: Option<String>,
    #[serde(default, rename = "clientName")]
    client_name: Option<String>,
}

async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(doc_id) = query.doc_id.filter(|id| !id.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing docId parameter").into_response();
    };
    let client_id = query
        .client_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| "anonymous".to_string());

    log::info!(
        "websocket request: doc={doc_id} client={client_id} name={}",
        query.client_name.as_deref().unwrap_or("-")
    );

    let hub = state.registry.get_or_create(&doc_id, "", "").await;
    let session = state.session.clone();
    ws.on_upgrade(move |socket| run_session(socket, client_id, hub, session))
}

/// CORS for browser clients: reflect allow-listed origins and answer
/// preflight requests without touching the handlers.
async fn cors(request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let preflight = request.method() == Method::OPTIONS;

    let mut response = if preflight {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    if let Some(origin) = origin {
        if ALLOWED_ORIGINS.contains(&origin.as_str()) {
            if let Ok(value) = HeaderValue::from_str(&origin) {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
        }
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DocumentInfo;
    use axum::body::{to_bytes, Body};
    use tower::ServiceExt;

    fn test_router() -> Router {
        router(AppState {
            registry: Arc::new(HubRegistry::new(64)),
            session: SessionConfig::default(),
        })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_document_returns_201() {
        let app = test_router();
        let response = app
            .oneshot(post_json("/create", r#"{"name":"notes","content":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["name"], "notes");
        assert_eq!(body["content"], "hi");
        assert_eq!(body["version"], 0);
        assert!(!body["id"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_requires_name() {
        let app = test_router();
        let response = app
            .oneshot(post_json("/create", r#"{"content":"hi"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_ignores_extra_fields() {
        let app = test_router();
        let response = app
            .oneshot(post_json(
                "/create",
                r#"{"name":"n","type":"text","password":"secret"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_get_document_roundtrip() {
        let registry = Arc::new(HubRegistry::new(64));
        let hub = registry.create("notes", "content here").await;
        let id = hub.document().id().to_string();

        let app = router(AppState {
            registry,
            session: SessionConfig::default(),
        });
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/document?id={id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let info: DocumentInfo = serde_json::from_value(body).unwrap();
        assert_eq!(info.id, id);
        assert_eq!(info.content, "content here");
    }

    #[tokio::test]
    async fn test_get_document_missing_is_404() {
        let app = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/document?id=nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_router();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ws_requires_doc_id() {
        let app = test_router();
        let response = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_preflight_answered_with_cors_headers() {
        let app = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/create")
                    .header(header::ORIGIN, "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "http://localhost:5173"
        );
    }

    #[tokio::test]
    async fn test_unlisted_origin_not_reflected() {
        let app = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "http://evil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }
}
