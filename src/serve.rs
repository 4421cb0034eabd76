//! Purpose: Provide the HTTP/JSON and WebSocket server for switchyard.
//! Exports: `ServeConfig`, `serve`, `validate_config`.
//! Role: Axum router mapping the request/response and push surfaces onto the core.
//! Invariants: Loopback-only unless explicitly allowed; no authentication is performed.
//! Invariants: Operation failures are rendered as a bare 500 with no body.
//! Notes: Push queues are unbounded; a slow client grows memory rather than losing frames.

use std::collections::HashMap;
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Path as AxumPath, Query, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use switchyard::api::{
    Dispatcher, Error, ErrorKind, ListBound, MemoryResource, Projection, Registry,
    SubscriptionEngine, ok_envelope,
};

use crate::demo;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const WRITER_DRAIN: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub allow_non_loopback: bool,
    pub cors_allowed_origins: Vec<String>,
    pub max_body_bytes: u64,
    pub max_connections: usize,
    pub demo: bool,
    pub demo_tick_ms: Option<u64>,
    pub log_level: String,
}

#[derive(Clone)]
struct AppState {
    dispatcher: Dispatcher,
    engine: SubscriptionEngine,
    connection_slots: Arc<Semaphore>,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing(&config.log_level);

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;

    let (registry, demo_bulbs) = build_registry(&config)?;
    if registry.services().is_empty() {
        tracing::warn!("no services registered; pass --demo to try the built-in service");
    }
    let registry = Arc::new(registry);

    let state = Arc::new(AppState {
        dispatcher: Dispatcher::new(Arc::clone(&registry)),
        engine: SubscriptionEngine::new(registry),
        connection_slots: Arc::new(Semaphore::new(config.max_connections)),
    });

    let mut app = Router::new()
        .route("/", get(list_services))
        .route("/healthz", get(healthz))
        .route("/ws", get(open_push_connection))
        .route("/:service/", get(list_resources))
        .route(
            "/:service/:resource/",
            get(list_elements).post(create_element),
        )
        .route(
            "/:service/:resource/:id",
            get(get_element).post(update_element).delete(delete_element),
        )
        .fallback(unknown_route)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    if let Some(cors) = cors_layer(&config.cors_allowed_origins)? {
        app = app.layer(cors);
    }

    if let (Some(bulbs), Some(tick_ms)) = (demo_bulbs, config.demo_tick_ms) {
        tokio::spawn(demo::cycle_brightness(bulbs, Duration::from_millis(tick_ms)));
    }

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    let local_addr = listener.local_addr().unwrap_or(config.bind);
    tracing::info!(bind = %local_addr, "listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutting down");
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn build_registry(config: &ServeConfig) -> Result<(Registry, Option<Arc<MemoryResource>>), Error> {
    let mut builder = Registry::builder();
    let mut demo_bulbs = None;
    if config.demo {
        let (service, bulbs) = demo::lights();
        builder = builder.service(service);
        demo_bulbs = Some(bulbs);
    }
    Ok((builder.build()?, demo_bulbs))
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

pub fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 1048576."));
    }

    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes exceeds platform limits")
            .with_hint("Use a smaller value that fits in memory."));
    }

    if config.max_connections == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-connections must be greater than zero")
            .with_hint("Use a positive value like 256."));
    }

    match config.demo_tick_ms {
        Some(_) if !config.demo => {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("--demo-tick-ms requires --demo")
                .with_hint("Add --demo or drop --demo-tick-ms."));
        }
        Some(0) => {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("--demo-tick-ms must be greater than zero")
                .with_hint("Use a positive value like 1000."));
        }
        _ => {}
    }

    for origin in &config.cors_allowed_origins {
        validate_origin(origin)?;
    }

    if EnvFilter::try_new(&config.log_level).is_err() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("invalid --log-level '{}'", config.log_level))
            .with_hint("Use a level like info or a filter like switchyard=debug."));
    }

    Ok(())
}

fn validate_origin(origin: &str) -> Result<(), Error> {
    let rest = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"));
    let valid = match rest {
        Some(host) => !host.is_empty() && !host.contains('/') && HeaderValue::from_str(origin).is_ok(),
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::Usage)
            .with_message(format!("invalid --cors-origin '{origin}'"))
            .with_hint("Use an exact origin like http://localhost:3000 (no path)."))
    }
}

fn cors_layer(origins: &[String]) -> Result<Option<CorsLayer>, Error> {
    if origins.is_empty() {
        return Ok(None);
    }
    let mut allowed = Vec::with_capacity(origins.len());
    for origin in origins {
        validate_origin(origin)?;
        let value = HeaderValue::from_str(origin).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid --cors-origin '{origin}'"))
                .with_source(err)
        })?;
        allowed.push(value);
    }
    Ok(Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE]),
    ))
}

fn init_tracing(level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

async fn healthz() -> Response {
    json_response(StatusCode::OK, json!({ "ok": true }))
}

async fn unknown_route() -> Response {
    error_response(
        Error::new(ErrorKind::NotFound)
            .with_message("no such route")
            .with_hint("Collection URLs end with '/', e.g. /lights/bulbs/."),
    )
}

async fn list_services(State(state): State<Arc<AppState>>) -> Response {
    json_response(
        StatusCode::OK,
        ok_envelope(Some(Value::Array(state.dispatcher.services()))),
    )
}

async fn list_resources(
    State(state): State<Arc<AppState>>,
    AxumPath(service): AxumPath<String>,
) -> Response {
    match state.dispatcher.resources(&service) {
        Ok(resources) => json_response(StatusCode::OK, ok_envelope(Some(Value::Array(resources)))),
        Err(err) => error_response(err),
    }
}

async fn list_elements(
    State(state): State<Arc<AppState>>,
    AxumPath((service, resource)): AxumPath<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let offset = params.get("$offset").map(|raw| ListBound::parse(raw));
    let limit = params.get("$limit").map(|raw| ListBound::parse(raw));
    match state
        .dispatcher
        .list(&service, &resource, offset.as_ref(), limit.as_ref())
    {
        Ok(elements) => json_response(
            StatusCode::OK,
            ok_envelope(Some(Value::Array(
                elements.into_iter().map(Value::Object).collect(),
            ))),
        ),
        Err(err) => error_response(err),
    }
}

async fn create_element(
    State(state): State<Arc<AppState>>,
    AxumPath((service, resource)): AxumPath<(String, String)>,
    body: Bytes,
) -> Response {
    match state.dispatcher.create(&service, &resource, &body) {
        Ok(payload) => json_response(StatusCode::CREATED, ok_envelope(Some(Value::Object(payload)))),
        Err(err) => error_response(err),
    }
}

async fn get_element(
    State(state): State<Arc<AppState>>,
    AxumPath((service, resource, id)): AxumPath<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let projection = params.get("$fields").map(|fields| Projection::parse(fields));
    match state
        .dispatcher
        .get(&service, &resource, &id, projection.as_ref())
    {
        Ok(payload) => json_response(StatusCode::OK, ok_envelope(Some(Value::Object(payload)))),
        Err(err) => error_response(err),
    }
}

async fn update_element(
    State(state): State<Arc<AppState>>,
    AxumPath((service, resource, id)): AxumPath<(String, String, String)>,
    body: Bytes,
) -> Response {
    match state.dispatcher.update(&service, &resource, &id, &body) {
        Ok(()) => json_response(StatusCode::OK, ok_envelope(None)),
        Err(err) => error_response(err),
    }
}

async fn delete_element(
    State(state): State<Arc<AppState>>,
    AxumPath((service, resource, id)): AxumPath<(String, String, String)>,
) -> Response {
    match state.dispatcher.delete(&service, &resource, &id) {
        Ok(()) => json_response(StatusCode::OK, ok_envelope(None)),
        Err(err) => error_response(err),
    }
}

async fn open_push_connection(
    State(state): State<Arc<AppState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let permit = match Arc::clone(&state.connection_slots).try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            return error_response(
                Error::new(ErrorKind::Busy)
                    .with_message("too many push connections")
                    .with_hint("Close idle connections or raise --max-connections."),
            );
        }
    };
    let engine = state.engine.clone();
    upgrade.on_upgrade(move |socket| async move {
        run_push_connection(socket, engine).await;
        drop(permit);
    })
}

async fn run_push_connection(socket: WebSocket, engine: SubscriptionEngine) {
    let (session, mut frames) = engine.connect();
    let connection = session.id();
    tracing::debug!(%connection, "push connection opened");

    let (mut sink, mut inbound) = socket.split();
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sink.send(Message::Text(frame.to_json())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = inbound.next().await {
        match message {
            Ok(Message::Text(text)) => session.handle_text(&text),
            Ok(Message::Binary(_)) => session.report(
                &Error::new(ErrorKind::Usage).with_message("binary frames are not supported"),
                None,
            ),
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(err) => {
                tracing::debug!(%connection, error = %err, "push connection read failed");
                break;
            }
        }
    }

    // Dropping the session cancels every subscription of this connection.
    drop(session);
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }
    tracing::debug!(%connection, "push connection closed");
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    status: &'static str,
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

fn json_response(status: StatusCode, payload: Value) -> Response {
    let mut response = (status, Json(payload)).into_response();
    response.headers_mut().insert(
        "switchyard-version",
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}

fn error_response(err: Error) -> Response {
    let status = match err.kind() {
        ErrorKind::Usage => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        ErrorKind::Busy => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Failed => {
            tracing::warn!(error = %err, "operation failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        ErrorKind::Io | ErrorKind::Internal => {
            tracing::error!(error = %err, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let message = match err.kind() {
        ErrorKind::Io | ErrorKind::Internal => err.kind().reason().to_string(),
        kind => err.message().unwrap_or(kind.reason()).to_string(),
    };
    let body = ErrorEnvelope {
        status: "error",
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message,
            hint: err.hint().map(str::to_string),
        },
    };
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        "switchyard-version",
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, ServeConfig, cors_layer, error_response, serve, validate_config};
    use axum::http::StatusCode;
    use serde_json::{Value, json};
    use switchyard::api::Error;

    fn config() -> ServeConfig {
        ServeConfig {
            bind: "127.0.0.1:0".parse().expect("bind"),
            allow_non_loopback: false,
            cors_allowed_origins: Vec::new(),
            max_body_bytes: 1024 * 1024,
            max_connections: 64,
            demo: false,
            demo_tick_ms: None,
            log_level: "info".to_string(),
        }
    }

    async fn body_json(response: axum::response::Response) -> (StatusCode, Vec<u8>) {
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("body");
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn serve_rejects_non_loopback_bind() {
        let config = ServeConfig {
            bind: "0.0.0.0:0".parse().expect("bind"),
            ..config()
        };
        let err = serve(config).await.expect_err("expected usage error");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn loopback_defaults_are_valid() {
        validate_config(&config()).expect("valid");
        let ipv6 = ServeConfig {
            bind: "[::1]:9800".parse().expect("bind"),
            ..config()
        };
        validate_config(&ipv6).expect("valid");
    }

    #[test]
    fn non_loopback_requires_allow_flag() {
        let mut config = ServeConfig {
            bind: "0.0.0.0:0".parse().expect("bind"),
            ..config()
        };
        let err = validate_config(&config).expect_err("expected usage error");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.hint().is_some());
        config.allow_non_loopback = true;
        validate_config(&config).expect("allowed");
    }

    #[test]
    fn safety_limits_require_positive_values() {
        let err = validate_config(&ServeConfig {
            max_body_bytes: 0,
            ..config()
        })
        .expect_err("body");
        assert_eq!(err.kind(), ErrorKind::Usage);

        let err = validate_config(&ServeConfig {
            max_connections: 0,
            ..config()
        })
        .expect_err("connections");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn demo_tick_requires_demo_and_positive_period() {
        let err = validate_config(&ServeConfig {
            demo_tick_ms: Some(100),
            ..config()
        })
        .expect_err("needs demo");
        assert_eq!(err.message(), Some("--demo-tick-ms requires --demo"));

        let err = validate_config(&ServeConfig {
            demo: true,
            demo_tick_ms: Some(0),
            ..config()
        })
        .expect_err("zero");
        assert_eq!(err.kind(), ErrorKind::Usage);

        validate_config(&ServeConfig {
            demo: true,
            demo_tick_ms: Some(250),
            ..config()
        })
        .expect("valid");
    }

    #[test]
    fn cors_origins_must_be_exact() {
        for origin in ["localhost:3000", "http://", "http://localhost:3000/app", "ftp://x"] {
            let err = validate_config(&ServeConfig {
                cors_allowed_origins: vec![origin.to_string()],
                ..config()
            })
            .expect_err(origin);
            assert_eq!(err.kind(), ErrorKind::Usage);
        }
        let origins = vec![
            "http://localhost:3000".to_string(),
            "https://example.com".to_string(),
        ];
        assert!(cors_layer(&origins).expect("layer").is_some());
        assert!(cors_layer(&[]).expect("layer").is_none());
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let err = validate_config(&ServeConfig {
            log_level: "switchyard=loud".to_string(),
            ..config()
        })
        .expect_err("log level");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[tokio::test]
    async fn failed_operations_have_empty_body() {
        let (status, body) = body_json(error_response(
            Error::new(ErrorKind::Failed).with_message("plugin said no"),
        ))
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn error_envelope_carries_kind_message_and_hint() {
        let (status, body) = body_json(error_response(
            Error::new(ErrorKind::NotImplemented)
                .with_message("update on /lights/switches/ is not implemented"),
        ))
        .await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        let body: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(
            body,
            json!({
                "status": "error",
                "error": {
                    "kind": "NotImplemented",
                    "message": "update on /lights/switches/ is not implemented",
                }
            })
        );

        let (status, body) = body_json(error_response(
            Error::new(ErrorKind::Busy).with_hint("Retry later."),
        ))
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(body["error"]["message"], json!("Service Unavailable"));
        assert_eq!(body["error"]["hint"], json!("Retry later."));
    }

    #[tokio::test]
    async fn internal_errors_hide_detail() {
        let (status, body) = body_json(error_response(
            Error::new(ErrorKind::Io).with_message("disk on fire"),
        ))
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(body["error"]["message"], json!("Internal Server Error"));
    }
}
