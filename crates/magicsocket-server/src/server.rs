//! `MagicSocketServer`: Axum HTTP + WebSocket front end for the registry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use magicsocket_core::{Frame, RoutingKey};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_REJECTIONS_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::transport::Transport;
use crate::websocket::broadcast::{EmitRule, Emission};
use crate::websocket::registry::{ConnectionRegistry, Registration};

/// What the authorizer sees of an incoming upgrade request.
#[derive(Clone, Debug)]
pub struct ConnectRequest {
    /// Request URI.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
    /// Decoded query parameters.
    pub query: HashMap<String, String>,
}

impl ConnectRequest {
    /// A query parameter, if present.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// A header value, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Refusal returned by an [`Authorizer`]. Sent to the client as the HTTP
/// response instead of upgrading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    /// Response status (400 unless set otherwise).
    pub status: StatusCode,
    /// Response body.
    pub message: String,
}

impl Rejection {
    /// 400 Bad Request with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, message)
    }

    /// Custom status with `message`.
    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

/// Decides whether an incoming connection is admitted and with which key,
/// topics, and hooks. Called once per request, before the upgrade.
///
/// Plain closures `Fn(&ConnectRequest) -> Result<Registration, Rejection>`
/// implement this trait.
#[async_trait]
pub trait Authorizer: Send + Sync + 'static {
    /// Admit or refuse `request`.
    async fn authorize(&self, request: &ConnectRequest) -> Result<Registration, Rejection>;
}

#[async_trait]
impl<F> Authorizer for F
where
    F: Fn(&ConnectRequest) -> Result<Registration, Rejection> + Send + Sync + 'static,
{
    async fn authorize(&self, request: &ConnectRequest) -> Result<Registration, Rejection> {
        self(request)
    }
}

/// Admits everyone under a freshly generated key with no topics or hooks.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _request: &ConnectRequest) -> Result<Registration, Rejection> {
        Ok(Registration::new(RoutingKey::new()))
    }
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
struct AppState {
    registry: Arc<ConnectionRegistry>,
    authorizer: Arc<dyn Authorizer>,
    config: Arc<ServerConfig>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

/// The magicsocket server.
pub struct MagicSocketServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    authorizer: Arc<dyn Authorizer>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl MagicSocketServer {
    /// Create a server admitting connections through `authorizer`.
    pub fn new(config: ServerConfig, authorizer: impl Authorizer) -> Self {
        let registry = Arc::new(ConnectionRegistry::with_limits(
            config.hook_failure_policy,
            config.max_connections,
        ));
        Self {
            config: Arc::new(config),
            registry,
            authorizer: Arc::new(authorizer),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
            local_addr: Mutex::new(None),
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Bound address once [`listen`](Self::listen) succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Broadcast `frame` to every connection matched by `rules`.
    pub fn emit(&self, rules: &[EmitRule], frame: Frame) -> Emission {
        self.registry.emit(rules, frame)
    }

    /// Broadcast `value` as JSON text.
    pub fn emit_json<T: Serialize + ?Sized>(
        &self,
        rules: &[EmitRule],
        value: &T,
    ) -> Result<Emission, serde_json::Error> {
        self.registry.emit_json(rules, value)
    }

    /// Build the Axum router: the upgrade path plus `/health` and `/metrics`.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: Arc::clone(&self.registry),
            authorizer: Arc::clone(&self.authorizer),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route(&self.config.path, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Bind and serve until [`stop`](Self::stop).
    ///
    /// Returns the bound address (useful with port 0) and the accept-loop task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        self.listen_with(Router::new()).await
    }

    /// Like [`listen`](Self::listen), serving `extra` routes next to the
    /// built-in ones.
    pub async fn listen_with(
        &self,
        extra: Router,
    ) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(addr);

        let app = self.router().merge(extra);
        let token = self.shutdown.token();
        info!(%addr, path = %self.config.path, "magicsocket server listening");

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(err) = served {
                error!(error = %err, "accept loop failed");
            }
            info!("accept loop stopped");
        });
        Ok((addr, handle))
    }

    /// Stop accepting and close every live connection. Idempotent, and safe
    /// to call before [`listen`](Self::listen).
    pub async fn stop(&self) {
        if !self.shutdown.is_shutting_down() {
            info!(connections = self.registry.len(), "stopping magicsocket server");
        }
        self.shutdown.shutdown();
        self.registry.stop().await;
    }
}

/// GET on the upgrade path.
async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    uri: Uri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if state.registry.is_stopped() {
        return reject(StatusCode::SERVICE_UNAVAILABLE, "stopping", "server is stopping".into());
    }
    // Fast path only; register enforces the limit under the registry lock.
    if state.registry.len() >= state.config.max_connections {
        return reject(
            StatusCode::SERVICE_UNAVAILABLE,
            "capacity",
            "connection limit reached".into(),
        );
    }

    let request = ConnectRequest {
        uri,
        headers,
        query,
    };
    let registration = match state.authorizer.authorize(&request).await {
        Ok(registration) => registration,
        Err(rejection) => {
            counter!(WS_REJECTIONS_TOTAL, "reason" => "authorizer").increment(1);
            info!(status = %rejection.status, message = %rejection.message, "connection rejected");
            return rejection.into_response();
        }
    };

    // register re-checks under the registry lock.
    if state.registry.contains_key(&registration.key) {
        return reject(
            StatusCode::CONFLICT,
            "duplicate_key",
            format!("routing key '{}' is already registered", registration.key),
        );
    }

    let registry = Arc::clone(&state.registry);
    ws.max_message_size(state.config.max_message_size)
        .on_failed_upgrade(|err| warn!(error = %err, "websocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            let key = registration.key.clone();
            match registry.register(registration, Transport::from_websocket(socket)).await {
                Ok(id) => debug!(client_id = %id, key = %key, "websocket attached"),
                Err(err) => {
                    counter!(WS_REJECTIONS_TOTAL, "reason" => err.code()).increment(1);
                    info!(key = %key, error = %err, "websocket closed after upgrade");
                }
            }
        })
}

fn reject(status: StatusCode, reason: &'static str, message: String) -> Response {
    counter!(WS_REJECTIONS_TOTAL, "reason" => reason).increment(1);
    info!(status = %status, reason, "connection rejected");
    (status, message).into_response()
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.len(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
