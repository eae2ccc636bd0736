//! Admin HTTP routes served next to the WebSocket endpoint.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::post;
use magicsocket_server::{EmitRule, MagicSocketServer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// Body of `POST /emit`.
#[derive(Debug, Deserialize)]
pub struct EmitRequest {
    /// Target rules; empty broadcasts to everyone.
    #[serde(default)]
    pub rules: Vec<EmitRule>,
    /// Sent to each target as JSON text.
    pub payload: Value,
}

/// Response of `POST /emit`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmitResponse {
    /// Number of connections the payload was dispatched to.
    pub targets: usize,
}

/// Routes: `POST /emit`.
pub fn router(server: Arc<MagicSocketServer>) -> Router {
    Router::new()
        .route("/emit", post(emit_handler))
        .with_state(server)
}

async fn emit_handler(
    State(server): State<Arc<MagicSocketServer>>,
    Json(request): Json<EmitRequest>,
) -> Result<Json<EmitResponse>, (StatusCode, String)> {
    let emission = server
        .emit_json(&request.rules, &request.payload)
        .map_err(|err| {
            warn!(error = %err, "emit payload could not be encoded");
            (StatusCode::BAD_REQUEST, err.to_string())
        })?;
    let targets = emission.len();
    info!(targets, rules = request.rules.len(), "admin emit");
    Ok(Json(EmitResponse { targets }))
}
