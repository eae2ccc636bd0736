//! Query-parameter authorizer.

use magicsocket_core::{RoutingKey, TopicSet};
use magicsocket_server::{ConnectRequest, ConnectionHooks, Registration, Rejection};
use tracing::debug;

/// Admit a connection under `?key=` (generated when absent) with the
/// comma-separated `?topics=`.
pub fn authorize(request: &ConnectRequest) -> Result<Registration, Rejection> {
    let key = match request.query_param("key") {
        Some("") => return Err(Rejection::new("key must not be empty")),
        Some(key) => RoutingKey::from(key),
        None => RoutingKey::new(),
    };
    let topics = request.query_param("topics").map(parse_topics).unwrap_or_default();

    let log_key = key.clone();
    let hooks = ConnectionHooks::new().on_incoming(move |frame| {
        debug!(key = %log_key, kind = frame.kind(), len = frame.len(), "frame received");
        Ok(())
    });
    Ok(Registration::new(key).with_topics(topics).with_hooks(hooks))
}

fn parse_topics(raw: &str) -> TopicSet {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect()
}
