//! Per-connection read pump.

use std::sync::Arc;

use magicsocket_core::{Inbound, TransportError};
use tracing::{debug, info, instrument, warn};

use super::connection::Connection;
use crate::transport::FrameSource;

/// Why a listener stopped reading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenerExit {
    /// The connection was closed from our side.
    Cancelled,
    /// The peer closed the channel.
    PeerClosed,
    /// A read failed.
    Failed(TransportError),
    /// A hook failed under the `Disconnect` policy.
    HookFailure,
}

/// Read from `source` until the channel ends, feeding data frames to the
/// connection's `on_incoming` hook, then tear the connection down.
///
/// The connection may already have been removed by the time the pump ends;
/// teardown is idempotent either way. Whether the end was routine or a fault
/// only changes the log level.
#[instrument(skip_all, fields(client_id = %conn.id()))]
pub async fn run_listener(conn: Arc<Connection>, mut source: Box<dyn FrameSource>) -> ListenerExit {
    let exit = loop {
        let next = tokio::select! {
            biased;
            () = conn.cancelled() => None,
            next = source.recv() => Some(next),
        };
        let Some(next) = next else {
            break ListenerExit::Cancelled;
        };

        match next {
            Some(Ok(Inbound::Frame(frame))) => {
                if !conn.notify_incoming(&frame) {
                    break ListenerExit::HookFailure;
                }
            }
            Some(Ok(Inbound::Ping(_))) => {
                if !conn.notify_ping() {
                    break ListenerExit::HookFailure;
                }
            }
            Some(Ok(Inbound::Pong(_))) => {}
            Some(Ok(Inbound::Close(reason))) => {
                debug!(reason = reason.as_deref().unwrap_or(""), "peer sent close frame");
                break ListenerExit::PeerClosed;
            }
            None => break ListenerExit::PeerClosed,
            Some(Err(err)) => {
                if err.is_expected() {
                    debug!(error = %err, "transport ended");
                } else {
                    warn!(error = %err, kind = %err.kind, "transport failed");
                }
                break ListenerExit::Failed(err);
            }
        }
    };

    drop(source);
    info!(exit = ?exit, "listener stopped");
    conn.close().await;
    exit
}
