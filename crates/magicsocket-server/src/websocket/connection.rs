//! A single live connection.

use std::fmt;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use magicsocket_core::{ClientId, Frame, HookError, RoutingKey, SocketError, TopicSet};
use magicsocket_settings::HookFailurePolicy;
use metrics::{counter, histogram};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::hooks::{ConnectionHooks, HookKind};
use super::registry::ConnectionRegistry;
use crate::metrics::{
    HOOK_FAILURES_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_DISCONNECTIONS_TOTAL,
};
use crate::transport::FrameSink;

/// Upper bound on waiting for the transport's closing handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-client state: identity, routing data, the write half of the
/// transport, and hooks.
///
/// The write half is taken out exactly once at teardown. Every send checks
/// for its absence and reports [`SocketError::TransportClosed`] instead.
pub struct Connection {
    id: ClientId,
    key: RwLock<RoutingKey>,
    topics: RwLock<TopicSet>,
    sink: tokio::sync::Mutex<Option<Box<dyn FrameSink>>>,
    hooks: ConnectionHooks,
    policy: HookFailurePolicy,
    closed: AtomicBool,
    cancel: CancellationToken,
    registry: Mutex<Option<Weak<ConnectionRegistry>>>,
    connected_at: Instant,
}

impl Connection {
    pub(crate) fn new(
        id: ClientId,
        key: RoutingKey,
        topics: TopicSet,
        hooks: ConnectionHooks,
        policy: HookFailurePolicy,
        sink: Box<dyn FrameSink>,
        registry: Weak<ConnectionRegistry>,
    ) -> Self {
        Self {
            id,
            key: RwLock::new(key),
            topics: RwLock::new(topics),
            sink: tokio::sync::Mutex::new(Some(sink)),
            hooks,
            policy,
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            registry: Mutex::new(Some(registry)),
            connected_at: Instant::now(),
        }
    }

    /// Registry-assigned id.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Current routing key.
    pub fn key(&self) -> RoutingKey {
        self.key.read().clone()
    }

    /// Current topic set.
    pub fn topics(&self) -> TopicSet {
        self.topics.read().clone()
    }

    /// Time since registration.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Whether teardown has started.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // Only the registry calls these, under its lock.
    pub(crate) fn set_key(&self, key: RoutingKey) {
        *self.key.write() = key;
    }

    pub(crate) fn set_topics(&self, topics: TopicSet) {
        *self.topics.write() = topics;
    }

    /// Resolves once teardown has started.
    pub(crate) async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Write one frame to the peer.
    ///
    /// There is no timeout; a peer that stops reading stalls only this call,
    /// and [`close`](Self::close) interrupts it. On success the
    /// `on_outgoing` hook runs. Its failure is logged and never turns a
    /// successful write into an error.
    pub async fn send(&self, frame: Frame) -> Result<(), SocketError> {
        if self.is_closed() {
            return Err(self.transport_closed());
        }

        let written = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(self.transport_closed()),
            written = self.write(frame.clone()) => written,
        };
        written?;

        if let Some(hook) = &self.hooks.on_outgoing {
            if let Err(err) = hook(&frame) {
                if self.report_hook_failure(HookKind::Outgoing, &err) {
                    self.close().await;
                }
            }
        }
        Ok(())
    }

    async fn write(&self, frame: Frame) -> Result<(), SocketError> {
        let mut sink = self.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            return Err(self.transport_closed());
        };
        sink.send(frame)
            .await
            .map_err(|source| SocketError::Transport {
                client_id: self.id.clone(),
                source,
            })
    }

    /// Tear the connection down.
    ///
    /// Safe to call any number of times from any task; only the first call
    /// closes the transport, runs `on_disconnect`, and unlinks the
    /// connection from its registry, in that order.
    ///
    /// Until the unlink, the key stays reserved: `lookup` still returns this
    /// connection (with [`is_closed`](Self::is_closed) set) and a
    /// registration under the same key fails with `DuplicateKey`. The
    /// window lasts as long as the transport's closing handshake, at most
    /// five seconds.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();

        let sink = self.sink.lock().await.take();
        if let Some(sink) = sink {
            close_sink(&self.id, sink).await;
        }

        if let Some(hook) = &self.hooks.on_disconnect {
            if let Err(err) = hook() {
                let _ = self.report_hook_failure(HookKind::Disconnect, &err);
            }
        }

        let registry = self.registry.lock().take();
        if let Some(registry) = registry.and_then(|weak| weak.upgrade()) {
            registry.unlink(self);
        }

        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(self.age().as_secs_f64());
        info!(client_id = %self.id, key = %self.key(), "connection closed");
    }

    /// Close the transport of a connection that never made it into the
    /// registry. No hooks run.
    pub(crate) async fn discard(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        let _ = self.registry.lock().take();
        let sink = self.sink.lock().await.take();
        if let Some(sink) = sink {
            close_sink(&self.id, sink).await;
        }
    }

    /// Run `on_incoming`. Returns `false` when the connection must be torn down.
    pub(crate) fn notify_incoming(&self, frame: &Frame) -> bool {
        let Some(hook) = &self.hooks.on_incoming else {
            return true;
        };
        match hook(frame) {
            Ok(()) => true,
            Err(err) => !self.report_hook_failure(HookKind::Incoming, &err),
        }
    }

    /// Run `on_ping`. Returns `false` when the connection must be torn down.
    pub(crate) fn notify_ping(&self) -> bool {
        let Some(hook) = &self.hooks.on_ping else {
            return true;
        };
        match hook() {
            Ok(()) => true,
            Err(err) => !self.report_hook_failure(HookKind::Ping, &err),
        }
    }

    /// Log and count a hook failure. Returns whether policy demands teardown.
    fn report_hook_failure(&self, hook: HookKind, err: &HookError) -> bool {
        warn!(
            client_id = %self.id,
            key = %self.key(),
            hook = hook.as_str(),
            error = %err,
            "connection hook failed"
        );
        counter!(HOOK_FAILURES_TOTAL, "hook" => hook.as_str()).increment(1);
        hook != HookKind::Disconnect && self.policy == HookFailurePolicy::Disconnect
    }

    fn transport_closed(&self) -> SocketError {
        SocketError::TransportClosed {
            client_id: self.id.clone(),
        }
    }
}

async fn close_sink(id: &ClientId, mut sink: Box<dyn FrameSink>) {
    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) if err.is_expected() => {
            debug!(client_id = %id, error = %err, "transport already closed");
        }
        Ok(Err(err)) => warn!(client_id = %id, error = %err, "error closing transport"),
        Err(_) => warn!(client_id = %id, "timed out closing transport"),
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("key", &*self.key.read())
            .field("topics", &*self.topics.read())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
