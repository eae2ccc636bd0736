//! The set of live connections.
//!
//! Two indices (by [`ClientId`] and by [`RoutingKey`]) sit behind one
//! `parking_lot` mutex and are only ever changed together. The lock guards
//! map bookkeeping alone: it is never held across an `.await`, so a slow
//! peer cannot stall registration, renames, or other broadcasts.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use magicsocket_core::{ClientId, RoutingKey, SocketError, TopicSet};
use magicsocket_settings::HookFailurePolicy;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::connection::Connection;
use super::hooks::ConnectionHooks;
use super::listener::run_listener;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL};
use crate::transport::Transport;

/// Initial parameters for a new connection.
#[derive(Clone, Debug)]
pub struct Registration {
    /// Routing key to reserve.
    pub key: RoutingKey,
    /// Initial topic set.
    pub topics: TopicSet,
    /// Callbacks for the connection's lifetime.
    pub hooks: ConnectionHooks,
}

impl Registration {
    /// Register under `key` with no topics and no hooks.
    pub fn new(key: impl Into<RoutingKey>) -> Self {
        Self {
            key: key.into(),
            topics: TopicSet::new(),
            hooks: ConnectionHooks::new(),
        }
    }

    /// Set the initial topics.
    #[must_use]
    pub fn with_topics(mut self, topics: impl Into<TopicSet>) -> Self {
        self.topics = topics.into();
        self
    }

    /// Set the hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: ConnectionHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

#[derive(Default)]
struct Indices {
    by_id: HashMap<ClientId, Arc<Connection>>,
    by_key: HashMap<RoutingKey, ClientId>,
}

/// Owner of every live [`Connection`].
pub struct ConnectionRegistry {
    indices: Mutex<Indices>,
    stopped: AtomicBool,
    policy: HookFailurePolicy,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create an empty registry with the default hook failure policy.
    pub fn new() -> Self {
        Self::with_policy(HookFailurePolicy::default())
    }

    /// Create an empty registry applying `policy` to every connection.
    pub fn with_policy(policy: HookFailurePolicy) -> Self {
        Self::with_limits(policy, usize::MAX)
    }

    /// Like [`with_policy`](Self::with_policy), admitting at most
    /// `max_connections` live connections.
    pub fn with_limits(policy: HookFailurePolicy, max_connections: usize) -> Self {
        Self {
            indices: Mutex::new(Indices::default()),
            stopped: AtomicBool::new(false),
            policy,
            max_connections,
        }
    }

    /// Hook failure policy applied to new connections.
    pub fn policy(&self) -> HookFailurePolicy {
        self.policy
    }

    /// Upper bound on live connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Reserve the key, create the connection, and start its listener task.
    ///
    /// Fails with [`SocketError::DuplicateKey`] when a live connection holds
    /// the key, with [`SocketError::CapacityReached`] at the connection
    /// limit, and with [`SocketError::RegistryStopped`] after [`stop`]. In
    /// every case `transport` is closed before returning.
    ///
    /// The listener is supervised: if it dies without tearing down (a hook
    /// panicked), the supervisor closes the connection.
    ///
    /// [`stop`]: Self::stop
    pub async fn register(
        self: &Arc<Self>,
        registration: Registration,
        transport: Transport,
    ) -> Result<ClientId, SocketError> {
        let Registration { key, topics, hooks } = registration;
        let (sink, source) = transport.into_parts();
        let id = ClientId::new();
        let conn = Arc::new(Connection::new(
            id.clone(),
            key.clone(),
            topics,
            hooks,
            self.policy,
            sink,
            Arc::downgrade(self),
        ));

        if let Err(err) = self.insert(&conn) {
            debug!(key = %key, error = %err, "registration refused");
            drop(source);
            conn.discard().await;
            return Err(err);
        }

        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        info!(client_id = %id, key = %key, "connection registered");

        let listener = tokio::spawn(run_listener(Arc::clone(&conn), source));
        let _supervisor = tokio::spawn(async move {
            if let Err(err) = listener.await {
                error!(
                    client_id = %conn.id(),
                    error = %err,
                    "listener died, tearing connection down"
                );
                conn.close().await;
            }
        });
        Ok(id)
    }

    fn insert(&self, conn: &Arc<Connection>) -> Result<(), SocketError> {
        let mut indices = self.indices.lock();
        if self.stopped.load(Ordering::Acquire) {
            return Err(SocketError::RegistryStopped);
        }
        if indices.by_id.len() >= self.max_connections {
            return Err(SocketError::CapacityReached {
                limit: self.max_connections,
            });
        }
        let key = conn.key();
        if indices.by_key.contains_key(&key) {
            return Err(SocketError::DuplicateKey { key });
        }
        let _ = indices.by_key.insert(key, conn.id().clone());
        let _ = indices.by_id.insert(conn.id().clone(), Arc::clone(conn));
        Ok(())
    }

    /// Connection currently holding `key`.
    pub fn lookup(&self, key: &str) -> Result<Arc<Connection>, SocketError> {
        let indices = self.indices.lock();
        indices
            .by_key
            .get(key)
            .and_then(|id| indices.by_id.get(id))
            .cloned()
            .ok_or_else(|| SocketError::key_not_found(key))
    }

    /// Connection with registry id `id`.
    pub fn get(&self, id: &ClientId) -> Result<Arc<Connection>, SocketError> {
        self.indices
            .lock()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| SocketError::client_not_found(id))
    }

    /// Whether a live connection holds `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.indices.lock().by_key.contains_key(key)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.indices.lock().by_id.len()
    }

    /// Whether there are no live connections.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move connection `id` to `new_key`.
    ///
    /// The old key stops resolving at the same instant the new one starts;
    /// an emit that snapshots afterwards no longer matches the old key.
    /// Renaming to the current key is a no-op.
    pub fn rename(&self, id: &ClientId, new_key: impl Into<RoutingKey>) -> Result<(), SocketError> {
        let new_key = new_key.into();
        let mut indices = self.indices.lock();
        let conn = indices
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| SocketError::client_not_found(id))?;

        let old_key = conn.key();
        if old_key == new_key {
            return Ok(());
        }
        if indices.by_key.contains_key(&new_key) {
            return Err(SocketError::DuplicateKey { key: new_key });
        }

        let _ = indices.by_key.remove(&old_key);
        let _ = indices.by_key.insert(new_key.clone(), id.clone());
        conn.set_key(new_key.clone());
        drop(indices);

        debug!(client_id = %id, old_key = %old_key, new_key = %new_key, "routing key renamed");
        Ok(())
    }

    /// Replace the topic set of connection `id` as a whole.
    pub fn set_topics(&self, id: &ClientId, topics: impl Into<TopicSet>) -> Result<(), SocketError> {
        let topics = topics.into();
        let indices = self.indices.lock();
        let conn = indices
            .by_id
            .get(id)
            .ok_or_else(|| SocketError::client_not_found(id))?;
        debug!(client_id = %id, topics = topics.len(), "topics replaced");
        conn.set_topics(topics);
        Ok(())
    }

    /// Tear down connection `id`. Unknown or already removed ids are a no-op.
    pub async fn remove(&self, id: &ClientId) {
        let conn = self.indices.lock().by_id.get(id).cloned();
        if let Some(conn) = conn {
            conn.close().await;
        }
    }

    /// Point-in-time copy of every live connection.
    pub fn snapshot(&self) -> Snapshot {
        let indices = self.indices.lock();
        let views = indices
            .by_id
            .values()
            .map(|conn| ConnectionView {
                id: conn.id().clone(),
                key: conn.key(),
                topics: conn.topics(),
                connection: Arc::clone(conn),
            })
            .collect();
        Snapshot { views }
    }

    /// Refuse new registrations and close every live connection.
    ///
    /// Connections tearing themselves down at the same time are closed
    /// exactly once. Calling `stop` again is harmless.
    pub async fn stop(&self) {
        let conns: Vec<Arc<Connection>> = {
            let indices = self.indices.lock();
            self.stopped.store(true, Ordering::Release);
            indices.by_id.values().cloned().collect()
        };
        info!(connections = conns.len(), "stopping connection registry");
        let _ = futures::future::join_all(conns.iter().map(|conn| conn.close())).await;
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Drop `conn` from both indices. Called once, from its teardown.
    pub(crate) fn unlink(&self, conn: &Connection) {
        let mut indices = self.indices.lock();
        if indices.by_id.remove(conn.id()).is_none() {
            return;
        }
        let key = conn.key();
        if indices.by_key.get(&key) == Some(conn.id()) {
            let _ = indices.by_key.remove(&key);
        }
        drop(indices);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .field("stopped", &self.is_stopped())
            .field("policy", &self.policy)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// One connection as seen at snapshot time.
#[derive(Clone, Debug)]
pub struct ConnectionView {
    /// Registry id.
    pub id: ClientId,
    /// Routing key when the snapshot was taken.
    pub key: RoutingKey,
    /// Topics when the snapshot was taken.
    pub topics: TopicSet,
    /// The live connection.
    pub connection: Arc<Connection>,
}

/// Consistent copy of the registry taken under its lock.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    views: Vec<ConnectionView>,
}

impl Snapshot {
    /// Number of connections captured.
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Whether no connections were captured.
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Iterate captured connections (unordered).
    pub fn iter(&self) -> std::slice::Iter<'_, ConnectionView> {
        self.views.iter()
    }

    /// View for `key`, if it was live at snapshot time.
    pub fn find(&self, key: &str) -> Option<&ConnectionView> {
        self.views.iter().find(|view| view.key.as_str() == key)
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a ConnectionView;
    type IntoIter = std::slice::Iter<'a, ConnectionView>;

    fn into_iter(self) -> Self::IntoIter {
        self.views.iter()
    }
}

impl IntoIterator for Snapshot {
    type Item = ConnectionView;
    type IntoIter = std::vec::IntoIter<ConnectionView>;

    fn into_iter(self) -> Self::IntoIter {
        self.views.into_iter()
    }
}
