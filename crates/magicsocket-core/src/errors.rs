//! Error taxonomy.
//!
//! - [`SocketError`]: everything the registry and connections return to callers
//! - [`TransportError`]: a failure reported by the underlying duplex channel,
//!   classified by [`TransportErrorKind`] so callers can tell routine peer
//!   hang-ups apart from real faults
//! - [`HookError`]: failure reported by a caller-supplied hook. Hook errors are
//!   logged, never propagated through registry operations.

use std::fmt;

use thiserror::Error;

use crate::ids::{ClientId, RoutingKey};

/// Classification of a transport failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The channel was closed (locally or by a completed closing handshake).
    Closed,
    /// The peer went away without a closing handshake.
    Reset,
    /// The peer violated the framing protocol.
    Protocol,
    /// Any other I/O failure.
    Io,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Reset => "reset",
            Self::Protocol => "protocol",
            Self::Io => "io",
        };
        f.write_str(s)
    }
}

/// Failure reported by a transport.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind} transport error: {message}")]
pub struct TransportError {
    /// Failure class.
    pub kind: TransportErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl TransportError {
    /// Create a transport error.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for [`TransportErrorKind::Closed`].
    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Closed, message)
    }

    /// Whether this is a routine end of connection rather than a fault.
    ///
    /// Only affects log severity; every transport error ends the read pump.
    pub fn is_expected(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::Closed | TransportErrorKind::Reset
        )
    }
}

/// Failure reported by a caller-supplied connection hook.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HookError {
    message: String,
}

impl HookError {
    /// Create a hook error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HookError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HookError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Errors returned by registry and connection operations.
#[derive(Clone, Debug, Error)]
pub enum SocketError {
    /// The routing key is already reserved by another live connection.
    #[error("routing key '{key}' is already registered")]
    DuplicateKey {
        /// The conflicting key.
        key: RoutingKey,
    },

    /// No live connection matches the lookup.
    #[error("no live connection for {what}")]
    NotFound {
        /// What was looked up, e.g. `key 'c1'`.
        what: String,
    },

    /// The connection's transport has already been torn down.
    #[error("transport for client {client_id} is closed")]
    TransportClosed {
        /// The torn-down connection.
        client_id: ClientId,
    },

    /// The transport rejected a write.
    #[error("transport failure on client {client_id}: {source}")]
    Transport {
        /// The affected connection.
        client_id: ClientId,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },

    /// The registry has been stopped and accepts no new connections.
    #[error("connection registry is stopped")]
    RegistryStopped,

    /// The registry already holds its maximum number of live connections.
    #[error("connection limit of {limit} reached")]
    CapacityReached {
        /// Configured maximum.
        limit: usize,
    },
}

impl SocketError {
    /// Lookup miss by routing key.
    pub fn key_not_found(key: &str) -> Self {
        Self::NotFound {
            what: format!("key '{key}'"),
        }
    }

    /// Lookup miss by client id.
    pub fn client_not_found(id: &ClientId) -> Self {
        Self::NotFound {
            what: format!("client {id}"),
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateKey { .. } => "DUPLICATE_KEY",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::TransportClosed { .. } => "TRANSPORT_CLOSED",
            Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::RegistryStopped => "REGISTRY_STOPPED",
            Self::CapacityReached { .. } => "CAPACITY_REACHED",
        }
    }

    /// Whether this outcome is a normal consequence of teardown races or
    /// peers leaving, as opposed to a fault worth a warning.
    pub fn is_expected(&self) -> bool {
        match self {
            Self::TransportClosed { .. } | Self::RegistryStopped => true,
            Self::Transport { source, .. } => source.is_expected(),
            Self::DuplicateKey { .. } | Self::NotFound { .. } | Self::CapacityReached { .. } => {
                false
            }
        }
    }
}
