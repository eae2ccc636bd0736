//! Per-connection callbacks.

use std::fmt;
use std::sync::Arc;

use magicsocket_core::{Frame, HookError};

/// Callback that observes a data frame.
pub type FrameHook = Arc<dyn Fn(&Frame) -> Result<(), HookError> + Send + Sync>;

/// Callback for an event that carries no payload.
pub type SignalHook = Arc<dyn Fn() -> Result<(), HookError> + Send + Sync>;

/// Optional callbacks attached to a connection at registration.
///
/// Hooks run synchronously on the task that triggered them and must not
/// block. A failing hook is logged and counted; whether it also tears the
/// connection down depends on the registry's
/// [`HookFailurePolicy`](magicsocket_settings::HookFailurePolicy).
#[derive(Clone, Default)]
pub struct ConnectionHooks {
    /// Every data frame read from the peer, in arrival order.
    pub on_incoming: Option<FrameHook>,
    /// Every frame successfully written to the peer.
    pub on_outgoing: Option<FrameHook>,
    /// Ping control frames from the peer.
    pub on_ping: Option<SignalHook>,
    /// Teardown. Runs exactly once per connection.
    pub on_disconnect: Option<SignalHook>,
}

impl ConnectionHooks {
    /// No hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the inbound frame hook.
    #[must_use]
    pub fn on_incoming(
        mut self,
        hook: impl Fn(&Frame) -> Result<(), HookError> + Send + Sync + 'static,
    ) -> Self {
        self.on_incoming = Some(Arc::new(hook));
        self
    }

    /// Set the outbound frame hook.
    #[must_use]
    pub fn on_outgoing(
        mut self,
        hook: impl Fn(&Frame) -> Result<(), HookError> + Send + Sync + 'static,
    ) -> Self {
        self.on_outgoing = Some(Arc::new(hook));
        self
    }

    /// Set the ping hook.
    #[must_use]
    pub fn on_ping(mut self, hook: impl Fn() -> Result<(), HookError> + Send + Sync + 'static) -> Self {
        self.on_ping = Some(Arc::new(hook));
        self
    }

    /// Set the teardown hook.
    #[must_use]
    pub fn on_disconnect(
        mut self,
        hook: impl Fn() -> Result<(), HookError> + Send + Sync + 'static,
    ) -> Self {
        self.on_disconnect = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ConnectionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHooks")
            .field("on_incoming", &self.on_incoming.is_some())
            .field("on_outgoing", &self.on_outgoing.is_some())
            .field("on_ping", &self.on_ping.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish()
    }
}

/// Which hook failed, for logs and metric labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HookKind {
    Incoming,
    Outgoing,
    Ping,
    Disconnect,
}

impl HookKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "on_incoming",
            Self::Outgoing => "on_outgoing",
            Self::Ping => "on_ping",
            Self::Disconnect => "on_disconnect",
        }
    }
}
