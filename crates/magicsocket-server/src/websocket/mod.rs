//! Connection lifecycle and fan-out.
//!
//! - [`registry`]: the live connection set with its key index
//! - [`connection`]: per-client state, send and idempotent teardown
//! - [`listener`]: the per-connection read pump
//! - [`broadcast`]: rule evaluation and concurrent delivery
//! - [`hooks`]: caller-supplied callbacks

pub mod broadcast;
pub mod connection;
pub mod hooks;
pub mod listener;
pub mod registry;

pub use broadcast::{EmitReport, EmitRule, Emission, TopicFilter, select_targets};
pub use connection::Connection;
pub use hooks::{ConnectionHooks, FrameHook, SignalHook};
pub use listener::{ListenerExit, run_listener};
pub use registry::{ConnectionRegistry, ConnectionView, Registration, Snapshot};
