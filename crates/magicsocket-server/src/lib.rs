//! # magicsocket-server
//!
//! In-process publish/subscribe over persistent WebSocket connections.
//!
//! - [`websocket::registry`]: the [`ConnectionRegistry`], one lock over the
//!   by-id and by-key indices
//! - [`websocket::connection`]: per-client state with idempotent teardown
//! - [`websocket::listener`]: one read pump task per connection
//! - [`websocket::broadcast`]: rule matching and concurrent fan-out
//! - [`transport`]: the duplex channel seam (WebSocket and in-memory)
//! - [`server`]: the Axum facade with authorization, `/health`, `/metrics`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod transport;
pub mod websocket;

pub use config::ServerConfig;
pub use server::{AllowAll, Authorizer, ConnectRequest, MagicSocketServer, Rejection};
pub use transport::{FrameSink, FrameSource, Transport};
pub use websocket::{
    Connection, ConnectionHooks, ConnectionRegistry, EmitReport, EmitRule, Emission,
    Registration, Snapshot, TopicFilter,
};
