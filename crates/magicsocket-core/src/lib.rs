//! # magicsocket-core
//!
//! Shared vocabulary for the magicsocket crates:
//!
//! - **Branded IDs**: [`ClientId`] (internal, immutable) and [`RoutingKey`]
//!   (caller-assigned, renameable) as distinct newtypes
//! - **Topics**: [`TopicSet`], the replaceable set of interest labels
//! - **Frames**: [`Frame`] payloads and [`Inbound`] transport events
//! - **Errors**: [`SocketError`], [`TransportError`], [`HookError`] via `thiserror`
//! - **Logging**: subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod frame;
pub mod ids;
pub mod logging;
pub mod topics;

pub use errors::{HookError, SocketError, TransportError, TransportErrorKind};
pub use frame::{Frame, Inbound};
pub use ids::{ClientId, RoutingKey};
pub use topics::TopicSet;
