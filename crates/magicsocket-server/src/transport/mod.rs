//! Duplex transport seam.
//!
//! The registry never talks to a socket directly. A [`Transport`] is split
//! into a write half ([`FrameSink`]) owned by the [`Connection`] and a read
//! half ([`FrameSource`]) owned by its listener task. Closing the sink is what
//! tears the channel down; the source observes the end promptly.
//!
//! [`Connection`]: crate::websocket::connection::Connection

pub mod memory;
pub mod ws;

use async_trait::async_trait;
use magicsocket_core::{Frame, Inbound, TransportError};
use tracing::debug;

/// Write half of a transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one frame. May wait for as long as the peer applies backpressure.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the underlying channel. Calling it again is harmless.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a transport.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next inbound event.
    ///
    /// `None` means the channel ended without an error (clean close).
    async fn recv(&mut self) -> Option<Result<Inbound, TransportError>>;
}

/// Both halves of an accepted duplex channel.
pub struct Transport {
    sink: Box<dyn FrameSink>,
    source: Box<dyn FrameSource>,
}

impl Transport {
    /// Bundle a sink and a source.
    pub fn new(sink: impl FrameSink + 'static, source: impl FrameSource + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
        }
    }

    /// Split into the write and read halves.
    pub fn into_parts(self) -> (Box<dyn FrameSink>, Box<dyn FrameSource>) {
        (self.sink, self.source)
    }

    /// Close without ever registering the channel.
    pub async fn close(self) {
        let (mut sink, source) = self.into_parts();
        drop(source);
        if let Err(err) = sink.close().await {
            debug!(error = %err, "error closing unregistered transport");
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}
