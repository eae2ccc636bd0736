//! Axum WebSocket adapter.

use std::error::Error as StdError;
use std::io;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use magicsocket_core::{Frame, Inbound, TransportError, TransportErrorKind};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::error::ProtocolError;

use super::{FrameSink, FrameSource, Transport};

impl Transport {
    /// Wrap an upgraded axum WebSocket.
    pub fn from_websocket(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self::new(WsSink(sink), WsSource(stream))
    }
}

struct WsSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data),
        };
        self.0.send(message).await.map_err(classify)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Sends the close frame if one hasn't gone out yet, then flushes.
        self.0.close().await.map_err(classify)
    }
}

struct WsSource(SplitStream<WebSocket>);

#[async_trait]
impl FrameSource for WsSource {
    async fn recv(&mut self) -> Option<Result<Inbound, TransportError>> {
        let message = match self.0.next().await? {
            Ok(message) => message,
            Err(err) => return Some(Err(classify(err))),
        };
        let inbound = match message {
            Message::Text(text) => Inbound::Frame(Frame::Text(text.as_str().to_owned())),
            Message::Binary(data) => Inbound::Frame(Frame::Binary(data)),
            Message::Ping(data) => Inbound::Ping(data),
            Message::Pong(data) => Inbound::Pong(data),
            Message::Close(frame) => Inbound::Close(frame.map(|f| f.reason.as_str().to_owned())),
        };
        Some(Ok(inbound))
    }
}

/// Map an axum WebSocket error onto [`TransportErrorKind`].
///
/// Looks for the tungstenite error first and falls back to any
/// `io::Error` in the source chain.
fn classify(err: axum::Error) -> TransportError {
    let message = err.to_string();
    let inner = err.into_inner();
    let kind = match inner.downcast_ref::<WsError>() {
        Some(ws) => ws_error_kind(ws),
        None => chain_io_kind(&*inner),
    };
    TransportError::new(kind, message)
}

fn ws_error_kind(err: &WsError) -> TransportErrorKind {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportErrorKind::Closed,
        WsError::Io(io) => io_kind(io.kind()),
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            TransportErrorKind::Reset
        }
        WsError::Protocol(_) | WsError::Capacity(_) => TransportErrorKind::Protocol,
        _ => TransportErrorKind::Io,
    }
}

fn chain_io_kind(err: &(dyn StdError + 'static)) -> TransportErrorKind {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<io::Error>() {
            return io_kind(io.kind());
        }
        current = err.source();
    }
    TransportErrorKind::Io
}

fn io_kind(kind: io::ErrorKind) -> TransportErrorKind {
    match kind {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => TransportErrorKind::Reset,
        _ => TransportErrorKind::Io,
    }
}
