//! Payload frames exchanged with a connection.

use bytes::Bytes;

/// A data frame. The transport preserves the text/binary distinction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Opaque binary frame.
    Binary(Bytes),
}

impl Frame {
    /// Build a text frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Build a binary frame.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// Serialize `value` as JSON into a text frame.
    pub fn json<T: serde::Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_string(value).map(Self::Text)
    }

    /// Payload bytes regardless of frame kind.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => &data[..],
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }
}

/// One event read from a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A data frame.
    Frame(Frame),
    /// Ping control frame from the peer.
    Ping(Bytes),
    /// Pong control frame from the peer.
    Pong(Bytes),
    /// The peer started the closing handshake.
    Close(Option<String>),
}
