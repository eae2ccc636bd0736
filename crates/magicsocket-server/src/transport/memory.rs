//! In-process transport pair.
//!
//! [`pair`] returns a [`Transport`] for the registry plus the [`Peer`] that
//! plays the remote client: it reads what the server sends, injects inbound
//! frames or errors, and can hang up. A small outbound capacity simulates a
//! client that stopped reading.

use async_trait::async_trait;
use magicsocket_core::{Frame, Inbound, TransportError, TransportErrorKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{FrameSink, FrameSource, Transport};

/// Outbound buffer used by [`pair`].
pub const DEFAULT_CAPACITY: usize = 64;

/// Create a connected transport/peer pair with [`DEFAULT_CAPACITY`].
pub fn pair() -> (Transport, Peer) {
    pair_with_capacity(DEFAULT_CAPACITY)
}

/// Create a connected transport/peer pair whose outbound buffer holds at
/// most `capacity` unread frames. Further sends wait for the peer.
pub fn pair_with_capacity(capacity: usize) -> (Transport, Peer) {
    let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let closed = CancellationToken::new();

    let transport = Transport::new(
        MemorySink {
            tx: out_tx,
            closed: closed.clone(),
        },
        MemorySource {
            rx: in_rx,
            closed: closed.clone(),
        },
    );
    let peer = Peer {
        outbound: out_rx,
        inbound: Some(in_tx),
        closed,
    };
    (transport, peer)
}

struct MemorySink {
    tx: mpsc::Sender<Frame>,
    closed: CancellationToken,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(TransportError::closed("transport closed locally")),
            sent = self.tx.send(frame) => sent.map_err(|_| {
                TransportError::new(TransportErrorKind::Reset, "peer stopped reading")
            }),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.cancel();
        Ok(())
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<Result<Inbound, TransportError>>,
    closed: CancellationToken,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Option<Result<Inbound, TransportError>> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => None,
            next = self.rx.recv() => next,
        }
    }
}

/// The remote end of an in-process transport.
pub struct Peer {
    outbound: mpsc::Receiver<Frame>,
    inbound: Option<mpsc::UnboundedSender<Result<Inbound, TransportError>>>,
    closed: CancellationToken,
}

impl Peer {
    /// Next frame the server sent, or `None` once the server side is gone
    /// and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.outbound.recv().await
    }

    /// Next buffered frame without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.outbound.try_recv().ok()
    }

    /// Deliver a data frame to the server.
    pub fn send(&self, frame: Frame) {
        self.push(Ok(Inbound::Frame(frame)));
    }

    /// Deliver any inbound event, control frames included.
    pub fn send_inbound(&self, inbound: Inbound) {
        self.push(Ok(inbound));
    }

    /// Make the server's next read fail with `err`.
    pub fn fail(&self, err: TransportError) {
        self.push(Err(err));
    }

    fn push(&self, event: Result<Inbound, TransportError>) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(event);
        }
    }

    /// Drop the connection from the remote side: the server's reads end and
    /// its writes fail.
    pub fn hang_up(&mut self) {
        self.inbound = None;
        self.outbound.close();
    }

    /// Whether the server closed its side.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until the server closes its side.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}
