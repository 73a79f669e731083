//! In-memory transport for driving connections without sockets.
//!
//! [`transport`] returns the two halves a connection owns plus a
//! [`MemoryPeer`] playing the remote side. Writes go through a bounded
//! channel, so a peer that stops reading stalls the writer the way a slow
//! socket would.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::transport::{BoxReader, BoxWriter, Frame, TransportReader, TransportWriter};

/// Something the local side wrote to the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Written {
    /// Application payload.
    Message(Bytes),
    /// Liveness probe.
    Probe,
    /// Close frame.
    Close,
}

/// Build an in-memory transport whose writer buffers `write_capacity` items.
pub fn transport(write_capacity: usize) -> (BoxReader, BoxWriter, MemoryPeer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::channel(write_capacity.max(1));
    (
        Box::new(MemoryReader { rx: in_rx }),
        Box::new(MemoryWriter { tx: Some(out_tx) }),
        MemoryPeer {
            inbound: Some(in_tx),
            outbound: out_rx,
        },
    )
}

/// Remote end of an in-memory transport.
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<Frame>>,
    outbound: mpsc::Receiver<Written>,
}

impl MemoryPeer {
    /// Deliver a data frame to the local reader.
    pub fn send(&self, payload: impl Into<Bytes>) -> bool {
        self.push(Frame::Data(payload.into()))
    }

    /// Deliver a probe acknowledgement (pong).
    pub fn ack_probe(&self) -> bool {
        self.push(Frame::Probe)
    }

    /// Deliver a close frame.
    pub fn send_close(&self) -> bool {
        self.push(Frame::Close)
    }

    /// Drop the inbound side; the local reader then fails with
    /// [`TransportError::Closed`].
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Next item written by the local side, or `None` once the writer is
    /// closed and drained.
    pub async fn next_written(&mut self) -> Option<Written> {
        self.outbound.recv().await
    }

    /// Non-blocking variant of [`MemoryPeer::next_written`].
    pub fn try_next_written(&mut self) -> Option<Written> {
        self.outbound.try_recv().ok()
    }

    fn push(&self, frame: Frame) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }
}

struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl TransportReader for MemoryReader {
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }
}

struct MemoryWriter {
    tx: Option<mpsc::Sender<Written>>,
}

impl MemoryWriter {
    async fn push(&mut self, item: Written) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(item).await.map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl TransportWriter for MemoryWriter {
    async fn write_message(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.push(Written::Message(payload)).await
    }

    async fn write_probe(&mut self) -> Result<(), TransportError> {
        self.push(Written::Probe).await
    }

    async fn write_close(&mut self) -> Result<(), TransportError> {
        self.push(Written::Close).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}
