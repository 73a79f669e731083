//! Transport seam between a [`crate::connection::Connection`] and the wire.
//!
//! A transport is split into a reader half and a writer half so the inbound
//! and outbound pumps can own one each. Deadlines are enforced by the pumps,
//! not by the transport.

use async_trait::async_trait;
use axum::extract::ws::{self as axum_ws, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;

use crate::errors::TransportError;

/// One inbound unit handed to the inbound pump.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Application payload.
    Data(Bytes),
    /// Acknowledgement of a liveness probe.
    Probe,
    /// The peer closed the stream.
    Close,
}

/// Inbound half of a transport.
#[async_trait]
pub trait TransportReader: Send {
    /// Wait for the next frame. End of stream is reported as [`Frame::Close`].
    async fn read_frame(&mut self) -> Result<Frame, TransportError>;
}

/// Outbound half of a transport.
#[async_trait]
pub trait TransportWriter: Send {
    /// Write one application payload.
    async fn write_message(&mut self, payload: Bytes) -> Result<(), TransportError>;
    /// Write a liveness probe (ping).
    async fn write_probe(&mut self) -> Result<(), TransportError>;
    /// Write a close frame.
    async fn write_close(&mut self) -> Result<(), TransportError>;
    /// Release the underlying transport.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Boxed reader half.
pub type BoxReader = Box<dyn TransportReader>;
/// Boxed writer half.
pub type BoxWriter = Box<dyn TransportWriter>;

// ─────────────────────────────────────────────────────────────────────────────
// axum (server side)
// ─────────────────────────────────────────────────────────────────────────────

/// Split an upgraded axum socket into transport halves.
pub fn split_axum(socket: WebSocket) -> (BoxReader, BoxWriter) {
    let (sink, stream) = socket.split();
    (
        Box::new(AxumReader { stream }),
        Box::new(AxumWriter { sink }),
    )
}

struct AxumReader {
    stream: SplitStream<WebSocket>,
}

struct AxumWriter {
    sink: SplitSink<WebSocket, axum_ws::Message>,
}

#[async_trait]
impl TransportReader for AxumReader {
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            let Some(msg) = self.stream.next().await else {
                return Ok(Frame::Close);
            };
            let msg = msg.map_err(|e| TransportError::WebSocket(e.to_string()))?;
            match msg {
                axum_ws::Message::Text(_) | axum_ws::Message::Binary(_) => {
                    return Ok(Frame::Data(msg.into_data()));
                }
                axum_ws::Message::Pong(_) => return Ok(Frame::Probe),
                axum_ws::Message::Close(_) => return Ok(Frame::Close),
                // Answered by the protocol layer.
                axum_ws::Message::Ping(_) => {}
            }
        }
    }
}

#[async_trait]
impl TransportWriter for AxumWriter {
    async fn write_message(&mut self, payload: Bytes) -> Result<(), TransportError> {
        let msg = match String::from_utf8(payload.to_vec()) {
            Ok(text) => axum_ws::Message::Text(text.into()),
            Err(_) => axum_ws::Message::Binary(payload),
        };
        self.sink.send(msg).await.map_err(axum_error)
    }

    async fn write_probe(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(axum_ws::Message::Ping(Bytes::new()))
            .await
            .map_err(axum_error)
    }

    async fn write_close(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(axum_ws::Message::Close(None))
            .await
            .map_err(axum_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink.close().await.map_err(axum_error)
    }
}

fn axum_error(err: axum::Error) -> TransportError {
    TransportError::WebSocket(err.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// tokio-tungstenite (client side)
// ─────────────────────────────────────────────────────────────────────────────

/// Split a tokio-tungstenite stream into transport halves.
pub fn split_tungstenite<S>(ws: WebSocketStream<S>) -> (BoxReader, BoxWriter)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    (
        Box::new(TungsteniteReader { stream }),
        Box::new(TungsteniteWriter { sink }),
    )
}

struct TungsteniteReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

struct TungsteniteWriter<S> {
    sink: SplitSink<WebSocketStream<S>, TungsteniteMessage>,
}

#[async_trait]
impl<S> TransportReader for TungsteniteReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            let Some(msg) = self.stream.next().await else {
                return Ok(Frame::Close);
            };
            let msg = msg.map_err(|e| TransportError::WebSocket(e.to_string()))?;
            match msg {
                TungsteniteMessage::Text(_) | TungsteniteMessage::Binary(_) => {
                    return Ok(Frame::Data(msg.into_data()));
                }
                TungsteniteMessage::Pong(_) => return Ok(Frame::Probe),
                TungsteniteMessage::Close(_) => return Ok(Frame::Close),
                TungsteniteMessage::Ping(_) | TungsteniteMessage::Frame(_) => {}
            }
        }
    }
}

#[async_trait]
impl<S> TransportWriter for TungsteniteWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_message(&mut self, payload: Bytes) -> Result<(), TransportError> {
        let msg = match String::from_utf8(payload.to_vec()) {
            Ok(text) => TungsteniteMessage::text(text),
            Err(_) => TungsteniteMessage::Binary(payload),
        };
        self.sink.send(msg).await.map_err(tungstenite_error)
    }

    async fn write_probe(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(TungsteniteMessage::Ping(Bytes::new()))
            .await
            .map_err(tungstenite_error)
    }

    async fn write_close(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(TungsteniteMessage::Close(None))
            .await
            .map_err(tungstenite_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink.close().await.map_err(tungstenite_error)
    }
}

fn tungstenite_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error;
    match err {
        Error::ConnectionClosed | Error::AlreadyClosed => TransportError::Closed,
        other => TransportError::WebSocket(other.to_string()),
    }
}
