//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum [`WebSocket`] to the [`FrameReader`] and
//! [`FrameWriter`] traits.

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use tracing::trace;

use crate::traits::{FrameReader, FrameWriter, Inbound, TransportError};

/// Split an upgraded socket into its reader and writer.
#[must_use]
pub fn split(socket: WebSocket) -> (WebSocketReader, WebSocketWriter) {
    let (sink, stream) = socket.split();
    (WebSocketReader { stream }, WebSocketWriter { sink })
}

/// The read half of a WebSocket.
pub struct WebSocketReader {
    stream: SplitStream<WebSocket>,
}

/// The write half of a WebSocket.
pub struct WebSocketWriter {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameReader for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        let Some(result) = self.stream.next().await else {
            return Ok(None);
        };

        let inbound = match result.map_err(|e| TransportError::ReceiveFailed(e.to_string()))? {
            Message::Text(text) => Inbound::Data(Bytes::from(text)),
            Message::Binary(data) => Inbound::Data(Bytes::from(data)),
            Message::Ping(_) => Inbound::Ping,
            Message::Pong(_) => Inbound::Pong,
            Message::Close(frame) => {
                trace!(?frame, "Received close frame");
                Inbound::Close
            }
        };
        Ok(Some(inbound))
    }
}

#[async_trait]
impl FrameWriter for WebSocketWriter {
    async fn send_text(&mut self, data: Bytes) -> Result<(), TransportError> {
        let text = String::from_utf8(data.to_vec())
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: close_code::NORMAL,
            reason: Cow::Borrowed(""),
        };
        self.sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        // Flushing after a close can legitimately fail if the peer went first.
        let _ = self.sink.close().await;
        Ok(())
    }
}
