//! WebSocket transport: the single live connection to the broker.
//!
//! Owns serialization of outbound envelopes and decoding of inbound
//! frames. `send` is fire-and-forget by contract: callers are background
//! pollers that wait on mailboxes with their own deadlines, so a send
//! into a dead connection logs and returns instead of erroring.

use futures_util::SinkExt;
use futures_util::stream::{SplitSink, SplitStream};
use tokio::net::TcpStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use tungstenite::Message;

use crate::Result;
use crate::protocol::{InboundEnvelope, InboundMessage, OutboundEnvelope};

use super::router::Router;
use super::session::{ConnectionStatus, Session};

/// Write half of the broker connection.
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Read half of the broker connection.
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Establishes a WebSocket connection to the given URL.
///
/// # Errors
///
/// Returns an [`ExnovaError`](crate::ExnovaError) if the connection or
/// TLS handshake fails.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    let (ws_stream, _) = connect_async(url).await?;
    info!("WebSocket handshake completed");

    use futures_util::StreamExt;
    Ok(ws_stream.split())
}

/// Holder for the current write half. The connection manager installs a
/// fresh writer after each (re)connect and clears it on loss, so facade
/// sends against a dead connection are dropped cleanly.
#[derive(Debug, Default)]
pub struct Transport {
    writer: tokio::sync::Mutex<Option<WsWriter>>,
}

impl Transport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the writer for a freshly established connection.
    pub async fn install(&self, writer: WsWriter) {
        *self.writer.lock().await = Some(writer);
    }

    /// Drops the writer so later sends are no-ops until reconnect.
    pub async fn clear(&self) {
        *self.writer.lock().await = None;
    }

    #[must_use]
    pub async fn is_connected(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Serializes and sends one envelope. Never returns an error: when
    /// disconnected or the sink fails, the frame is dropped with a log
    /// line and the writer is cleared for the reconnect manager. The
    /// returned flag reports whether the frame actually went out, for
    /// internal callers that track delivery (subscription replay).
    pub async fn send(&self, name: &str, msg: serde_json::Value, request_id: Option<String>) -> bool {
        let envelope = OutboundEnvelope {
            name,
            msg,
            request_id,
        };
        let frame = match serde_json::to_string(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(name, error = %e, "failed to serialize outbound envelope");
                return false;
            }
        };

        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => {
                if let Err(e) = writer.send(Message::Text(frame.into())).await {
                    warn!(name, error = %e, "send failed, dropping writer");
                    *guard = None;
                    return false;
                }
                true
            }
            None => {
                debug!(name, "not connected, request dropped");
                false
            }
        }
    }
}

/// Handles one inbound text frame: parse the envelope, decode the typed
/// payload, flip the session to `Authenticated` on the first server push
/// after the `ssid` handshake, then dispatch. Bounded work only; this
/// runs on the read-loop task and must never block it.
pub fn handle_text_frame(text: &str, router: &Router, session: &Session) {
    let envelope: InboundEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "malformed inbound frame, skipping");
            return;
        }
    };

    if let Some(status) = envelope.status
        && status >= 4000
    {
        warn!(name = %envelope.name, status, "broker reported error status");
    }

    match InboundMessage::decode(envelope) {
        Ok(message) => {
            if matches!(message, InboundMessage::TimeSync(_))
                && session.status() == ConnectionStatus::Connected
            {
                session.set_status(ConnectionStatus::Authenticated);
            }
            router.dispatch(message);
        }
        Err(e) => {
            warn!(error = %e, "undecodable inbound payload, skipping");
        }
    }
}
