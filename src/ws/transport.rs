//! Transport primitive for the room stream.
//!
//! The connection manager is written against the [`Transport`] trait so tests
//! can drive it with an in-process fake; [`WsTransport`] is the production
//! implementation on tokio-tungstenite.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

/// Low-level events produced by one transport attempt, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The stream is open and ready to carry frames.
    Opened,
    /// A text frame arrived.
    Frame(String),
    /// Transport-level failure. A `Closed` event follows separately.
    Error(String),
    /// The stream ended. `clean` is true when the peer completed a close
    /// handshake, false for aborts and read failures.
    Closed { clean: bool },
}

/// Handles to one transport attempt.
///
/// Dropping the link releases the stream: the pump task notices both ends are
/// gone and closes the socket.
#[derive(Debug)]
pub struct TransportLink {
    /// Outbound text frames.
    pub outbound: mpsc::UnboundedSender<String>,
    /// Inbound events.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// A way to open one bidirectional text stream to a URL.
pub trait Transport: Send + Sync + 'static {
    /// Start opening a stream. Returns immediately; the outcome arrives as an
    /// `Opened` or `Error`/`Closed` event on the link.
    fn open(&self, url: String) -> TransportLink;
}

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Debug, Default, Clone)]
pub struct WsTransport;

impl Transport for WsTransport {
    fn open(&self, url: String) -> TransportLink {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_stream(url, outbound_rx, event_tx));
        TransportLink {
            outbound: outbound_tx,
            events: event_rx,
        }
    }
}

async fn run_stream(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let (stream, _response) = match connect_async(&url).await {
        Ok(ok) => ok,
        Err(e) => {
            tracing::warn!("websocket connect to {url} failed: {e}");
            let _ = events.send(TransportEvent::Error(e.to_string()));
            let _ = events.send(TransportEvent::Closed { clean: false });
            return;
        }
    };

    tracing::debug!("websocket connected to {url}");
    let _ = events.send(TransportEvent::Opened);
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = events.send(TransportEvent::Frame(text.to_string()));
                }
                Some(Ok(WsMessage::Close(_))) => {
                    let _ = events.send(TransportEvent::Closed { clean: true });
                    break;
                }
                // Ping/pong are answered by tungstenite itself; binary frames
                // are not part of the websoc protocol.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    let _ = events.send(TransportEvent::Closed { clean: false });
                    break;
                }
                None => {
                    let _ = events.send(TransportEvent::Closed { clean: false });
                    break;
                }
            },
            payload = outbound.recv() => match payload {
                Some(text) => {
                    if let Err(e) = write.send(WsMessage::Text(text.into())).await {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        let _ = events.send(TransportEvent::Closed { clean: false });
                        break;
                    }
                }
                // Link dropped by the manager; close our side of the socket.
                None => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    break;
                }
            },
        }
    }
}
