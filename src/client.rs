//! WebSocket client for connecting to the collaboration server.
//!
//! Used by host applications and by the integration tests. Spawns a
//! writer task fed from an mpsc channel and a reader task that translates
//! incoming envelopes into [`ClientEvent`]s. Edits made while disconnected
//! are an error rather than queued; reconciliation beyond what the
//! server's transform provides is out of scope.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{Cursor, Delta, DocumentInfo, Envelope, MessageKind, Operation, ProtocolError};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection established.
    Connected,
    /// Connection lost.
    Disconnected,
    /// Document snapshot received on join.
    Init(DocumentInfo),
    /// A rebased delta committed by another participant.
    RemoteDelta(Delta),
    /// Another participant's cursor moved.
    RemoteCursor(Cursor),
    /// The server rejected one of our deltas.
    Rejected { reason: String, base_version: u64 },
}

/// The collaboration client.
pub struct CollabClient {
    client_id: String,
    doc_id: String,
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_tx: Option<mpsc::Sender<String>>,
    event_tx: mpsc::Sender<ClientEvent>,
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
}

impl CollabClient {
    /// Create a new client for `doc_id` at `server_url`
    /// (e.g. `ws://127.0.0.1:8080`).
    pub fn new(
        client_id: impl Into<String>,
        doc_id: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            client_id: client_id.into(),
            doc_id: doc_id.into(),
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be taken once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Connect and spawn the reader/writer tasks.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let url = format!(
            "{}/ws?docId={}&clientId={}",
            self.server_url, self.doc_id, self.client_id
        );
        let (ws_stream, _) = match tokio_tungstenite::connect_async(&url).await {
            Ok(ok) => ok,
            Err(e) => {
                log::warn!("client {}: connect failed: {e}", self.client_id);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };

        let (mut writer, mut reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);

        // Writer task: drain the outgoing channel to the socket.
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if writer.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            let _ = writer.close().await;
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(ClientEvent::Connected).await;

        // Reader task: translate envelopes into events.
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let client_id = self.client_id.clone();
        tokio::spawn(async move {
            while let Some(message) = reader.next().await {
                match message {
                    Ok(Message::Text(text)) => match Envelope::decode(text.as_str()) {
                        Ok(envelope) => {
                            if let Some(event) = translate(envelope) {
                                let _ = event_tx.send(event).await;
                            }
                        }
                        Err(e) => {
                            log::warn!("client {client_id}: bad frame: {e}");
                        }
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    // Pings are answered by the transport layer.
                    _ => {}
                }
            }
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(ClientEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Send an edit transaction against `base_version`.
    pub async fn send_delta(
        &self,
        base_version: u64,
        ops: Vec<Operation>,
    ) -> Result<(), ProtocolError> {
        let delta = Delta {
            client_id: self.client_id.clone(),
            base_version: base_version as i64,
            ops,
            timestamp: now_millis(),
        };
        self.send_envelope(Envelope::operation(delta)).await
    }

    /// Send a cursor/presence update.
    pub async fn send_cursor(&self, position: u64, name: &str) -> Result<(), ProtocolError> {
        let cursor = Cursor {
            client_id: self.client_id.clone(),
            position,
            name: name.to_string(),
        };
        self.send_envelope(Envelope::cursor(cursor)).await
    }

    async fn send_envelope(&self, envelope: Envelope) -> Result<(), ProtocolError> {
        let frame = envelope.encode()?;
        match &self.outgoing_tx {
            Some(tx) => tx
                .send(frame)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

fn translate(envelope: Envelope) -> Option<ClientEvent> {
    match envelope.kind {
        MessageKind::Init => envelope.document.map(ClientEvent::Init),
        MessageKind::Operation => envelope.delta.map(ClientEvent::RemoteDelta),
        MessageKind::Cursor => envelope.cursor.map(ClientEvent::RemoteCursor),
        MessageKind::Error => Some(ClientEvent::Rejected {
            reason: envelope.reason.unwrap_or_default(),
            base_version: envelope.base_version.unwrap_or(0),
        }),
        MessageKind::Unknown => None,
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
