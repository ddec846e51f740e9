//! Per-document hub: the actor that serializes all writes.
//!
//! One hub task runs per document. It owns the client set outright and is
//! the only code that touches it; sessions and the registry talk to it
//! exclusively through channels:
//!
//! ```text
//! session read loops ──inbound──┐
//! sessions ──register/unregister┤──► hub loop ──► Document::apply_delta
//! registry ──shutdown───────────┘        │
//!                                        └──► per-client bounded queues
//! ```
//!
//! Because one loop performs apply and fan-out in the same turn, every
//! participant observes the same total order of commits, and no later
//! commit can interleave between a commit and its broadcast.
//!
//! A client whose outbound queue is full when the hub fans out is evicted
//! on the spot rather than allowed to stall the loop.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::document::Document;
use crate::protocol::{Delta, DocumentInfo, Envelope, MessageKind};

/// Capacity of the register/unregister channels. Membership changes are
/// rare; these never need depth.
const CONTROL_CAPACITY: usize = 16;

/// The hub side of one client's connection: the sending half of the
/// session's bounded outbound queue.
pub struct ClientHandle {
    pub id: String,
    sender: mpsc::Sender<String>,
}

impl ClientHandle {
    pub fn new(id: impl Into<String>, sender: mpsc::Sender<String>) -> Self {
        Self {
            id: id.into(),
            sender,
        }
    }
}

/// Cloneable handle for talking to a hub loop.
///
/// The async send methods return `false` once the hub has stopped.
#[derive(Clone)]
pub struct HubHandle {
    doc: Arc<Document>,
    register: mpsc::Sender<ClientHandle>,
    unregister: mpsc::Sender<String>,
    inbound: mpsc::Sender<String>,
    shutdown: mpsc::Sender<()>,
}

impl HubHandle {
    pub fn document(&self) -> &Arc<Document> {
        &self.doc
    }

    pub fn snapshot(&self) -> DocumentInfo {
        self.doc.snapshot()
    }

    /// Register a client. The hub answers with an `init` envelope on the
    /// client's queue.
    pub async fn register(&self, client: ClientHandle) -> bool {
        self.register.send(client).await.is_ok()
    }

    /// Remove a client. Idempotent; safe after eviction.
    pub async fn unregister(&self, id: impl Into<String>) -> bool {
        self.unregister.send(id.into()).await.is_ok()
    }

    /// Forward one raw text frame from a session's read loop.
    ///
    /// Blocks when the hub's inbound channel is full, which throttles the
    /// sending client without affecting others.
    pub async fn inbound(&self, frame: String) -> bool {
        self.inbound.send(frame).await.is_ok()
    }

    /// Stop the hub loop and disconnect all clients. Administrative.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(()).await;
    }
}

/// The per-document actor. Constructed and spawned via [`Hub::spawn`].
pub struct Hub {
    doc: Arc<Document>,
    clients: HashMap<String, mpsc::Sender<String>>,
    register_rx: mpsc::Receiver<ClientHandle>,
    unregister_rx: mpsc::Receiver<String>,
    inbound_rx: mpsc::Receiver<String>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Hub {
    /// Spawn the hub loop for `doc` and return its handle.
    ///
    /// `inbound_capacity` bounds the shared inbound channel; a full channel
    /// blocks the offending session's read loop (backpressure).
    pub fn spawn(doc: Arc<Document>, inbound_capacity: usize) -> HubHandle {
        let (register_tx, register_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let hub = Hub {
            doc: doc.clone(),
            clients: HashMap::new(),
            register_rx,
            unregister_rx,
            inbound_rx,
            shutdown_rx,
        };
        tokio::spawn(hub.run());

        HubHandle {
            doc,
            register: register_tx,
            unregister: unregister_tx,
            inbound: inbound_tx,
            shutdown: shutdown_tx,
        }
    }

    async fn run(mut self) {
        log::debug!("hub {}: loop started", self.doc.id());
        loop {
            tokio::select! {
                Some(client) = self.register_rx.recv() => self.handle_register(client),
                Some(id) = self.unregister_rx.recv() => self.handle_unregister(&id),
                Some(frame) = self.inbound_rx.recv() => self.handle_frame(&frame),
                _ = self.shutdown_rx.recv() => break,
                else => break,
            }
        }
        // Dropping the senders closes every client queue, which unwinds the
        // write loops and with them the sessions.
        self.clients.clear();
        log::debug!("hub {}: loop stopped", self.doc.id());
    }

    fn handle_register(&mut self, client: ClientHandle) {
        let ClientHandle { id, sender } = client;
        if self.clients.insert(id.clone(), sender).is_some() {
            // Duplicate id: the replaced sender is dropped here, closing the
            // prior session's queue.
            log::info!("hub {}: client {id} replaced an existing session", self.doc.id());
        } else {
            log::info!("hub {}: client {id} registered", self.doc.id());
        }

        match Envelope::init(self.doc.snapshot()).encode() {
            Ok(frame) => self.send_to(&id, frame),
            Err(e) => log::error!("hub {}: failed to encode init: {e}", self.doc.id()),
        }
    }

    fn handle_unregister(&mut self, id: &str) {
        if self.clients.remove(id).is_some() {
            log::info!("hub {}: client {id} unregistered", self.doc.id());
        }
    }

    fn handle_frame(&mut self, frame: &str) {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("hub {}: malformed envelope discarded: {e}", self.doc.id());
                return;
            }
        };

        match envelope.kind {
            MessageKind::Operation => match envelope.delta {
                Some(delta) => self.handle_operation(delta),
                None => log::warn!(
                    "hub {}: operation envelope without delta discarded",
                    self.doc.id()
                ),
            },
            MessageKind::Cursor => match &envelope.cursor {
                // Presence is relayed verbatim and never applied.
                Some(cursor) => {
                    let author = cursor.client_id.clone();
                    self.broadcast_except(&author, frame);
                }
                None => log::warn!(
                    "hub {}: cursor envelope without cursor discarded",
                    self.doc.id()
                ),
            },
            other => {
                log::debug!("hub {}: discarding {other:?} frame", self.doc.id());
            }
        }
    }

    fn handle_operation(&mut self, delta: Delta) {
        let author = delta.client_id.clone();
        match self.doc.apply_delta(&delta) {
            Ok(rebased) => {
                log::debug!(
                    "hub {}: committed delta from {author} at version {}",
                    self.doc.id(),
                    rebased.base_version
                );
                match Envelope::operation(rebased).encode() {
                    Ok(frame) => self.broadcast_except(&author, &frame),
                    Err(e) => {
                        log::error!("hub {}: failed to encode delta: {e}", self.doc.id())
                    }
                }
            }
            Err(e) => {
                log::warn!("hub {}: rejected delta from {author}: {e}", self.doc.id());
                match Envelope::error(e.reason(), self.doc.version()).encode() {
                    Ok(frame) => self.send_to(&author, frame),
                    Err(e) => {
                        log::error!("hub {}: failed to encode error: {e}", self.doc.id())
                    }
                }
            }
        }
    }

    /// Enqueue a frame for one client, evicting it if its queue is full or
    /// its session is gone.
    fn send_to(&mut self, id: &str, frame: String) {
        let Some(sender) = self.clients.get(id) else {
            return;
        };
        if let Err(e) = sender.try_send(frame) {
            match e {
                TrySendError::Full(_) => log::warn!(
                    "hub {}: client {id} queue full, evicting slow consumer",
                    self.doc.id()
                ),
                TrySendError::Closed(_) => {
                    log::debug!("hub {}: client {id} queue closed, removing", self.doc.id())
                }
            }
            self.clients.remove(id);
        }
    }

    /// Fan a frame out to every client except the author.
    fn broadcast_except(&mut self, author: &str, frame: &str) {
        let mut evicted = Vec::new();
        for (id, sender) in &self.clients {
            if id == author {
                continue;
            }
            if let Err(e) = sender.try_send(frame.to_string()) {
                match e {
                    TrySendError::Full(_) => log::warn!(
                        "hub {}: client {id} queue full, evicting slow consumer",
                        self.doc.id()
                    ),
                    TrySendError::Closed(_) => {
                        log::debug!("hub {}: client {id} queue closed, removing", self.doc.id())
                    }
                }
                evicted.push(id.clone());
            }
        }
        for id in evicted {
            self.clients.remove(&id);
        }
    }
}
