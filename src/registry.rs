//! Process-wide document-id → hub map.
//!
//! `get_or_create` is the lazy path used by WebSocket connects; `create`
//! is the eager path behind `POST /create`. Both follow the read-lock
//! fast path / write-lock double-check discipline so concurrent callers
//! never spawn two hubs for one document.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::document::Document;
use crate::hub::{Hub, HubHandle};

pub struct HubRegistry {
    hubs: RwLock<HashMap<String, HubHandle>>,
    /// Inbound channel capacity handed to every spawned hub.
    inbound_capacity: usize,
}

impl HubRegistry {
    pub fn new(inbound_capacity: usize) -> Self {
        Self {
            hubs: RwLock::new(HashMap::new()),
            inbound_capacity,
        }
    }

    /// Look up an existing hub.
    pub async fn get(&self, id: &str) -> Option<HubHandle> {
        self.hubs.read().await.get(id).cloned()
    }

    /// Get the hub for `id`, creating document and hub if absent.
    ///
    /// `name` and `content` are only used when the document is created.
    pub async fn get_or_create(&self, id: &str, name: &str, content: &str) -> HubHandle {
        // Fast path: read lock.
        {
            let hubs = self.hubs.read().await;
            if let Some(hub) = hubs.get(id) {
                return hub.clone();
            }
        }

        // Slow path: write lock, re-check before creating.
        let mut hubs = self.hubs.write().await;
        if let Some(hub) = hubs.get(id) {
            return hub.clone();
        }

        let doc = Arc::new(Document::new(id, name, content));
        let hub = Hub::spawn(doc, self.inbound_capacity);
        hubs.insert(id.to_string(), hub.clone());
        log::info!("registry: created hub for document {id}");
        hub
    }

    /// Create a fresh document under a new opaque id and spawn its hub.
    pub async fn create(&self, name: &str, content: &str) -> HubHandle {
        let id = Uuid::new_v4().to_string();
        self.get_or_create(&id, name, content).await
    }

    /// Administrative removal: stops the hub loop, which disconnects its
    /// clients. Returns whether the document existed.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.hubs.write().await.remove(id);
        match removed {
            Some(hub) => {
                hub.shutdown().await;
                log::info!("registry: removed hub for document {id}");
                true
            }
            None => false,
        }
    }

    /// Number of live hubs.
    pub async fn len(&self) -> usize {
        self.hubs.read().await.len()
    }

    /// Ids of every live document.
    pub async fn document_ids(&self) -> Vec<String> {
        self.hubs.read().await.keys().cloned().collect()
    }
}
