//! Server configuration and the bind/serve entry point.

use std::sync::Arc;

use axum::Router;

use crate::api::{router, AppState};
use crate::registry::HubRegistry;
use crate::session::SessionConfig;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: String,
    /// Capacity of each hub's inbound channel. When full, the offending
    /// session's read loop blocks (per-author backpressure).
    pub hub_inbound_capacity: usize,
    /// Per-session queueing and keepalive knobs.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            hub_inbound_capacity: 64,
            session: SessionConfig::default(),
        }
    }
}

/// The collaboration server: a hub registry behind the HTTP surface.
pub struct CollabServer {
    config: ServerConfig,
    registry: Arc<HubRegistry>,
}

impl CollabServer {
    /// Create a new server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(HubRegistry::new(config.hub_inbound_capacity));
        Self { config, registry }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn registry(&self) -> &Arc<HubRegistry> {
        &self.registry
    }

    /// The application router, for embedding or driving in tests.
    pub fn router(&self) -> Router {
        router(AppState {
            registry: self.registry.clone(),
            session: self.config.session.clone(),
        })
    }

    /// Bind and serve until the process exits.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}
