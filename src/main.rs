//! docmesh server binary.
//!
//! Bind address comes from `DOCMESH_ADDR` (default `127.0.0.1:8080`);
//! log filtering from `RUST_LOG`.

use docmesh::server::{CollabServer, ServerConfig};

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut config = ServerConfig::default();
    if let Ok(addr) = std::env::var("DOCMESH_ADDR") {
        config.bind_addr = addr;
    }

    let server = CollabServer::new(config);
    if let Err(e) = server.run().await {
        log::error!("server error: {e}");
        std::process::exit(1);
    }
}
