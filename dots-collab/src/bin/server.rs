//! Standalone collaboration server.
//!
//! Environment:
//! - `BIND_ADDR` — full listen address; otherwise `0.0.0.0:$PORT`
//! - `PORT`      — listen port when `BIND_ADDR` is unset (default 8080)
//! - `DATA_DIR`  — RocksDB history path; unset runs in-memory only

use std::path::PathBuf;

use dots_collab::{CollabServer, ServerConfig};

#[tokio::main]
async fn main() {
    env_logger::init();

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| {
        let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
        format!("0.0.0.0:{port}")
    });
    let storage_path = std::env::var("DATA_DIR").ok().map(PathBuf::from);

    match &storage_path {
        Some(path) => log::info!("history persisted under {}", path.display()),
        None => log::warn!("DATA_DIR unset, room history is in-memory only"),
    }

    let server = match CollabServer::new(ServerConfig {
        bind_addr,
        storage_path,
    }) {
        Ok(server) => server,
        Err(e) => {
            log::error!("failed to open history store: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        log::error!("server exited: {e}");
        std::process::exit(1);
    }
}
