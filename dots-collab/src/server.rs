//! WebSocket accept loop and connection wiring.
//!
//! The server owns the registry and the history store, accepts TCP
//! connections, upgrades them to WebSockets, and runs one session per
//! connection. Identity is established during the handshake and is this
//! process's trust boundary: the room id comes from the request path
//! (`/{room_id}/websocket`) and the participant id from the `x-client-id`
//! header, which the fronting auth layer injects after authenticating the
//! user. Requests without both are rejected before the upgrade completes.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use crate::protocol::{ParticipantId, RoomId};
use crate::registry::RoomRegistry;
use crate::session::run_session;
use crate::storage::{HistoryStore, MemoryStore, RoomStore, StoreConfig, StoreError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// History storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            storage_path: None,
        }
    }
}

/// The collaboration server.
pub struct CollabServer {
    config: ServerConfig,
    registry: RoomRegistry,
}

impl CollabServer {
    /// Create a server, opening durable storage when a path is configured.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let store: Arc<dyn HistoryStore> = match &config.storage_path {
            Some(path) => {
                let store_config = StoreConfig {
                    path: path.clone(),
                    ..StoreConfig::default()
                };
                Arc::new(RoomStore::open(store_config)?)
            }
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Self {
            registry: RoomRegistry::new(store),
            config,
        })
    }

    /// Create with default configuration (in-memory history).
    pub fn with_defaults() -> Result<Self, StoreError> {
        Self::new(ServerConfig::default())
    }

    /// The registry backing this server. Handed to the external HTTP layer
    /// for flows that talk to rooms outside a session (see [`crate::roster`]).
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Accept and serve connections. Runs until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("collab server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new TCP connection from {addr}");

            let registry = self.registry.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, registry).await {
                    log::error!("connection error from {addr}: {e}");
                }
            });
        }
    }
}

/// Upgrade one connection and run its session to completion.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: RoomRegistry,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut identity: Option<(RoomId, ParticipantId)> = None;
    let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        match identify(req) {
            Ok(id) => {
                identity = Some(id);
                Ok(resp)
            }
            Err(reason) => {
                log::warn!("rejecting handshake from {addr}: {reason}");
                let mut resp = ErrorResponse::new(Some(reason.to_string()));
                *resp.status_mut() = StatusCode::BAD_REQUEST;
                Err(resp)
            }
        }
    })
    .await?;

    let Some((room_id, participant)) = identity else {
        // the callback ran before a successful upgrade
        return Ok(());
    };

    log::info!("participant {participant} connected to room {room_id} from {addr}");
    run_session(ws, &registry, room_id, participant).await?;
    log::info!("participant {participant} disconnected from room {room_id}");
    Ok(())
}

/// Extract the externally-authenticated identity from the handshake request.
fn identify(req: &Request) -> Result<(RoomId, ParticipantId), &'static str> {
    let mut segments = req.uri().path().split('/').filter(|s| !s.is_empty());

    let room = segments
        .next()
        .and_then(|s| s.parse::<RoomId>().ok())
        .ok_or("missing or invalid room id in path")?;
    if segments.next() != Some("websocket") || segments.next().is_some() {
        return Err("unknown endpoint");
    }

    let participant = req
        .headers()
        .get("x-client-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<ParticipantId>().ok())
        .ok_or("missing or invalid x-client-id header")?;

    Ok((room, participant))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, client_id: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(uri);
        if let Some(id) = client_id {
            builder = builder.header("x-client-id", id);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert!(config.storage_path.is_none());
    }

    #[test]
    fn test_identify_valid_request() {
        let req = request("/42/websocket", Some("7"));
        assert_eq!(identify(&req).unwrap(), (42, 7));
    }

    #[test]
    fn test_identify_rejects_bad_paths() {
        assert!(identify(&request("/websocket", Some("7"))).is_err());
        assert!(identify(&request("/abc/websocket", Some("7"))).is_err());
        assert!(identify(&request("/42/other", Some("7"))).is_err());
        assert!(identify(&request("/42/websocket/extra", Some("7"))).is_err());
    }

    #[test]
    fn test_identify_rejects_missing_identity() {
        assert!(identify(&request("/42/websocket", None)).is_err());
        assert!(identify(&request("/42/websocket", Some("not-a-number"))).is_err());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = CollabServer::with_defaults().unwrap();
        assert_eq!(server.bind_addr(), "127.0.0.1:8080");
        assert_eq!(server.registry().room_count().await, 0);
    }

    #[tokio::test]
    async fn test_server_with_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            storage_path: Some(dir.path().join("db")),
        };
        assert!(CollabServer::new(config).is_ok());
    }
}
