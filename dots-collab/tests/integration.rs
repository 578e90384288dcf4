//! End-to-end tests over real WebSocket connections.
//!
//! Each test starts a real server on a free port and drives it with real
//! clients, verifying the full pipeline: handshake identity, room
//! lifecycle, history replay to late joiners, and fan-out semantics.

use dots_collab::{register_participant, Envelope, Point, RoomRegistry};
use dots_collab::{CollabServer, ServerConfig};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server on a free port; return the port and its registry handle.
async fn start_test_server() -> (u16, RoomRegistry) {
    let port = free_port().await;
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        storage_path: None,
    };
    let server = CollabServer::new(config).unwrap();
    let registry = server.registry().clone();
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    // Give server time to bind
    sleep(Duration::from_millis(50)).await;
    (port, registry)
}

/// Connect as `participant` to `room`, the way the fronting auth layer
/// would: identity goes into the handshake request.
async fn connect(port: u16, room: u64, participant: u64) -> Socket {
    let mut request = format!("ws://127.0.0.1:{port}/{room}/websocket")
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        "x-client-id",
        HeaderValue::from_str(&participant.to_string()).unwrap(),
    );
    let (ws, _) = connect_async(request).await.unwrap();
    ws
}

async fn send(ws: &mut Socket, frame: &str) {
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

/// Receive the next envelope, failing after two seconds.
async fn recv_envelope(ws: &mut Socket) -> Envelope {
    loop {
        let frame = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for an envelope")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return Envelope::decode(text.as_str()).unwrap();
        }
    }
}

/// Assert that no envelope arrives within `wait`.
async fn assert_silent(ws: &mut Socket, wait: Duration) {
    let got = timeout(wait, ws.next()).await;
    assert!(got.is_err(), "expected silence, received {got:?}");
}

#[tokio::test]
async fn test_rejects_connection_without_identity() {
    let (port, _registry) = start_test_server().await;

    // no x-client-id header: the handshake itself must fail
    let result = connect_async(format!("ws://127.0.0.1:{port}/1/websocket")).await;
    assert!(result.is_err(), "handshake should be rejected");
}

#[tokio::test]
async fn test_first_joiner_receives_no_history() {
    let (port, _registry) = start_test_server().await;

    let mut alice = connect(port, 1, 7).await;
    assert_silent(&mut alice, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_late_joiner_receives_snapshot() {
    let (port, _registry) = start_test_server().await;

    let mut alice = connect(port, 2, 7).await;
    send(&mut alice, r#"{"cid":7,"fl":0,"p":{"7":[{"x":1,"y":2}]}}"#).await;
    sleep(Duration::from_millis(100)).await;

    // Bob joins after Alice's edit: exactly one snapshot, for Bob only
    let mut bob = connect(port, 2, 9).await;
    let snapshot = recv_envelope(&mut bob).await;
    assert_eq!(snapshot.points[&7], vec![Point::new(1, 2)]);
    assert_eq!(snapshot.sender, 0);

    assert_silent(&mut bob, Duration::from_millis(300)).await;
    assert_silent(&mut alice, Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_broadcast_reaches_peers_but_not_sender() {
    let (port, _registry) = start_test_server().await;

    let mut alice = connect(port, 3, 7).await;
    let mut bob = connect(port, 3, 9).await;
    sleep(Duration::from_millis(100)).await;

    // the claimed sender id is a lie; the session must stamp its own
    send(
        &mut alice,
        r#"{"cid":999,"fl":0,"a":{"7":[[{"x":0,"y":0},{"x":0,"y":1},{"x":1,"y":1}]]}}"#,
    )
    .await;

    let env = recv_envelope(&mut bob).await;
    assert_eq!(env.sender, 7);
    assert_eq!(
        env.areas[&7],
        vec![vec![Point::new(0, 0), Point::new(0, 1), Point::new(1, 1)]]
    );

    assert_silent(&mut bob, Duration::from_millis(300)).await;
    assert_silent(&mut alice, Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_malformed_frame_is_dropped_not_fatal() {
    let (port, _registry) = start_test_server().await;

    let mut alice = connect(port, 4, 7).await;
    let mut bob = connect(port, 4, 9).await;
    sleep(Duration::from_millis(100)).await;

    send(&mut alice, "this is not json").await;
    send(&mut alice, r#"{"cid":7,"fl":0,"p":{"7":[{"x":5,"y":5}]}}"#).await;

    // the garbage frame vanished; the session survived to deliver the next
    let env = recv_envelope(&mut bob).await;
    assert_eq!(env.points[&7], vec![Point::new(5, 5)]);
}

#[tokio::test]
async fn test_broadcasts_preserve_submission_order() {
    let (port, _registry) = start_test_server().await;

    let mut alice = connect(port, 5, 7).await;
    let mut bob = connect(port, 5, 9).await;
    sleep(Duration::from_millis(100)).await;

    for x in 0..10u32 {
        send(
            &mut alice,
            &format!(r#"{{"cid":7,"fl":0,"p":{{"7":[{{"x":{x},"y":0}}]}}}}"#),
        )
        .await;
    }

    for x in 0..10u32 {
        let env = recv_envelope(&mut bob).await;
        assert_eq!(env.points[&7], vec![Point::new(x, 0)]);
    }
}

#[tokio::test]
async fn test_disconnect_tears_down_room_history_survives() {
    let (port, registry) = start_test_server().await;

    let mut alice = connect(port, 6, 7).await;
    send(&mut alice, r#"{"cid":7,"fl":0,"p":{"7":[{"x":3,"y":4}]}}"#).await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(registry.room_count().await, 1);

    alice.close(None).await.unwrap();
    drop(alice);

    // the session's release runs on disconnect; the last reference tears
    // the room actor down
    let mut torn_down = false;
    for _ in 0..100 {
        if registry.room_count().await == 0 {
            torn_down = true;
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(torn_down, "room should be torn down after the last release");

    // a fresh actor serves the next joiner, and history is still there
    let mut bob = connect(port, 6, 9).await;
    let snapshot = recv_envelope(&mut bob).await;
    assert_eq!(snapshot.points[&7], vec![Point::new(3, 4)]);
}

#[tokio::test]
async fn test_roster_registration_reaches_connected_clients() {
    let (port, registry) = start_test_server().await;

    let mut alice = connect(port, 8, 7).await;
    sleep(Duration::from_millis(100)).await;

    // the invitation handler's flow: ack'd roster upsert, then release
    let scheme = register_participant(&registry, 8, 42, None).await.unwrap();

    let env = recv_envelope(&mut alice).await;
    assert_eq!(env.players[&42], scheme);

    // Alice still holds her reference: the room must survive the flow
    assert_eq!(registry.room_count().await, 1);
}
