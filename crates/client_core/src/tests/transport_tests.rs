use super::*;
use axum::{
    extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use shared::{
    domain::{MissionId, MissionStatus},
    protocol::MissionState,
};
use uuid::Uuid;

fn fixed_snapshot(revision: u64, status: MissionStatus) -> SessionSnapshot {
    SessionSnapshot {
        session_id: Uuid::nil(),
        revision,
        server_time: "2024-01-01T00:00:00Z".parse().expect("timestamp"),
        missions: vec![MissionState {
            id: MissionId(1),
            label: "Mission 1".into(),
            time_limit_seconds: 10,
            status,
            deadline: None,
            seconds_remaining: None,
        }],
    }
}

async fn fake_ws(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(fake_session)
}

// Sends one snapshot on connect, then answers each request with the next revision.
async fn fake_session(mut socket: WebSocket) {
    let initial = ServerEvent::Snapshot {
        snapshot: fixed_snapshot(0, MissionStatus::Idle),
    };
    let text = serde_json::to_string(&initial).expect("json");
    if socket.send(AxumMessage::Text(text)).await.is_err() {
        return;
    }
    let mut revision = 0;
    while let Some(Ok(AxumMessage::Text(text))) = socket.recv().await {
        let request: ClientRequest = serde_json::from_str(&text).expect("request");
        assert_eq!(
            request,
            ClientRequest::Start {
                mission_id: MissionId(1)
            }
        );
        revision += 1;
        let reply = ServerEvent::Snapshot {
            snapshot: fixed_snapshot(revision, MissionStatus::Active),
        };
        let text = serde_json::to_string(&reply).expect("json");
        if socket.send(AxumMessage::Text(text)).await.is_err() {
            return;
        }
    }
}

async fn fake_snapshot() -> Json<SessionSnapshot> {
    Json(fixed_snapshot(7, MissionStatus::Completed))
}

async fn fake_command(Json(request): Json<ClientRequest>) -> (StatusCode, Json<ServerEvent>) {
    let error = shared::error::ApiError::new(
        shared::error::ErrorCode::UnknownMission,
        format!("unknown mission {:?}", request.mission_id()),
    );
    (
        StatusCode::NOT_FOUND,
        Json(ServerEvent::CommandRejected {
            command: request.kind(),
            mission_id: request.mission_id(),
            error,
            snapshot: fixed_snapshot(7, MissionStatus::Completed),
        }),
    )
}

async fn spawn_fake_server() -> String {
    let app = Router::new()
        .route("/ws", get(fake_ws))
        .route("/snapshot", get(fake_snapshot))
        .route("/commands", post(fake_command));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

async fn next_server_event(events: &mut broadcast::Receiver<ClientEvent>) -> ServerEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event in time")
            .expect("event channel");
        match event {
            ClientEvent::Server(event) => return event,
            ClientEvent::Error(err) => panic!("client error: {err}"),
            ClientEvent::Disconnected => panic!("disconnected"),
        }
    }
}

#[test]
fn rejects_non_http_server_urls() {
    assert!(MissionClient::new("ftp://example.com", ClientOptions::default()).is_err());
    assert!(MissionClient::new("not a url", ClientOptions::default()).is_err());
}

#[test]
fn websocket_url_follows_http_scheme() {
    let client = MissionClient::new("https://missions.example:9443", ClientOptions::default())
        .expect("client");
    assert_eq!(
        client.ws_url().expect("ws url").as_str(),
        "wss://missions.example:9443/ws"
    );
    let client =
        MissionClient::new("http://127.0.0.1:8443", ClientOptions::default()).expect("client");
    assert_eq!(
        client.ws_url().expect("ws url").as_str(),
        "ws://127.0.0.1:8443/ws"
    );
}

#[tokio::test]
async fn send_without_connection_fails() {
    let client =
        MissionClient::new("http://127.0.0.1:9", ClientOptions::default()).expect("client");
    assert!(client.send(ClientRequest::ResetAll).await.is_err());
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn websocket_delivers_initial_snapshot_and_command_results() {
    let base = spawn_fake_server().await;
    let client = MissionClient::new(&base, ClientOptions::default()).expect("client");
    let mut events = client.subscribe_events();
    client.connect().await.expect("connect");
    assert!(client.is_connected().await);

    let initial = next_server_event(&mut events).await;
    assert_eq!(initial.snapshot().expect("snapshot").revision, 0);

    client
        .send(ClientRequest::Start {
            mission_id: MissionId(1),
        })
        .await
        .expect("send");
    let reply = next_server_event(&mut events).await;
    let snapshot = reply.snapshot().expect("snapshot");
    assert_eq!(snapshot.revision, 1);
    assert_eq!(snapshot.missions[0].status, MissionStatus::Active);

    client.disconnect().await;
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn http_snapshot_and_rejected_submit() {
    let base = spawn_fake_server().await;
    let client = MissionClient::new(&base, ClientOptions::default()).expect("client");

    let snapshot = client.fetch_snapshot().await.expect("snapshot");
    assert_eq!(snapshot.revision, 7);

    let reply = client
        .submit(&ClientRequest::Complete {
            mission_id: MissionId(99),
        })
        .await
        .expect("reply");
    let ServerEvent::CommandRejected {
        mission_id, error, ..
    } = reply
    else {
        panic!("expected rejection");
    };
    assert_eq!(mission_id, Some(MissionId(99)));
    assert_eq!(error.code, shared::error::ErrorCode::UnknownMission);
}
