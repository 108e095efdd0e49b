use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use coordinator::Coordinator;
use futures::{stream, SinkExt, StreamExt};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{ClientRequest, ServerEvent, SessionSnapshot},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream, ReceiverStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;

const DIRECT_REPLY_BUFFER: usize = 32;

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.max_request_bytes)
        .on_upgrade(move |socket| ws_connection(state, socket))
}

enum Outbound {
    Broadcast(Result<SessionSnapshot, BroadcastStreamRecvError>),
    Direct(ServerEvent),
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket) {
    let viewer_id = Uuid::new_v4();
    let coordinator = Arc::clone(&state.coordinator);
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before reading the initial snapshot so no commit falls between.
    let broadcasts = BroadcastStream::new(coordinator.subscribe()).map(Outbound::Broadcast);
    let initial = coordinator.snapshot().await;
    let mut last_revision = initial.revision;
    if send_event(&mut sender, &ServerEvent::Snapshot { snapshot: initial })
        .await
        .is_err()
    {
        debug!(%viewer_id, "viewer left before initial snapshot");
        return;
    }
    info!(%viewer_id, revision = last_revision, "viewer connected");

    let (direct_tx, direct_rx) = mpsc::channel(DIRECT_REPLY_BUFFER);
    let direct = ReceiverStream::new(direct_rx).map(Outbound::Direct);
    let send_coordinator = Arc::clone(&coordinator);
    let send_task = tokio::spawn(async move {
        let mut outbound = stream::select(broadcasts, direct);
        while let Some(item) = outbound.next().await {
            let event = match item {
                Outbound::Broadcast(Ok(snapshot)) => {
                    if snapshot.revision <= last_revision {
                        continue;
                    }
                    ServerEvent::Snapshot { snapshot }
                }
                Outbound::Broadcast(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(%viewer_id, skipped, "viewer lagged; resending current snapshot");
                    ServerEvent::Snapshot {
                        snapshot: send_coordinator.snapshot().await,
                    }
                }
                Outbound::Direct(event) => event,
            };
            if let Some(snapshot) = event.snapshot() {
                last_revision = last_revision.max(snapshot.revision);
            }
            if send_event(&mut sender, &event).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        let parsed = match message {
            Message::Text(text) => serde_json::from_str::<ClientRequest>(&text),
            Message::Binary(bytes) => serde_json::from_slice::<ClientRequest>(&bytes),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        let reply = match parsed {
            Ok(request) => {
                debug!(%viewer_id, command = %request.kind(), "viewer request");
                dispatch(&coordinator, &request).await
            }
            Err(error) => Some(ServerEvent::Error(ApiError::new(
                ErrorCode::Validation,
                format!("malformed request: {error}"),
            ))),
        };
        if let Some(reply) = reply {
            if direct_tx.send(reply).await.is_err() {
                break;
            }
        }
    }

    send_task.abort();
    info!(%viewer_id, "viewer disconnected");
}

/// Runs one request; returns the reply owed to the requester alone.
/// Accepted commands reach every viewer through the broadcast instead.
async fn dispatch(coordinator: &Coordinator, request: &ClientRequest) -> Option<ServerEvent> {
    if let ClientRequest::RequestSnapshot = request {
        return Some(ServerEvent::Snapshot {
            snapshot: coordinator.snapshot().await,
        });
    }
    match coordinator.handle(request).await {
        Ok(_) => None,
        Err(rejection) => Some(rejection.to_event()),
    }
}

async fn send_event<S>(sender: &mut S, event: &ServerEvent) -> Result<(), ()>
where
    S: futures::Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(error) => {
            warn!(%error, "failed to encode server event");
            return Ok(());
        }
    };
    sender.send(Message::Text(text)).await.map_err(|_| ())
}
