use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use shared::protocol::{ClientRequest, ServerEvent, SessionSnapshot};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

const OUTBOUND_BUFFER: usize = 32;

/// Where a viewer's commands go. Sending never waits for the outcome; the
/// next snapshot is the only signal of effect.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send(&self, request: ClientRequest) -> Result<()>;
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Server(ServerEvent),
    Disconnected,
    Error(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

struct Connection {
    outbound: mpsc::Sender<ClientRequest>,
    task: JoinHandle<()>,
}

pub struct MissionClient {
    http: Client,
    base_url: Url,
    options: ClientOptions,
    connection: Mutex<Option<Connection>>,
    events: broadcast::Sender<ClientEvent>,
}

impl MissionClient {
    pub fn new(server_url: &str, options: ClientOptions) -> Result<Arc<Self>> {
        let base_url = Url::parse(server_url)
            .with_context(|| format!("invalid server url: {server_url}"))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(anyhow!("server_url must start with http:// or https://"));
        }
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .build()
            .context("failed to build http client")?;
        let (events, _) = broadcast::channel(256);
        Ok(Arc::new(Self {
            http,
            base_url,
            options,
            connection: Mutex::new(None),
            events,
        }))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn ws_url(&self) -> Result<Url> {
        let mut url = self.base_url.join("ws").context("failed to build websocket url")?;
        let scheme = if self.base_url.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        url.set_scheme(scheme)
            .map_err(|()| anyhow!("cannot use {scheme} for {}", self.base_url))?;
        Ok(url)
    }

    /// Opens the event websocket. Subscribe first to see the initial snapshot.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let ws_url = self.ws_url()?;
        let (ws_stream, _) = tokio::time::timeout(
            self.options.connect_timeout,
            connect_async(ws_url.as_str()),
        )
        .await
        .map_err(|_| anyhow!("timed out connecting websocket: {ws_url}"))?
        .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::channel::<ClientRequest>(OUTBOUND_BUFFER);

        let events = self.events.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = ws_reader.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            let event = match serde_json::from_str::<ServerEvent>(&text) {
                                Ok(event) => ClientEvent::Server(event),
                                Err(err) => ClientEvent::Error(format!("invalid server event: {err}")),
                            };
                            let _ = events.send(event);
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            let _ = events.send(ClientEvent::Error(format!(
                                "websocket receive failed: {err}"
                            )));
                            break;
                        }
                    },
                    request = outbound_rx.recv() => {
                        let Some(request) = request else {
                            let _ = ws_writer.close().await;
                            break;
                        };
                        let text = match serde_json::to_string(&request) {
                            Ok(text) => text,
                            Err(err) => {
                                warn!(%err, "failed to encode request");
                                continue;
                            }
                        };
                        if let Err(err) = ws_writer.send(Message::Text(text)).await {
                            let _ = events.send(ClientEvent::Error(format!(
                                "websocket send failed: {err}"
                            )));
                            break;
                        }
                    }
                }
            }
            let _ = events.send(ClientEvent::Disconnected);
            debug!("websocket event loop stopped");
        });

        let previous = self
            .connection
            .lock()
            .await
            .replace(Connection { outbound, task });
        if let Some(previous) = previous {
            previous.task.abort();
        }
        info!(%ws_url, "websocket connected");
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|connection| !connection.task.is_finished())
    }

    pub async fn disconnect(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            drop(connection.outbound);
            if tokio::time::timeout(Duration::from_secs(1), connection.task)
                .await
                .is_err()
            {
                warn!("websocket did not close in time");
            }
        }
    }

    pub async fn fetch_snapshot(&self) -> Result<SessionSnapshot> {
        let url = self.base_url.join("snapshot")?;
        let snapshot = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(snapshot)
    }

    /// Runs a command over HTTP and returns the coordinator's answer, which is
    /// either a snapshot or a rejection carrying one.
    pub async fn submit(&self, request: &ClientRequest) -> Result<ServerEvent> {
        let url = self.base_url.join("commands")?;
        let response = self.http.post(url).json(request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        serde_json::from_slice(&body).with_context(|| {
            format!(
                "unexpected reply to {} ({status}): {}",
                request.kind(),
                String::from_utf8_lossy(&body)
            )
        })
    }
}

#[async_trait]
impl CommandSink for MissionClient {
    async fn send(&self, request: ClientRequest) -> Result<()> {
        let outbound = self
            .connection
            .lock()
            .await
            .as_ref()
            .map(|connection| connection.outbound.clone())
            .ok_or_else(|| anyhow!("websocket is not connected"))?;
        outbound
            .send(request)
            .await
            .map_err(|_| anyhow!("websocket connection closed"))
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
