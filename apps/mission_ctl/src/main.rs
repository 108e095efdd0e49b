use std::{future::Future, sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use client_core::{
    ClientEvent, ClientOptions, CommandSink, DisplayState, MissionClient, ViewController,
    ViewerRole,
};
use shared::{
    domain::MissionId,
    error::ApiException,
    protocol::{ClientRequest, ServerEvent},
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mission_ctl", about = "Issue mission commands and watch mission state")]
struct Cli {
    #[arg(long, env = "MISSION_SERVER_URL", default_value = "http://127.0.0.1:8443")]
    server_url: String,
    #[arg(long, default_value_t = 5)]
    connect_timeout_secs: u64,
    /// Delay between websocket reconnect attempts while watching.
    #[arg(long, default_value_t = 2)]
    reconnect_delay_secs: u64,
    #[arg(long, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Start { mission_id: u32 },
    Complete { mission_id: u32 },
    Reset { mission_id: u32 },
    ResetAll,
    Snapshot,
    /// Follow live state; as a participant when `--mission` is given.
    Watch {
        #[arg(long)]
        mission: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let timeout = Duration::from_secs(cli.connect_timeout_secs);
    let client = MissionClient::new(
        &cli.server_url,
        ClientOptions {
            connect_timeout: timeout,
            ..ClientOptions::default()
        },
    )?;
    let admin = ViewController::new(ViewerRole::Admin);

    let request = match cli.command {
        Command::Start { mission_id } => admin.start(MissionId(mission_id))?,
        Command::Complete { mission_id } => admin.complete(MissionId(mission_id))?,
        Command::Reset { mission_id } => admin.reset(MissionId(mission_id))?,
        Command::ResetAll => admin.reset_all()?,
        Command::Snapshot => {
            let snapshot = client.fetch_snapshot().await?;
            let mut view = admin;
            view.apply(snapshot, Utc::now());
            print_display(&view.display(Utc::now()))?;
            return Ok(());
        }
        Command::Watch { mission } => {
            let role = match mission {
                Some(mission_id) => ViewerRole::Participant {
                    mission_id: MissionId(mission_id),
                },
                None => ViewerRole::Admin,
            };
            let reconnect_delay = Duration::from_secs(cli.reconnect_delay_secs);
            return watch(client, role, reconnect_delay, tokio::signal::ctrl_c()).await;
        }
    };

    run_command(&client, admin, &request).await
}

async fn run_command(
    client: &MissionClient,
    mut view: ViewController,
    request: &ClientRequest,
) -> Result<()> {
    let reply = client.submit(request).await?;
    view.apply_event(&reply, Utc::now());
    if view.latest().is_some() {
        print_display(&view.display(Utc::now()))?;
    }
    match reply {
        ServerEvent::Snapshot { .. } => Ok(()),
        ServerEvent::CommandRejected { error, .. } | ServerEvent::Error(error) => {
            Err(ApiException::from(error).into())
        }
    }
}

async fn watch(
    client: Arc<MissionClient>,
    role: ViewerRole,
    reconnect_delay: Duration,
    shutdown: impl Future<Output = std::io::Result<()>>,
) -> Result<()> {
    let mut view = ViewController::new(role);
    let mut events = client.subscribe_events();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut last_printed: Option<DisplayState> = None;
    tokio::pin!(shutdown);

    loop {
        if !client.is_connected().await {
            if let Err(error) = client.connect().await {
                warn!(%error, "connect failed; retrying");
                tokio::select! {
                    _ = tokio::time::sleep(reconnect_delay) => continue,
                    _ = &mut shutdown => return Ok(()),
                }
            }
        }

        tokio::select! {
            event = events.recv() => match event {
                Ok(ClientEvent::Server(ServerEvent::Error(error))) => {
                    warn!(code = ?error.code, message = %error.message, "server reported an error");
                }
                Ok(ClientEvent::Server(event)) => {
                    view.apply_event(&event, Utc::now());
                }
                Ok(ClientEvent::Error(message)) => warn!(%message, "client error"),
                Ok(ClientEvent::Disconnected) => {
                    warn!("connection lost; reconnecting");
                    tokio::time::sleep(reconnect_delay).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event backlog dropped; requesting snapshot");
                    if let Err(error) = client.send(view.request_snapshot()).await {
                        warn!(%error, "snapshot request failed");
                    }
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                info!("stopping watch");
                client.disconnect().await;
                return Ok(());
            }
        }

        let display = view.display(Utc::now());
        if last_printed.as_ref() != Some(&display) {
            print_display(&display)?;
            last_printed = Some(display);
        }
    }
}

fn print_display(display: &DisplayState) -> Result<()> {
    println!("{}", serde_json::to_string(display)?);
    Ok(())
}
