use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::error;

use crate::protocol::ServerMessage;

#[derive(Parser, Debug)]
#[command(name = "nook-server")]
#[command(about = "Paired room synchronization server and debug client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the listen port (NOOK_PORT).
    #[arg(long)]
    pub port: Option<u16>,

    /// Override the Redis URL (REDIS_URL).
    #[arg(long)]
    pub redis_url: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to a running server as a real client and print the event
    /// stream. Needs a connection token for a paired account.
    Watch {
        /// Server URL (e.g., ws://localhost:8080)
        #[arg(short, long, default_value = "ws://localhost:8080")]
        url: String,

        /// Connection token
        #[arg(short, long)]
        token: String,
    },
}

pub async fn run_watch_client(url: String, token: String) -> Result<()> {
    let ws_url = format!("{}/ws?token={}", url.trim_end_matches('/'), token);

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&ws_url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("failed to connect to {}: {}", url, e);
            return Err(anyhow::anyhow!("connection failed: {}", e));
        }
        Err(_) => {
            error!("connection timeout after 5 seconds");
            return Err(anyhow::anyhow!(
                "connection timeout - is the server running?"
            ));
        }
    };
    let (_write, mut read) = ws_stream.split();

    println!("connected to {url}; watching room events (ctrl-c to quit)");

    while let Some(frame) = read.next().await {
        match frame? {
            Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(event) => print_event(&event),
                Err(err) => println!("?? unparseable frame: {err}"),
            },
            Message::Close(_) => {
                println!("server closed the connection");
                break;
            }
            _ => {}
        }
    }

    Ok(())
}

fn print_event(event: &ServerMessage) {
    match event {
        ServerMessage::RoomJoined {
            room_id,
            state,
            partner_connection_id,
            ..
        } => {
            println!(
                "joined room {room_id} (partner {}) video={:?} position={:.1}s premium={}",
                if partner_connection_id.is_some() {
                    "online"
                } else {
                    "offline"
                },
                state.video_source.kind,
                state.playback.current_time,
                state.is_premium,
            );
        }
        ServerMessage::StateUpdate { state } => {
            println!(
                "state: playing={} position={:.1}s rate={} video={:?}",
                state.playback.is_playing,
                state.playback.current_time,
                state.playback.rate,
                state.video_source.kind,
            );
        }
        ServerMessage::NewMessage { message } => {
            println!("[{}] {}", message.sender_name, message.body);
        }
        ServerMessage::NewJournalEntry { entry } => {
            println!("journal {}: {}", entry.id, entry.body);
        }
        ServerMessage::PartnerOnline { connection_id } => {
            println!("partner online ({connection_id})");
        }
        ServerMessage::PartnerOffline { connection_id } => {
            println!("partner offline ({connection_id})");
        }
        ServerMessage::PartnerTyping { user } => match user {
            Some(user) => println!("{user} is typing..."),
            None => println!("typing stopped"),
        },
        ServerMessage::PartnerBuffering { buffering } => {
            println!("partner buffering: {buffering}");
        }
        ServerMessage::Notification { kind, message } => {
            println!("notification ({kind:?}): {message}");
        }
        ServerMessage::Signal { sender, .. } => {
            println!("signal relayed from {sender}");
        }
        ServerMessage::Error { message } => {
            println!("error: {message}");
        }
    }
}
