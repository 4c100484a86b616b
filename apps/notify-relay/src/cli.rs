use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "notify-relay")]
#[command(about = "Real-time notification relay and debug client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect as a user and print every notification received
    Listen {
        /// Relay base URL (e.g., ws://localhost:8081)
        #[arg(short, long, default_value = "ws://localhost:8081")]
        url: String,

        /// Username to connect as
        #[arg(short = 'U', long)]
        user: String,
    },

    /// Post a JSON notification to a user
    Send {
        /// Relay base URL (e.g., http://localhost:8081)
        #[arg(short, long, default_value = "http://localhost:8081")]
        url: String,

        /// Recipient username
        #[arg(short = 'U', long)]
        user: String,

        /// JSON payload, forwarded verbatim
        #[arg(short, long)]
        json: String,
    },
}

pub async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Listen { url, user } => listen(&url, &user).await,
        Commands::Send { url, user, json } => send(&url, &user, &json).await,
    }
}

async fn listen(url: &str, user: &str) -> Result<()> {
    let ws_url = format!("{}/ws/{}", url.trim_end_matches('/'), user);
    debug!(url = %ws_url, "connecting");

    let (ws_stream, _) = match timeout(CONNECT_TIMEOUT, connect_async(&ws_url)).await {
        Ok(result) => result.with_context(|| format!("failed to connect to {ws_url}"))?,
        Err(_) => {
            return Err(anyhow!(
                "connection timeout after {}s - is the relay running?",
                CONNECT_TIMEOUT.as_secs()
            ))
        }
    };
    info!(user = %user, "connected; waiting for notifications");
    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => println!("{}", text.as_str()),
            Message::Ping(data) => write.send(Message::Pong(data)).await?,
            Message::Close(frame) => {
                debug!(?frame, "relay closed the connection");
                break;
            }
            _ => {}
        }
    }
    Ok(())
}

async fn send(url: &str, user: &str, json: &str) -> Result<()> {
    let endpoint = format!("{}/notifications/{}", url.trim_end_matches('/'), user);
    let response = reqwest::Client::new()
        .post(&endpoint)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(json.to_string())
        .send()
        .await
        .with_context(|| format!("failed to reach {endpoint}"))?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(anyhow!("relay rejected notification ({status}): {body}"));
    }
    println!("{body}");
    Ok(())
}
