//! Bot client for soak testing: joins the game, decodes every frame and casts
//! a random vote whenever a round opens.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rand::Rng;
use server::dictionary::{Dictionary, WordProvider};
use server::network::IDENTITY_HEADER;
use shared::{encode_vote, ServerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

type BotResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server WebSocket URL
    #[arg(short, long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    /// Number of bots to run
    #[arg(short, long, default_value = "1")]
    bots: usize,

    /// Longest wait before voting once a round opens, in milliseconds
    #[arg(short, long, default_value = "3000")]
    max_delay_ms: u64,
}

/// Whether `message` means this bot may vote now.
fn opens_round(message: &ServerMessage) -> bool {
    match message {
        ServerMessage::InitialState(initial) => {
            !initial.state.is_over() && initial.my_vote.is_none()
        }
        ServerMessage::GameUpdate(update) => !update.state.is_over(),
        ServerMessage::GameStarting => true,
        _ => false,
    }
}

fn random_delay(max_ms: u64) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

async fn run_bot(id: usize, url: String, words: Arc<Dictionary>, max_delay_ms: u64) -> BotResult {
    let (ws, response) = connect_async(url.as_str()).await?;
    match response.headers().get(IDENTITY_HEADER) {
        Some(token) => info!("Bot {} connected with identity {:?}", id, token),
        None => info!("Bot {} connected", id),
    }

    let (mut sink, mut incoming) = ws.split();
    let mut vote_at: Option<Instant> = None;

    loop {
        let wake = vote_at.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            message = incoming.next() => {
                let Some(message) = message else {
                    break;
                };
                match message? {
                    Message::Binary(frame) => match ServerMessage::decode(&frame) {
                        Ok(message) => {
                            debug!("Bot {} received {:?}", id, message);
                            if opens_round(&message) {
                                vote_at = Some(Instant::now() + random_delay(max_delay_ms));
                            }
                        }
                        Err(e) => warn!("Bot {} got an undecodable frame: {}", id, e),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            _ = sleep_until(wake), if vote_at.is_some() => {
                vote_at = None;
                let word = words.next_target();
                sink.send(Message::Binary(encode_vote(word).to_vec())).await?;
                info!("Bot {} voted for {}", id, word);
            }
        }
    }

    info!("Bot {} disconnected", id);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let words = Arc::new(Dictionary::builtin()?);

    info!("Starting {} bots against {}", args.bots, args.url);

    let handles: Vec<_> = (0..args.bots)
        .map(|id| {
            let url = args.url.clone();
            let words = Arc::clone(&words);
            tokio::spawn(run_bot(id, url, words, args.max_delay_ms))
        })
        .collect();

    for (id, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Bot {} failed: {}", id, e),
            Err(e) => error!("Bot {} panicked: {}", id, e),
        }
    }

    Ok(())
}
