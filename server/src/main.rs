use clap::Parser;
use log::{error, info};
use server::config::{GameConfig, ServerConfig};
use server::network::Server;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Seconds a round stays open after its first vote
    #[arg(long, default_value = "10")]
    voting_secs: u64,

    /// Seconds between the end of a game and the next one
    #[arg(long, default_value = "10")]
    interval_secs: u64,

    /// Guesses allowed per game (1-6)
    #[arg(short = 'r', long, default_value = "6")]
    max_rounds: u8,

    /// Scheduler tick in milliseconds
    #[arg(short, long, default_value = "100")]
    tick_ms: u64,

    /// Word list, one word per line (uses the built-in list if omitted)
    #[arg(short, long)]
    words: Option<PathBuf>,

    /// File finished games are appended to
    #[arg(long)]
    records: Option<PathBuf>,

    /// Secret for identity tokens; tokens are lost on restart without one
    #[arg(long)]
    token_secret: Option<String>,

    /// File keeping the next free user id; needed with --token-secret
    #[arg(long)]
    user_index: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let bind_addr: SocketAddr = format!("{}:{}", self.host, self.port).parse()?;
        Ok(ServerConfig {
            bind_addr,
            game: GameConfig {
                voting_duration: Duration::from_secs(self.voting_secs),
                game_interval: Duration::from_secs(self.interval_secs),
                max_rounds: self.max_rounds,
            },
            tick_interval: Duration::from_millis(self.tick_ms),
            words_path: self.words,
            records_path: self.records,
            token_secret: self.token_secret,
            user_index_path: self.user_index,
            ..ServerConfig::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config()?;
    let server = Server::bind(config).await?;
    let app = server.state();

    let shutdown = CancellationToken::new();
    let signal_handler = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C, shutting down ({})", app.status().await);
            shutdown.cancel();
        })
    };

    server.run(shutdown).await?;
    signal_handler.abort();
    info!("Server stopped");
    Ok(())
}
