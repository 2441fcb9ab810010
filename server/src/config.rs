//! Runtime settings for the game rules and the server loops.

use crate::error::{Result, ServerError};
use shared::{MAX_ROUNDS, MAX_STREAM_WORDS};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Rules of a single game.
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// How long a round stays open after its first vote.
    pub voting_duration: Duration,
    /// Pause between the end of a game and the start of the next.
    pub game_interval: Duration,
    pub max_rounds: u8,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            voting_duration: Duration::from_secs(10),
            game_interval: Duration::from_secs(10),
            max_rounds: MAX_ROUNDS as u8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub game: GameConfig,
    pub tick_interval: Duration,
    pub broadcast_interval: Duration,
    pub stream_interval: Duration,
    /// Words held for the live ticker before the oldest are dropped.
    pub stream_capacity: usize,
    /// Words sent per ticker frame.
    pub stream_batch: usize,
    pub cleanup_interval: Duration,
    /// Upper bound on a single frame write to one client.
    pub send_timeout: Duration,
    pub words_path: Option<PathBuf>,
    pub records_path: Option<PathBuf>,
    pub token_secret: Option<String>,
    /// Where the next free user id is kept so ids stay unique across
    /// restarts. Required together with `token_secret`.
    pub user_index_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            game: GameConfig::default(),
            tick_interval: Duration::from_millis(100),
            broadcast_interval: Duration::from_secs(1),
            stream_interval: Duration::from_secs(1),
            stream_capacity: 1000,
            stream_batch: 10,
            cleanup_interval: Duration::from_secs(15),
            send_timeout: Duration::from_secs(5),
            words_path: None,
            records_path: None,
            token_secret: None,
            user_index_path: None,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.game.max_rounds == 0 || self.game.max_rounds as usize > MAX_ROUNDS {
            return Err(ServerError::Config(format!(
                "max_rounds must be between 1 and {}, got {}",
                MAX_ROUNDS, self.game.max_rounds
            )));
        }
        if self.stream_batch == 0 || self.stream_batch > MAX_STREAM_WORDS {
            return Err(ServerError::Config(format!(
                "stream_batch must be between 1 and {}, got {}",
                MAX_STREAM_WORDS, self.stream_batch
            )));
        }
        if self.token_secret.is_some() && self.user_index_path.is_none() {
            return Err(ServerError::Config(
                "token_secret requires user_index_path, or user ids would be reissued after a restart"
                    .into(),
            ));
        }
        if self.stream_capacity == 0 {
            return Err(ServerError::Config("stream_capacity must be positive".into()));
        }

        let intervals = [
            ("voting_duration", self.game.voting_duration),
            ("tick_interval", self.tick_interval),
            ("broadcast_interval", self.broadcast_interval),
            ("stream_interval", self.stream_interval),
            ("cleanup_interval", self.cleanup_interval),
            ("send_timeout", self.send_timeout),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(ServerError::Config(format!("{} must be non-zero", name)));
        }

        Ok(())
    }
}
