//! Application state shared by the connection tasks and the scheduler, and
//! the builders that turn it into protocol messages.

use crate::auth::{TokenAuthority, UserIndex};
use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::dictionary::{Dictionary, WordProvider};
use crate::error::Result;
use crate::game::GameEngine;
use crate::records::{DiscardRecords, FileRecords, GameRecords};
use crate::vote_stream::VoteStream;
use crate::voting::VoteAggregator;
use shared::{
    GameState, GameUpdate, InitialState, LiveData, ServerMessage, UserId, MAX_TIME_REMAINING,
};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Whole seconds until `deadline`, clamped to what the 4-bit field holds.
pub fn time_remaining(deadline: Option<Instant>, now: Instant) -> u8 {
    deadline
        .map(|deadline| {
            let secs = deadline.saturating_duration_since(now).as_secs();
            secs.min(MAX_TIME_REMAINING as u64) as u8
        })
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub users: usize,
    pub state: GameState,
    pub round: u8,
    pub total_votes: u32,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} users, {:?}, round {}, {} votes",
            self.users, self.state, self.round, self.total_votes
        )
    }
}

pub struct AppState {
    pub config: ServerConfig,
    pub engine: GameEngine,
    pub votes: VoteAggregator,
    pub stream: Arc<VoteStream>,
    pub clients: ClientManager,
    pub records: Arc<dyn GameRecords>,
    pub auth: TokenAuthority,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        words: Arc<dyn WordProvider>,
        records: Arc<dyn GameRecords>,
    ) -> Self {
        let stream = Arc::new(VoteStream::new(config.stream_capacity));
        let engine = GameEngine::new(Arc::clone(&words), config.game.clone());
        let votes = VoteAggregator::new(words, Arc::clone(&stream), config.game.voting_duration);
        let clients = ClientManager::new(config.send_timeout);
        let auth = TokenAuthority::new(config.token_secret.as_deref());

        Self {
            config,
            engine,
            votes,
            stream,
            clients,
            records,
            auth,
        }
    }

    /// Builds the state from configuration, loading the word list, the user
    /// index and choosing the records store.
    pub fn from_config(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let words: Arc<dyn WordProvider> = match &config.words_path {
            Some(path) => Arc::new(Dictionary::load(path)?),
            None => Arc::new(Dictionary::builtin()?),
        };
        let records: Arc<dyn GameRecords> = match &config.records_path {
            Some(path) => Arc::new(FileRecords::new(path)),
            None => Arc::new(DiscardRecords),
        };

        let mut app = Self::new(config, words, records);
        if let Some(path) = &app.config.user_index_path {
            let index = UserIndex::open(path)?;
            app.auth = TokenAuthority::with_index(app.config.token_secret.as_deref(), index);
        }
        Ok(app)
    }

    pub fn user_count(&self) -> u32 {
        self.clients.len().min(u32::MAX as usize) as u32
    }

    pub async fn initial_state_for(&self, user: UserId) -> ServerMessage {
        self.initial_state_at(user, Instant::now()).await
    }

    /// Snapshot sent to a client right after it connects.
    pub async fn initial_state_at(&self, user: UserId, now: Instant) -> ServerMessage {
        let (game, next_game) = self.engine.snapshot().await;

        let time_remaining = match game.state {
            GameState::VotingInProgress => Some(time_remaining(self.votes.voting_deadline(), now)),
            GameState::Won | GameState::Lost => Some(time_remaining(next_game, now)),
            GameState::WaitingForVote => None,
        };

        ServerMessage::InitialState(InitialState {
            state: game.state,
            user_count: self.user_count(),
            time_remaining,
            target: game.is_over().then_some(game.target),
            board: game.played().to_vec(),
            voting: game.state.shows_votes().then(|| self.votes.summary()),
            my_vote: self.votes.user_vote(user),
        })
    }

    /// The frame announcing a freshly resolved round. `None` before any
    /// round has been played.
    pub async fn game_update_at(&self, now: Instant) -> Option<ServerMessage> {
        let (game, next_game) = self.engine.snapshot().await;
        let played = game.last_played()?;

        Some(ServerMessage::GameUpdate(GameUpdate {
            state: game.state,
            round: (!game.is_over()).then_some(game.round),
            time_remaining: game.is_over().then(|| time_remaining(next_game, now)),
            played,
            target: (game.state == GameState::Lost).then_some(game.target),
        }))
    }

    pub async fn voting_started_at(&self, now: Instant) -> ServerMessage {
        let game = self.engine.current_game().await;
        ServerMessage::VotingStarted {
            round: game.round,
            time_remaining: time_remaining(self.votes.voting_deadline(), now),
        }
    }

    pub fn live_data(&self, state: GameState) -> LiveData {
        LiveData {
            state,
            user_count: self.user_count(),
            voting: state.shows_votes().then(|| self.votes.summary()),
        }
    }

    pub async fn status(&self) -> Status {
        let game = self.engine.current_game().await;
        Status {
            users: self.clients.len(),
            state: game.state,
            round: game.round,
            total_votes: self.votes.total_votes(),
        }
    }
}
