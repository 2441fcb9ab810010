//! The single live game and its round state machine.
//!
//! ```text
//! WaitingForVote --first vote--> VotingInProgress --resolve--> WaitingForVote
//!                                                          \--> Won | Lost
//! ```
//!
//! `Won` and `Lost` are terminal until [`GameEngine::start_new_game`].
//! All mutation goes through one lock, and readers get whole-record copies,
//! so nobody observes a half-applied round.

use crate::config::GameConfig;
use crate::dictionary::WordProvider;
use crate::scoring::score;
use log::{debug, info};
use shared::{GameState, PackedWord, PlayedWord, MAX_ROUNDS};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Game {
    pub board: [PlayedWord; MAX_ROUNDS],
    pub target: PackedWord,
    /// Completed rounds, which is also the next free board slot.
    pub round: u8,
    pub state: GameState,
    pub started_at: SystemTime,
}

impl Game {
    pub fn new(target: PackedWord) -> Self {
        Self {
            board: [PlayedWord::default(); MAX_ROUNDS],
            target,
            round: 0,
            state: GameState::WaitingForVote,
            started_at: SystemTime::now(),
        }
    }

    pub fn is_over(&self) -> bool {
        self.state.is_over()
    }

    /// Board entries for the rounds played so far.
    pub fn played(&self) -> &[PlayedWord] {
        &self.board[..self.round as usize]
    }

    pub fn last_played(&self) -> Option<PlayedWord> {
        self.played().last().copied()
    }
}

/// What resolving a round did to the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// The game had already ended; nothing changed.
    AlreadyOver,
    /// The guess was recorded and the next round accepts votes.
    Continue,
    Won,
    Lost,
}

impl RoundOutcome {
    pub fn continues_voting(self) -> bool {
        matches!(self, RoundOutcome::Continue)
    }

    pub fn ended_game(self) -> bool {
        matches!(self, RoundOutcome::Won | RoundOutcome::Lost)
    }
}

struct EngineState {
    game: Game,
    /// When the next game starts; only set while the game is over.
    next_event: Option<Instant>,
}

pub struct GameEngine {
    state: RwLock<EngineState>,
    words: Arc<dyn WordProvider>,
    config: GameConfig,
}

impl GameEngine {
    /// The round limit is clamped to the board size.
    pub fn new(words: Arc<dyn WordProvider>, mut config: GameConfig) -> Self {
        config.max_rounds = config.max_rounds.clamp(1, MAX_ROUNDS as u8);
        let game = Game::new(words.next_target());
        Self {
            state: RwLock::new(EngineState {
                game,
                next_event: None,
            }),
            words,
            config,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub async fn current_game(&self) -> Game {
        self.state.read().await.game
    }

    /// The game together with the next-game deadline, read atomically.
    pub async fn snapshot(&self) -> (Game, Option<Instant>) {
        let state = self.state.read().await;
        (state.game, state.next_event)
    }

    pub async fn game_state(&self) -> GameState {
        self.state.read().await.game.state
    }

    pub async fn is_game_over(&self) -> bool {
        self.state.read().await.game.is_over()
    }

    pub async fn next_event_time(&self) -> Option<Instant> {
        self.state.read().await.next_event
    }

    /// Moves `WaitingForVote` to `VotingInProgress`. Returns true only for
    /// the caller that made the transition.
    pub async fn begin_voting(&self) -> bool {
        let mut state = self.state.write().await;
        if state.game.state == GameState::WaitingForVote {
            state.game.state = GameState::VotingInProgress;
            true
        } else {
            false
        }
    }

    /// Returns a round that closed without any votes to `WaitingForVote`.
    pub async fn abandon_voting(&self) -> bool {
        let mut state = self.state.write().await;
        if state.game.state == GameState::VotingInProgress {
            state.game.state = GameState::WaitingForVote;
            true
        } else {
            false
        }
    }

    pub async fn resolve_round(&self, winning: PackedWord) -> RoundOutcome {
        self.resolve_round_at(winning, Instant::now()).await
    }

    /// Scores `winning` against the target and records it in the next slot.
    /// `winning` must already be a validated dictionary word.
    pub async fn resolve_round_at(&self, winning: PackedWord, now: Instant) -> RoundOutcome {
        debug_assert!(winning.is_valid(), "unvalidated winning word");

        let mut state = self.state.write().await;
        let game = &mut state.game;
        if game.is_over() {
            return RoundOutcome::AlreadyOver;
        }

        let played = PlayedWord::new(winning, score(winning, game.target));
        game.board[game.round as usize] = played;
        game.round += 1;

        let outcome = if played.is_all_correct() {
            RoundOutcome::Won
        } else if game.round >= self.config.max_rounds {
            RoundOutcome::Lost
        } else {
            RoundOutcome::Continue
        };

        game.state = match outcome {
            RoundOutcome::Won => GameState::Won,
            RoundOutcome::Lost => GameState::Lost,
            _ => GameState::WaitingForVote,
        };
        info!(
            "Round {} resolved with {} ({:010b}), game now {:?}",
            game.round, winning, played.states, game.state
        );

        state.next_event = if outcome.ended_game() {
            Some(now + self.config.game_interval)
        } else {
            None
        };

        outcome
    }

    pub async fn start_new_game(&self) {
        let target = self.words.next_target();
        let mut state = self.state.write().await;
        state.game = Game::new(target);
        state.next_event = None;
        debug!("New game started with target {}", target);
    }
}
