//! Periodic driver of the game: ends rounds when their voting time runs out,
//! starts the next game after a finished one, and pushes live updates.
//!
//! Each tick does, in order:
//! 1. start a new game if the finished one has waited long enough, or
//! 2. resolve the round if its voting deadline passed,
//!
//! and only when neither happened
//! 3. broadcast `LiveData` when it changed since the last send (rate limited)
//! 4. broadcast the next batch of streamed votes (rate limited).

use crate::game::RoundOutcome;
use crate::records::GameRecord;
use crate::state::AppState;
use log::{debug, error, info};
use shared::{LiveData, ServerMessage};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct Scheduler {
    app: Arc<AppState>,
    last_live_at: Option<Instant>,
    last_stream_at: Option<Instant>,
    last_live: Option<LiveData>,
}

fn due(last: Option<Instant>, every: std::time::Duration, now: Instant) -> bool {
    last.map_or(true, |last| now.saturating_duration_since(last) >= every)
}

impl Scheduler {
    pub fn new(app: Arc<AppState>) -> Self {
        Self {
            app,
            last_live_at: None,
            last_stream_at: None,
            last_live: None,
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = interval(self.app.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Scheduler stopped");
                    break;
                }
                _ = ticker.tick() => self.tick(Instant::now()).await,
            }
        }
    }

    pub async fn tick(&mut self, now: Instant) {
        if self.start_next_game(now).await || self.resolve_expired_round(now).await {
            return;
        }

        if due(self.last_live_at, self.app.config.broadcast_interval, now) {
            self.last_live_at = Some(now);
            self.broadcast_live_data().await;
        }

        if due(self.last_stream_at, self.app.config.stream_interval, now) {
            self.last_stream_at = Some(now);
            self.broadcast_vote_stream().await;
        }
    }

    async fn start_next_game(&mut self, now: Instant) -> bool {
        let (game, next_game) = self.app.engine.snapshot().await;
        let ready = game.is_over() && next_game.map_or(false, |at| now >= at);
        if !ready {
            return false;
        }

        self.app.engine.start_new_game().await;
        self.app.votes.clear_votes();
        self.app.stream.clear();
        info!("Starting new game ({} users)", self.app.clients.len());

        self.app
            .clients
            .broadcast(&ServerMessage::GameStarting.encode())
            .await;
        true
    }

    async fn resolve_expired_round(&mut self, now: Instant) -> bool {
        let expired = self
            .app
            .votes
            .voting_deadline()
            .map_or(false, |deadline| now >= deadline);
        if !expired {
            return false;
        }

        self.app.stream.clear();

        let Some(top) = self.app.votes.top_vote() else {
            // no tallied votes: the round is not used up
            debug!("Voting closed without votes, reopening round");
            self.app.votes.clear_votes();
            self.app.engine.abandon_voting().await;
            return true;
        };

        let outcome = self.app.engine.resolve_round_at(top.word, now).await;
        match outcome {
            RoundOutcome::AlreadyOver => {
                self.app.votes.clear_votes();
                return true;
            }
            RoundOutcome::Continue => self.app.votes.clear_votes(),
            RoundOutcome::Won | RoundOutcome::Lost => {
                self.app.votes.end_voting();
                self.persist_finished_game().await;
            }
        }

        if let Some(update) = self.app.game_update_at(now).await {
            self.app.clients.broadcast(&update.encode()).await;
        }
        true
    }

    /// Hands the finished game to the records store on a blocking thread.
    /// Failures are logged and never hold up the game.
    async fn persist_finished_game(&self) {
        let game = self.app.engine.current_game().await;
        let record = GameRecord::from_game(&game, self.app.clients.len(), SystemTime::now());
        let records = Arc::clone(&self.app.records);

        tokio::spawn(async move {
            match tokio::task::spawn_blocking(move || records.persist_finished_game(&record)).await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Failed to persist finished game: {}", e),
                Err(e) => error!("Persistence task failed: {}", e),
            }
        });
    }

    async fn broadcast_live_data(&mut self) {
        let state = self.app.engine.game_state().await;
        let live = self.app.live_data(state);
        if self.last_live.as_ref() == Some(&live) {
            return;
        }

        let frame = ServerMessage::LiveData(live.clone()).encode();
        self.last_live = Some(live);
        self.app.clients.broadcast(&frame).await;
    }

    async fn broadcast_vote_stream(&self) {
        let words = self.app.stream.pop_batch(self.app.config.stream_batch);
        if words.is_empty() {
            return;
        }
        self.app
            .clients
            .broadcast(&ServerMessage::VoteStream(words).encode())
            .await;
    }
}
