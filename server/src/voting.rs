//! Per-round vote bookkeeping.
//!
//! Tallies and the per-user ledger live in concurrent maps so message pumps
//! can record votes without a global lock. Inserting into the ledger is the
//! atomic step that enforces one vote per user per round.

use crate::dictionary::WordProvider;
use crate::game::GameEngine;
use crate::vote_stream::VoteStream;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use shared::{GameState, PackedWord, UserId, Vote, VoteResult, VotingSummary, MAX_TOP_VOTES};
use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteOutcome {
    pub result: VoteResult,
    /// Set for exactly one accepted vote per round: the one that opened
    /// voting.
    pub first_vote_of_round: bool,
}

impl VoteOutcome {
    fn rejected(result: VoteResult) -> Self {
        Self {
            result,
            first_vote_of_round: false,
        }
    }
}

pub struct VoteAggregator {
    /// Held shared while a vote lands in the ledger and the tally, and
    /// exclusively while a round is reset, so a reset never splits a vote.
    round: RwLock<()>,
    tallies: DashMap<PackedWord, u32>,
    ballots: DashMap<UserId, PackedWord>,
    deadline: Mutex<Option<Instant>>,
    /// Result of the deciding round, kept for display until the next game.
    final_summary: Mutex<Option<VotingSummary>>,
    words: Arc<dyn WordProvider>,
    stream: Arc<VoteStream>,
    voting_duration: Duration,
}

/// Highest count first; ties go to the lower packed word.
fn rank(a: &Vote, b: &Vote) -> Ordering {
    b.count.cmp(&a.count).then(a.word.cmp(&b.word))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl VoteAggregator {
    pub fn new(
        words: Arc<dyn WordProvider>,
        stream: Arc<VoteStream>,
        voting_duration: Duration,
    ) -> Self {
        Self {
            round: RwLock::new(()),
            tallies: DashMap::new(),
            ballots: DashMap::new(),
            deadline: Mutex::new(None),
            final_summary: Mutex::new(None),
            words,
            stream,
            voting_duration,
        }
    }

    pub async fn vote(&self, engine: &GameEngine, user: UserId, word: PackedWord) -> VoteOutcome {
        self.vote_at(engine, user, word, Instant::now()).await
    }

    /// Records a vote for `word`, which may be any untrusted value.
    pub async fn vote_at(
        &self,
        engine: &GameEngine,
        user: UserId,
        word: PackedWord,
        now: Instant,
    ) -> VoteOutcome {
        match engine.game_state().await {
            GameState::WaitingForVote | GameState::VotingInProgress => {}
            GameState::Won | GameState::Lost => {
                return VoteOutcome::rejected(VoteResult::VotingNotAllowed)
            }
        }

        if !word.is_valid() || !self.words.is_known(word) {
            return VoteOutcome::rejected(VoteResult::InvalidVote);
        }

        {
            let _round = self.round.read().unwrap_or_else(PoisonError::into_inner);
            match self.ballots.entry(user) {
                Entry::Occupied(_) => return VoteOutcome::rejected(VoteResult::AlreadyVoted),
                Entry::Vacant(entry) => {
                    entry.insert(word);
                }
            }
            *self.tallies.entry(word).or_insert(0) += 1;
        }
        self.stream.push(word);

        let first_vote_of_round = engine.begin_voting().await;
        if first_vote_of_round {
            *lock(&self.deadline) = Some(now + self.voting_duration);
            debug!("User {} opened voting with {}", user, word);
        }

        VoteOutcome {
            result: VoteResult::Success,
            first_vote_of_round,
        }
    }

    pub fn voting_deadline(&self) -> Option<Instant> {
        *lock(&self.deadline)
    }

    pub fn is_voting_active(&self) -> bool {
        self.voting_deadline().is_some()
    }

    pub fn user_vote(&self, user: UserId) -> Option<PackedWord> {
        self.ballots.get(&user).map(|entry| *entry.value())
    }

    /// Users holding a ballot in the current round.
    pub fn voter_count(&self) -> usize {
        self.ballots.len()
    }

    pub fn total_votes(&self) -> u32 {
        self.tallies.iter().map(|entry| *entry.value()).sum()
    }

    fn votes(&self) -> Vec<Vote> {
        self.tallies
            .iter()
            .map(|entry| Vote {
                word: *entry.key(),
                count: *entry.value(),
            })
            .filter(|vote| vote.count > 0)
            .collect()
    }

    /// The winning word of the current tally, if anyone voted.
    pub fn top_vote(&self) -> Option<Vote> {
        self.votes().into_iter().min_by(rank)
    }

    /// Up to three leading words, highest count first.
    pub fn top3(&self) -> Vec<Vote> {
        let mut votes = self.votes();
        votes.sort_by(rank);
        votes.truncate(MAX_TOP_VOTES);
        votes
    }

    /// Totals shown to clients: the live tally, or the deciding round's
    /// tally once the game has ended.
    pub fn summary(&self) -> VotingSummary {
        if let Some(summary) = lock(&self.final_summary).clone() {
            return summary;
        }
        VotingSummary {
            total_votes: self.total_votes(),
            top: self.top3(),
        }
    }

    /// Resets the round: tallies, ballots, deadline and any kept summary.
    pub fn clear_votes(&self) {
        let _round = self.round.write().unwrap_or_else(PoisonError::into_inner);
        self.tallies.clear();
        self.ballots.clear();
        *lock(&self.deadline) = None;
        *lock(&self.final_summary) = None;
    }

    /// Closes the deciding round of a finished game. The tally is reset like
    /// [`clear_votes`](Self::clear_votes) but its summary stays visible
    /// until the next game clears it.
    pub fn end_voting(&self) {
        let _round = self.round.write().unwrap_or_else(PoisonError::into_inner);
        let summary = VotingSummary {
            total_votes: self.total_votes(),
            top: self.top3(),
        };
        self.tallies.clear();
        self.ballots.clear();
        *lock(&self.deadline) = None;
        *lock(&self.final_summary) = Some(summary);
    }

    /// Empties the tally but leaves the voting deadline running.
    #[cfg(test)]
    pub(crate) fn clear_tally_keep_deadline(&self) {
        let _round = self.round.write().unwrap_or_else(PoisonError::into_inner);
        self.tallies.clear();
        self.ballots.clear();
    }
}
