//! # Crowd Word Game Server Library
//!
//! This library provides the authoritative server for a crowd-voted word
//! guessing game. Every connected user votes on the next guess, the most
//! voted word is played when the round's voting time runs out, and the whole
//! crowd wins or loses together.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Game
//! The server owns the single live game: the hidden target, the board of
//! played guesses and the round state machine. Clients only ever cast votes
//! and render what the server tells them.
//!
//! ### Vote Collection
//! Votes are validated against the word list, limited to one per user per
//! round, and tallied concurrently. The first vote of a round opens a timed
//! voting window.
//!
//! ### State Broadcasting
//! Round results, game restarts, live vote totals and a ticker of recently
//! cast words are pushed to every client as compact bit-packed frames (see
//! [`shared::protocol`]).
//!
//! ## Module Organization
//!
//! ### Game Modules (`game`, `scoring`, `voting`, `vote_stream`)
//! - Round state machine and the board of played words
//! - Letter scoring of a guess against the target
//! - Per-round tallies with atomic one-vote-per-user enforcement
//! - Bounded buffer feeding the vote ticker
//!
//! ### Client Manager Module (`client_manager`)
//! - One registered connection per user; reconnects replace the old one
//! - Serialized, time-bounded writes per connection
//! - Sweep of dead connections
//!
//! ### Network Module (`network`)
//! - WebSocket listener and token-gated handshake
//! - Per-connection message pump turning frames into votes
//!
//! ### Scheduler Module (`scheduler`)
//! - Fixed-period tick that resolves rounds, restarts finished games and
//!   rate limits live updates
//!
//! ### Support Modules (`auth`, `dictionary`, `records`, `config`, `error`)
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     let shutdown = CancellationToken::new();
//!
//!     // Runs until the token is cancelled:
//!     // - accepts WebSocket sessions on /ws
//!     // - ticks the game every 100ms
//!     // - sweeps dead connections every 15s
//!     server.run(shutdown).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client_manager;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod game;
pub mod network;
pub mod records;
pub mod scheduler;
pub mod scoring;
pub mod state;
pub mod vote_stream;
pub mod voting;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, ServerError};
pub use network::Server;
