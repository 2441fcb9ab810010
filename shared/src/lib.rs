//! Types and wire format shared by the game server and its clients.

pub mod protocol;
pub mod word;

pub use protocol::{
    decode_vote, encode_vote, GameState, GameUpdate, InitialState, LiveData, ProtocolError,
    ServerMessage, Vote, VoteResult, VotingSummary, MAX_STREAM_WORDS, MAX_TIME_REMAINING,
    MAX_TOP_VOTES, VOTE_FRAME_LEN,
};
pub use word::{
    is_valid_packed, LetterState, PackedWord, PlayedWord, WordError, ALL_CORRECT, WORD_LENGTH,
};

/// Slots on the board; also the upper bound for a configured round limit.
pub const MAX_ROUNDS: usize = 6;

/// Opaque numeric identity issued to every client.
pub type UserId = u32;
