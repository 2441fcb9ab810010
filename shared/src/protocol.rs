//! Bit-packed server frames and the fixed-size client vote frame.
//!
//! Server frames are written least significant bit first into a byte stream
//! and are not byte aligned: every frame starts with a 3-bit type tag and the
//! last byte is zero-padded. Several fields are only present for certain game
//! states, so decoding needs to follow the same state rules as encoding.
//!
//! Clients send exactly one kind of frame: a 4-byte big-endian packed word
//! casting a vote.

use crate::word::{PackedWord, PlayedWord, STATE_BITS, WORD_BITS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const TAG_BITS: u32 = 3;
const GAME_STATE_BITS: u32 = 2;
const COUNT_BITS: u32 = 16;
const TIME_BITS: u32 = 4;
const ROUND_BITS: u32 = 3;
const TOP_COUNT_BITS: u32 = 2;
const STREAM_COUNT_BITS: u32 = 4;
const RESULT_BITS: u32 = 2;

/// Largest value a 4-bit time-remaining field carries.
pub const MAX_TIME_REMAINING: u8 = (1 << TIME_BITS) - 1;
/// Most entries a top-votes list carries on the wire.
pub const MAX_TOP_VOTES: usize = (1 << TOP_COUNT_BITS) - 1;
/// Most words a single vote-stream frame carries.
pub const MAX_STREAM_WORDS: usize = (1 << STREAM_COUNT_BITS) - 1;
/// Size of the only frame a client may send.
pub const VOTE_FRAME_LEN: usize = 4;

const MAX_COUNT: u32 = (1 << COUNT_BITS) - 1;
const MAX_ROUND: usize = (1 << ROUND_BITS) - 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame ended before all fields were read")]
    UnexpectedEnd,

    #[error("unknown message type tag {0}")]
    UnknownMessageType(u32),

    #[error("invalid letter state field {0:#012b}")]
    InvalidLetterState(u32),

    #[error("vote frame must be 4 bytes, got {0}")]
    InvalidVoteFrame(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum GameState {
    #[default]
    WaitingForVote = 0,
    VotingInProgress = 1,
    Won = 2,
    Lost = 3,
}

impl GameState {
    pub fn is_over(self) -> bool {
        matches!(self, GameState::Won | GameState::Lost)
    }

    /// Whether frames for this state carry the vote summary.
    pub fn shows_votes(self) -> bool {
        self == GameState::VotingInProgress || self.is_over()
    }

    fn from_bits(bits: u32) -> GameState {
        match bits & 0b11 {
            0 => GameState::WaitingForVote,
            1 => GameState::VotingInProgress,
            2 => GameState::Won,
            _ => GameState::Lost,
        }
    }
}

/// Outcome of a vote, acknowledged to the voter only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VoteResult {
    Success = 0,
    VotingNotAllowed = 1,
    InvalidVote = 2,
    AlreadyVoted = 3,
}

impl VoteResult {
    fn from_bits(bits: u32) -> VoteResult {
        match bits & 0b11 {
            0 => VoteResult::Success,
            1 => VoteResult::VotingNotAllowed,
            2 => VoteResult::InvalidVote,
            _ => VoteResult::AlreadyVoted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Vote {
    pub word: PackedWord,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VotingSummary {
    pub total_votes: u32,
    pub top: Vec<Vote>,
}

/// Full snapshot sent to a client when it connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialState {
    pub state: GameState,
    pub user_count: u32,
    /// Present while voting or after the game ended.
    pub time_remaining: Option<u8>,
    /// Present once the game ended.
    pub target: Option<PackedWord>,
    /// One entry per completed round.
    pub board: Vec<PlayedWord>,
    /// Present while voting or after the game ended.
    pub voting: Option<VotingSummary>,
    pub my_vote: Option<PackedWord>,
}

/// Result of a resolved round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameUpdate {
    pub state: GameState,
    /// Present while the game continues.
    pub round: Option<u8>,
    /// Seconds until the next game, present once the game ended.
    pub time_remaining: Option<u8>,
    pub played: PlayedWord,
    /// Revealed only on a loss.
    pub target: Option<PackedWord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveData {
    pub state: GameState,
    pub user_count: u32,
    pub voting: Option<VotingSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    InitialState(InitialState),
    VotingStarted { round: u8, time_remaining: u8 },
    GameUpdate(GameUpdate),
    LiveData(LiveData),
    GameStarting,
    VoteStream(Vec<PackedWord>),
    Response(VoteResult),
}

impl ServerMessage {
    pub fn tag(&self) -> u32 {
        match self {
            ServerMessage::InitialState(_) => 0,
            ServerMessage::VotingStarted { .. } => 1,
            ServerMessage::GameUpdate(_) => 2,
            ServerMessage::LiveData(_) => 3,
            ServerMessage::GameStarting => 4,
            ServerMessage::VoteStream(_) => 5,
            ServerMessage::Response(_) => 6,
        }
    }

    /// Encodes the frame. Fields are emitted according to the frame's game
    /// state; counts larger than their field saturate and lists longer than
    /// their count field are truncated.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BitWriter::with_capacity(16);
        writer.write(self.tag(), TAG_BITS);

        match self {
            ServerMessage::InitialState(initial) => {
                writer.write(initial.state as u32, GAME_STATE_BITS);
                writer.write_count(initial.user_count);
                if initial.state.shows_votes() {
                    writer.write_time(initial.time_remaining.unwrap_or(0));
                }
                let board = &initial.board[..initial.board.len().min(MAX_ROUND)];
                writer.write(board.len() as u32, ROUND_BITS);
                if initial.state.is_over() {
                    writer.write_word(initial.target.unwrap_or_default());
                }
                for played in board {
                    writer.write_played(played);
                }
                if initial.state.shows_votes() {
                    writer.write_summary(initial.voting.as_ref());
                }
                match initial.my_vote.filter(|w| !w.is_none()) {
                    Some(word) => {
                        writer.write(1, 1);
                        writer.write_word(word);
                    }
                    None => writer.write(0, 1),
                }
            }
            ServerMessage::VotingStarted {
                round,
                time_remaining,
            } => {
                writer.write(*round as u32, ROUND_BITS);
                writer.write_time(*time_remaining);
            }
            ServerMessage::GameUpdate(update) => {
                writer.write(update.state as u32, GAME_STATE_BITS);
                if update.state.is_over() {
                    writer.write_time(update.time_remaining.unwrap_or(0));
                } else {
                    writer.write(update.round.unwrap_or(0) as u32, ROUND_BITS);
                }
                writer.write_played(&update.played);
                if update.state == GameState::Lost {
                    writer.write_word(update.target.unwrap_or_default());
                }
            }
            ServerMessage::LiveData(live) => {
                writer.write(live.state as u32, GAME_STATE_BITS);
                writer.write_count(live.user_count);
                if live.state.shows_votes() {
                    writer.write_summary(live.voting.as_ref());
                }
            }
            ServerMessage::GameStarting => {}
            ServerMessage::VoteStream(words) => {
                let words = &words[..words.len().min(MAX_STREAM_WORDS)];
                writer.write(words.len() as u32, STREAM_COUNT_BITS);
                for word in words {
                    writer.write_word(*word);
                }
            }
            ServerMessage::Response(result) => {
                writer.write(*result as u32, RESULT_BITS);
            }
        }

        writer.finish()
    }

    pub fn decode(frame: &[u8]) -> Result<ServerMessage, ProtocolError> {
        let mut reader = BitReader::new(frame);
        let tag = reader.read(TAG_BITS)?;

        let message = match tag {
            0 => {
                let state = GameState::from_bits(reader.read(GAME_STATE_BITS)?);
                let user_count = reader.read(COUNT_BITS)?;
                let time_remaining = if state.shows_votes() {
                    Some(reader.read(TIME_BITS)? as u8)
                } else {
                    None
                };
                let round = reader.read(ROUND_BITS)? as usize;
                let target = if state.is_over() {
                    Some(reader.read_word()?)
                } else {
                    None
                };
                let board = (0..round)
                    .map(|_| reader.read_played())
                    .collect::<Result<Vec<_>, _>>()?;
                let voting = if state.shows_votes() {
                    Some(reader.read_summary()?)
                } else {
                    None
                };
                let my_vote = if reader.read(1)? == 1 {
                    Some(reader.read_word()?)
                } else {
                    None
                };
                ServerMessage::InitialState(InitialState {
                    state,
                    user_count,
                    time_remaining,
                    target,
                    board,
                    voting,
                    my_vote,
                })
            }
            1 => ServerMessage::VotingStarted {
                round: reader.read(ROUND_BITS)? as u8,
                time_remaining: reader.read(TIME_BITS)? as u8,
            },
            2 => {
                let state = GameState::from_bits(reader.read(GAME_STATE_BITS)?);
                let (round, time_remaining) = if state.is_over() {
                    (None, Some(reader.read(TIME_BITS)? as u8))
                } else {
                    (Some(reader.read(ROUND_BITS)? as u8), None)
                };
                let played = reader.read_played()?;
                let target = if state == GameState::Lost {
                    Some(reader.read_word()?)
                } else {
                    None
                };
                ServerMessage::GameUpdate(GameUpdate {
                    state,
                    round,
                    time_remaining,
                    played,
                    target,
                })
            }
            3 => {
                let state = GameState::from_bits(reader.read(GAME_STATE_BITS)?);
                let user_count = reader.read(COUNT_BITS)?;
                let voting = if state.shows_votes() {
                    Some(reader.read_summary()?)
                } else {
                    None
                };
                ServerMessage::LiveData(LiveData {
                    state,
                    user_count,
                    voting,
                })
            }
            4 => ServerMessage::GameStarting,
            5 => {
                let count = reader.read(STREAM_COUNT_BITS)?;
                let words = (0..count)
                    .map(|_| reader.read_word())
                    .collect::<Result<Vec<_>, _>>()?;
                ServerMessage::VoteStream(words)
            }
            6 => ServerMessage::Response(VoteResult::from_bits(reader.read(RESULT_BITS)?)),
            other => return Err(ProtocolError::UnknownMessageType(other)),
        };

        Ok(message)
    }
}

/// Builds the 4-byte frame a client sends to cast a vote.
pub fn encode_vote(word: PackedWord) -> [u8; VOTE_FRAME_LEN] {
    word.raw().to_be_bytes()
}

/// Reads the raw integer from a client vote frame. The value is untrusted
/// and still needs validating.
pub fn decode_vote(frame: &[u8]) -> Result<u32, ProtocolError> {
    let bytes: [u8; VOTE_FRAME_LEN] = frame
        .try_into()
        .map_err(|_| ProtocolError::InvalidVoteFrame(frame.len()))?;
    Ok(u32::from_be_bytes(bytes))
}

/// Accumulates values LSB first and flushes whole bytes as they fill.
pub struct BitWriter {
    buffer: Vec<u8>,
    pending: u64,
    pending_bits: u32,
}

impl BitWriter {
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(bytes),
            pending: 0,
            pending_bits: 0,
        }
    }

    /// Appends the low `bits` bits of `value` (at most 32).
    pub fn write(&mut self, value: u32, bits: u32) {
        debug_assert!(bits <= 32);
        let mask = (1u64 << bits) - 1;
        self.pending |= (value as u64 & mask) << self.pending_bits;
        self.pending_bits += bits;

        while self.pending_bits >= 8 {
            self.buffer.push(self.pending as u8);
            self.pending >>= 8;
            self.pending_bits -= 8;
        }
    }

    /// Flushes the partial trailing byte and returns the frame.
    pub fn finish(mut self) -> Vec<u8> {
        if self.pending_bits > 0 {
            self.buffer.push(self.pending as u8);
        }
        self.buffer
    }

    fn write_count(&mut self, value: u32) {
        self.write(value.min(MAX_COUNT), COUNT_BITS);
    }

    fn write_time(&mut self, seconds: u8) {
        self.write(seconds.min(MAX_TIME_REMAINING) as u32, TIME_BITS);
    }

    fn write_word(&mut self, word: PackedWord) {
        self.write(word.raw(), WORD_BITS);
    }

    fn write_played(&mut self, played: &PlayedWord) {
        self.write_word(played.word);
        self.write(played.states as u32, STATE_BITS);
    }

    fn write_summary(&mut self, summary: Option<&VotingSummary>) {
        let (total, top) = match summary {
            Some(summary) => (summary.total_votes, &summary.top[..]),
            None => (0, &[][..]),
        };
        let top = &top[..top.len().min(MAX_TOP_VOTES)];
        self.write_count(total);
        self.write(top.len() as u32, TOP_COUNT_BITS);
        for vote in top {
            self.write_word(vote.word);
            self.write_count(vote.count);
        }
    }
}

pub struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
    pending: u64,
    pending_bits: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            pending: 0,
            pending_bits: 0,
        }
    }

    /// Reads the next `bits` bits (at most 32).
    pub fn read(&mut self, bits: u32) -> Result<u32, ProtocolError> {
        debug_assert!(bits <= 32);
        while self.pending_bits < bits {
            let byte = *self
                .data
                .get(self.position)
                .ok_or(ProtocolError::UnexpectedEnd)?;
            self.pending |= (byte as u64) << self.pending_bits;
            self.position += 1;
            self.pending_bits += 8;
        }

        let value = self.pending & ((1u64 << bits) - 1);
        self.pending >>= bits;
        self.pending_bits -= bits;
        Ok(value as u32)
    }

    fn read_word(&mut self) -> Result<PackedWord, ProtocolError> {
        Ok(PackedWord::from_raw(self.read(WORD_BITS)?))
    }

    fn read_played(&mut self) -> Result<PlayedWord, ProtocolError> {
        let word = self.read_word()?;
        let states = self.read(STATE_BITS)?;
        let played = PlayedWord {
            word,
            states: states as u16,
        };
        if played.letter_states().is_none() {
            return Err(ProtocolError::InvalidLetterState(states));
        }
        Ok(played)
    }

    fn read_summary(&mut self) -> Result<VotingSummary, ProtocolError> {
        let total_votes = self.read(COUNT_BITS)?;
        let count = self.read(TOP_COUNT_BITS)?;
        let top = (0..count)
            .map(|_| {
                Ok(Vote {
                    word: self.read_word()?,
                    count: self.read(COUNT_BITS)?,
                })
            })
            .collect::<Result<Vec<_>, ProtocolError>>()?;
        Ok(VotingSummary { total_votes, top })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::word::LetterState;

    fn word(s: &str) -> PackedWord {
        PackedWord::pack(s)
    }

    fn played(guess: &str, states: [LetterState; 5]) -> PlayedWord {
        PlayedWord::new(word(guess), states)
    }

    #[test]
    fn test_bit_writer_is_lsb_first() {
        let mut writer = BitWriter::with_capacity(2);
        writer.write(0b101, 3);
        writer.write(0b11, 2);
        writer.write(0b1, 4);
        let bytes = writer.finish();
        // 0b101 | 0b11 << 3 | 0b0001 << 5
        assert_eq!(bytes, vec![0b0011_1101, 0b0000_0000]);
    }

    #[test]
    fn test_bit_reader_matches_writer_across_byte_boundaries() {
        let mut writer = BitWriter::with_capacity(8);
        writer.write(5, 3);
        writer.write(0x1ABCDEF, 25);
        writer.write(0xFFFF, 16);
        writer.write(0, 1);
        let bytes = writer.finish();
        assert_eq!(bytes.len(), 6); // 45 bits

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read(3), Ok(5));
        assert_eq!(reader.read(25), Ok(0x1ABCDEF));
        assert_eq!(reader.read(16), Ok(0xFFFF));
        assert_eq!(reader.read(1), Ok(0));
        assert_eq!(reader.read(8), Err(ProtocolError::UnexpectedEnd));
    }

    #[test]
    fn test_response_frame_layout() {
        let frame = ServerMessage::Response(VoteResult::AlreadyVoted).encode();
        // tag 6 in the low three bits, result 3 above it
        assert_eq!(frame, vec![0b000_11_110]);

        let frame = ServerMessage::Response(VoteResult::Success).encode();
        assert_eq!(frame, vec![0b000_00_110]);
    }

    #[test]
    fn test_game_starting_frame_is_one_byte() {
        let frame = ServerMessage::GameStarting.encode();
        assert_eq!(frame, vec![4]);
        assert_eq!(ServerMessage::decode(&frame), Ok(ServerMessage::GameStarting));
    }

    #[test]
    fn test_voting_started_layout() {
        let message = ServerMessage::VotingStarted {
            round: 2,
            time_remaining: 9,
        };
        let frame = message.encode();
        // 3 + 3 + 4 bits
        assert_eq!(frame.len(), 2);
        assert_eq!(frame[0] & 0b111, 1);
        assert_eq!(ServerMessage::decode(&frame), Ok(message));
    }

    #[test]
    fn test_time_remaining_saturates() {
        let frame = ServerMessage::VotingStarted {
            round: 0,
            time_remaining: 200,
        }
        .encode();
        match ServerMessage::decode(&frame) {
            Ok(ServerMessage::VotingStarted { time_remaining, .. }) => {
                assert_eq!(time_remaining, MAX_TIME_REMAINING)
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_initial_state_while_waiting_omits_conditional_fields() {
        let message = ServerMessage::InitialState(InitialState {
            state: GameState::WaitingForVote,
            user_count: 12,
            time_remaining: None,
            target: None,
            board: vec![played("crane", [LetterState::Absent; 5])],
            voting: None,
            my_vote: None,
        });
        let frame = message.encode();
        // 3 + 2 + 16 + 3 + 35 + 1 = 60 bits
        assert_eq!(frame.len(), 8);
        assert_eq!(ServerMessage::decode(&frame), Ok(message));
    }

    #[test]
    fn test_initial_state_after_loss_carries_everything() {
        use LetterState::*;
        let message = ServerMessage::InitialState(InitialState {
            state: GameState::Lost,
            user_count: 3,
            time_remaining: Some(7),
            target: Some(word("apple")),
            board: vec![
                played("amber", [Correct, Absent, Absent, Present, Absent]),
                played("apply", [Correct, Correct, Correct, Correct, Absent]),
            ],
            voting: Some(VotingSummary {
                total_votes: 4,
                top: vec![
                    Vote {
                        word: word("apply"),
                        count: 3,
                    },
                    Vote {
                        word: word("amber"),
                        count: 1,
                    },
                ],
            }),
            my_vote: Some(word("apply")),
        });
        let frame = message.encode();
        assert_eq!(ServerMessage::decode(&frame), Ok(message));
    }

    #[test]
    fn test_initial_state_truncates_top_votes_to_three() {
        let top = ["crane", "slate", "trace", "adieu"]
            .iter()
            .enumerate()
            .map(|(i, w)| Vote {
                word: word(w),
                count: 10 - i as u32,
            })
            .collect::<Vec<_>>();
        let frame = ServerMessage::LiveData(LiveData {
            state: GameState::VotingInProgress,
            user_count: 70_000,
            voting: Some(VotingSummary {
                total_votes: 34,
                top,
            }),
        })
        .encode();

        match ServerMessage::decode(&frame) {
            Ok(ServerMessage::LiveData(live)) => {
                assert_eq!(live.user_count, 0xFFFF);
                let voting = live.voting.unwrap();
                assert_eq!(voting.total_votes, 34);
                assert_eq!(voting.top.len(), MAX_TOP_VOTES);
                assert_eq!(voting.top[2].word, word("trace"));
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_live_data_waiting_has_no_votes() {
        let frame = ServerMessage::LiveData(LiveData {
            state: GameState::WaitingForVote,
            user_count: 5,
            voting: None,
        })
        .encode();
        // 3 + 2 + 16 = 21 bits
        assert_eq!(frame.len(), 3);
    }

    #[test]
    fn test_game_update_layouts() {
        use LetterState::*;
        let continuing = ServerMessage::GameUpdate(GameUpdate {
            state: GameState::WaitingForVote,
            round: Some(1),
            time_remaining: None,
            played: played("apply", [Correct, Correct, Correct, Correct, Absent]),
            target: None,
        });
        let frame = continuing.encode();
        // 3 + 2 + 3 + 35 = 43 bits
        assert_eq!(frame.len(), 6);
        assert_eq!(ServerMessage::decode(&frame), Ok(continuing));

        let lost = ServerMessage::GameUpdate(GameUpdate {
            state: GameState::Lost,
            round: None,
            time_remaining: Some(10),
            played: played("amber", [Correct, Absent, Absent, Present, Absent]),
            target: Some(word("apple")),
        });
        let frame = lost.encode();
        // 3 + 2 + 4 + 35 + 25 = 69 bits
        assert_eq!(frame.len(), 9);
        assert_eq!(ServerMessage::decode(&frame), Ok(lost));

        let won = ServerMessage::GameUpdate(GameUpdate {
            state: GameState::Won,
            round: None,
            time_remaining: Some(10),
            played: played("apple", [Correct; 5]),
            target: None,
        });
        assert_eq!(ServerMessage::decode(&won.encode()), Ok(won));
    }

    #[test]
    fn test_vote_stream_caps_at_fifteen_words() {
        let words: Vec<_> = (0..20).map(|i| PackedWord::from_raw(i + 1)).collect();
        let frame = ServerMessage::VoteStream(words.clone()).encode();
        match ServerMessage::decode(&frame) {
            Ok(ServerMessage::VoteStream(decoded)) => {
                assert_eq!(decoded, words[..MAX_STREAM_WORDS].to_vec())
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_unknown_tag_and_truncation() {
        assert_eq!(
            ServerMessage::decode(&[7]),
            Err(ProtocolError::UnknownMessageType(7))
        );
        assert_eq!(ServerMessage::decode(&[]), Err(ProtocolError::UnexpectedEnd));

        let frame = ServerMessage::VoteStream(vec![word("crane"), word("slate")]).encode();
        assert_eq!(
            ServerMessage::decode(&frame[..frame.len() - 2]),
            Err(ProtocolError::UnexpectedEnd)
        );
    }

    #[test]
    fn test_decode_rejects_invalid_letter_state() {
        let mut writer = BitWriter::with_capacity(8);
        writer.write(2, 3);
        writer.write(GameState::WaitingForVote as u32, 2);
        writer.write(1, 3);
        writer.write(word("crane").raw(), 25);
        writer.write(0b11, 10);
        let frame = writer.finish();
        assert_eq!(
            ServerMessage::decode(&frame),
            Err(ProtocolError::InvalidLetterState(0b11))
        );
    }

    #[test]
    fn test_vote_frame() {
        let frame = encode_vote(word("hello"));
        assert_eq!(frame, 15051911u32.to_be_bytes());
        assert_eq!(decode_vote(&frame), Ok(15051911));
        assert_eq!(
            decode_vote(&[1, 2, 3]),
            Err(ProtocolError::InvalidVoteFrame(3))
        );
        assert_eq!(
            decode_vote(&[0; 5]),
            Err(ProtocolError::InvalidVoteFrame(5))
        );
    }
}
