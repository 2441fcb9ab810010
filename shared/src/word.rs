//! Dense integer encoding of five-letter words and per-letter verdicts.
//!
//! Letters occupy 5 bits each, least significant first: letter `i` lives in
//! bits `5i..5i+5` with `a = 0 .. z = 25`. Letter verdicts use 2 bits each in
//! the same order, giving a 10-bit state vector per played word.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const WORD_LENGTH: usize = 5;
pub const BITS_PER_LETTER: u32 = 5;
pub const WORD_BITS: u32 = BITS_PER_LETTER * WORD_LENGTH as u32;
pub const BITS_PER_STATE: u32 = 2;
pub const STATE_BITS: u32 = BITS_PER_STATE * WORD_LENGTH as u32;
pub const ALPHABET_SIZE: usize = 26;

const LETTER_MASK: u32 = (1 << BITS_PER_LETTER) - 1;
const STATE_MASK: u16 = (1 << BITS_PER_STATE) - 1;
const MAX_LETTER: u32 = (ALPHABET_SIZE - 1) as u32;

/// Packed state vector with every position `Correct`.
pub const ALL_CORRECT: u16 = 0b10_10_10_10_10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WordError {
    #[error("word must be 5 letters, got {0}")]
    InvalidLength(usize),

    #[error("invalid letter {0:?}: only lowercase a-z allowed")]
    InvalidLetter(char),
}

/// A five-letter word packed into 25 bits. `PackedWord::NONE` (0) doubles as
/// the "no word" sentinel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct PackedWord(u32);

impl PackedWord {
    pub const NONE: PackedWord = PackedWord(0);

    /// Packs a lowercase five-letter word, returning the sentinel for any
    /// string of the wrong length or with a letter outside `a`-`z`.
    pub fn pack(word: &str) -> PackedWord {
        word.parse().unwrap_or(PackedWord::NONE)
    }

    /// Wraps a raw integer without validating it.
    pub const fn from_raw(raw: u32) -> PackedWord {
        PackedWord(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn is_valid(self) -> bool {
        is_valid_packed(self.0)
    }

    /// Letter index (0 = `a`) at `position`.
    pub fn letter(self, position: usize) -> u8 {
        ((self.0 >> (position as u32 * BITS_PER_LETTER)) & LETTER_MASK) as u8
    }

    pub fn letters(self) -> [u8; WORD_LENGTH] {
        let mut letters = [0u8; WORD_LENGTH];
        for (i, letter) in letters.iter_mut().enumerate() {
            *letter = self.letter(i);
        }
        letters
    }

    pub fn unpack(self) -> String {
        self.letters()
            .iter()
            .map(|&l| (b'a' + l) as char)
            .collect()
    }
}

impl FromStr for PackedWord {
    type Err = WordError;

    fn from_str(word: &str) -> Result<Self, Self::Err> {
        let len = word.chars().count();
        if len != WORD_LENGTH {
            return Err(WordError::InvalidLength(len));
        }

        let mut packed = 0u32;
        for (i, c) in word.chars().enumerate() {
            if !c.is_ascii_lowercase() {
                return Err(WordError::InvalidLetter(c));
            }
            let value = c as u32 - 'a' as u32;
            packed |= value << (i as u32 * BITS_PER_LETTER);
        }
        Ok(PackedWord(packed))
    }
}

impl fmt::Display for PackedWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.unpack())
    }
}

/// Checks that `raw` fits in 25 bits and every 5-bit field is a letter.
/// Used on untrusted client integers, so no string is built.
pub fn is_valid_packed(raw: u32) -> bool {
    if raw >> WORD_BITS != 0 {
        return false;
    }
    (0..WORD_LENGTH as u32).all(|i| ((raw >> (i * BITS_PER_LETTER)) & LETTER_MASK) <= MAX_LETTER)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum LetterState {
    #[default]
    Absent = 0,
    Present = 1,
    Correct = 2,
}

impl LetterState {
    pub fn from_bits(bits: u32) -> Option<LetterState> {
        match bits {
            0 => Some(LetterState::Absent),
            1 => Some(LetterState::Present),
            2 => Some(LetterState::Correct),
            _ => None,
        }
    }
}

pub fn pack_states(states: &[LetterState; WORD_LENGTH]) -> u16 {
    states
        .iter()
        .enumerate()
        .fold(0u16, |acc, (i, &s)| acc | (s as u16) << (i as u32 * BITS_PER_STATE))
}

/// Unpacks a 10-bit state vector. Returns `None` if any field holds the
/// unused value 3.
pub fn unpack_states(packed: u16) -> Option<[LetterState; WORD_LENGTH]> {
    let mut states = [LetterState::Absent; WORD_LENGTH];
    for (i, state) in states.iter_mut().enumerate() {
        let bits = (packed >> (i as u32 * BITS_PER_STATE)) & STATE_MASK;
        *state = LetterState::from_bits(bits as u32)?;
    }
    Some(states)
}

/// A resolved guess and its verdicts. Built once per round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayedWord {
    pub word: PackedWord,
    pub states: u16,
}

impl PlayedWord {
    pub fn new(word: PackedWord, states: [LetterState; WORD_LENGTH]) -> Self {
        Self {
            word,
            states: pack_states(&states),
        }
    }

    pub fn letter_states(&self) -> Option<[LetterState; WORD_LENGTH]> {
        unpack_states(self.states)
    }

    pub fn is_all_correct(&self) -> bool {
        self.states == ALL_CORRECT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_known_values() {
        assert_eq!(PackedWord::pack("hello").raw(), 15051911);
        assert_eq!(PackedWord::pack("world").raw(), 3524054);
    }

    #[test]
    fn test_pack_rejects_malformed_input() {
        assert_eq!(PackedWord::pack("hell"), PackedWord::NONE);
        assert_eq!(PackedWord::pack("hellos"), PackedWord::NONE);
        assert_eq!(PackedWord::pack("Hello"), PackedWord::NONE);
        assert_eq!(PackedWord::pack("he1lo"), PackedWord::NONE);
        assert_eq!(PackedWord::pack("héllo"), PackedWord::NONE);
        assert_eq!(PackedWord::pack(""), PackedWord::NONE);
    }

    #[test]
    fn test_parse_reports_reason() {
        assert_eq!("abc".parse::<PackedWord>(), Err(WordError::InvalidLength(3)));
        assert_eq!(
            "abcD!".parse::<PackedWord>(),
            Err(WordError::InvalidLetter('D'))
        );
    }

    #[test]
    fn test_unpack_inverts_pack() {
        for word in ["hello", "zzzzz", "apple", "crane", "jazzy", "azbyc", "qqqqz"] {
            let packed = PackedWord::pack(word);
            assert!(!packed.is_none());
            assert_eq!(packed.unpack(), word);
            assert_eq!(packed.to_string(), word);
        }
    }

    #[test]
    fn test_unpack_inverts_pack_for_every_letter_position() {
        for letter in b'a'..=b'z' {
            for position in 0..WORD_LENGTH {
                let mut bytes = *b"bbbbb";
                bytes[position] = letter;
                let word = std::str::from_utf8(&bytes).unwrap();
                assert_eq!(PackedWord::pack(word).unpack(), word);
            }
        }
    }

    #[test]
    fn test_is_valid_packed() {
        assert!(is_valid_packed(15051911));
        assert!(!is_valid_packed(92830593));
        assert!(is_valid_packed(PackedWord::pack("zzzzz").raw()));

        // one field at 26..=31 in every position
        for position in 0..WORD_LENGTH as u32 {
            for bad in 26..=31u32 {
                assert!(!is_valid_packed(bad << (position * BITS_PER_LETTER)));
            }
        }

        // bits above the 25-bit word
        assert!(!is_valid_packed(1 << WORD_BITS));
        assert!(!is_valid_packed(u32::MAX));
    }

    #[test]
    fn test_letters() {
        let word = PackedWord::pack("crane");
        assert_eq!(word.letters(), [2, 17, 0, 13, 4]);
        assert_eq!(word.letter(1), 17);
    }

    #[test]
    fn test_state_packing() {
        use LetterState::*;
        let states = [Correct, Present, Absent, Correct, Present];
        let packed = pack_states(&states);
        assert_eq!(packed, 0b01_10_00_01_10);
        assert_eq!(unpack_states(packed), Some(states));
        assert_eq!(pack_states(&[Correct; WORD_LENGTH]), ALL_CORRECT);
    }

    #[test]
    fn test_unpack_states_rejects_unused_value() {
        assert_eq!(unpack_states(0b11), None);
        assert_eq!(unpack_states(0b11 << 8), None);
    }

    #[test]
    fn test_played_word() {
        let played = PlayedWord::new(PackedWord::pack("apple"), [LetterState::Correct; 5]);
        assert!(played.is_all_correct());

        let played = PlayedWord::new(PackedWord::pack("apple"), [LetterState::Absent; 5]);
        assert!(!played.is_all_correct());
        assert_eq!(played.letter_states(), Some([LetterState::Absent; 5]));
    }

    #[test]
    fn test_played_word_serialization() {
        let played = PlayedWord::new(
            PackedWord::pack("pumas"),
            [
                LetterState::Correct,
                LetterState::Correct,
                LetterState::Absent,
                LetterState::Correct,
                LetterState::Correct,
            ],
        );
        let bytes = bincode::serialize(&played).unwrap();
        let restored: PlayedWord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored, played);
    }
}
