//! Word list used to validate votes and to pick target words.

use crate::error::{Result, ServerError};
use log::{debug, info};
use rand::seq::SliceRandom;
use shared::PackedWord;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

const BUILTIN_WORDS: &str = include_str!("../words.txt");

/// Source of target words and membership checks for votes.
pub trait WordProvider: Send + Sync {
    /// Picks the target for the next game.
    fn next_target(&self) -> PackedWord;

    /// Whether `word` may be voted for. The sentinel is never known.
    fn is_known(&self, word: PackedWord) -> bool;
}

struct Deck {
    words: Vec<PackedWord>,
    next: usize,
}

/// In-memory dictionary. Targets are dealt from a shuffled deck which is
/// reshuffled once every word has been used.
pub struct Dictionary {
    known: HashSet<PackedWord>,
    deck: Mutex<Deck>,
}

impl Dictionary {
    /// Builds a dictionary from raw lines, keeping only lowercase five-letter
    /// words.
    pub fn from_words<'a, I>(lines: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut words: Vec<PackedWord> = lines
            .into_iter()
            .filter_map(|line| line.trim().parse::<PackedWord>().ok())
            .filter(|word| !word.is_none())
            .collect();
        words.sort_unstable();
        words.dedup();

        if words.is_empty() {
            return Err(ServerError::Dictionary("no valid words found".into()));
        }

        let known = words.iter().copied().collect();
        words.shuffle(&mut rand::thread_rng());

        Ok(Self {
            known,
            deck: Mutex::new(Deck { words, next: 0 }),
        })
    }

    pub fn builtin() -> Result<Self> {
        Self::from_words(BUILTIN_WORDS.lines())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let dictionary = Self::from_words(contents.lines())?;
        info!(
            "Loaded {} words from {}",
            dictionary.len(),
            path.display()
        );
        Ok(dictionary)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

impl WordProvider for Dictionary {
    fn next_target(&self) -> PackedWord {
        let mut deck = self.deck.lock().unwrap_or_else(PoisonError::into_inner);
        if deck.next >= deck.words.len() {
            deck.words.shuffle(&mut rand::thread_rng());
            deck.next = 0;
        }

        let word = deck.words[deck.next];
        deck.next += 1;
        debug!("Selected target word {}", word);
        word
    }

    fn is_known(&self, word: PackedWord) -> bool {
        !word.is_none() && self.known.contains(&word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_filters_invalid_lines() {
        let dictionary =
            Dictionary::from_words(["apple", "Apple", "toolong", "abc", " crane ", "ap1le", ""])
                .unwrap();
        assert_eq!(dictionary.len(), 2);
        assert!(dictionary.is_known(PackedWord::pack("apple")));
        assert!(dictionary.is_known(PackedWord::pack("crane")));
    }

    #[test]
    fn test_sentinel_is_never_known() {
        let dictionary = Dictionary::from_words(["aaaaa", "apple"]).unwrap();
        assert_eq!(dictionary.len(), 1);
        assert!(!dictionary.is_known(PackedWord::NONE));
    }

    #[test]
    fn test_empty_dictionary_is_an_error() {
        let result = Dictionary::from_words(["nope", "12345"]);
        assert!(matches!(result, Err(ServerError::Dictionary(_))));
    }

    #[test]
    fn test_deck_deals_every_word_before_repeating() {
        let words = ["apple", "crane", "slate", "trace"];
        let dictionary = Dictionary::from_words(words).unwrap();

        let first_pass: HashSet<_> = (0..words.len()).map(|_| dictionary.next_target()).collect();
        assert_eq!(first_pass.len(), words.len());

        let second_pass: HashSet<_> = (0..words.len()).map(|_| dictionary.next_target()).collect();
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn test_builtin_list_loads() {
        let dictionary = Dictionary::builtin().unwrap();
        assert!(dictionary.len() > 100);
        assert!(dictionary.is_known(PackedWord::pack("apple")));
        assert!(!dictionary.is_known(PackedWord::pack("zzzzz")));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let result = Dictionary::load(Path::new("/definitely/not/here.txt"));
        assert!(matches!(result, Err(ServerError::Io(_))));
    }
}
