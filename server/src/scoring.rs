//! Duplicate-aware comparison of a guess against the target word.

use shared::word::ALPHABET_SIZE;
use shared::{LetterState, PackedWord, WORD_LENGTH};

/// Scores `guess` against `target`.
///
/// Exact matches are marked first. Every unmatched target letter is then
/// available once, left to right, to mark a misplaced guess letter as
/// `Present`; anything left over is `Absent`. A letter therefore never
/// collects more `Correct` + `Present` marks than it occurs in the target.
pub fn score(guess: PackedWord, target: PackedWord) -> [LetterState; WORD_LENGTH] {
    if guess == target {
        return [LetterState::Correct; WORD_LENGTH];
    }

    let guess = guess.letters();
    let target = target.letters();
    let mut result = [LetterState::Absent; WORD_LENGTH];
    let mut unmatched = [0u8; ALPHABET_SIZE];

    for i in 0..WORD_LENGTH {
        if guess[i] == target[i] {
            result[i] = LetterState::Correct;
        } else {
            unmatched[target[i] as usize] += 1;
        }
    }

    for i in 0..WORD_LENGTH {
        if result[i] == LetterState::Correct {
            continue;
        }
        let available = &mut unmatched[guess[i] as usize];
        if *available > 0 {
            result[i] = LetterState::Present;
            *available -= 1;
        }
    }

    result
}
