//! Clean-cut boundary search for interrupted utterances.
//!
//! Given the full planned text and an estimate of how far speech got, the
//! search walks backward looking for the most natural place to cut,
//! preferring sentence ends over clause breaks over word gaps. Positions
//! are character indices, not byte offsets.

/// How an utterance was cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationKind {
    /// Cut immediately after a sentence terminator.
    Sentence,
    /// Cut immediately after clause punctuation.
    Phrase,
    /// Cut at a word gap.
    Word,
    /// Cut inside a word; no boundary was close enough.
    MidWord,
    /// Nothing was spoken; cut at the very start.
    Immediate,
}

impl TruncationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TruncationKind::Sentence => "sentence",
            TruncationKind::Phrase => "phrase",
            TruncationKind::Word => "word",
            TruncationKind::MidWord => "mid_word",
            TruncationKind::Immediate => "immediate",
        }
    }

    /// Sentence and phrase cuts land on linguistically clean boundaries.
    pub fn is_graceful(&self) -> bool {
        matches!(self, TruncationKind::Sentence | TruncationKind::Phrase)
    }
}

/// Lookback window for sentence terminators.
const SENTENCE_LOOKBACK: usize = 50;
/// Lookback window for clause punctuation.
const CLAUSE_LOOKBACK: usize = 30;
/// Lookback window for word gaps.
const WORD_LOOKBACK: usize = 15;

/// Find the best cut position at or before `approx_position`.
///
/// The position is clamped to the text length. Sentence terminators are cut
/// *after*; a `.` directly followed by a lowercase letter is treated as an
/// abbreviation and skipped. Clause punctuation is cut after; a word gap is
/// cut *at* the space. Returns the character index of the cut and the
/// boundary class found.
pub fn find_best_truncation_point(text: &str, approx_position: usize) -> (usize, TruncationKind) {
    let chars: Vec<char> = text.chars().collect();
    let position = approx_position.min(chars.len());

    if position == 0 {
        return (0, TruncationKind::Immediate);
    }

    let start = position.saturating_sub(SENTENCE_LOOKBACK);
    for i in (start..position).rev() {
        match chars[i] {
            '!' | '?' => return (i + 1, TruncationKind::Sentence),
            '.' => {
                // Abbreviation like "Dr." or "e.g." when a lowercase letter
                // follows directly
                if let Some(next) = chars.get(i + 1) {
                    if next.is_lowercase() {
                        continue;
                    }
                }
                return (i + 1, TruncationKind::Sentence);
            }
            _ => {}
        }
    }

    let start = position.saturating_sub(CLAUSE_LOOKBACK);
    for i in (start..position).rev() {
        if matches!(chars[i], ',' | ';' | ':') {
            return (i + 1, TruncationKind::Phrase);
        }
    }

    let start = position.saturating_sub(WORD_LOOKBACK);
    for i in (start..position).rev() {
        if chars[i] == ' ' {
            return (i, TruncationKind::Word);
        }
    }

    (position, TruncationKind::MidWord)
}

/// Split `text` at a character index into spoken and unspoken halves.
pub fn split_at_char(text: &str, position: usize) -> (String, String) {
    let mut spoken = String::with_capacity(text.len());
    let mut unspoken = String::new();
    for (i, c) in text.chars().enumerate() {
        if i < position {
            spoken.push(c);
        } else {
            unspoken.push(c);
        }
    }
    (spoken, unspoken)
}
