//! Acknowledgment and continuation text for interrupted utterances.

use super::engine::TruncationInfo;

/// Cues asking the assistant to stop talking.
const STOP_CUES: [&str; 5] = ["stop", "wait", "hold on", "pause", "hang on"];

/// Openers that add to what was being said.
const ADDITIVE_CUES: [&str; 5] = ["actually", "also", "and", "but", "however"];

/// Openers that correct what was being said.
const CORRECTION_CUES: [&str; 4] = ["no", "not", "wrong", "incorrect"];

/// Spoken-text tail included in the continuation prompt.
const SPOKEN_CONTEXT_CHARS: usize = 100;

/// Unspoken-text head included in the continuation prompt.
const UNSPOKEN_CONTEXT_CHARS: usize = 200;

/// Pick a short lead-in phrase from lexical cues in the interrupting
/// utterance.
///
/// Cues are checked in priority order: stop requests, questions, additive
/// openers, correction openers. With no cue matched, a graceful cut needs
/// no lead-in at all and an abrupt one gets a minimal acknowledgment.
pub fn acknowledgment(user_utterance: &str, last_cut_was_graceful: bool) -> Option<String> {
    let normalized = user_utterance.trim().to_lowercase();

    if STOP_CUES.iter().any(|cue| normalized.contains(cue)) {
        return Some("Sorry, I'll stop there.".to_string());
    }
    if normalized.contains('?') {
        return Some("Sure.".to_string());
    }
    if ADDITIVE_CUES.iter().any(|cue| normalized.starts_with(cue)) {
        return Some("Go ahead.".to_string());
    }
    if CORRECTION_CUES.iter().any(|cue| normalized.starts_with(cue)) {
        return Some("Got it.".to_string());
    }

    if last_cut_was_graceful {
        None
    } else {
        Some("Okay.".to_string())
    }
}

/// Build a generation prompt asking the assistant to pick up where its
/// utterance was cut.
pub fn continuation_prompt(info: &TruncationInfo) -> String {
    let spoken_tail = tail_chars(&info.spoken_text, SPOKEN_CONTEXT_CHARS);
    let unspoken_head = head_chars_with_ellipsis(&info.unspoken_text, UNSPOKEN_CONTEXT_CHARS);

    format!(
        "Continue from where you were interrupted. You had said: \"{spoken_tail}\" \
         and were about to say: \"{unspoken_head}\". Pick up the thought naturally \
         without repeating what was already said."
    )
}

fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    text.chars().skip(count - max).collect()
}

fn head_chars_with_ellipsis(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{head}...")
}
