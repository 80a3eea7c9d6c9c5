//! Utterance truncation for barge-in handling.
//!
//! Computes where an interrupted assistant utterance should be cut, what
//! acknowledgment fits the interruption, and how to prompt for a
//! continuation of the unspoken remainder.

pub mod boundary;
mod engine;
mod prompts;

pub use boundary::{find_best_truncation_point, split_at_char, TruncationKind};
pub use engine::{TruncationCallback, TruncationConfig, TruncationEngine, TruncationInfo};
pub use prompts::{acknowledgment, continuation_prompt};
