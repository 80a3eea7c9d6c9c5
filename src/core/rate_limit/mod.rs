//! Congestion-adaptive flow control for outbound audio.

mod limiter;

pub use limiter::{
    AudioChunkRateLimiter, DropReason, RateLimiterOptions, RateLimiterStats, SendVerdict,
};
