//! Token-bucket admission control for outbound microphone chunks.
//!
//! Guards how fast audio chunks are handed to the transport. Beyond the
//! plain token bucket, admission adapts to the transport's reported buffer
//! backlog: a saturated buffer rejects outright without spending tokens,
//! and a moderately congested buffer demands extra token headroom. Tokens
//! are only consumed on the standard admission path, so the bucket stays
//! full while the system is shedding load and sending can resume the
//! moment congestion clears.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{MonotonicClock, SharedClock};

/// Dropped chunks are logged once every this many drops.
const DROP_LOG_INTERVAL: u64 = 20;

/// Construction options for the rate limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterOptions {
    /// Sustained admission rate. The bucket refills at
    /// `chunks_per_second / 1000` tokens per millisecond.
    pub chunks_per_second: f64,
    /// Bucket capacity, and therefore the largest admissible burst.
    pub burst_size: u32,
    /// Whether buffer-level congestion adaptation is enabled.
    pub adaptive: bool,
    /// Buffer backlog (bytes) above which chunks are rejected outright.
    pub high_buffer_threshold: usize,
    /// Buffer backlog (bytes) above which admission requires two available
    /// tokens instead of one.
    pub medium_buffer_threshold: usize,
}

impl Default for RateLimiterOptions {
    fn default() -> Self {
        Self {
            chunks_per_second: 15.0,
            burst_size: 5,
            adaptive: true,
            high_buffer_threshold: 128 * 1024,
            medium_buffer_threshold: 64 * 1024,
        }
    }
}

impl RateLimiterOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sustained admission rate in chunks per second.
    pub fn set_chunks_per_second(mut self, rate: f64) -> Self {
        self.chunks_per_second = rate;
        self
    }

    /// Set the bucket capacity.
    pub fn set_burst_size(mut self, burst: u32) -> Self {
        self.burst_size = burst;
        self
    }

    /// Disable congestion adaptation.
    pub fn without_adaptation(mut self) -> Self {
        self.adaptive = false;
        self
    }
}

/// Why a chunk was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No token available on the standard path.
    RateLimited,
    /// Moderate congestion; fewer than two tokens available.
    HighBuffer,
    /// Transport buffer saturated; rejected before any token check.
    BufferFull,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::RateLimited => "rate_limited",
            DropReason::HighBuffer => "high_buffer",
            DropReason::BufferFull => "buffer_full",
        }
    }
}

/// Outcome of a [`AudioChunkRateLimiter::can_send`] check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendVerdict {
    /// Send the chunk.
    Admitted,
    /// Drop the chunk. Not an error; an expected outcome under load.
    Rejected(DropReason),
}

impl SendVerdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, SendVerdict::Admitted)
    }
}

/// Cumulative counters for one limiter instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub total_chunks: u64,
    pub sent_chunks: u64,
    pub dropped_rate_limited: u64,
    pub dropped_high_buffer: u64,
    pub dropped_buffer_full: u64,
}

impl RateLimiterStats {
    /// All drops regardless of cause.
    pub fn total_dropped(&self) -> u64 {
        self.dropped_rate_limited + self.dropped_high_buffer + self.dropped_buffer_full
    }

    /// Percentage of seen chunks that were dropped. Zero when nothing has
    /// been seen.
    pub fn drop_rate(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        self.total_dropped() as f64 / self.total_chunks as f64 * 100.0
    }

    /// One-line summary for operator surfaces.
    pub fn summary(&self) -> String {
        format!(
            "Chunks - Total: {}, Sent: {}, Dropped: {} (rate: {}, high_buffer: {}, buffer_full: {}), Drop rate: {:.1}%",
            self.total_chunks,
            self.sent_chunks,
            self.total_dropped(),
            self.dropped_rate_limited,
            self.dropped_high_buffer,
            self.dropped_buffer_full,
            self.drop_rate()
        )
    }
}

/// Token-bucket rate limiter for outbound audio chunks.
///
/// Single-writer: one producer calls [`can_send`](Self::can_send)
/// sequentially per outbound frame. The check is O(1) and performs no I/O.
/// One instance per active outbound stream; call [`reset`](Self::reset) on
/// reconnect so a fresh connection does not inherit stale throttling.
pub struct AudioChunkRateLimiter {
    options: RateLimiterOptions,
    clock: SharedClock,
    tokens: f64,
    last_refill: Instant,
    stats: RateLimiterStats,
}

impl AudioChunkRateLimiter {
    /// Create a limiter with the default monotonic clock.
    pub fn new(options: RateLimiterOptions) -> Self {
        Self::with_clock(options, Arc::new(MonotonicClock))
    }

    /// Create a limiter with an injected clock.
    pub fn with_clock(options: RateLimiterOptions, clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            tokens: options.burst_size as f64,
            last_refill: now,
            options,
            clock,
            stats: RateLimiterStats::default(),
        }
    }

    /// Decide whether the next chunk may be sent.
    ///
    /// `buffer_level` is the transport's current outbound backlog in bytes,
    /// if known. The bucket is refilled first on every call.
    pub fn can_send(&mut self, buffer_level: Option<usize>) -> SendVerdict {
        self.refill();
        self.stats.total_chunks += 1;

        if self.options.adaptive {
            if let Some(level) = buffer_level {
                if level > self.options.high_buffer_threshold {
                    // Transport saturated; don't even spend a token
                    return self.reject(DropReason::BufferFull);
                }
                if level > self.options.medium_buffer_threshold && self.tokens < 2.0 {
                    return self.reject(DropReason::HighBuffer);
                }
            }
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            self.stats.sent_chunks += 1;
            SendVerdict::Admitted
        } else {
            self.reject(DropReason::RateLimited)
        }
    }

    /// Refill the bucket to full capacity. Used after reconnects, since
    /// stale throttling state should not penalize a fresh connection.
    pub fn reset(&mut self) {
        self.tokens = self.options.burst_size as f64;
        self.last_refill = self.clock.now();
        debug!("rate limiter reset to full bucket");
    }

    /// Zero the counters without disturbing in-flight throttling state.
    pub fn reset_stats(&mut self) {
        self.stats = RateLimiterStats::default();
    }

    /// Snapshot of the cumulative counters.
    pub fn stats(&self) -> RateLimiterStats {
        self.stats
    }

    /// Percentage of seen chunks that were dropped.
    pub fn drop_rate(&self) -> f64 {
        self.stats.drop_rate()
    }

    fn refill(&mut self) {
        let now = self.clock.now();
        let elapsed_ms = now.duration_since(self.last_refill).as_millis() as f64;
        if elapsed_ms > 0.0 {
            let refill_rate = self.options.chunks_per_second / 1000.0;
            self.tokens =
                (self.tokens + elapsed_ms * refill_rate).min(self.options.burst_size as f64);
            self.last_refill = now;
        }
    }

    fn reject(&mut self, reason: DropReason) -> SendVerdict {
        match reason {
            DropReason::RateLimited => self.stats.dropped_rate_limited += 1,
            DropReason::HighBuffer => self.stats.dropped_high_buffer += 1,
            DropReason::BufferFull => self.stats.dropped_buffer_full += 1,
        }

        let dropped = self.stats.total_dropped();
        if dropped % DROP_LOG_INTERVAL == 0 {
            debug!(
                "audio chunk dropped ({}): {}",
                reason.as_str(),
                self.stats.summary()
            );
        }

        SendVerdict::Rejected(reason)
    }
}
