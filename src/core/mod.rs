pub mod pipeline;
pub mod rate_limit;
pub mod truncation;

// Re-export commonly used types for convenience
pub use pipeline::{
    AecMetrics, AecStateCallback, CaptureBackend, CaptureConstraints, CaptureError,
    CleanMicStream, DuplexPipeline, MicrophoneSource, NoiseSuppressionLevel, PipelineConfig,
    PipelineConfigUpdate, PipelineError, PipelineResult, PipelineState, StateChangeCallback,
    StubCapture,
};

pub use rate_limit::{
    AudioChunkRateLimiter, DropReason, RateLimiterOptions, RateLimiterStats, SendVerdict,
};

pub use truncation::{
    find_best_truncation_point, TruncationCallback, TruncationConfig, TruncationEngine,
    TruncationInfo, TruncationKind,
};
