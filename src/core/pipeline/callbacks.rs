//! Callback types for pipeline state notifications.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::state::{AecMetrics, PipelineState};

/// Callback invoked when the pipeline's lifecycle or activity flags change.
pub type StateChangeCallback =
    Arc<dyn Fn(PipelineState) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback invoked when echo-cancellation metrics change meaningfully.
pub type AecStateCallback =
    Arc<dyn Fn(AecMetrics) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
