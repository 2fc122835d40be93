use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::PositionError;

/// One coordinate fix from a position source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub lat: f64,
    pub lng: f64,
    /// When the fix was taken, epoch ms, if the source reports it.
    pub recorded_at: Option<i64>,
}

/// How a continuous watch should behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Only deliver samples backed by a real satellite fix.
    pub high_accuracy: bool,
    /// Longest wait for the next sample before reporting a timeout.
    pub timeout: Duration,
    /// Oldest cached sample that may be reused. Zero disables reuse.
    pub maximum_age: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_secs(5),
            maximum_age: Duration::ZERO,
        }
    }
}

/// Continuous sequence of samples. Dropping it cancels the watch.
pub type PositionStream = BoxStream<'static, Result<PositionSample, PositionError>>;

#[async_trait]
pub trait PositionSource: Send + Sync {
    fn is_available(&self) -> bool;

    async fn watch(&self, options: WatchOptions) -> Result<PositionStream, PositionError>;
}
