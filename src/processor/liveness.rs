/// A record older than this is stale.
pub const ACTIVE_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Whether a record written at `timestamp` is still live at `now` (both epoch ms).
///
/// The comparison is strict: a record exactly [`ACTIVE_WINDOW_MS`] old is stale.
/// Timestamps ahead of `now` count as active.
pub fn is_active(timestamp: i64, now: i64) -> bool {
    now.saturating_sub(timestamp) < ACTIVE_WINDOW_MS
}

/// Source of the current wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
