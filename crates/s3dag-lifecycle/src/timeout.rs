//! Lock-wait timeout that adapts to observed contention.

use std::time::Duration;

use parking_lot::Mutex;

/// Attempts recorded before the timeout is reconsidered.
const LOG_SIZE: usize = 16;
/// Grow when more than this share of attempts timed out.
const INCREASE_THRESHOLD: f64 = 0.33;
/// Shrink when fewer than this share of attempts timed out.
const DECREASE_THRESHOLD: f64 = 0.10;

struct Inner {
    timeout: Duration,
    /// `None` marks a timed-out attempt.
    log: Vec<Option<Duration>>,
}

/// A timeout that tracks how long lock acquisitions actually take.
///
/// Every sixteen attempts the log is evaluated: frequent timeouts grow
/// the timeout by a quarter; rare ones move it halfway toward 1.25 times the
/// slowest success. It never drops below `minimum`.
pub struct DynamicTimeout {
    minimum: Duration,
    inner: Mutex<Inner>,
}

impl DynamicTimeout {
    pub fn new(timeout: Duration, minimum: Duration) -> Self {
        Self {
            minimum,
            inner: Mutex::new(Inner {
                timeout: timeout.max(minimum),
                log: Vec::with_capacity(LOG_SIZE),
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.inner.lock().timeout
    }

    pub fn minimum(&self) -> Duration {
        self.minimum
    }

    /// Record an acquisition that took `elapsed`.
    pub fn log_success(&self, elapsed: Duration) {
        self.record(Some(elapsed));
    }

    /// Record an acquisition that timed out.
    pub fn log_failure(&self) {
        self.record(None);
    }

    fn record(&self, entry: Option<Duration>) {
        let mut inner = self.inner.lock();
        inner.log.push(entry);
        if inner.log.len() < LOG_SIZE {
            return;
        }
        let log = std::mem::take(&mut inner.log);
        let before = inner.timeout;
        inner.timeout = self.adjust(inner.timeout, &log);
        if inner.timeout != before {
            tracing::debug!(
                from_ms = before.as_millis() as u64,
                to_ms = inner.timeout.as_millis() as u64,
                "lock timeout adjusted"
            );
        }
    }

    fn adjust(&self, current: Duration, log: &[Option<Duration>]) -> Duration {
        let failures = log.iter().filter(|e| e.is_none()).count();
        let slowest = log.iter().flatten().max().copied().unwrap_or_default();
        let fail_ratio = failures as f64 / log.len() as f64;

        let next = if fail_ratio > INCREASE_THRESHOLD {
            current * 5 / 4
        } else if fail_ratio < DECREASE_THRESHOLD {
            let target = slowest * 5 / 4;
            if target < current {
                (target + current) / 2
            } else {
                current
            }
        } else {
            current
        };
        next.max(self.minimum)
    }
}

impl std::fmt::Debug for DynamicTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicTimeout")
            .field("timeout", &self.timeout())
            .field("minimum", &self.minimum)
            .finish()
    }
}
