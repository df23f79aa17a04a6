use std::time::{Duration, Instant};

use crate::rtp::{Bitrate, DataSize};
use crate::util::WindowSum;

/// Limits the rate of retransmissions over a sliding window.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_rate: Bitrate,
    history: WindowSum<DataSize>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_rate` over a 1 second window.
    pub fn new(max_rate: Bitrate) -> Self {
        Self::with_window(max_rate, Duration::from_secs(1))
    }

    /// Create a limiter allowing `max_rate` over `window`.
    pub fn with_window(max_rate: Bitrate, window: Duration) -> Self {
        RateLimiter {
            max_rate,
            history: WindowSum::new(window),
        }
    }

    /// Change the max rate. Past usage is kept.
    pub fn set_max_rate(&mut self, max_rate: Bitrate) {
        self.max_rate = max_rate;
    }

    /// The max rate.
    pub fn max_rate(&self) -> Bitrate {
        self.max_rate
    }

    /// Try to use `bytes` at `now`.
    ///
    /// Returns false and records nothing if it would make the rate over the
    /// window exceed the max rate.
    pub fn try_use_rate(&mut self, bytes: usize, now: Instant) -> bool {
        self.history.expire(now);

        let allowed = self.max_rate * self.history.window();
        let used = self.history.total() + DataSize::from(bytes);

        if used > allowed {
            trace!(
                "Rate limited {} bytes, {} used of {} ({})",
                bytes,
                self.history.total(),
                allowed,
                self.max_rate
            );
            return false;
        }

        self.history.add(now, DataSize::from(bytes));
        true
    }
}
