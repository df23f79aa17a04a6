use std::collections::VecDeque;
use std::ops::{AddAssign, SubAssign};
use std::time::{Duration, Instant};

/// Running total of timestamped samples over a trailing window.
///
/// Samples must be added in non-decreasing time order.
#[derive(Debug, Clone)]
pub(crate) struct WindowSum<T> {
    window: Duration,
    total: T,
    samples: VecDeque<(Instant, T)>,
}

impl<T> WindowSum<T>
where
    T: Copy + Default + AddAssign + SubAssign,
{
    /// Empty, covering `window`.
    pub fn new(window: Duration) -> Self {
        WindowSum {
            window,
            total: T::default(),
            samples: VecDeque::new(),
        }
    }

    /// The window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Add a sample.
    pub fn add(&mut self, at: Instant, value: T) {
        self.total += value;
        self.samples.push_back((at, value));
    }

    /// Total of the samples still held. Call [`WindowSum::expire`] first for
    /// an up to date value.
    pub fn total(&self) -> T {
        self.total
    }

    /// Drop samples that are `window` or more older than `now`.
    pub fn expire(&mut self, now: Instant) {
        while let Some(&(at, value)) = self.samples.front() {
            if now.saturating_duration_since(at) < self.window {
                break;
            }
            self.total -= value;
            self.samples.pop_front();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn samples_leave_the_window() {
        let t0 = Instant::now();
        let ms = Duration::from_millis;
        let mut w = WindowSum::new(ms(1000));

        w.add(t0, 10_u64);
        w.add(t0 + ms(300), 20);
        w.add(t0 + ms(600), 30);
        assert_eq!(w.total(), 60);

        w.expire(t0 + ms(999));
        assert_eq!(w.total(), 60);

        w.expire(t0 + ms(1000));
        assert_eq!(w.total(), 50);

        w.expire(t0 + ms(1600));
        assert_eq!(w.total(), 0);
    }
}
