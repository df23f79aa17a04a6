use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, SubAssign};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bits per second.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Bitrate(u64);

impl Bitrate {
    /// No bits at all.
    pub const ZERO: Bitrate = Bitrate(0);

    /// Bits per second.
    pub const fn bps(bps: u64) -> Bitrate {
        Bitrate(bps)
    }

    /// Kilobits per second.
    pub const fn kbps(kbps: u64) -> Bitrate {
        Bitrate(kbps * 1_000)
    }

    /// Megabits per second.
    pub const fn mbps(mbps: u64) -> Bitrate {
        Bitrate(mbps * 1_000_000)
    }

    /// The rate in bits per second.
    pub fn as_bps(&self) -> u64 {
        self.0
    }

    /// Whether the rate is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for Bitrate {
    fn from(bps: u64) -> Self {
        Bitrate(bps)
    }
}

/// How many bytes the rate allows over a duration, rounded down.
impl Mul<Duration> for Bitrate {
    type Output = DataSize;

    fn mul(self, window: Duration) -> DataSize {
        let bits = self.0 as u128 * window.as_micros() / 1_000_000;
        DataSize((bits / 8).min(u64::MAX as u128) as u64)
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0..=999 => write!(f, "{}bit/s", self.0),
            1_000..=999_999 => write!(f, "{:.3}kbit/s", self.0 as f64 / 1e3),
            _ => write!(f, "{:.3}Mbit/s", self.0 as f64 / 1e6),
        }
    }
}

/// A byte count.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataSize(u64);

impl DataSize {
    /// Zero bytes.
    pub const ZERO: DataSize = DataSize(0);

    /// A size in bytes.
    pub const fn bytes(bytes: u64) -> DataSize {
        DataSize(bytes)
    }

    /// The size in bytes.
    pub fn as_bytes(&self) -> u64 {
        self.0
    }
}

impl From<usize> for DataSize {
    fn from(bytes: usize) -> Self {
        DataSize(bytes as u64)
    }
}

impl Add for DataSize {
    type Output = DataSize;

    fn add(self, rhs: DataSize) -> DataSize {
        DataSize(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for DataSize {
    fn add_assign(&mut self, rhs: DataSize) {
        *self = *self + rhs;
    }
}

impl SubAssign for DataSize {
    fn sub_assign(&mut self, rhs: DataSize) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

impl Sum for DataSize {
    fn sum<I: Iterator<Item = DataSize>>(iter: I) -> Self {
        iter.fold(DataSize::ZERO, Add::add)
    }
}

impl fmt::Display for DataSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}B", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_picks_unit() {
        assert_eq!(Bitrate::bps(800).to_string(), "800bit/s");
        assert_eq!(Bitrate::bps(64_500).to_string(), "64.500kbit/s");
        assert_eq!(Bitrate::mbps(2).to_string(), "2.000Mbit/s");
    }

    #[test]
    fn bytes_allowed_in_window() {
        assert_eq!(Bitrate::kbps(8) * Duration::from_secs(1), DataSize::bytes(1_000));
        assert_eq!(Bitrate::kbps(8) * Duration::from_millis(500), DataSize::bytes(500));
        assert_eq!(Bitrate::bps(7) * Duration::from_secs(1), DataSize::ZERO);
    }

    #[test]
    fn size_never_goes_negative() {
        let mut s = DataSize::bytes(10);
        s -= DataSize::bytes(25);
        assert_eq!(s, DataSize::ZERO);
    }
}
