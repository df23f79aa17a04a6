use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

/// Per SSRC state that survives re-creating a sender.
///
/// Handed across sessions as an opaque value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpState {
    /// Next sequence number to use.
    pub sequence_number: u16,
    /// Random offset added to all RTP timestamps.
    pub start_timestamp: u32,
    /// Whether the remote has acknowledged the SSRC. MID/RID are not needed after that.
    pub ssrc_has_acked: bool,
}

/// What RTX is used for. Combine flags with `|`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RtxMode(u8);

impl RtxMode {
    /// No RTX. Retransmissions are verbatim copies on the media SSRC.
    pub const OFF: RtxMode = RtxMode(0);
    /// Retransmissions are sent on the RTX SSRC.
    pub const RETRANSMITTED: RtxMode = RtxMode(0b01);
    /// Padding may be old payloads sent on the RTX SSRC.
    pub const REDUNDANT_PAYLOADS: RtxMode = RtxMode(0b10);

    /// Whether all flags of `other` are set.
    pub fn contains(&self, other: RtxMode) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// Whether no flags are set.
    pub fn is_off(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for RtxMode {
    type Output = RtxMode;

    fn bitor(self, rhs: Self) -> Self::Output {
        RtxMode(self.0 | rhs.0)
    }
}

impl fmt::Debug for RtxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_off() {
            return write!(f, "RtxMode(OFF)");
        }
        let mut names = vec![];
        if self.contains(RtxMode::RETRANSMITTED) {
            names.push("RETRANSMITTED");
        }
        if self.contains(RtxMode::REDUNDANT_PAYLOADS) {
            names.push("REDUNDANT_PAYLOADS");
        }
        write!(f, "RtxMode({})", names.join(" | "))
    }
}

/// Kind of media a sender sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    /// Audio, padding can be smaller than for video.
    Audio,
    /// Video, padding is only sent between frames.
    Video,
}

impl MediaKind {
    /// Whether this is audio.
    pub fn is_audio(&self) -> bool {
        matches!(self, MediaKind::Audio)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rtx_mode_flags() {
        let mode = RtxMode::RETRANSMITTED | RtxMode::REDUNDANT_PAYLOADS;
        assert!(mode.contains(RtxMode::RETRANSMITTED));
        assert!(mode.contains(RtxMode::REDUNDANT_PAYLOADS));
        assert!(!RtxMode::RETRANSMITTED.contains(RtxMode::REDUNDANT_PAYLOADS));
        assert!(!mode.contains(RtxMode::OFF));
        assert!(RtxMode::OFF.is_off());
        assert_eq!(
            format!("{:?}", mode),
            "RtxMode(RETRANSMITTED | REDUNDANT_PAYLOADS)"
        );
    }
}
