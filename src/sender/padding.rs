use std::time::Instant;

use crate::pacer::PacingSink;
use crate::rtp::{Extension, RtpPacket, RtpPacketType, RTX_HEADER_SIZE};

use super::RtpSender;

/// Max size of a padding-only packet payload.
pub const MAX_PADDING_LENGTH: usize = 224;

/// Min size of a padding-only audio packet payload.
pub const MIN_AUDIO_PADDING_LENGTH: usize = 50;

/// Redundant payload padding is not attempted for budgets below this.
pub const MIN_PAYLOAD_PADDING_BYTES: usize = 50;

/// Redundant payload padding may generate at most this factor times the target.
pub const MAX_PADDING_SIZE_FACTOR: f64 = 3.0;

impl<P: PacingSink> RtpSender<P> {
    /// Generate padding packets for roughly `target_size_bytes`.
    ///
    /// When supported, old payloads are first resent on the RTX SSRC. Any remaining
    /// budget is filled with padding-only packets. The result may be empty.
    pub fn generate_padding(
        &mut self,
        target_size_bytes: usize,
        media_has_been_sent: bool,
        can_send_padding_on_media_ssrc: bool,
        now: Instant,
    ) -> Vec<RtpPacket> {
        let mut padding_packets = vec![];
        let mut bytes_left = target_size_bytes;

        if self.supports_rtx_payload_padding() {
            // Limit overshoot, generate <= MAX_PADDING_SIZE_FACTOR * target.
            let max_overshoot_bytes =
                ((MAX_PADDING_SIZE_FACTOR - 1.0) * target_size_bytes as f64 + 0.5) as usize;

            let history = self.history.clone();

            while bytes_left >= MIN_PAYLOAD_PADDING_BYTES {
                let packet = history.get_payload_padding_packet(
                    |stored| {
                        if stored.payload_size() + RTX_HEADER_SIZE > max_overshoot_bytes + bytes_left
                        {
                            return None;
                        }
                        self.build_rtx_packet(stored)
                    },
                    now,
                );

                let Some(mut packet) = packet else {
                    break;
                };

                bytes_left -= bytes_left.min(packet.payload_size());
                packet.set_packet_type(RtpPacketType::Padding);
                padding_packets.push(packet);
            }
        }

        if !self.sending_media {
            return vec![];
        }

        let max_payload_size = self
            .max_packet_size
            .saturating_sub(self.max_padding_fec_packet_header);

        let padding_bytes_in_packet = if self.kind.is_audio() {
            // Allow smaller padding packets for audio.
            bytes_left
                .max(MIN_AUDIO_PADDING_LENGTH)
                .min(max_payload_size.min(MAX_PADDING_LENGTH))
        } else {
            // Always full padding packets, to avoid many small packets.
            max_payload_size.min(MAX_PADDING_LENGTH)
        };

        if padding_bytes_in_packet == 0 {
            return padding_packets;
        }

        while bytes_left > 0 {
            let mut padding = RtpPacket::new(&self.exts, self.max_packet_size);
            padding.set_packet_type(RtpPacketType::Padding);
            padding.set_marker(false);
            padding.set_timestamp(self.last_timestamp);
            padding.set_capture_time(now);

            if self.rtx_mode.is_off() {
                if !can_send_padding_on_media_ssrc && !media_has_been_sent {
                    trace!("No padding on media SSRC before media");
                    break;
                }
                // Without RTX, padding can't go in the middle of a video frame.
                if !self.kind.is_audio() && !self.last_packet_marker_bit {
                    trace!("No padding on media SSRC mid frame");
                    break;
                }
                let Some(pt) = self.last_payload_type else {
                    trace!("No padding on media SSRC without payload type");
                    break;
                };
                padding.set_ssrc(self.ssrc);
                padding.set_payload_type(pt);
                padding.set_sequence_number(self.sequence_number);
            } else {
                // Without abs-send-time or transport sequence number a media packet
                // must be sent before padding so the receiver can place it in time.
                if !media_has_been_sent
                    && !(self.exts.is_registered(Extension::AbsoluteSendTime)
                        || self.exts.is_registered(Extension::TransportSequenceNumber))
                {
                    trace!("No RTX padding before media without send time extension");
                    break;
                }
                let (Some(rtx_ssrc), Some(rtx_pt)) = (
                    self.rtx_ssrc,
                    self.rtx_payload_type_map.values().next().copied(),
                ) else {
                    break;
                };
                padding.set_ssrc(rtx_ssrc);
                padding.set_payload_type(rtx_pt);
                padding.set_sequence_number(self.sequence_number_rtx);
            }

            // No-ops if not registered.
            padding.reserve_extension(Extension::TransportSequenceNumber);
            padding.reserve_extension(Extension::TransmissionTimeOffset);
            padding.reserve_extension(Extension::AbsoluteSendTime);

            if !padding.set_padding(padding_bytes_in_packet) {
                break;
            }

            if padding.ssrc() == self.ssrc {
                self.sequence_number = self.sequence_number.wrapping_add(1);
            } else {
                self.sequence_number_rtx = self.sequence_number_rtx.wrapping_add(1);
            }

            bytes_left -= bytes_left.min(padding_bytes_in_packet);
            padding_packets.push(padding);
        }

        padding_packets
    }
}
