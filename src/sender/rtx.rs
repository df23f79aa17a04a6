use crate::pacer::PacingSink;
use crate::rtp::{write_original_sequence_number, Extension, RtpPacket, RTX_HEADER_SIZE};

use super::RtpSender;

impl<P: PacingSink> RtpSender<P> {
    /// Wrap a packet for the RTX SSRC (RFC 4588).
    ///
    /// The payload is the original sequence number followed by the original payload.
    /// `None` if not sending media, RTX is not configured for the payload type, or the
    /// result would not fit the max packet size.
    pub(crate) fn build_rtx_packet(&mut self, packet: &RtpPacket) -> Option<RtpPacket> {
        if !self.sending_media {
            return None;
        }

        let Some(rtx_ssrc) = self.rtx_ssrc else {
            debug!("No RTX SSRC configured");
            return None;
        };

        let Some(rtx_pt) = self.rtx_payload_type_map.get(&packet.payload_type()).copied() else {
            debug!("No RTX payload type for: {}", packet.payload_type());
            return None;
        };

        let mut rtx = RtpPacket::new(&self.exts, self.max_packet_size);
        rtx.set_payload_type(rtx_pt);
        rtx.set_ssrc(rtx_ssrc);

        if !self.copy_header_and_extensions_to_rtx(packet, &mut rtx) {
            return None;
        }

        // RTX has its own MID/RID decision, independent of the media SSRC.
        if self.always_send_mid_and_rid || !self.rtx_ssrc_has_acked {
            // No-ops if not registered.
            rtx.set_mid(self.mid);
            rtx.set_repaired_rid(self.rid);
        }

        let mut payload = vec![0; RTX_HEADER_SIZE + packet.payload_size()];
        write_original_sequence_number(&mut payload, packet.sequence_number());
        payload[RTX_HEADER_SIZE..].copy_from_slice(packet.payload());

        if !rtx.set_payload(&payload) {
            return None;
        }

        if let Some(t) = packet.capture_time() {
            rtx.set_capture_time(t);
        }

        rtx.set_sequence_number(self.sequence_number_rtx);
        self.sequence_number_rtx = self.sequence_number_rtx.wrapping_add(1);

        Some(rtx)
    }

    fn copy_header_and_extensions_to_rtx(&self, packet: &RtpPacket, rtx: &mut RtpPacket) -> bool {
        rtx.set_marker(packet.marker());
        rtx.set_timestamp(packet.timestamp());

        if !rtx.set_csrcs(packet.csrcs()) {
            return false;
        }

        for (ext, value) in packet.extensions() {
            // MID and RID are decided separately for RTX.
            if matches!(ext, Extension::RtpMid | Extension::RtpStreamId)
                || !rtx.extension_map().is_registered(ext)
            {
                continue;
            }
            if !rtx.set_extension(ext, value) {
                return false;
            }
        }

        true
    }
}
