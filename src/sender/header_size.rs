use crate::pacer::PacingSink;
use crate::rtp::{Extension, ExtensionSize, FIXED_HEADER_SIZE, RTX_HEADER_SIZE};
use crate::rtp::{AUDIO_EXTENSION_SIZES, FEC_OR_PADDING_EXTENSION_SIZES, VIDEO_EXTENSION_SIZES};

use super::RtpSender;

impl<P: PacingSink> RtpSender<P> {
    /// Recalculate the worst case header sizes.
    ///
    /// Called whenever extensions, CSRC, MID or ack state change.
    pub(crate) fn update_header_sizes(&mut self) {
        let rtp_header_length = FIXED_HEADER_SIZE + 4 * self.csrcs.len();

        self.max_padding_fec_packet_header =
            rtp_header_length + self.exts.header_extension_size(FEC_OR_PADDING_EXTENSION_SIZES);

        // MID, RID and repaired RID are only counted while they are being sent.
        // Repaired RID shares space with RID, and is counted separately only when
        // the media SSRC is acked, but the RTX SSRC is not.
        let send_mid_rid_on_rtx =
            self.rtx_ssrc.is_some() && (self.always_send_mid_and_rid || !self.rtx_ssrc_has_acked);
        let send_mid_rid = self.always_send_mid_and_rid || !self.ssrc_has_acked;

        let table = if self.kind.is_audio() {
            AUDIO_EXTENSION_SIZES
        } else {
            VIDEO_EXTENSION_SIZES
        };

        let non_volatile: Vec<ExtensionSize> = table
            .iter()
            .filter(|s| s.ext.is_non_volatile())
            .filter(|s| match s.ext {
                Extension::RtpMid => (send_mid_rid || send_mid_rid_on_rtx) && !self.mid.is_empty(),
                Extension::RtpStreamId => send_mid_rid && !self.rid.is_empty(),
                Extension::RepairedRtpStreamId => {
                    send_mid_rid_on_rtx && !send_mid_rid && !self.rid.is_empty()
                }
                _ => true,
            })
            .copied()
            .collect();

        self.max_media_packet_header =
            rtp_header_length + self.exts.header_extension_size(&non_volatile);

        // Room for the original sequence number if the packet is resent over RTX.
        if self.rtx_ssrc.is_some() {
            self.max_media_packet_header += RTX_HEADER_SIZE;
        }
    }

    /// Worst case header size of padding and FEC packets.
    pub fn max_padding_fec_packet_header(&self) -> usize {
        self.max_padding_fec_packet_header
    }

    /// Worst case header size of media packets.
    pub fn max_media_packet_header(&self) -> usize {
        self.max_media_packet_header
    }
}
