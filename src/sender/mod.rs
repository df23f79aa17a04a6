//! Building media, retransmission and padding packets for one SSRC.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::history::PacketHistory;
use crate::pacer::PacingSink;
use crate::rtp::{Bitrate, Extension, ExtensionMap, Mid, Pt, Rid, RtpPacket, RtpPacketType, Ssrc};
use crate::SenderConfig;

mod header_size;

mod padding;
pub use padding::{MAX_PADDING_LENGTH, MAX_PADDING_SIZE_FACTOR};
pub use padding::{MIN_AUDIO_PADDING_LENGTH, MIN_PAYLOAD_PADDING_BYTES};

mod rate_limiter;
pub use rate_limiter::RateLimiter;

mod rtx;

mod state;
pub use state::{MediaKind, RtpState, RtxMode};

/// Max IP packet size.
pub const IP_PACKET_SIZE: usize = 1500;

/// Smallest allowed max packet size.
pub const MIN_PACKET_SIZE: usize = 100;

/// Default max packet size, IP packet size minus IPv4 and UDP headers.
pub const DEFAULT_MAX_PACKET_SIZE: usize = IP_PACKET_SIZE - 28;

/// Added to the average RTT when a NACK arrives.
const NACK_RTT_MARGIN: Duration = Duration::from_millis(5);

/// Sender of RTP packets for one media SSRC and optionally its RTX SSRC.
///
/// The sender is confined to one owner. Use [`crate::worker::Worker`] to reach
/// it from other threads. The [`PacketHistory`] is shared with whoever marks
/// packets as sent.
pub struct RtpSender<P> {
    kind: MediaKind,
    ssrc: Ssrc,
    rtx_ssrc: Option<Ssrc>,
    max_packet_size: usize,

    history: Arc<PacketHistory>,
    pacer: P,
    retransmission_rate_limiter: Option<RateLimiter>,

    exts: ExtensionMap,
    supports_bwe_extension: bool,
    max_padding_fec_packet_header: usize,
    max_media_packet_header: usize,

    sending_media: bool,
    sequence_number: u16,
    sequence_number_rtx: u16,
    ssrc_has_acked: bool,
    rtx_ssrc_has_acked: bool,

    // Remembered from the last media packet, for padding.
    last_payload_type: Option<Pt>,
    last_timestamp: u32,
    last_packet_marker_bit: bool,

    timestamp_offset: u32,
    csrcs: Vec<u32>,
    rtx_mode: RtxMode,
    // associated payload type -> rtx payload type.
    rtx_payload_type_map: BTreeMap<Pt, Pt>,

    mid: Mid,
    rid: Rid,
    always_send_mid_and_rid: bool,
}

impl<P: PacingSink> RtpSender<P> {
    pub(crate) fn new(config: &SenderConfig, history: Arc<PacketHistory>, pacer: P) -> Self {
        let mut sender = RtpSender {
            kind: config.media_kind(),
            ssrc: config.ssrc(),
            rtx_ssrc: config.rtx_ssrc(),
            max_packet_size: config.max_packet_size(),

            history,
            pacer,
            retransmission_rate_limiter: config.max_retransmission_bitrate().map(RateLimiter::new),

            exts: *config.extension_map(),
            supports_bwe_extension: false,
            max_padding_fec_packet_header: 0,
            max_media_packet_header: 0,

            sending_media: true,
            sequence_number: config.initial_sequence_number(),
            sequence_number_rtx: config.initial_rtx_sequence_number(),
            ssrc_has_acked: false,
            rtx_ssrc_has_acked: false,

            last_payload_type: None,
            last_timestamp: 0,
            last_packet_marker_bit: false,

            timestamp_offset: config.timestamp_offset(),
            csrcs: vec![],
            rtx_mode: RtxMode::OFF,
            rtx_payload_type_map: BTreeMap::new(),

            mid: config.mid(),
            rid: config.rid(),
            always_send_mid_and_rid: config.always_send_mid_and_rid(),
        };

        sender.update_bwe_extension_support();
        sender.update_header_sizes();

        debug!(
            "New RtpSender ssrc: {}, rtx ssrc: {:?}, kind: {:?}",
            sender.ssrc, sender.rtx_ssrc, sender.kind
        );

        sender
    }

    /// Register an extension by URI.
    ///
    /// Fails if the id is out of range or used by another extension.
    pub fn register_header_extension(&mut self, uri: &str, id: u8) -> bool {
        let registered = self.exts.register_by_uri(id, uri);
        self.update_bwe_extension_support();
        self.update_header_sizes();
        registered
    }

    /// Remove the extension registered for the URI.
    pub fn deregister_header_extension(&mut self, uri: &str) {
        self.exts.deregister(uri);
        self.update_bwe_extension_support();
        self.update_header_sizes();
    }

    /// Whether the extension has an id.
    pub fn is_header_extension_registered(&self, ext: Extension) -> bool {
        self.exts.is_registered(ext)
    }

    /// Allow ids above 14 (two-byte extension form).
    pub fn set_extmap_allow_mixed(&mut self, allow: bool) {
        self.exts.set_extmap_allow_mixed(allow);
        self.update_header_sizes();
    }

    fn update_bwe_extension_support(&mut self) {
        self.supports_bwe_extension = self.exts.iter().any(|(_, e)| e.is_bwe());
    }

    /// Create an empty media packet.
    ///
    /// Space is reserved for the send time extensions, and MID/RID are set while the
    /// SSRC is not acknowledged (or always, if configured).
    pub fn allocate_packet(&self) -> RtpPacket {
        let mut packet = RtpPacket::new(&self.exts, self.max_packet_size);
        packet.set_ssrc(self.ssrc);
        packet.set_csrcs(&self.csrcs);

        // No-ops if not registered.
        packet.reserve_extension(Extension::AbsoluteSendTime);
        packet.reserve_extension(Extension::TransmissionTimeOffset);
        packet.reserve_extension(Extension::TransportSequenceNumber);

        if self.always_send_mid_and_rid || !self.ssrc_has_acked {
            packet.set_mid(self.mid);
            packet.set_rid(self.rid);
        }

        packet
    }

    /// Give a media packet the next sequence number.
    ///
    /// Returns false when not sending media.
    pub fn assign_sequence_number(&mut self, packet: &mut RtpPacket) -> bool {
        if !self.sending_media {
            return false;
        }

        packet.set_sequence_number(self.sequence_number);
        self.sequence_number = self.sequence_number.wrapping_add(1);

        // Padding without RTX can only follow a complete frame.
        self.last_packet_marker_bit = packet.marker();
        self.last_payload_type = Some(packet.payload_type());
        self.last_timestamp = packet.timestamp();

        true
    }

    /// Resend a packet from the history.
    ///
    /// Returns the size of the original packet when enqueued, 0 when there is nothing to
    /// send (unknown, pending, resent too recently, or rate limited) and -1 when the
    /// copy could not be built.
    pub fn re_send_packet(&mut self, seq_no: u16, now: Instant) -> i32 {
        let rtx = self.rtx_mode.contains(RtxMode::RETRANSMITTED);

        enum Outcome {
            NotFound,
            RateLimited,
            BuildFailed,
            Built(usize),
        }
        let mut outcome = Outcome::NotFound;

        let history = self.history.clone();
        let packet = history.get_packet_and_mark_as_pending(seq_no, now, |stored| {
            let size = stored.size();

            if let Some(limiter) = &mut self.retransmission_rate_limiter {
                if !limiter.try_use_rate(size, now) {
                    outcome = Outcome::RateLimited;
                    return None;
                }
            }

            let packet = if rtx {
                self.build_rtx_packet(stored)
            } else {
                Some(stored.clone())
            };

            let Some(mut packet) = packet else {
                outcome = Outcome::BuildFailed;
                return None;
            };

            packet.set_retransmitted_sequence_number(stored.sequence_number());
            outcome = Outcome::Built(size);
            Some(packet)
        });

        match (packet, outcome) {
            (Some(mut packet), Outcome::Built(size)) => {
                packet.set_packet_type(RtpPacketType::Retransmission);
                self.enqueue_packets(vec![packet], now);
                size as i32
            }
            (_, Outcome::BuildFailed) => {
                debug!("Failed to build retransmission of {}", seq_no);
                -1
            }
            (_, Outcome::RateLimited) => {
                debug!("Retransmission of {} rate limited", seq_no);
                0
            }
            _ => {
                trace!("No packet to resend for {}", seq_no);
                0
            }
        }
    }

    /// Handle a NACK. Packets are resent in the order given.
    pub fn on_received_nack(&mut self, seq_nos: &[u16], avg_rtt: Duration, now: Instant) {
        self.history.set_rtt(NACK_RTT_MARGIN + avg_rtt);

        for seq_no in seq_nos {
            let bytes_sent = self.re_send_packet(*seq_no, now);
            if bytes_sent < 0 {
                warn!(
                    "Failed resending RTP packet {}, discard rest of packets",
                    seq_no
                );
                break;
            }
        }
    }

    /// Hand one packet to the pacer.
    pub fn send_to_network(&mut self, packet: RtpPacket, now: Instant) {
        self.enqueue_packets(vec![packet], now);
    }

    /// Hand packets to the pacer. Capture time is set to `now` where missing.
    pub fn enqueue_packets(&mut self, mut packets: Vec<RtpPacket>, now: Instant) {
        for p in &mut packets {
            if p.capture_time().is_none() {
                p.set_capture_time(now);
            }
        }
        self.pacer.enqueue_packets(packets);
    }

    /// A packet left the pacer.
    ///
    /// Media packets go into the history. Retransmissions clear the pending state of
    /// the packet they repair.
    pub fn on_packet_sent(&self, packet: &RtpPacket, now: Instant) {
        match packet.packet_type() {
            Some(RtpPacketType::Audio) | Some(RtpPacketType::Video) => {
                if packet.ssrc() == self.ssrc {
                    self.history.put_rtp_packet(packet.clone(), Some(now));
                }
            }
            Some(RtpPacketType::Retransmission) => {
                if let Some(seq_no) = packet.retransmitted_sequence_number() {
                    self.history.mark_packet_as_sent(seq_no, now);
                }
            }
            _ => {}
        }
    }

    /// Set RTX mode.
    ///
    /// Anything but [`RtxMode::OFF`] is refused without an RTX SSRC and payload type mapping.
    pub fn set_rtx_status(&mut self, mode: RtxMode) -> bool {
        if !mode.is_off() && (self.rtx_ssrc.is_none() || self.rtx_payload_type_map.is_empty()) {
            debug!("Refuse {:?} without RTX SSRC and payload type", mode);
            return false;
        }
        self.rtx_mode = mode;
        true
    }

    /// The current RTX mode.
    pub fn rtx_status(&self) -> RtxMode {
        self.rtx_mode
    }

    /// Map an associated (media) payload type to its RTX payload type.
    pub fn set_rtx_payload_type(&mut self, rtx_pt: Pt, associated_pt: Pt) {
        if !rtx_pt.is_valid() || !associated_pt.is_valid() {
            warn!(
                "Invalid RTX payload type mapping {} -> {}",
                associated_pt, rtx_pt
            );
            return;
        }
        self.rtx_payload_type_map.insert(associated_pt, rtx_pt);
    }

    /// Change the MID sent until the SSRC is acknowledged.
    pub fn set_mid(&mut self, mid: Mid) {
        self.mid = mid;
        self.update_header_sizes();
    }

    /// Contributing sources for packets allocated from now on. At most 15.
    pub fn set_csrcs(&mut self, csrcs: &[u32]) {
        if csrcs.len() > crate::rtp::MAX_CSRCS {
            warn!("Too many CSRC: {}", csrcs.len());
            return;
        }
        self.csrcs = csrcs.to_vec();
        self.update_header_sizes();
    }

    /// Set max packet size. Must be in 100..=1500.
    pub fn set_max_rtp_packet_size(&mut self, max_packet_size: usize) -> bool {
        if !(MIN_PACKET_SIZE..=IP_PACKET_SIZE).contains(&max_packet_size) {
            debug!("Invalid max packet size: {}", max_packet_size);
            return false;
        }
        self.max_packet_size = max_packet_size;
        true
    }

    /// Max size of any packet built.
    pub fn max_rtp_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Set max retransmission bitrate. `None` removes the limit.
    pub fn set_max_retransmission_bitrate(&mut self, rate: Option<Bitrate>) {
        self.retransmission_rate_limiter = match (rate, self.retransmission_rate_limiter.take()) {
            (Some(r), Some(mut l)) => {
                l.set_max_rate(r);
                Some(l)
            }
            (Some(r), None) => Some(RateLimiter::new(r)),
            (None, _) => None,
        };
    }

    /// Turn sending on or off. While off, no sequence numbers are assigned.
    pub fn set_sending_media_status(&mut self, enabled: bool) {
        self.sending_media = enabled;
    }

    /// Whether media is being sent.
    pub fn sending_media(&self) -> bool {
        self.sending_media
    }

    /// The remote acknowledged the media SSRC.
    pub fn on_received_ack_on_ssrc(&mut self) {
        self.ssrc_has_acked = true;
        self.update_header_sizes();
    }

    /// The remote acknowledged the RTX SSRC.
    pub fn on_received_ack_on_rtx_ssrc(&mut self) {
        self.rtx_ssrc_has_acked = true;
        self.update_header_sizes();
    }

    /// State of the media SSRC, to carry over to another sender.
    pub fn rtp_state(&self) -> RtpState {
        RtpState {
            sequence_number: self.sequence_number,
            start_timestamp: self.timestamp_offset,
            ssrc_has_acked: self.ssrc_has_acked,
        }
    }

    /// Restore the state of the media SSRC.
    pub fn set_rtp_state(&mut self, state: RtpState) {
        self.sequence_number = state.sequence_number;
        self.timestamp_offset = state.start_timestamp;
        self.ssrc_has_acked = state.ssrc_has_acked;
        self.update_header_sizes();
    }

    /// State of the RTX SSRC.
    pub fn rtx_rtp_state(&self) -> RtpState {
        RtpState {
            sequence_number: self.sequence_number_rtx,
            start_timestamp: self.timestamp_offset,
            ssrc_has_acked: self.rtx_ssrc_has_acked,
        }
    }

    /// Restore the state of the RTX SSRC.
    pub fn set_rtx_rtp_state(&mut self, state: RtpState) {
        self.sequence_number_rtx = state.sequence_number;
        self.rtx_ssrc_has_acked = state.ssrc_has_acked;
        self.update_header_sizes();
    }

    /// Padding requires sending media and an extension for bandwidth estimation.
    pub fn supports_padding(&self) -> bool {
        self.sending_media && self.supports_bwe_extension
    }

    /// Whether padding can be old payloads on the RTX SSRC.
    pub fn supports_rtx_payload_padding(&self) -> bool {
        self.supports_padding()
            && self.rtx_mode.contains(RtxMode::REDUNDANT_PAYLOADS)
            && self.rtx_ssrc.is_some()
    }

    /// Offset added to RTP timestamps.
    pub fn timestamp_offset(&self) -> u32 {
        self.timestamp_offset
    }

    /// The media SSRC.
    pub fn ssrc(&self) -> Ssrc {
        self.ssrc
    }

    /// The RTX SSRC, if any.
    pub fn rtx_ssrc(&self) -> Option<Ssrc> {
        self.rtx_ssrc
    }

    /// Whether this sends audio or video.
    pub fn media_kind(&self) -> MediaKind {
        self.kind
    }

    /// The packet history shared with the egress side.
    pub fn history(&self) -> &Arc<PacketHistory> {
        &self.history
    }

    /// The pacing sink.
    pub fn pacer(&self) -> &P {
        &self.pacer
    }

    /// Mutable access to the pacing sink.
    pub fn pacer_mut(&mut self) -> &mut P {
        &mut self.pacer
    }
}
