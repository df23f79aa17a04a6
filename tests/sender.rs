use std::sync::Arc;
use std::time::{Duration, Instant};

use rtpsvc::rtp::{read_original_sequence_number, Bitrate, Extension, RtpPacket, RtpPacketType};
use rtpsvc::{PacketHistory, RtpSender, RtpState, RtxMode, SendQueue, SenderConfig, StorageMode};
use rtpsvc::{IP_PACKET_SIZE, MIN_PACKET_SIZE};

mod common;
use common::{config, flush, init_log, register_send_time, send_media, sender};
use common::{MID_ID, PT, RTX_PT, RTX_SSRC, SSRC};

#[test]
pub fn mid_until_acked() {
    init_log();

    let mut sender = sender(config());
    register_send_time(&mut sender);
    assert!(sender.register_header_extension(Extension::RtpMid.as_uri(), MID_ID));

    let packet = sender.allocate_packet();
    assert!(packet.has_extension(Extension::AbsoluteSendTime));
    assert!(packet.has_extension(Extension::TransportSequenceNumber));
    assert_eq!(packet.mid(), Some("a".into()));

    sender.on_received_ack_on_ssrc();

    let packet = sender.allocate_packet();
    assert!(packet.has_extension(Extension::AbsoluteSendTime));
    assert!(packet.has_extension(Extension::TransportSequenceNumber));
    assert_eq!(packet.mid(), None);
}

#[test]
pub fn mid_always_sent_when_configured() {
    init_log();

    let mut sender = sender(config().set_always_send_mid_and_rid(true));
    assert!(sender.register_header_extension(Extension::RtpMid.as_uri(), MID_ID));

    sender.on_received_ack_on_ssrc();

    for _ in 0..3 {
        assert_eq!(sender.allocate_packet().mid(), Some("a".into()));
    }
}

#[test]
pub fn resend_as_rtx() {
    init_log();

    let mut sender = sender(config().set_initial_sequence_number(42));
    assert!(sender.set_rtx_status(RtxMode::RETRANSMITTED));

    let now = Instant::now();
    let seq_no = send_media(&mut sender, &[1, 2, 3], true, now);
    assert_eq!(seq_no, 42);
    let sent = flush(&mut sender, now);
    assert_eq!(sender.history().len(), 1);

    let size = sender.re_send_packet(42, now);
    assert_eq!(size as usize, sent[0].size());

    let rtx = sender.pacer_mut().drain().pop().unwrap();
    assert_eq!(rtx.packet_type(), Some(RtpPacketType::Retransmission));
    assert_eq!(*rtx.payload_type(), RTX_PT);
    assert_eq!(*rtx.ssrc(), RTX_SSRC);
    assert_eq!(rtx.sequence_number(), 5000);
    assert_eq!(rtx.payload(), &[0x00, 0x2a, 1, 2, 3]);
    assert_eq!(rtx.retransmitted_sequence_number(), Some(42));

    // Original header fields survive.
    assert_eq!(rtx.marker(), sent[0].marker());
    assert_eq!(rtx.timestamp(), sent[0].timestamp());
    assert_eq!(read_original_sequence_number(rtx.payload()), Some(42));
}

fn register_mid_and_rids(sender: &mut RtpSender<SendQueue>) {
    assert!(sender.register_header_extension(Extension::RtpMid.as_uri(), MID_ID));
    assert!(sender.register_header_extension(Extension::RtpStreamId.as_uri(), 9));
    assert!(sender.register_header_extension(Extension::RepairedRtpStreamId.as_uri(), 10));
}

#[test]
pub fn rtx_mid_and_repaired_rid_until_rtx_acked() {
    init_log();

    let mut sender = sender(config().set_rid("r0".into()));
    register_mid_and_rids(&mut sender);
    assert!(sender.set_rtx_status(RtxMode::RETRANSMITTED));

    let now = Instant::now();
    let first = send_media(&mut sender, &[1], false, now);
    let second = send_media(&mut sender, &[2], true, now);
    let sent = flush(&mut sender, now);
    assert_eq!(sent[0].rid(), Some("r0".into()));

    // Acking the media SSRC does not stop MID/RID on RTX.
    sender.on_received_ack_on_ssrc();
    assert_eq!(sender.allocate_packet().rid(), None);

    assert!(sender.re_send_packet(first, now) > 0);
    let rtx = sender.pacer_mut().drain().pop().unwrap();
    assert_eq!(*rtx.ssrc(), RTX_SSRC);
    assert_eq!(rtx.mid(), Some("a".into()));
    assert_eq!(rtx.repaired_rid(), Some("r0".into()));
    assert_eq!(rtx.rid(), None);

    sender.on_received_ack_on_rtx_ssrc();

    assert!(sender.re_send_packet(second, now) > 0);
    let rtx = sender.pacer_mut().drain().pop().unwrap();
    assert_eq!(*rtx.ssrc(), RTX_SSRC);
    assert_eq!(rtx.mid(), None);
    assert_eq!(rtx.repaired_rid(), None);
    assert_eq!(rtx.rid(), None);
    assert_eq!(rtx.retransmitted_sequence_number(), Some(second));
}

#[test]
pub fn rtx_mid_and_repaired_rid_always_sent_when_configured() {
    init_log();

    let mut sender = sender(
        config()
            .set_rid("r0".into())
            .set_always_send_mid_and_rid(true),
    );
    register_mid_and_rids(&mut sender);
    assert!(sender.set_rtx_status(RtxMode::RETRANSMITTED));

    let now = Instant::now();
    let seq_no = send_media(&mut sender, &[1, 2], true, now);
    flush(&mut sender, now);

    sender.on_received_ack_on_ssrc();
    sender.on_received_ack_on_rtx_ssrc();

    let media = sender.allocate_packet();
    assert_eq!(media.mid(), Some("a".into()));
    assert_eq!(media.rid(), Some("r0".into()));

    assert!(sender.re_send_packet(seq_no, now) > 0);
    let rtx = sender.pacer_mut().drain().pop().unwrap();
    assert_eq!(*rtx.ssrc(), RTX_SSRC);
    assert_eq!(rtx.mid(), Some("a".into()));
    assert_eq!(rtx.repaired_rid(), Some("r0".into()));
    assert_eq!(rtx.rid(), None);
}

#[test]
pub fn resend_without_rtx_is_a_copy() {
    init_log();

    let mut sender = sender(config());

    let now = Instant::now();
    let seq_no = send_media(&mut sender, &[9, 9], false, now);
    let sent = flush(&mut sender, now);

    assert!(sender.re_send_packet(seq_no, now) > 0);

    let copy = sender.pacer_mut().drain().pop().unwrap();
    assert_eq!(*copy.ssrc(), SSRC);
    assert_eq!(copy.sequence_number(), seq_no);
    assert_eq!(copy.payload(), sent[0].payload());
    assert_eq!(*copy.payload_type(), PT);
}

#[test]
pub fn resend_unknown_is_zero() {
    init_log();

    let mut sender = sender(config());
    assert!(sender.set_rtx_status(RtxMode::RETRANSMITTED));

    assert_eq!(sender.re_send_packet(1234, Instant::now()), 0);
    assert!(sender.pacer().is_empty());
}

#[test]
pub fn resend_pending_is_zero() {
    init_log();

    let mut sender = sender(config());

    let now = Instant::now();
    let seq_no = send_media(&mut sender, &[1], true, now);
    flush(&mut sender, now);

    assert!(sender.re_send_packet(seq_no, now) > 0);
    // Still in the pacer.
    assert_eq!(sender.re_send_packet(seq_no, now), 0);
    assert_eq!(sender.pacer().len(), 1);

    // Once sent, and an RTT has passed, it can go again.
    flush(&mut sender, now);
    sender.history().set_rtt(Duration::from_millis(100));
    assert_eq!(sender.re_send_packet(seq_no, now + Duration::from_millis(50)), 0);
    assert!(sender.re_send_packet(seq_no, now + Duration::from_millis(100)) > 0);
}

#[test]
pub fn resend_build_failure_is_negative() {
    init_log();

    // RTX mode without a mapping for the payload type of the packet.
    let mut sender = sender(config());
    assert!(sender.set_rtx_status(RtxMode::RETRANSMITTED));

    let now = Instant::now();
    let mut packet = sender.allocate_packet();
    packet.set_payload_type(111.into());
    packet.set_packet_type(RtpPacketType::Video);
    packet.set_payload(&[1]);
    sender.assign_sequence_number(&mut packet);
    let seq_no = packet.sequence_number();
    sender.enqueue_packets(vec![packet], now);
    flush(&mut sender, now);

    assert_eq!(sender.re_send_packet(seq_no, now), -1);
    assert!(sender.pacer().is_empty());
}

#[test]
pub fn nack_resends_in_order() {
    init_log();

    let mut sender = sender(config());
    assert!(sender.set_rtx_status(RtxMode::RETRANSMITTED));

    let now = Instant::now();
    let seqs: Vec<u16> = (0..5)
        .map(|i| send_media(&mut sender, &[i; 10], true, now))
        .collect();
    flush(&mut sender, now);

    let nacked = [seqs[3], seqs[1], seqs[4]];
    sender.on_received_nack(&nacked, Duration::from_millis(20), now);

    let resent: Vec<u16> = sender
        .pacer_mut()
        .drain()
        .iter()
        .map(|p| p.retransmitted_sequence_number().unwrap())
        .collect();
    assert_eq!(resent, nacked);
    assert_eq!(sender.history().rtt(), Duration::from_millis(25));
}

#[test]
pub fn nack_aborts_on_build_failure() {
    init_log();

    let mut sender = sender(config().set_max_packet_size(100));
    assert!(sender.set_rtx_status(RtxMode::RETRANSMITTED));

    let now = Instant::now();
    let small = send_media(&mut sender, &[1; 10], true, now);
    // Fills the packet, so the RTX header doesn't fit.
    let full_payload = 100 - sender.allocate_packet().headers_size();
    let full = send_media(&mut sender, &vec![2; full_payload], true, now);
    flush(&mut sender, now);

    sender.on_received_nack(&[full, small], Duration::ZERO, now);
    assert!(sender.pacer().is_empty());

    sender.on_received_nack(&[small, full], Duration::ZERO, now);
    assert_eq!(sender.pacer().len(), 1);
}

#[test]
pub fn retransmission_rate_limited() {
    init_log();

    let mut sender = sender(config().set_max_retransmission_bitrate(Bitrate::kbps(8)));

    let now = Instant::now();
    // 1000 bytes per second allowed, each packet is 512 bytes.
    let seqs: Vec<u16> = (0..3)
        .map(|_| send_media(&mut sender, &[0; 500], true, now))
        .collect();
    flush(&mut sender, now);

    assert!(sender.re_send_packet(seqs[0], now) > 0);
    assert_eq!(sender.re_send_packet(seqs[1], now), 0);

    // Refused ones are not marked pending.
    let later = now + Duration::from_millis(1500);
    flush(&mut sender, later);
    assert!(sender.re_send_packet(seqs[1], later) > 0);
}

#[test]
pub fn rtx_needs_ssrc_and_payload_type() {
    init_log();

    let history = Arc::new(PacketHistory::new(StorageMode::StoreAndCull, 10));
    let mut sender = SenderConfig::new()
        .set_ssrc(SSRC.into())
        .build(history, SendQueue::new());

    assert!(!sender.set_rtx_status(RtxMode::RETRANSMITTED));
    assert_eq!(sender.rtx_status(), RtxMode::OFF);
    assert!(sender.set_rtx_status(RtxMode::OFF));
}

#[test]
pub fn packets_fit_max_size() {
    init_log();

    let max = 300;
    let mut sender = sender(config().set_max_packet_size(max));
    register_send_time(&mut sender);
    assert!(sender.register_header_extension(Extension::RtpMid.as_uri(), MID_ID));
    assert!(sender.set_rtx_status(RtxMode::RETRANSMITTED | RtxMode::REDUNDANT_PAYLOADS));

    let now = Instant::now();

    // Larger than the room left is refused by the packet.
    let mut packet = sender.allocate_packet();
    let room = max - packet.headers_size();
    assert!(!packet.set_payload(&vec![0; room + 1]));
    assert!(packet.set_payload(&vec![0; room - 2]));

    let seqs: Vec<u16> = (0..10)
        .map(|i| send_media(&mut sender, &vec![i; room - 2], true, now))
        .collect();
    let mut all = flush(&mut sender, now);

    sender.on_received_nack(&seqs, Duration::ZERO, now);
    all.extend(sender.pacer_mut().drain());

    all.extend(sender.generate_padding(5000, true, true, now));

    assert!(all.len() > 20);
    for p in all {
        assert!(p.size() <= max, "{} > {}", p.size(), max);
        assert!(p.serialize().len() <= max);
    }
}

#[test]
pub fn sending_media_disabled() {
    init_log();

    let mut sender = sender(config());
    sender.set_sending_media_status(false);

    let mut packet = sender.allocate_packet();
    assert!(!sender.assign_sequence_number(&mut packet));
    assert!(sender.generate_padding(500, true, true, Instant::now()).is_empty());
}

#[test]
pub fn csrcs_are_limited() {
    init_log();

    let mut sender = sender(config());
    sender.set_csrcs(&[1, 2, 3]);
    assert_eq!(sender.allocate_packet().csrcs(), &[1, 2, 3]);
}

#[test]
pub fn max_packet_size_bounds() {
    init_log();

    let mut sender = sender(config());
    assert!(!sender.set_max_rtp_packet_size(MIN_PACKET_SIZE - 1));
    assert!(!sender.set_max_rtp_packet_size(IP_PACKET_SIZE + 1));
    assert!(sender.set_max_rtp_packet_size(1200));
    assert_eq!(sender.max_rtp_packet_size(), 1200);
    assert_eq!(sender.allocate_packet().capacity(), 1200);
}

#[test]
pub fn rtp_state_round_trip() {
    init_log();

    let mut sender = sender(config().set_initial_sequence_number(77).set_timestamp_offset(1234));
    sender.on_received_ack_on_ssrc();

    let state = sender.rtp_state();
    assert_eq!(
        state,
        RtpState {
            sequence_number: 77,
            start_timestamp: 1234,
            ssrc_has_acked: true,
        }
    );

    let json = serde_json::to_string(&state).unwrap();
    let back: RtpState = serde_json::from_str(&json).unwrap();

    let mut other = common::sender(config());
    other.set_rtp_state(back);
    assert_eq!(other.rtp_state(), state);

    let rtx = RtpState {
        sequence_number: 9,
        start_timestamp: 0,
        ssrc_has_acked: true,
    };
    other.set_rtx_rtp_state(rtx);
    assert_eq!(other.rtx_rtp_state().sequence_number, 9);
    assert!(other.rtx_rtp_state().ssrc_has_acked);
}

#[test]
pub fn serialized_packet_parses_back() {
    init_log();

    let mut sender = sender(config());
    register_send_time(&mut sender);
    assert!(sender.register_header_extension(Extension::RtpMid.as_uri(), MID_ID));

    let now = Instant::now();
    send_media(&mut sender, &[1, 2, 3], true, now);
    let sent = flush(&mut sender, now).pop().unwrap();

    let buf = sent.serialize();
    let parsed = RtpPacket::parse(&buf, sent.extension_map()).unwrap();

    assert_eq!(parsed.sequence_number(), sent.sequence_number());
    assert_eq!(parsed.ssrc(), sent.ssrc());
    assert!(parsed.marker());
    assert_eq!(parsed.payload(), &[1, 2, 3]);
    assert_eq!(parsed.mid(), Some("a".into()));
}
