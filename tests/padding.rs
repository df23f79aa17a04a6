use std::time::Instant;

use rtpsvc::rtp::{RtpPacketType, RTX_HEADER_SIZE};
use rtpsvc::{MediaKind, RtxMode, MAX_PADDING_LENGTH, MAX_PADDING_SIZE_FACTOR};
use rtpsvc::{MIN_AUDIO_PADDING_LENGTH, MIN_PAYLOAD_PADDING_BYTES};

mod common;
use common::{config, flush, init_log, register_send_time, send_media, sender};
use common::{PT, RTX_PT, RTX_SSRC, SSRC};

#[test]
pub fn no_padding_before_media_without_permission() {
    init_log();

    let mut sender = sender(config());
    assert_eq!(sender.rtx_status(), RtxMode::OFF);

    let padding = sender.generate_padding(60, false, false, Instant::now());
    assert!(padding.is_empty());
}

#[test]
pub fn padding_on_media_ssrc_after_frame() {
    init_log();

    let mut sender = sender(config());
    let now = Instant::now();

    // Mid frame.
    send_media(&mut sender, &[1; 100], false, now);
    assert!(sender.generate_padding(500, true, true, now).is_empty());

    // Frame complete.
    let last = send_media(&mut sender, &[1; 100], true, now);

    let padding = sender.generate_padding(500, true, true, now);
    assert_eq!(padding.len(), 3);

    for (i, p) in padding.iter().enumerate() {
        assert_eq!(p.packet_type(), Some(RtpPacketType::Padding));
        assert_eq!(*p.ssrc(), SSRC);
        assert_eq!(*p.payload_type(), PT);
        assert_eq!(p.timestamp(), 90_000);
        assert!(!p.marker());
        assert_eq!(p.sequence_number(), last + 1 + i as u16);
        assert_eq!(p.payload_size(), 0);
        assert_eq!(p.padding_size(), MAX_PADDING_LENGTH);
    }

    // Padding used media sequence numbers.
    let next = send_media(&mut sender, &[1], true, now);
    assert_eq!(next, last + 4);
}

#[test]
pub fn audio_padding_may_be_small() {
    init_log();

    let mut sender = sender(config().set_media_kind(MediaKind::Audio));
    let now = Instant::now();

    // Audio has no frame boundary restriction.
    send_media(&mut sender, &[1; 20], false, now);

    let padding = sender.generate_padding(10, true, true, now);
    assert_eq!(padding.len(), 1);
    assert_eq!(padding[0].padding_size(), MIN_AUDIO_PADDING_LENGTH);

    let padding = sender.generate_padding(100, true, true, now);
    assert_eq!(padding.len(), 1);
    assert_eq!(padding[0].padding_size(), 100);
}

#[test]
pub fn rtx_padding_needs_send_time_before_media() {
    init_log();

    let mut sender = sender(config());
    assert!(sender.set_rtx_status(RtxMode::RETRANSMITTED));
    let now = Instant::now();

    assert!(sender.generate_padding(500, false, true, now).is_empty());

    register_send_time(&mut sender);

    let padding = sender.generate_padding(500, false, true, now);
    assert!(!padding.is_empty());
    for (i, p) in padding.iter().enumerate() {
        assert_eq!(*p.ssrc(), RTX_SSRC);
        assert_eq!(*p.payload_type(), RTX_PT);
        assert_eq!(p.sequence_number(), 5000 + i as u16);
    }
}

#[test]
pub fn redundant_payload_padding_within_budget() {
    init_log();

    let mut sender = sender(config());
    register_send_time(&mut sender);
    assert!(sender.set_rtx_status(RtxMode::RETRANSMITTED | RtxMode::REDUNDANT_PAYLOADS));
    assert!(sender.supports_rtx_payload_padding());

    let now = Instant::now();
    for i in 0..10 {
        send_media(&mut sender, &[i; 400], true, now);
    }
    flush(&mut sender, now);

    for target in [150, 300, 800, 2000] {
        let padding = sender.generate_padding(target, true, true, now);
        assert!(!padding.is_empty());

        let redundant: usize = padding
            .iter()
            .filter(|p| p.payload_size() > 0)
            .map(|p| p.payload_size())
            .sum();

        assert!(redundant > 0);
        assert!(redundant as f64 <= target as f64 * MAX_PADDING_SIZE_FACTOR);

        for p in padding.iter().filter(|p| p.payload_size() > 0) {
            assert_eq!(p.payload_size(), 400 + RTX_HEADER_SIZE);
            assert_eq!(*p.ssrc(), RTX_SSRC);
        }
        for p in padding.iter().filter(|p| p.payload_size() == 0) {
            assert!(p.padding_size() <= MAX_PADDING_LENGTH);
        }
    }
}

#[test]
pub fn small_budget_skips_redundant_payloads() {
    init_log();

    let mut sender = sender(config());
    register_send_time(&mut sender);
    assert!(sender.set_rtx_status(RtxMode::RETRANSMITTED | RtxMode::REDUNDANT_PAYLOADS));

    let now = Instant::now();
    send_media(&mut sender, &[1; 400], true, now);
    flush(&mut sender, now);

    let padding = sender.generate_padding(MIN_PAYLOAD_PADDING_BYTES - 1, true, true, now);
    assert_eq!(padding.len(), 1);
    assert_eq!(padding[0].payload_size(), 0);
}
