#![allow(unused)]
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

use rtpsvc::rtp::{Extension, RtpPacket, RtpPacketType};
use rtpsvc::svc::{EncodedLayer, LayerId, RawFrame, RefFrameConfig, Vp9Backend};
use rtpsvc::svc::{SvcError, MAX_SPATIAL_LAYERS};
use rtpsvc::{PacketHistory, RtpSender, SendQueue, SenderConfig, StorageMode};

pub const SSRC: u32 = 1000;
pub const RTX_SSRC: u32 = 2000;
pub const PT: u8 = 96;
pub const RTX_PT: u8 = 100;

pub const ABS_SEND_TIME_ID: u8 = 3;
pub const TRANSPORT_SEQ_ID: u8 = 5;
pub const MID_ID: u8 = 7;

pub fn init_log() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    static START: Once = Once::new();

    START.call_once(|| {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(env_filter)
            .init();
    });
}

pub fn config() -> SenderConfig {
    SenderConfig::new()
        .set_ssrc(SSRC.into())
        .set_rtx_ssrc(RTX_SSRC.into())
        .set_mid("a".into())
        .set_initial_sequence_number(1)
        .set_initial_rtx_sequence_number(5000)
        .set_timestamp_offset(0)
}

/// A video sender with a 600 packet history and RTX payload type mapped.
pub fn sender(config: SenderConfig) -> RtpSender<SendQueue> {
    let history = Arc::new(PacketHistory::new(StorageMode::StoreAndCull, 600));
    let mut sender = config.build(history, SendQueue::new());
    sender.set_rtx_payload_type(RTX_PT.into(), PT.into());
    sender
}

pub fn register_send_time(sender: &mut RtpSender<SendQueue>) {
    assert!(sender.register_header_extension(
        Extension::AbsoluteSendTime.as_uri(),
        ABS_SEND_TIME_ID
    ));
    assert!(sender.register_header_extension(
        Extension::TransportSequenceNumber.as_uri(),
        TRANSPORT_SEQ_ID
    ));
}

/// Build a numbered media packet and pass it to the pacer.
pub fn send_media(
    sender: &mut RtpSender<SendQueue>,
    payload: &[u8],
    marker: bool,
    now: Instant,
) -> u16 {
    let mut packet = sender.allocate_packet();
    packet.set_payload_type(PT.into());
    packet.set_marker(marker);
    packet.set_timestamp(90_000);
    packet.set_packet_type(RtpPacketType::Video);
    assert!(packet.set_payload(payload));
    assert!(sender.assign_sequence_number(&mut packet));

    let seq_no = packet.sequence_number();
    sender.enqueue_packets(vec![packet], now);
    seq_no
}

/// Release everything in the pacer, reporting each packet as sent.
pub fn flush(sender: &mut RtpSender<SendQueue>, now: Instant) -> Vec<RtpPacket> {
    sender.pacer_mut().handle_timeout(now);
    let mut out = vec![];
    while let Some(p) = sender.pacer_mut().pop(now) {
        sender.on_packet_sent(&p, now);
        out.push(p);
    }
    out
}

pub fn sec(s: f64) -> Duration {
    Duration::from_secs_f64(s)
}

/// VP9 codec stand-in that produces every requested layer.
#[derive(Debug, Default)]
pub struct FakeVp9 {
    pub applied: Vec<(LayerId, RefFrameConfig)>,
    pub drop_next: bool,
}

impl Vp9Backend for FakeVp9 {
    fn apply(&mut self, layer_id: &LayerId, config: &RefFrameConfig) -> Result<(), SvcError> {
        self.applied.push((*layer_id, *config));
        Ok(())
    }

    fn encode(&mut self, frame: &RawFrame, force_key: bool) -> Result<Vec<EncodedLayer>, SvcError> {
        if self.drop_next {
            self.drop_next = false;
            return Ok(vec![]);
        }

        let Some((layer_id, config)) = self.applied.last().copied() else {
            return Err(SvcError::Backend("encode before apply".into()));
        };

        let first = layer_id.spatial_id as usize;

        Ok((first..MAX_SPATIAL_LAYERS)
            .filter(|sid| {
                config.update_buffer_slot[*sid] != 0
                    || config.reference_last[*sid]
                    || config.reference_golden[*sid]
                    || config.reference_alt_ref[*sid]
            })
            .map(|sid| EncodedLayer {
                spatial_id: sid as u8,
                temporal_id: layer_id.temporal_id_per_spatial[sid],
                is_key: force_key && sid == first,
                data: frame.data.clone(),
            })
            .collect())
    }
}
