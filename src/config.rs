use std::sync::Arc;

use crate::history::PacketHistory;
use crate::pacer::PacingSink;
use crate::rtp::{Bitrate, ExtensionMap, Mid, Rid, Ssrc};
use crate::sender::{MediaKind, RtpSender, DEFAULT_MAX_PACKET_SIZE, IP_PACKET_SIZE, MIN_PACKET_SIZE};
use crate::svc::{ScalabilityMode, Vp9Backend, Vp9Encoder};
use crate::util::NonCryptographicRng;
use crate::SvcError;

/// Customized config for creating an [`RtpSender`].
///
/// ```
/// use std::sync::Arc;
/// use rtpsvc::{SenderConfig, PacketHistory, StorageMode, SendQueue};
///
/// let history = Arc::new(PacketHistory::new(StorageMode::StoreAndCull, 600));
///
/// let sender = SenderConfig::new()
///     .set_ssrc(1000.into())
///     .set_mid("a".into())
///     .build(history, SendQueue::new());
/// ```
///
/// Configs implement [`Clone`] to help create multiple senders.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    ssrc: Ssrc,
    rtx_ssrc: Option<Ssrc>,
    media_kind: MediaKind,
    max_packet_size: usize,
    mid: Mid,
    rid: Rid,
    always_send_mid_and_rid: bool,
    exts: ExtensionMap,
    max_retransmission_bitrate: Option<Bitrate>,
    initial_sequence_number: Option<u16>,
    initial_rtx_sequence_number: Option<u16>,
    timestamp_offset: Option<u32>,
}

impl SenderConfig {
    /// Creates a new default config.
    pub fn new() -> Self {
        SenderConfig::default()
    }

    /// The media SSRC.
    pub fn ssrc(&self) -> Ssrc {
        self.ssrc
    }

    /// Set the media SSRC.
    ///
    /// Defaults to a random value.
    pub fn set_ssrc(mut self, ssrc: Ssrc) -> Self {
        self.ssrc = ssrc;
        self
    }

    /// The RTX SSRC, if any.
    pub fn rtx_ssrc(&self) -> Option<Ssrc> {
        self.rtx_ssrc
    }

    /// Set the SSRC used for RTX retransmissions and padding.
    ///
    /// Without it, RTX can't be enabled.
    pub fn set_rtx_ssrc(mut self, ssrc: Ssrc) -> Self {
        self.rtx_ssrc = Some(ssrc);
        self
    }

    /// Whether the sender sends audio or video.
    pub fn media_kind(&self) -> MediaKind {
        self.media_kind
    }

    /// Whether the sender sends audio or video. Defaults to video.
    ///
    /// Affects which extensions are counted in header overhead and the size of
    /// padding packets.
    pub fn set_media_kind(mut self, kind: MediaKind) -> Self {
        self.media_kind = kind;
        self
    }

    /// Max size of any packet built.
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Max size of any packet built. Must be in 100..=1500, other values are ignored.
    ///
    /// Defaults to 1472, an IPv4 MTU of 1500 minus IP and UDP headers.
    pub fn set_max_packet_size(mut self, size: usize) -> Self {
        if (MIN_PACKET_SIZE..=IP_PACKET_SIZE).contains(&size) {
            self.max_packet_size = size;
        } else {
            warn!("Ignoring max packet size out of range: {}", size);
        }
        self
    }

    /// The MID, empty if not set.
    pub fn mid(&self) -> Mid {
        self.mid
    }

    /// The MID sent until the remote acknowledges the SSRC.
    pub fn set_mid(mut self, mid: Mid) -> Self {
        self.mid = mid;
        self
    }

    /// The RID, empty if not set.
    pub fn rid(&self) -> Rid {
        self.rid
    }

    /// The RID sent until the remote acknowledges the SSRC. On RTX it's sent as
    /// repaired RID.
    pub fn set_rid(mut self, rid: Rid) -> Self {
        self.rid = rid;
        self
    }

    /// Whether MID and RID are sent after the SSRC is acknowledged.
    pub fn always_send_mid_and_rid(&self) -> bool {
        self.always_send_mid_and_rid
    }

    /// Send MID and RID on every packet, also after the SSRC is acknowledged.
    pub fn set_always_send_mid_and_rid(mut self, enabled: bool) -> Self {
        self.always_send_mid_and_rid = enabled;
        self
    }

    /// The initial extension mappings.
    pub fn extension_map(&self) -> &ExtensionMap {
        &self.exts
    }

    /// Mutable access to the initial extension mappings.
    ///
    /// Defaults to no extensions. More can be registered on the sender.
    pub fn extension_map_mut(&mut self) -> &mut ExtensionMap {
        &mut self.exts
    }

    /// Replace the initial extension mappings.
    pub fn set_extension_map(mut self, exts: ExtensionMap) -> Self {
        self.exts = exts;
        self
    }

    /// Allow extension ids above 14, using the two-byte header form.
    pub fn set_extmap_allow_mixed(mut self, allow: bool) -> Self {
        self.exts.set_extmap_allow_mixed(allow);
        self
    }

    /// The retransmission rate limit, if any.
    pub fn max_retransmission_bitrate(&self) -> Option<Bitrate> {
        self.max_retransmission_bitrate
    }

    /// Limit retransmissions to this rate over a 1 second window.
    ///
    /// Defaults to no limit.
    pub fn set_max_retransmission_bitrate(mut self, rate: Bitrate) -> Self {
        self.max_retransmission_bitrate = Some(rate);
        self
    }

    /// The first media sequence number. Random unless set.
    pub fn initial_sequence_number(&self) -> u16 {
        self.initial_sequence_number
            .unwrap_or_else(NonCryptographicRng::u16)
    }

    /// Set the first media sequence number.
    pub fn set_initial_sequence_number(mut self, seq_no: u16) -> Self {
        self.initial_sequence_number = Some(seq_no);
        self
    }

    /// The first RTX sequence number. Random unless set.
    pub fn initial_rtx_sequence_number(&self) -> u16 {
        self.initial_rtx_sequence_number
            .unwrap_or_else(NonCryptographicRng::u16)
    }

    /// Set the first RTX sequence number.
    pub fn set_initial_rtx_sequence_number(mut self, seq_no: u16) -> Self {
        self.initial_rtx_sequence_number = Some(seq_no);
        self
    }

    /// Offset added to RTP timestamps. Random unless set.
    pub fn timestamp_offset(&self) -> u32 {
        self.timestamp_offset.unwrap_or_else(NonCryptographicRng::u32)
    }

    /// Set the RTP timestamp offset.
    pub fn set_timestamp_offset(mut self, offset: u32) -> Self {
        self.timestamp_offset = Some(offset);
        self
    }

    /// Create a sender from the config.
    ///
    /// The history is shared with whatever reports packets leaving the pacer.
    pub fn build<P: PacingSink>(self, history: Arc<PacketHistory>, pacer: P) -> RtpSender<P> {
        RtpSender::new(&self, history, pacer)
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            ssrc: Ssrc::new(),
            rtx_ssrc: None,
            media_kind: MediaKind::Video,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            mid: Mid::empty(),
            rid: Rid::empty(),
            always_send_mid_and_rid: false,
            exts: ExtensionMap::empty(),
            max_retransmission_bitrate: None,
            initial_sequence_number: None,
            initial_rtx_sequence_number: None,
            timestamp_offset: None,
        }
    }
}

/// Config for a [`Vp9Encoder`].
///
/// ```
/// use rtpsvc::Vp9EncoderConfig;
/// use rtpsvc::svc::ScalabilityMode;
///
/// let config = Vp9EncoderConfig::new(1280, 720)
///     .set_scalability_mode(ScalabilityMode::L2T3);
/// ```
#[derive(Debug, Clone)]
pub struct Vp9EncoderConfig {
    width: u16,
    height: u16,
    mode: ScalabilityMode,
    flexible_mode: bool,
    initial_picture_id: Option<u16>,
    layer_deactivation_requires_key_frame: bool,
}

impl Vp9EncoderConfig {
    /// Config for the given resolution of the top spatial layer.
    pub fn new(width: u16, height: u16) -> Self {
        Vp9EncoderConfig {
            width,
            height,
            mode: ScalabilityMode::L1T1,
            flexible_mode: true,
            initial_picture_id: None,
            layer_deactivation_requires_key_frame: false,
        }
    }

    /// Width of the top spatial layer.
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Height of the top spatial layer.
    pub fn height(&self) -> u16 {
        self.height
    }

    /// The layer structure.
    pub fn scalability_mode(&self) -> ScalabilityMode {
        self.mode
    }

    /// The layer structure. Defaults to L1T1.
    pub fn set_scalability_mode(mut self, mode: ScalabilityMode) -> Self {
        self.mode = mode;
        self
    }

    /// Whether the payload descriptor uses flexible mode.
    pub fn flexible_mode(&self) -> bool {
        self.flexible_mode
    }

    /// Whether references are signalled per picture (P_DIFF) in the payload
    /// descriptor. Defaults to true.
    pub fn set_flexible_mode(mut self, enabled: bool) -> Self {
        self.flexible_mode = enabled;
        self
    }

    /// The first 15 bit picture id. Random unless set.
    pub fn initial_picture_id(&self) -> u16 {
        self.initial_picture_id
            .unwrap_or_else(|| NonCryptographicRng::u16() & 0x7fff)
    }

    /// Set the first picture id. Only the low 15 bits are kept.
    pub fn set_initial_picture_id(mut self, picture_id: u16) -> Self {
        self.initial_picture_id = Some(picture_id & 0x7fff);
        self
    }

    /// Whether turning off a spatial layer forces a key frame.
    pub fn layer_deactivation_requires_key_frame(&self) -> bool {
        self.layer_deactivation_requires_key_frame
    }

    /// Force a key frame when a spatial layer is turned off. Defaults to false.
    pub fn set_layer_deactivation_requires_key_frame(mut self, enabled: bool) -> Self {
        self.layer_deactivation_requires_key_frame = enabled;
        self
    }

    /// Create the encoder wrapper driving `backend`.
    pub fn build<B: Vp9Backend>(self, backend: B) -> Result<Vp9Encoder<B>, SvcError> {
        Vp9Encoder::new(self, backend)
    }
}
