use std::fmt;

/// RTP header extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub enum Extension {
    /// <http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time>
    AbsoluteSendTime,
    /// <http://www.webrtc.org/experiments/rtp-hdrext/abs-capture-time>
    AbsoluteCaptureTime,
    /// <urn:ietf:params:rtp-hdrext:ssrc-audio-level>
    AudioLevel,
    /// <http://www.webrtc.org/experiments/rtp-hdrext/inband-cn>
    InbandComfortNoise,
    /// <urn:ietf:params:rtp-hdrext:toffset>
    TransmissionTimeOffset,
    /// <urn:3gpp:video-orientation>
    VideoOrientation,
    /// <http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01>
    TransportSequenceNumber,
    /// <http://www.webrtc.org/experiments/rtp-hdrext/playout-delay>
    PlayoutDelay,
    /// <http://www.webrtc.org/experiments/rtp-hdrext/video-content-type>
    VideoContentType,
    /// <http://www.webrtc.org/experiments/rtp-hdrext/video-timing>
    VideoTiming,
    /// <urn:ietf:params:rtp-hdrext:sdes:rtp-stream-id>
    RtpStreamId,
    /// <urn:ietf:params:rtp-hdrext:sdes:repaired-rtp-stream-id>
    ///
    /// Replaces the RID on RTX packets.
    RepairedRtpStreamId,
    /// <urn:ietf:params:rtp-hdrext:sdes:mid>
    RtpMid,
    /// <http://www.webrtc.org/experiments/rtp-hdrext/color-space>
    ColorSpace,
}

const EXT_URI: &[(Extension, &str)] = &[
    (
        Extension::AbsoluteSendTime,
        "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time",
    ),
    (
        Extension::AbsoluteCaptureTime,
        "http://www.webrtc.org/experiments/rtp-hdrext/abs-capture-time",
    ),
    (
        Extension::AudioLevel,
        "urn:ietf:params:rtp-hdrext:ssrc-audio-level",
    ),
    (
        Extension::InbandComfortNoise,
        "http://www.webrtc.org/experiments/rtp-hdrext/inband-cn",
    ),
    (
        Extension::TransmissionTimeOffset,
        "urn:ietf:params:rtp-hdrext:toffset",
    ),
    (
        Extension::VideoOrientation, //
        "urn:3gpp:video-orientation",
    ),
    (
        Extension::TransportSequenceNumber,
        "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01",
    ),
    (
        Extension::PlayoutDelay,
        "http://www.webrtc.org/experiments/rtp-hdrext/playout-delay",
    ),
    (
        Extension::VideoContentType,
        "http://www.webrtc.org/experiments/rtp-hdrext/video-content-type",
    ),
    (
        Extension::VideoTiming,
        "http://www.webrtc.org/experiments/rtp-hdrext/video-timing",
    ),
    (
        Extension::RtpStreamId,
        "urn:ietf:params:rtp-hdrext:sdes:rtp-stream-id",
    ),
    (
        Extension::RepairedRtpStreamId,
        "urn:ietf:params:rtp-hdrext:sdes:repaired-rtp-stream-id",
    ),
    (
        Extension::RtpMid, //
        "urn:ietf:params:rtp-hdrext:sdes:mid",
    ),
    (
        Extension::ColorSpace,
        "http://www.webrtc.org/experiments/rtp-hdrext/color-space",
    ),
];

/// Max id for the one-byte form (RFC 8285 section 4.2). 15 is reserved.
pub const MAX_ID_ONE_BYTE_FORM: u8 = 14;

/// Max value length for the one-byte form.
pub const MAX_VALUE_SIZE_ONE_BYTE_FORM: usize = 16;

/// Max id when mixing one- and two-byte forms is allowed (RFC 8285 section 4.3).
pub const MAX_ID: u8 = 255;

/// Profile of the extension block, RFC 8285 sections 4.2 and 4.3.
///
/// Every element in one packet uses the same form.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ExtensionsForm {
    /// `0xBEDE`, ids 1..=14, values 1..=16 bytes.
    OneByte,
    /// `0x100x`, ids 1..=255, values 0..=255 bytes.
    TwoByte,
}

impl ExtensionsForm {
    pub(crate) fn serialize(self) -> [u8; 2] {
        match self {
            ExtensionsForm::OneByte => [0xbe, 0xde],
            ExtensionsForm::TwoByte => [0x10, 0x00],
        }
    }

    pub(crate) fn parse(profile: [u8; 2]) -> Option<Self> {
        match profile {
            [0xbe, 0xde] => Some(ExtensionsForm::OneByte),
            // Low nibble is "appbits".
            [0x10, b] if b & 0xf0 == 0 => Some(ExtensionsForm::TwoByte),
            _ => None,
        }
    }

    /// Bytes used per element for the (ID, len) part.
    pub(crate) fn element_header_len(self) -> usize {
        match self {
            ExtensionsForm::OneByte => 1,
            ExtensionsForm::TwoByte => 2,
        }
    }

    /// Form required by a single element.
    pub(crate) fn required_for(id: u8, value_len: usize) -> Self {
        if id > MAX_ID_ONE_BYTE_FORM || value_len == 0 || value_len > MAX_VALUE_SIZE_ONE_BYTE_FORM
        {
            ExtensionsForm::TwoByte
        } else {
            ExtensionsForm::OneByte
        }
    }
}

impl Extension {
    /// Parses an extension from a URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        EXT_URI.iter().find(|(_, u)| *u == uri).map(|(e, _)| *e)
    }

    /// Represents the extension as an URI.
    pub fn as_uri(&self) -> &'static str {
        EXT_URI
            .iter()
            .find(|(e, _)| e == self)
            .map(|(_, u)| *u)
            .unwrap_or("unknown")
    }

    /// Size of the value as written by a sender for fixed size extensions, and
    /// the max size for the variable sized ones.
    pub fn value_size(&self) -> usize {
        use Extension::*;
        match self {
            AbsoluteSendTime => 3,
            // With the estimated capture clock offset.
            AbsoluteCaptureTime => 16,
            AudioLevel => 1,
            InbandComfortNoise => 1,
            TransmissionTimeOffset => 3,
            VideoOrientation => 1,
            TransportSequenceNumber => 2,
            PlayoutDelay => 3,
            VideoContentType => 1,
            VideoTiming => 13,
            RtpStreamId | RepairedRtpStreamId | RtpMid => 16,
            ColorSpace => 28,
        }
    }

    /// Non-volatile extensions can be expected on all packets, if registered.
    ///
    /// Volatile ones, such as video content type which is only set on keyframes,
    /// are left out of overhead calculations.
    pub fn is_non_volatile(&self) -> bool {
        use Extension::*;
        matches!(
            self,
            TransmissionTimeOffset
                | AudioLevel
                | AbsoluteSendTime
                | TransportSequenceNumber
                | RtpStreamId
                | RepairedRtpStreamId
                | RtpMid
        )
    }

    /// Extensions that let a receiver estimate bandwidth.
    pub fn is_bwe(&self) -> bool {
        matches!(
            self,
            Extension::TransportSequenceNumber
                | Extension::AbsoluteSendTime
                | Extension::TransmissionTimeOffset
        )
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_uri())
    }
}

/// Size info for an extension used in overhead calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionSize {
    /// The extension.
    pub ext: Extension,
    /// Bytes the value occupies.
    pub value_size: usize,
}

const fn size(ext: Extension, value_size: usize) -> ExtensionSize {
    ExtensionSize { ext, value_size }
}

/// Extensions that might be used in padding or FEC packets.
pub const FEC_OR_PADDING_EXTENSION_SIZES: &[ExtensionSize] = &[
    size(Extension::AbsoluteSendTime, 3),
    size(Extension::TransmissionTimeOffset, 3),
    size(Extension::TransportSequenceNumber, 2),
    size(Extension::PlayoutDelay, 3),
    size(Extension::RtpMid, 16),
    size(Extension::VideoTiming, 13),
];

/// Extensions that might be used in video packets.
pub const VIDEO_EXTENSION_SIZES: &[ExtensionSize] = &[
    size(Extension::AbsoluteSendTime, 3),
    size(Extension::AbsoluteCaptureTime, 16),
    size(Extension::TransmissionTimeOffset, 3),
    size(Extension::TransportSequenceNumber, 2),
    size(Extension::PlayoutDelay, 3),
    size(Extension::VideoOrientation, 1),
    size(Extension::VideoContentType, 1),
    size(Extension::VideoTiming, 13),
    size(Extension::RtpStreamId, 16),
    size(Extension::RepairedRtpStreamId, 16),
    size(Extension::RtpMid, 16),
];

/// Extensions that might be used in audio packets.
pub const AUDIO_EXTENSION_SIZES: &[ExtensionSize] = &[
    size(Extension::AbsoluteSendTime, 3),
    size(Extension::AbsoluteCaptureTime, 16),
    size(Extension::AudioLevel, 1),
    size(Extension::InbandComfortNoise, 1),
    size(Extension::TransmissionTimeOffset, 3),
    size(Extension::TransportSequenceNumber, 2),
    size(Extension::RtpStreamId, 16),
    size(Extension::RepairedRtpStreamId, 16),
    size(Extension::RtpMid, 16),
];

/// Mapping between RTP extension id to what extension that is.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ExtensionMap {
    // index 0 is extmap:1.
    map: [Option<Extension>; MAX_ID as usize],
    extmap_allow_mixed: bool,
}

impl ExtensionMap {
    /// Create an empty map.
    pub fn empty() -> Self {
        ExtensionMap {
            map: [None; MAX_ID as usize],
            extmap_allow_mixed: false,
        }
    }

    /// Creates a map with the "standard" mappings.
    ///
    /// The standard are taken from Chrome.
    pub fn standard() -> Self {
        let mut exts = Self::empty();

        exts.register(1, Extension::AudioLevel);
        exts.register(2, Extension::AbsoluteSendTime);
        exts.register(3, Extension::TransportSequenceNumber);
        exts.register(4, Extension::RtpMid);
        exts.register(10, Extension::RtpStreamId);
        exts.register(11, Extension::RepairedRtpStreamId);
        exts.register(13, Extension::VideoOrientation);

        exts
    }

    /// Allow ids above 14, which forces the two-byte form.
    pub fn set_extmap_allow_mixed(&mut self, allow: bool) {
        self.extmap_allow_mixed = allow;
    }

    /// Whether ids above 14 are allowed.
    pub fn extmap_allow_mixed(&self) -> bool {
        self.extmap_allow_mixed
    }

    fn max_id(&self) -> u8 {
        if self.extmap_allow_mixed {
            MAX_ID
        } else {
            MAX_ID_ONE_BYTE_FORM
        }
    }

    /// Register an extension by URI.
    ///
    /// Returns false if the URI is unknown, the id is out of range, the id is used
    /// by another extension or the extension is already registered with another id.
    pub fn register_by_uri(&mut self, id: u8, uri: &str) -> bool {
        let Some(ext) = Extension::from_uri(uri) else {
            debug!("Register unknown RTP extension uri: {}", uri);
            return false;
        };
        self.register(id, ext)
    }

    /// Register an extension for an id.
    ///
    /// The id must be in 1..=14, or 1..=255 with extmap-allow-mixed.
    pub fn register(&mut self, id: u8, ext: Extension) -> bool {
        let max = self.max_id();
        if id < 1 || id > max {
            debug!("Register RTP extension out of range 1-{}: {}", max, id);
            return false;
        }

        match self.lookup(id) {
            Some(e) if e == ext => return true,
            Some(e) => {
                debug!("Register RTP extension {} on id {} used by {}", ext, id, e);
                return false;
            }
            None => {}
        }

        if let Some(other) = self.id_of(ext) {
            debug!("RTP extension {} already registered with id {}", ext, other);
            return false;
        }

        self.map[id as usize - 1] = Some(ext);
        true
    }

    /// Remove the extension registered for the URI, if any.
    pub fn deregister(&mut self, uri: &str) {
        let Some(ext) = Extension::from_uri(uri) else {
            return;
        };
        for e in &mut self.map {
            if *e == Some(ext) {
                *e = None;
            }
        }
    }

    /// Tells if the extension is registered.
    pub fn is_registered(&self, ext: Extension) -> bool {
        self.id_of(ext).is_some()
    }

    /// Look up the extension for the id.
    pub fn lookup(&self, id: u8) -> Option<Extension> {
        if id >= 1 {
            self.map[id as usize - 1]
        } else {
            None
        }
    }

    /// Finds the id for an extension (if mapped).
    ///
    /// The returned id will be 1-based.
    pub fn id_of(&self, e: Extension) -> Option<u8> {
        self.map
            .iter()
            .position(|x| *x == Some(e))
            .map(|p| p as u8 + 1)
    }

    /// Returns an iterator over the elements of the extension map
    pub fn iter(&self) -> impl Iterator<Item = (u8, Extension)> + '_ {
        self.map
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.map(|e| ((i + 1) as u8, e)))
    }

    /// Worst case size of the extension block for the registered subset of `sizes`.
    ///
    /// Includes the 4 byte block header and padding to a 32 bit boundary. Zero if
    /// none of the extensions are registered.
    pub fn header_extension_size(&self, sizes: &[ExtensionSize]) -> usize {
        // RFC 3550 section 5.3.1
        const BLOCK_HEADER_SIZE: usize = 4;

        let mut values_size = 0;
        let mut count = 0;
        let mut form = ExtensionsForm::OneByte;

        for s in sizes {
            let Some(id) = self.id_of(s.ext) else {
                continue;
            };
            if ExtensionsForm::required_for(id, s.value_size) == ExtensionsForm::TwoByte {
                form = ExtensionsForm::TwoByte;
            }
            values_size += s.value_size;
            count += 1;
        }

        if values_size == 0 {
            return 0;
        }

        let size = BLOCK_HEADER_SIZE + form.element_header_len() * count + values_size;

        // Extension size is specified in 32 bit words.
        (size + 3) / 4 * 4
    }
}

impl fmt::Debug for ExtensionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Extensions(")?;
        let joined = self
            .iter()
            .map(|(id, e)| format!("{id}={e}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{joined}")?;
        write!(f, ")")?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn register_by_uri() {
        let mut map = ExtensionMap::empty();
        let uri = Extension::AbsoluteSendTime.as_uri();

        assert!(map.register_by_uri(3, uri));
        // Same pair again is fine.
        assert!(map.register_by_uri(3, uri));
        assert_eq!(map.id_of(Extension::AbsoluteSendTime), Some(3));
        assert_eq!(map.lookup(3), Some(Extension::AbsoluteSendTime));
    }

    #[test]
    fn register_conflicts() {
        let mut map = ExtensionMap::empty();
        assert!(map.register(3, Extension::AbsoluteSendTime));

        // id taken by another extension
        assert!(!map.register(3, Extension::TransportSequenceNumber));
        // extension already on another id
        assert!(!map.register(4, Extension::AbsoluteSendTime));
        // unknown uri
        assert!(!map.register_by_uri(5, "urn:nope"));

        assert!(map.register(4, Extension::TransportSequenceNumber));
    }

    #[test]
    fn register_out_of_range() {
        let mut map = ExtensionMap::empty();
        assert!(!map.register(0, Extension::RtpMid));
        assert!(!map.register(15, Extension::RtpMid));

        map.set_extmap_allow_mixed(true);
        assert!(map.register(15, Extension::RtpMid));
        assert!(map.register(255, Extension::RtpStreamId));
    }

    #[test]
    fn deregister() {
        let mut map = ExtensionMap::standard();
        assert!(map.is_registered(Extension::RtpMid));
        map.deregister(Extension::RtpMid.as_uri());
        assert!(!map.is_registered(Extension::RtpMid));
        assert_eq!(map.lookup(4), None);
    }

    #[test]
    fn header_extension_size_one_byte() {
        let mut map = ExtensionMap::empty();
        assert_eq!(map.header_extension_size(FEC_OR_PADDING_EXTENSION_SIZES), 0);

        map.register(1, Extension::AbsoluteSendTime);
        map.register(2, Extension::TransportSequenceNumber);

        // 4 + (1 + 3) + (1 + 2) = 11 -> 12
        assert_eq!(map.header_extension_size(FEC_OR_PADDING_EXTENSION_SIZES), 12);
    }

    #[test]
    fn header_extension_size_two_byte() {
        let mut map = ExtensionMap::empty();
        map.set_extmap_allow_mixed(true);
        map.register(1, Extension::AbsoluteSendTime);
        map.register(20, Extension::TransportSequenceNumber);

        // 4 + (2 + 3) + (2 + 2) = 13 -> 16
        assert_eq!(map.header_extension_size(FEC_OR_PADDING_EXTENSION_SIZES), 16);
    }
}
