use std::fmt;
use std::time::Instant;

use super::ext::{Extension, ExtensionMap, ExtensionsForm};
use super::header::FIXED_HEADER_SIZE;
use super::{Mid, Pt, Rid, RtpError, Ssrc};

/// Max number of CSRC in one packet.
pub const MAX_CSRCS: usize = 15;

/// Max padding at the end of a packet, the count goes in a single byte.
pub const MAX_PADDING_SIZE: usize = 255;

/// What a packet carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RtpPacketType {
    /// Audio media.
    Audio,
    /// Video media.
    Video,
    /// A resent copy of an earlier packet, RTX or not.
    Retransmission,
    /// Padding for bandwidth probing, with or without a redundant payload.
    Padding,
    /// Forward error correction.
    ForwardErrorCorrection,
}

#[derive(Clone, PartialEq, Eq)]
struct ExtensionEntry {
    id: u8,
    ext: Extension,
    value: Vec<u8>,
}

/// An RTP packet under construction, or parsed from the wire.
///
/// The packet has a capacity, the max serialized size. Any mutation that would
/// make [`RtpPacket::size()`] exceed the capacity is refused and leaves the
/// packet untouched.
#[derive(Clone)]
pub struct RtpPacket {
    exts: ExtensionMap,
    marker: bool,
    payload_type: Pt,
    sequence_number: u16,
    timestamp: u32,
    ssrc: Ssrc,
    csrcs: Vec<u32>,
    extensions: Vec<ExtensionEntry>,
    payload: Vec<u8>,
    padding_size: usize,
    capacity: usize,
    packet_type: Option<RtpPacketType>,
    capture_time: Option<Instant>,
    retransmitted_sequence_number: Option<u16>,
}

impl RtpPacket {
    /// Create an empty packet using the extension ids of `exts`.
    pub fn new(exts: &ExtensionMap, capacity: usize) -> Self {
        RtpPacket {
            exts: *exts,
            marker: false,
            payload_type: Pt::new_with_value(0),
            sequence_number: 0,
            timestamp: 0,
            ssrc: 0.into(),
            csrcs: vec![],
            extensions: vec![],
            payload: vec![],
            padding_size: 0,
            capacity,
            packet_type: None,
            capture_time: None,
            retransmitted_sequence_number: None,
        }
    }

    /// The extension mapping used by this packet.
    pub fn extension_map(&self) -> &ExtensionMap {
        &self.exts
    }

    /// The marker bit, set on the last packet of a frame.
    pub fn marker(&self) -> bool {
        self.marker
    }

    /// Set the marker bit.
    pub fn set_marker(&mut self, marker: bool) {
        self.marker = marker;
    }

    /// The payload type.
    pub fn payload_type(&self) -> Pt {
        self.payload_type
    }

    /// Payload types above 127 do not fit the 7 bit field and are ignored.
    pub fn set_payload_type(&mut self, pt: Pt) {
        if !pt.is_valid() {
            debug!("Ignore invalid payload type: {}", pt);
            return;
        }
        self.payload_type = pt;
    }

    /// The sequence number as on the wire.
    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    /// Set the sequence number.
    pub fn set_sequence_number(&mut self, seq_no: u16) {
        self.sequence_number = seq_no;
    }

    /// The RTP timestamp.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Set the RTP timestamp.
    pub fn set_timestamp(&mut self, timestamp: u32) {
        self.timestamp = timestamp;
    }

    /// The SSRC.
    pub fn ssrc(&self) -> Ssrc {
        self.ssrc
    }

    /// Set the SSRC.
    pub fn set_ssrc(&mut self, ssrc: Ssrc) {
        self.ssrc = ssrc;
    }

    /// The contributing sources.
    pub fn csrcs(&self) -> &[u32] {
        &self.csrcs
    }

    /// Set the contributing sources. At most 15 are allowed.
    pub fn set_csrcs(&mut self, csrcs: &[u32]) -> bool {
        if csrcs.len() > MAX_CSRCS {
            debug!("Too many CSRC: {}", csrcs.len());
            return false;
        }
        let grow = (csrcs.len() * 4).saturating_sub(self.csrcs.len() * 4);
        if !self.fits(grow) {
            return false;
        }
        self.csrcs = csrcs.to_vec();
        true
    }

    /// What the packet carries, if tagged.
    pub fn packet_type(&self) -> Option<RtpPacketType> {
        self.packet_type
    }

    /// Tag what the packet carries.
    pub fn set_packet_type(&mut self, packet_type: RtpPacketType) {
        self.packet_type = Some(packet_type);
    }

    /// When the media was captured, if known.
    pub fn capture_time(&self) -> Option<Instant> {
        self.capture_time
    }

    /// Set the capture time.
    pub fn set_capture_time(&mut self, t: Instant) {
        self.capture_time = Some(t);
    }

    /// For retransmissions, the sequence number of the packet being repaired.
    pub fn retransmitted_sequence_number(&self) -> Option<u16> {
        self.retransmitted_sequence_number
    }

    /// Mark the packet as a retransmission of `seq_no`.
    pub fn set_retransmitted_sequence_number(&mut self, seq_no: u16) {
        self.retransmitted_sequence_number = Some(seq_no);
    }

    /// Max serialized size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Header size including CSRC and extension block.
    pub fn headers_size(&self) -> usize {
        FIXED_HEADER_SIZE + self.csrcs.len() * 4 + self.extensions_block_size()
    }

    /// The payload, excluding padding.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Length of the payload.
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Replace the payload. Fails if the result would exceed the capacity.
    pub fn set_payload(&mut self, payload: &[u8]) -> bool {
        let size = self.headers_size() + payload.len() + self.padding_size;
        if size > self.capacity {
            debug!(
                "Payload of {} does not fit packet capacity {}",
                payload.len(),
                self.capacity
            );
            return false;
        }
        self.payload.clear();
        self.payload.extend_from_slice(payload);
        true
    }

    /// Number of padding bytes, including the count byte.
    pub fn padding_size(&self) -> usize {
        self.padding_size
    }

    /// Set the number of padding bytes at the end of the packet.
    ///
    /// The last padding byte holds the count, so 1..=255 is allowed, or 0 to remove padding.
    pub fn set_padding(&mut self, padding_size: usize) -> bool {
        if padding_size > MAX_PADDING_SIZE {
            debug!("Padding larger than {}: {}", MAX_PADDING_SIZE, padding_size);
            return false;
        }
        let size = self.headers_size() + self.payload.len() + padding_size;
        if size > self.capacity {
            debug!("Padding of {} does not fit packet capacity", padding_size);
            return false;
        }
        self.padding_size = padding_size;
        true
    }

    /// Serialized size.
    pub fn size(&self) -> usize {
        self.headers_size() + self.payload.len() + self.padding_size
    }

    /// Whether a value is set for the extension.
    pub fn has_extension(&self, ext: Extension) -> bool {
        self.extensions.iter().any(|e| e.ext == ext)
    }

    /// Raw value of an extension, if set.
    pub fn extension(&self, ext: Extension) -> Option<&[u8]> {
        self.extensions
            .iter()
            .find(|e| e.ext == ext)
            .map(|e| e.value.as_slice())
    }

    /// Iterate over all set extensions in the order they were set.
    pub fn extensions(&self) -> impl Iterator<Item = (Extension, &[u8])> + '_ {
        self.extensions.iter().map(|e| (e.ext, e.value.as_slice()))
    }

    /// Set the raw value of an extension.
    ///
    /// Fails if the extension is not registered, the value is too large or the
    /// packet would exceed its capacity. Values that need the two-byte form are
    /// only accepted when the mapping allows mixing forms.
    pub fn set_extension(&mut self, ext: Extension, value: &[u8]) -> bool {
        let Some(id) = self.exts.id_of(ext) else {
            trace!("Extension not registered: {}", ext);
            return false;
        };
        if value.len() > u8::MAX as usize {
            return false;
        }
        if ExtensionsForm::required_for(id, value.len()) == ExtensionsForm::TwoByte
            && !self.exts.extmap_allow_mixed()
        {
            debug!("Extension {} value of {} needs two-byte form", ext, value.len());
            return false;
        }

        let mut next = self.extensions.clone();
        match next.iter_mut().find(|e| e.ext == ext) {
            Some(e) => e.value = value.to_vec(),
            None => next.push(ExtensionEntry {
                id,
                ext,
                value: value.to_vec(),
            }),
        }

        let grow = block_size(&next).saturating_sub(self.extensions_block_size());
        if !self.fits(grow) {
            return false;
        }

        self.extensions = next;
        true
    }

    /// Reserve zeroed space for an extension to be filled in at send time.
    pub fn reserve_extension(&mut self, ext: Extension) -> bool {
        let value = vec![0; ext.value_size()];
        self.set_extension(ext, &value)
    }

    /// Remove an extension value. Returns false if there was none.
    pub fn remove_extension(&mut self, ext: Extension) -> bool {
        let before = self.extensions.len();
        self.extensions.retain(|e| e.ext != ext);
        before != self.extensions.len()
    }

    /// Set the MID extension. An empty value is ignored.
    pub fn set_mid(&mut self, mid: Mid) -> bool {
        if mid.is_empty() {
            return false;
        }
        self.set_extension(Extension::RtpMid, mid.as_bytes())
    }

    /// The MID extension value.
    pub fn mid(&self) -> Option<Mid> {
        self.str_extension(Extension::RtpMid).map(Mid::from)
    }

    /// Set the RID extension. An empty value is ignored.
    pub fn set_rid(&mut self, rid: Rid) -> bool {
        if rid.is_empty() {
            return false;
        }
        self.set_extension(Extension::RtpStreamId, rid.as_bytes())
    }

    /// The RID extension value.
    pub fn rid(&self) -> Option<Rid> {
        self.str_extension(Extension::RtpStreamId).map(Rid::from)
    }

    /// Set the repaired RID extension. An empty value is ignored.
    pub fn set_repaired_rid(&mut self, rid: Rid) -> bool {
        if rid.is_empty() {
            return false;
        }
        self.set_extension(Extension::RepairedRtpStreamId, rid.as_bytes())
    }

    /// The repaired RID extension value.
    pub fn repaired_rid(&self) -> Option<Rid> {
        self.str_extension(Extension::RepairedRtpStreamId)
            .map(Rid::from)
    }

    fn str_extension(&self, ext: Extension) -> Option<&str> {
        self.extension(ext)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    fn extensions_block_size(&self) -> usize {
        block_size(&self.extensions)
    }

    fn fits(&self, grow: usize) -> bool {
        let fits = self.size() + grow <= self.capacity;
        if !fits {
            debug!(
                "Packet of {} can't grow by {} with capacity {}",
                self.size(),
                grow,
                self.capacity
            );
        }
        fits
    }

    fn form(&self) -> ExtensionsForm {
        form_of(&self.extensions)
    }

    /// Write the packet to wire format (RFC 3550, RFC 8285).
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0_u8; self.size()];

        buf[0] = 0b10_0_0_0000
            | if self.padding_size > 0 { 1 << 5 } else { 0 }
            | if self.extensions.is_empty() { 0 } else { 1 << 4 }
            | self.csrcs.len() as u8;
        buf[1] = *self.payload_type & 0b0111_1111 | if self.marker { 1 << 7 } else { 0 };
        buf[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        let mut pos = FIXED_HEADER_SIZE;
        for c in &self.csrcs {
            buf[pos..pos + 4].copy_from_slice(&c.to_be_bytes());
            pos += 4;
        }

        if !self.extensions.is_empty() {
            let form = self.form();
            let block = self.extensions_block_size();
            buf[pos..pos + 2].copy_from_slice(&form.serialize());
            let words = ((block - 4) / 4) as u16;
            buf[pos + 2..pos + 4].copy_from_slice(&words.to_be_bytes());

            let mut p = pos + 4;
            for e in &self.extensions {
                match form {
                    ExtensionsForm::OneByte => {
                        buf[p] = (e.id << 4) | (e.value.len() as u8 - 1);
                        p += 1;
                    }
                    ExtensionsForm::TwoByte => {
                        buf[p] = e.id;
                        buf[p + 1] = e.value.len() as u8;
                        p += 2;
                    }
                }
                buf[p..p + e.value.len()].copy_from_slice(&e.value);
                p += e.value.len();
            }
            // remaining bytes up to the block end are already zero
            pos += block;
        }

        buf[pos..pos + self.payload.len()].copy_from_slice(&self.payload);
        pos += self.payload.len();

        if self.padding_size > 0 {
            let last = pos + self.padding_size - 1;
            buf[last] = self.padding_size as u8;
        }

        buf
    }

    /// Parse a packet from wire format. Extensions not in `exts` are dropped.
    ///
    /// The capacity of the parsed packet is the input length.
    pub fn parse(buf: &[u8], exts: &ExtensionMap) -> Result<RtpPacket, RtpError> {
        if buf.len() < FIXED_HEADER_SIZE {
            trace!("RTP header too short < 12: {}", buf.len());
            return Err(RtpError::ParseHeader);
        }

        let version = (buf[0] & 0b1100_0000) >> 6;
        if version != 2 {
            trace!("RTP version is not 2");
            return Err(RtpError::ParseHeader);
        }
        let has_padding = buf[0] & 0b0010_0000 > 0;
        let has_extension = buf[0] & 0b0001_0000 > 0;
        let csrc_count = (buf[0] & 0b0000_1111) as usize;

        let mut packet = RtpPacket::new(exts, buf.len());
        packet.marker = buf[1] & 0b1000_0000 > 0;
        packet.payload_type = (buf[1] & 0b0111_1111).into();
        packet.sequence_number = u16::from_be_bytes([buf[2], buf[3]]);
        packet.timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        packet.ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]).into();

        let mut rest = &buf[FIXED_HEADER_SIZE..];

        if rest.len() < csrc_count * 4 {
            trace!("RTP header invalid, not enough csrc");
            return Err(RtpError::ParseHeader);
        }
        for c in rest[..csrc_count * 4].chunks_exact(4) {
            packet
                .csrcs
                .push(u32::from_be_bytes([c[0], c[1], c[2], c[3]]));
        }
        rest = &rest[csrc_count * 4..];

        if has_extension {
            if rest.len() < 4 {
                trace!("RTP bad header extension");
                return Err(RtpError::ParseHeader);
            }
            let Some(form) = ExtensionsForm::parse([rest[0], rest[1]]) else {
                trace!(
                    "Unknown RTP header extensions form: {:?}",
                    u16::from_be_bytes([rest[0], rest[1]])
                );
                return Err(RtpError::ParseHeader);
            };
            let ext_len = u16::from_be_bytes([rest[2], rest[3]]) as usize * 4;
            rest = &rest[4..];
            if rest.len() < ext_len {
                trace!("RTP ext len larger than header {} > {}", ext_len, rest.len());
                return Err(RtpError::ParseHeader);
            }
            packet.extensions = parse_elements(&rest[..ext_len], form, exts)?;
            rest = &rest[ext_len..];
        }

        let mut payload = rest;
        if has_padding {
            let Some(pad) = payload.last().map(|v| *v as usize) else {
                return Err(RtpError::ParseHeader);
            };
            if pad == 0 || pad > payload.len() {
                trace!("RTP padding {} larger than body {}", pad, payload.len());
                return Err(RtpError::ParseHeader);
            }
            packet.padding_size = pad;
            payload = &payload[..payload.len() - pad];
        }
        packet.payload = payload.to_vec();

        Ok(packet)
    }
}

fn form_of(entries: &[ExtensionEntry]) -> ExtensionsForm {
    let two_byte = entries
        .iter()
        .any(|e| ExtensionsForm::required_for(e.id, e.value.len()) == ExtensionsForm::TwoByte);
    if two_byte {
        ExtensionsForm::TwoByte
    } else {
        ExtensionsForm::OneByte
    }
}

fn block_size(entries: &[ExtensionEntry]) -> usize {
    if entries.is_empty() {
        return 0;
    }
    let form = form_of(entries);
    let len: usize = entries
        .iter()
        .map(|e| form.element_header_len() + e.value.len())
        .sum();
    // 4 byte block header, padded to 32 bit.
    (4 + len + 3) / 4 * 4
}

fn parse_elements(
    mut buf: &[u8],
    form: ExtensionsForm,
    exts: &ExtensionMap,
) -> Result<Vec<ExtensionEntry>, RtpError> {
    let mut entries = vec![];

    loop {
        // Skip padding bytes between elements.
        while buf.first() == Some(&0) {
            buf = &buf[1..];
        }
        if buf.is_empty() {
            break;
        }

        let (id, len, hlen) = match form {
            ExtensionsForm::OneByte => {
                let id = buf[0] >> 4;
                if id == 15 {
                    // RFC 8285: stop parsing on reserved id.
                    break;
                }
                (id, (buf[0] & 0b1111) as usize + 1, 1)
            }
            ExtensionsForm::TwoByte => {
                if buf.len() < 2 {
                    return Err(RtpError::ParseHeader);
                }
                (buf[0], buf[1] as usize, 2)
            }
        };

        if buf.len() < hlen + len {
            trace!("RTP extension {} len {} beyond block", id, len);
            return Err(RtpError::ParseHeader);
        }
        let value = &buf[hlen..hlen + len];

        if let Some(ext) = exts.lookup(id) {
            entries.push(ExtensionEntry {
                id,
                ext,
                value: value.to_vec(),
            });
        }

        buf = &buf[hlen + len..];
    }

    Ok(entries)
}

impl fmt::Debug for RtpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtpPacket")
            .field("ssrc", &self.ssrc)
            .field("seq_no", &self.sequence_number)
            .field("pt", &self.payload_type)
            .field("marker", &self.marker)
            .field("timestamp", &self.timestamp)
            .field(
                "extensions",
                &self.extensions.iter().map(|e| e.ext).collect::<Vec<_>>(),
            )
            .field("payload_len", &self.payload.len())
            .field("padding", &self.padding_size)
            .field("packet_type", &self.packet_type)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn exts() -> ExtensionMap {
        let mut exts = ExtensionMap::empty();
        exts.register(3, Extension::AbsoluteSendTime);
        exts.register(5, Extension::TransportSequenceNumber);
        exts.register(4, Extension::RtpMid);
        exts
    }

    #[test]
    fn size_follows_content() {
        let mut p = RtpPacket::new(&exts(), 1200);
        assert_eq!(p.size(), 12);

        assert!(p.reserve_extension(Extension::AbsoluteSendTime));
        // 4 + 1 + 3 = 8
        assert_eq!(p.size(), 20);

        assert!(p.set_csrcs(&[1, 2]));
        assert_eq!(p.size(), 28);

        assert!(p.set_payload(&[1, 2, 3]));
        assert_eq!(p.size(), 31);

        assert!(p.set_padding(5));
        assert_eq!(p.size(), 36);
    }

    #[test]
    fn refuses_growth_over_capacity() {
        let mut p = RtpPacket::new(&exts(), 20);
        assert!(!p.set_payload(&[0; 9]));
        assert!(p.set_payload(&[0; 8]));
        assert!(!p.reserve_extension(Extension::TransportSequenceNumber));
        assert!(!p.set_padding(1));
        assert_eq!(p.size(), 20);
        assert!(!p.has_extension(Extension::TransportSequenceNumber));
    }

    #[test]
    fn unregistered_extension() {
        let mut p = RtpPacket::new(&exts(), 1200);
        assert!(!p.reserve_extension(Extension::AudioLevel));
        assert!(!p.set_rid("r0".into()));
    }

    #[test]
    fn serialize_parse() {
        let mut p = RtpPacket::new(&exts(), 1200);
        p.set_marker(true);
        p.set_payload_type(96.into());
        p.set_sequence_number(42);
        p.set_timestamp(90_000);
        p.set_ssrc(1000.into());
        assert!(p.set_csrcs(&[7]));
        assert!(p.set_extension(Extension::AbsoluteSendTime, &[1, 2, 3]));
        assert!(p.set_mid("a".into()));
        assert!(p.set_payload(&[9, 8, 7]));
        assert!(p.set_padding(4));

        let buf = p.serialize();
        assert_eq!(buf.len(), p.size());
        assert_eq!(&buf[12..16], &[0, 0, 0, 7]);
        assert_eq!(&buf[16..18], &[0xbe, 0xde]);

        let q = RtpPacket::parse(&buf, &exts()).unwrap();
        assert!(q.marker());
        assert_eq!(q.payload_type(), 96.into());
        assert_eq!(q.sequence_number(), 42);
        assert_eq!(q.timestamp(), 90_000);
        assert_eq!(q.ssrc(), 1000.into());
        assert_eq!(q.csrcs(), &[7]);
        assert_eq!(q.extension(Extension::AbsoluteSendTime), Some(&[1, 2, 3][..]));
        assert_eq!(q.mid(), Some("a".into()));
        assert_eq!(q.payload(), &[9, 8, 7]);
        assert_eq!(q.padding_size(), 4);
        assert_eq!(q.size(), p.size());
    }

    #[test]
    fn two_byte_form_for_high_ids() {
        let mut exts = ExtensionMap::empty();
        exts.set_extmap_allow_mixed(true);
        exts.register(20, Extension::TransportSequenceNumber);

        let mut p = RtpPacket::new(&exts, 1200);
        assert!(p.set_extension(Extension::TransportSequenceNumber, &[0, 1]));
        // 4 + 2 + 2 = 8
        assert_eq!(p.headers_size(), 20);

        let buf = p.serialize();
        assert_eq!(&buf[12..14], &[0x10, 0x00]);

        let q = RtpPacket::parse(&buf, &exts).unwrap();
        assert_eq!(q.extension(Extension::TransportSequenceNumber), Some(&[0, 1][..]));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(RtpPacket::parse(&[0x80, 0], &exts()).is_err());
        assert!(RtpPacket::parse(&[0; 12], &exts()).is_err());
    }
}
