use super::SeqNo;

/// RTP fixed header size (RFC 3550 section 5.1).
pub const FIXED_HEADER_SIZE: usize = 12;

/// Size of the original sequence number that prefixes an RTX payload (RFC 4588).
pub const RTX_HEADER_SIZE: usize = 2;

/// The original sequence number at the front of an RTX payload.
///
/// `None` when the payload is too short, as for a pure padding packet.
pub fn read_original_sequence_number(payload: &[u8]) -> Option<u16> {
    let b = payload.get(..RTX_HEADER_SIZE)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

/// Write the original sequence number at the front of an RTX payload.
///
/// Panics if `payload` is shorter than [`RTX_HEADER_SIZE`].
pub fn write_original_sequence_number(payload: &mut [u8], seq_no: u16) -> usize {
    payload[..RTX_HEADER_SIZE].copy_from_slice(&seq_no.to_be_bytes());
    RTX_HEADER_SIZE
}

/// Unwrap a 16 bit sequence number to the 64 bit value closest to `prev`.
pub fn extend_seq(prev: Option<SeqNo>, seq: u16) -> SeqNo {
    let Some(prev) = prev.map(|p| *p) else {
        return (seq as u64).into();
    };

    let cycle = prev & !0xffff;
    let candidate = cycle | seq as u64;

    let ext = if candidate + 0x8000 < prev {
        candidate + 0x1_0000
    } else if candidate > prev + 0x8000 && cycle > 0 {
        candidate - 0x1_0000
    } else {
        candidate
    };

    ext.into()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extend_across_wrap() {
        let ext = |prev: Option<u64>, seq| *extend_seq(prev.map(SeqNo::from), seq);

        assert_eq!(ext(None, 65_535), 65_535);
        assert_eq!(ext(Some(65_535), 0), 65_536);
        assert_eq!(ext(Some(65_536), 65_535), 65_535);
        assert_eq!(ext(Some(65_536), 3), 65_539);
        assert_eq!(ext(Some(10), 65_000), 65_000);
    }

    #[test]
    fn original_sequence_number() {
        let mut buf = [0_u8; 2];
        assert_eq!(write_original_sequence_number(&mut buf, 42), 2);
        assert_eq!(buf, [0x00, 0x2a]);
        assert_eq!(read_original_sequence_number(&buf), Some(42));
        assert_eq!(read_original_sequence_number(&buf[..1]), None);
    }
}
