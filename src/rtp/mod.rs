use thiserror::Error;

mod id;
pub use id::{Mid, Pt, Rid, SeqNo, Ssrc, MAX_STR_ID_LEN};

mod ext;
pub use ext::{Extension, ExtensionMap, ExtensionSize};
pub use ext::{AUDIO_EXTENSION_SIZES, FEC_OR_PADDING_EXTENSION_SIZES, VIDEO_EXTENSION_SIZES};
pub use ext::{MAX_ID, MAX_ID_ONE_BYTE_FORM};

mod header;
pub use header::{read_original_sequence_number, write_original_sequence_number};
pub(crate) use header::extend_seq;
pub use header::{FIXED_HEADER_SIZE, RTX_HEADER_SIZE};

mod packet;
pub use packet::{RtpPacket, RtpPacketType, MAX_CSRCS, MAX_PADDING_SIZE};

mod bandwidth;
pub use bandwidth::{Bitrate, DataSize};

/// Errors that can arise in RTP.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RtpError {
    /// Failed to parse RTP header.
    #[error("Failed to parse RTP header")]
    ParseHeader,
}
