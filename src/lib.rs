//! RTP sending with retransmission, padding and VP9 spatial/temporal scalability.
//!
//! This is a Sans I/O library. Nothing in here reads clocks or touches sockets. Every
//! time dependent operation takes a `now: Instant`, and packets leave the library
//! through a [`PacingSink`] that the user provides (or the bundled [`SendQueue`]).
//!
//! The pieces:
//!
//! * [`RtpSender`] numbers outgoing packets, keeps them in a [`PacketHistory`] and
//!   answers NACKs with retransmissions, optionally wrapped as RTX.
//!   It also produces padding for bandwidth probing.
//! * [`svc`] holds the VP9 SVC machinery. Scalability controllers decide which
//!   reference buffers each layer frame uses, [`svc::SvcReferenceTracker`] turns
//!   that into libvpx style buffer assignments and P_DIFF values, and the
//!   [`svc::Vp9Packetizer`] writes the RTP payload descriptor.
//! * [`worker::Worker`] runs a single owner on a thread of its own, for the parts
//!   that must not be touched concurrently.
//!
//! # Sending
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use rtpsvc::{PacketHistory, SendQueue, SenderConfig, StorageMode};
//! use rtpsvc::rtp::RtpPacketType;
//!
//! let history = Arc::new(PacketHistory::new(StorageMode::StoreAndCull, 600));
//!
//! let mut sender = SenderConfig::new()
//!     .set_ssrc(1234.into())
//!     .build(history, SendQueue::new());
//!
//! let now = Instant::now();
//!
//! let mut packet = sender.allocate_packet();
//! packet.set_payload_type(96.into());
//! packet.set_payload(&[1, 2, 3]);
//! packet.set_packet_type(RtpPacketType::Video);
//!
//! sender.assign_sequence_number(&mut packet);
//! sender.enqueue_packets(vec![packet], now);
//!
//! // The pacer decides when packets leave.
//! sender.pacer_mut().handle_timeout(now);
//! let out = sender.pacer_mut().pop(now).unwrap();
//! assert_eq!(*out.ssrc(), 1234);
//!
//! // Sent packets are kept for retransmission.
//! sender.on_packet_sent(&out, now);
//! assert_eq!(sender.history().len(), 1);
//! ```
//!
//! # Logging
//!
//! Everything is logged through [`tracing`]. Retransmissions and layer bookkeeping
//! are at `trace`, state changes at `debug`, and refused input at `warn`.

#![forbid(unsafe_code)]
#![allow(clippy::new_without_default)]
#![allow(clippy::bool_to_int_with_if)]
#![allow(clippy::assertions_on_constants)]
#![allow(clippy::manual_range_contains)]
#![allow(clippy::get_first)]
#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

use thiserror::Error;

#[path = "rtp/mod.rs"]
mod rtp_;

/// Low level RTP types.
pub mod rtp {
    pub use crate::rtp_::{read_original_sequence_number, write_original_sequence_number};
    pub use crate::rtp_::{Bitrate, DataSize};
    pub use crate::rtp_::{Extension, ExtensionMap, ExtensionSize};
    pub use crate::rtp_::{Mid, Pt, Rid, SeqNo, Ssrc, MAX_STR_ID_LEN};
    pub use crate::rtp_::{RtpPacket, RtpPacketType, MAX_CSRCS, MAX_PADDING_SIZE};
    pub use crate::rtp_::{AUDIO_EXTENSION_SIZES, FEC_OR_PADDING_EXTENSION_SIZES};
    pub use crate::rtp_::{FIXED_HEADER_SIZE, RTX_HEADER_SIZE, VIDEO_EXTENSION_SIZES};
    pub use crate::rtp_::{MAX_ID, MAX_ID_ONE_BYTE_FORM};

    pub(crate) use crate::rtp_::extend_seq;
}

mod config;
pub use config::{SenderConfig, Vp9EncoderConfig};

mod history;
pub use history::{PacketHistory, StorageMode};
pub use history::{MAX_CAPACITY, MIN_PACKET_DURATION, MIN_PACKET_DURATION_RTT};

mod pacer;
pub use pacer::{PacingSink, SendQueue};

mod sender;
pub use sender::{MediaKind, RateLimiter, RtpSender, RtpState, RtxMode};
pub use sender::{DEFAULT_MAX_PACKET_SIZE, IP_PACKET_SIZE, MIN_PACKET_SIZE};
pub use sender::{MAX_PADDING_LENGTH, MAX_PADDING_SIZE_FACTOR};
pub use sender::{MIN_AUDIO_PADDING_LENGTH, MIN_PAYLOAD_PADDING_BYTES};

pub mod svc;
pub use svc::SvcError;

pub mod worker;

mod util;

/// Various error types.
pub mod error {
    pub use crate::rtp_::RtpError;
    pub use crate::svc::SvcError;
    pub use crate::worker::WorkerError;
}

/// Errors for the whole library.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RtpSvcError {
    /// RTP errors.
    #[error("{0}")]
    Rtp(#[from] error::RtpError),

    /// VP9 SVC encoding errors.
    #[error("{0}")]
    Svc(#[from] error::SvcError),

    /// The worker owning the state is gone.
    #[error("{0}")]
    Worker(#[from] error::WorkerError),
}
