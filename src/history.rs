//! History of sent media packets, used for retransmissions and payload padding.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::rtp::{extend_seq, RtpPacket, SeqNo};

/// Hard upper bound of the number of packets kept.
pub const MAX_CAPACITY: usize = 9600;

/// Packets are kept at least this long.
pub const MIN_PACKET_DURATION: Duration = Duration::from_secs(1);

/// Packets are kept at least this many RTT.
pub const MIN_PACKET_DURATION_RTT: u32 = 3;

/// Whether the history stores anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Nothing is stored, all lookups miss.
    Disabled,
    /// Packets are stored and culled by count and age.
    StoreAndCull,
}

/// Packet history shared between the sender and the pacer.
///
/// Internally synchronized. All operations lock for the duration of the call,
/// including the `encapsulate` callbacks.
#[derive(Debug)]
pub struct PacketHistory {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    mode: StorageMode,
    number_to_store: usize,
    rtt: Duration,

    packet_by_seq_no: BTreeMap<SeqNo, StoredPacket>,
    // (times retransmitted, newest first) -> seq_no
    padding_priority: BTreeSet<(usize, Reverse<u64>, SeqNo)>,
    newest_seq_no: Option<SeqNo>,
    latest_send_time: Option<Instant>,
    insert_count: u64,
}

#[derive(Debug)]
struct StoredPacket {
    packet: RtpPacket,
    send_time: Option<Instant>,
    times_retransmitted: usize,
    pending_transmission: bool,
    insert_order: u64,
}

impl StoredPacket {
    fn priority(&self, seq_no: SeqNo) -> (usize, Reverse<u64>, SeqNo) {
        (self.times_retransmitted, Reverse(self.insert_order), seq_no)
    }
}

impl PacketHistory {
    /// Create a new history storing up to `number_to_store` packets.
    pub fn new(mode: StorageMode, number_to_store: usize) -> Self {
        PacketHistory {
            inner: Mutex::new(Inner {
                mode,
                number_to_store: number_to_store.min(MAX_CAPACITY),
                rtt: Duration::ZERO,
                packet_by_seq_no: BTreeMap::new(),
                padding_priority: BTreeSet::new(),
                newest_seq_no: None,
                latest_send_time: None,
                insert_count: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Poisoning is ignored.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Change the storage mode. Disabling clears the history.
    pub fn set_store_packets_status(&self, mode: StorageMode, number_to_store: usize) {
        let mut inner = self.lock();
        if mode != StorageMode::Disabled && inner.mode != StorageMode::Disabled {
            debug!("Packet history already enabled, resizing to {}", number_to_store);
        }
        inner.mode = mode;
        inner.number_to_store = number_to_store.min(MAX_CAPACITY);
        if mode == StorageMode::Disabled {
            inner.clear();
        }
    }

    /// Whether packets are stored.
    pub fn storage_mode(&self) -> StorageMode {
        self.lock().mode
    }

    /// Set the RTT used for culling and resend throttling.
    pub fn set_rtt(&self, rtt: Duration) {
        let mut inner = self.lock();
        inner.rtt = rtt;
        // Culling depends on RTT.
        inner.cull_old_packets();
    }

    /// The round trip time last set.
    pub fn rtt(&self) -> Duration {
        self.lock().rtt
    }

    /// Store a media packet. `send_time` is `None` if the packet is not yet sent.
    pub fn put_rtp_packet(&self, packet: RtpPacket, send_time: Option<Instant>) {
        let mut inner = self.lock();
        if inner.mode == StorageMode::Disabled {
            return;
        }

        let seq_no = extend_seq(inner.newest_seq_no, packet.sequence_number());

        if inner.packet_by_seq_no.contains_key(&seq_no) {
            warn!("Duplicate packet in history, replacing: {}", seq_no);
            inner.remove(seq_no);
        }

        inner.insert_count += 1;
        let stored = StoredPacket {
            packet,
            send_time,
            times_retransmitted: 0,
            pending_transmission: false,
            insert_order: inner.insert_count,
        };
        inner.padding_priority.insert(stored.priority(seq_no));
        inner.packet_by_seq_no.insert(seq_no, stored);

        if inner.newest_seq_no.map(|n| seq_no > n).unwrap_or(true) {
            inner.newest_seq_no = Some(seq_no);
        }
        if let Some(t) = send_time {
            inner.note_send_time(t);
        }

        inner.cull_old_packets();
    }

    /// Look up a packet for retransmission.
    ///
    /// Misses if the packet is unknown, already pending in the pacer, or was
    /// retransmitted less than one RTT ago. When `encapsulate` produces a
    /// packet, the stored one is marked pending until [`Self::mark_packet_as_sent`].
    pub fn get_packet_and_mark_as_pending<F>(
        &self,
        seq_no: u16,
        now: Instant,
        encapsulate: F,
    ) -> Option<RtpPacket>
    where
        F: FnOnce(&RtpPacket) -> Option<RtpPacket>,
    {
        let mut inner = self.lock();
        if inner.mode == StorageMode::Disabled {
            return None;
        }

        let seq_no = extend_seq(inner.newest_seq_no, seq_no);
        let rtt = inner.rtt;
        let stored = inner.packet_by_seq_no.get_mut(&seq_no)?;

        if stored.pending_transmission {
            trace!("Packet already pending: {}", seq_no);
            return None;
        }

        if let Some(send_time) = stored.send_time {
            if stored.times_retransmitted > 0 && now < send_time + rtt {
                trace!("Packet resent less than one RTT ago: {}", seq_no);
                return None;
            }
        }

        let encapsulated = encapsulate(&stored.packet)?;
        stored.pending_transmission = true;

        Some(encapsulated)
    }

    /// The packet left the pacer. Clears pending, stamps send time and counts a retransmission.
    pub fn mark_packet_as_sent(&self, seq_no: u16, now: Instant) {
        let mut inner = self.lock();
        if inner.mode == StorageMode::Disabled {
            return;
        }

        let seq_no = extend_seq(inner.newest_seq_no, seq_no);
        if !inner.packet_by_seq_no.contains_key(&seq_no) {
            return;
        }

        inner.increment_times_retransmitted(seq_no, now);
        if let Some(stored) = inner.packet_by_seq_no.get_mut(&seq_no) {
            stored.pending_transmission = false;
        }
        inner.note_send_time(now);
    }

    /// Find the most useful packet to send as redundant padding.
    ///
    /// That is the sent, non-pending packet retransmitted the fewest times, newest first.
    pub fn get_payload_padding_packet<F>(&self, encapsulate: F, now: Instant) -> Option<RtpPacket>
    where
        F: FnOnce(&RtpPacket) -> Option<RtpPacket>,
    {
        let mut inner = self.lock();
        if inner.mode == StorageMode::Disabled {
            return None;
        }

        let seq_no = inner
            .padding_priority
            .iter()
            .map(|(_, _, s)| *s)
            .find(|s| {
                inner
                    .packet_by_seq_no
                    .get(s)
                    .map(|p| !p.pending_transmission && p.send_time.is_some())
                    .unwrap_or(false)
            })?;

        let stored = inner.packet_by_seq_no.get(&seq_no)?;
        let padding = encapsulate(&stored.packet)?;

        inner.increment_times_retransmitted(seq_no, now);

        Some(padding)
    }

    /// Number of stored packets.
    pub fn len(&self) -> usize {
        self.lock().packet_by_seq_no.len()
    }

    /// Whether no packets are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all stored packets.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Inner {
    fn clear(&mut self) {
        self.packet_by_seq_no.clear();
        self.padding_priority.clear();
        self.newest_seq_no = None;
        self.latest_send_time = None;
    }

    fn note_send_time(&mut self, t: Instant) {
        if self.latest_send_time.map(|l| t > l).unwrap_or(true) {
            self.latest_send_time = Some(t);
        }
    }

    fn increment_times_retransmitted(&mut self, seq_no: SeqNo, now: Instant) {
        let Some(stored) = self.packet_by_seq_no.get_mut(&seq_no) else {
            return;
        };
        self.padding_priority.remove(&stored.priority(seq_no));
        stored.times_retransmitted += 1;
        stored.send_time = Some(now);
        self.padding_priority.insert(stored.priority(seq_no));
    }

    fn remove(&mut self, seq_no: SeqNo) -> Option<StoredPacket> {
        let stored = self.packet_by_seq_no.remove(&seq_no)?;
        self.padding_priority.remove(&stored.priority(seq_no));
        Some(stored)
    }

    fn packet_duration(&self) -> Duration {
        (self.rtt * MIN_PACKET_DURATION_RTT).max(MIN_PACKET_DURATION)
    }

    fn cull_old_packets(&mut self) {
        let duration = self.packet_duration();

        while let Some((seq_no, oldest)) = self.packet_by_seq_no.iter().next() {
            let seq_no = *seq_no;

            let too_many = self.packet_by_seq_no.len() > self.number_to_store;

            let too_old = match (oldest.send_time, self.latest_send_time) {
                (Some(sent), Some(latest)) => {
                    !oldest.pending_transmission && latest.saturating_duration_since(sent) >= duration
                }
                _ => false,
            };

            if !too_many && !too_old {
                break;
            }

            trace!("Cull packet from history: {}", seq_no);
            self.remove(seq_no);
        }
    }
}
