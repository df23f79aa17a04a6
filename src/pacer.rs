//! Where built packets go.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::rtp::RtpPacket;

/// Receiver of packets built by the sender.
///
/// Implementations decide when packets actually leave. Enqueueing never blocks.
pub trait PacingSink {
    /// Enqueue packets. The order within `packets` must be kept.
    fn enqueue_packets(&mut self, packets: Vec<RtpPacket>);
}

/// A FIFO pacing sink.
///
/// Packets pushed are not released until timestamped by [`SendQueue::handle_timeout`].
#[derive(Debug, Default)]
pub struct SendQueue {
    queue: VecDeque<Queued>,
    // Bytes of timestamped packets.
    queued_bytes: usize,
    last_emitted: Option<Instant>,
}

#[derive(Debug)]
struct Queued {
    packet: RtpPacket,
    // None until the next handle_timeout.
    queued_at: Option<Instant>,
}

impl SendQueue {
    /// An empty queue.
    pub fn new() -> Self {
        SendQueue::default()
    }

    /// Timestamp all packets enqueued since the last call.
    pub fn handle_timeout(&mut self, now: Instant) {
        // Untimestamped packets are always at the back.
        for q in self.queue.iter_mut().rev().take_while(|q| q.queued_at.is_none()) {
            q.queued_at = Some(now);
            self.queued_bytes += q.packet.size();
        }
    }

    /// Whether packets are waiting for [`SendQueue::handle_timeout`].
    pub fn need_timeout(&self) -> bool {
        self.queue.back().is_some_and(|q| q.queued_at.is_none())
    }

    /// The next packet [`SendQueue::pop`] would release.
    pub fn peek(&self) -> Option<&RtpPacket> {
        self.queue
            .front()
            .filter(|q| q.queued_at.is_some())
            .map(|q| &q.packet)
    }

    /// Release the first timestamped packet.
    pub fn pop(&mut self, now: Instant) -> Option<RtpPacket> {
        self.peek()?;
        let q = self.queue.pop_front()?;

        self.queued_bytes -= q.packet.size();
        self.last_emitted = Some(now);

        Some(q.packet)
    }

    /// Remove everything, timestamped or not, in queue order.
    pub fn drain(&mut self) -> Vec<RtpPacket> {
        self.queued_bytes = 0;
        self.queue.drain(..).map(|q| q.packet).collect()
    }

    /// Number of packets, timestamped or not.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue holds no packets at all.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Bytes of the timestamped, unsent packets.
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    /// Summed queue time of all timestamped packets at `now`.
    pub fn total_queue_time(&self, now: Instant) -> Duration {
        self.queue
            .iter()
            .filter_map(|q| q.queued_at)
            .map(|at| now.saturating_duration_since(at))
            .sum()
    }

    /// When a packet was last popped.
    pub fn last_emitted(&self) -> Option<Instant> {
        self.last_emitted
    }
}

impl PacingSink for SendQueue {
    fn enqueue_packets(&mut self, packets: Vec<RtpPacket>) {
        self.queue.extend(packets.into_iter().map(|packet| Queued {
            packet,
            queued_at: None,
        }));
    }
}
