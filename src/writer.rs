//! Retry/ack window: the send-side state machine.
//!
//! [`Writer`] keeps up to `max_window` payloads in flight.  Each call to
//! [`Writer::write`] applies one acknowledgement from the peer, then picks
//! what (if anything) the next outbound packet carries.
//!
//! # Protocol contract
//!
//! - Indices are assigned 1, 2, ..., 127, 1, 2, ... (0 means "no data").
//! - Acks are **selective**: `ok(N)` confirms only index N.
//! - A gap is treated as loss.  An ack for N sweeps every older pending
//!   message into the retry queue, in order.  An error ack for N sweeps N
//!   as well.
//! - Retries always go out before new payloads.
//! - With nothing acknowledged for longer than the idle interval, the oldest
//!   pending message is retried speculatively.
//!
//! This module only manages state; the caller puts the returned packet on
//! the wire.

use std::collections::VecDeque;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::config::LinkConfig;
use crate::packet::{Ack, Packet, MAX_INDEX, MAX_PAYLOAD};
use crate::timer::IdleTimer;

/// Source of application payloads waiting to be sent.
///
/// `pop` must not block: `None` means nothing is queued right now.
pub trait OutboundQueue {
    fn pop(&mut self) -> Option<Vec<u8>>;
}

impl OutboundQueue for VecDeque<Vec<u8>> {
    fn pop(&mut self) -> Option<Vec<u8>> {
        self.pop_front()
    }
}

impl OutboundQueue for mpsc::Receiver<Vec<u8>> {
    fn pop(&mut self) -> Option<Vec<u8>> {
        self.try_recv().ok()
    }
}

/// A payload that has been assigned an index and awaits a positive ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub index: u8,
    pub payload: Vec<u8>,
}

/// What the data part of an outbound packet carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Ack-only (or nothing at all).
    Empty,
    /// A message pulled from the retry queue.
    Retry,
    /// A payload freshly taken from the outbound queue.
    New,
}

/// Result of one [`Writer::write`] call.
#[derive(Debug)]
pub struct Outgoing {
    /// Packet to transmit, or `None` when there is nothing worth sending.
    pub packet: Option<Packet>,
    pub kind: PayloadKind,
}

impl Outgoing {
    /// `true` when a new payload was accepted from the outbound queue.
    pub fn sent_new(&self) -> bool {
        self.kind == PayloadKind::New
    }
}

/// Send-side window state for one link.
#[derive(Debug)]
pub struct Writer {
    name: String,
    /// Index for the next new payload (1..=127).
    next_index: u8,
    /// Sent but not positively acknowledged, oldest first.
    pending: VecDeque<SentMessage>,
    /// Messages to resend before anything new.
    retry: VecDeque<SentMessage>,
    max_window: usize,
    timer: IdleTimer,
    quiescent: bool,
}

impl Writer {
    /// Create a writer whose idle timer starts at `now`.
    pub fn new(name: impl Into<String>, config: &LinkConfig, now: Instant) -> Self {
        let max_window = config.max_window.max(1);
        Self {
            name: name.into(),
            next_index: 1,
            pending: VecDeque::with_capacity(max_window),
            retry: VecDeque::new(),
            max_window,
            timer: IdleTimer::new(config.idle_retry, now),
            quiescent: true,
        }
    }

    /// Apply the peer's ack, then build the next packet.
    ///
    /// `incoming_ack` is our acknowledgement of what the peer sent us and is
    /// embedded in the packet.  `outgoing_ack` is the peer's acknowledgement
    /// of what we sent.
    pub fn write(
        &mut self,
        incoming_ack: Ack,
        outgoing_ack: Ack,
        outbound: &mut impl OutboundQueue,
        now: Instant,
    ) -> Outgoing {
        if outgoing_ack.is_none() {
            self.maybe_speculative_retry(now);
        } else {
            self.reconcile_ack(outgoing_ack);
        }

        let mut packet = Packet::ack_only(incoming_ack);
        let kind = if let Some(message) = self.retry.pop_front() {
            log::debug!("[{}] → RETRY idx={}", self.name, message.index);
            packet.send_index = message.index;
            packet.payload = message.payload.clone();
            self.pending.push_back(message);
            PayloadKind::Retry
        } else if self.pending.len() < self.max_window {
            match self.take_new(outbound) {
                Some(message) => {
                    log::debug!(
                        "[{}] → DATA idx={} len={} in_flight={}",
                        self.name,
                        message.index,
                        message.payload.len(),
                        self.pending.len() + 1
                    );
                    packet.send_index = message.index;
                    packet.payload = message.payload.clone();
                    self.pending.push_back(message);
                    PayloadKind::New
                }
                None => PayloadKind::Empty,
            }
        } else {
            PayloadKind::Empty
        };

        let packet = if packet.is_transmittable() {
            self.timer.touch(now);
            Some(packet)
        } else {
            None
        };
        self.quiescent = self.retry.is_empty() && self.pending.is_empty();
        Outgoing { packet, kind }
    }

    /// Apply one acknowledgement from the peer.
    ///
    /// Unknown indices are stale or duplicated acks and are ignored.
    pub fn reconcile_ack(&mut self, ack: Ack) {
        let Some(position) = self.pending.iter().position(|m| m.index == ack.index) else {
            log::debug!("[{}] ← ACK {ack} for unknown index; ignored", self.name);
            return;
        };
        log::debug!("[{}] ← ACK {ack} at position {position}", self.name);
        self.quiescent = false;

        let swept = if ack.ok { position } else { position + 1 };
        if swept > 0 {
            log::debug!("[{}] sweeping {swept} message(s) into retry", self.name);
        }
        self.retry.extend(self.pending.drain(..swept));
        if ack.ok {
            self.pending.pop_front();
        }
    }

    /// Move the oldest pending message to the retry queue if the link has
    /// been quiet for longer than the idle interval.
    pub fn maybe_speculative_retry(&mut self, now: Instant) {
        if self.pending.is_empty() || !self.timer.expired(now) {
            return;
        }
        if let Some(oldest) = self.pending.pop_front() {
            log::debug!(
                "[{}] idle for {:?}; retrying idx={}",
                self.name,
                self.timer.idle_for(now),
                oldest.index
            );
            self.retry.push_back(oldest);
        }
        self.quiescent = false;
    }

    /// Pull the next sendable payload and assign it an index.
    fn take_new(&mut self, outbound: &mut impl OutboundQueue) -> Option<SentMessage> {
        loop {
            let payload = outbound.pop()?;
            if payload.len() > MAX_PAYLOAD {
                log::warn!(
                    "[{}] dropping {}-byte payload (limit {MAX_PAYLOAD})",
                    self.name,
                    payload.len()
                );
                continue;
            }
            let index = self.next_index;
            self.next_index = if index >= MAX_INDEX { 1 } else { index + 1 };
            return Some(SentMessage { index, payload });
        }
    }

    /// No pending or retry-queued messages remain.
    pub fn is_quiescent(&self) -> bool {
        self.quiescent
    }

    /// Number of sent, unacknowledged messages (excluding the retry queue).
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Number of messages waiting to be resent.
    pub fn retry_len(&self) -> usize {
        self.retry.len()
    }

    /// Index the next new payload will receive.
    pub fn next_index(&self) -> u8 {
        self.next_index
    }

    /// Pending indices, oldest first.
    pub fn pending_indices(&self) -> Vec<u8> {
        self.pending.iter().map(|m| m.index).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn writer(now: Instant) -> Writer {
        Writer::new("test", &LinkConfig::default(), now)
    }

    fn queue(items: &[&[u8]]) -> VecDeque<Vec<u8>> {
        items.iter().map(|i| i.to_vec()).collect()
    }

    /// Write with no acks and return the index sent (0 if none).
    fn send_next(w: &mut Writer, q: &mut VecDeque<Vec<u8>>, now: Instant) -> u8 {
        w.write(Ack::NONE, Ack::NONE, q, now)
            .packet
            .map_or(0, |p| p.send_index)
    }

    #[test]
    fn initial_state() {
        let w = writer(Instant::now());
        assert!(w.is_quiescent());
        assert_eq!(w.in_flight(), 0);
        assert_eq!(w.next_index(), 1);
    }

    #[test]
    fn nothing_to_send_produces_no_packet() {
        let now = Instant::now();
        let mut w = writer(now);
        let out = w.write(Ack::NONE, Ack::NONE, &mut VecDeque::new(), now);
        assert!(out.packet.is_none());
        assert_eq!(out.kind, PayloadKind::Empty);
        assert!(w.is_quiescent());
    }

    #[test]
    fn ack_only_packet_when_queue_empty() {
        let now = Instant::now();
        let mut w = writer(now);
        let out = w.write(Ack::error(7), Ack::NONE, &mut VecDeque::new(), now);
        assert!(!out.sent_new());
        let pkt = out.packet.expect("ack-only packet");
        assert!(!pkt.has_data());
        assert_eq!(pkt.ack(), Ack::error(7));
    }

    #[test]
    fn new_payload_assigned_sequential_indices() {
        let now = Instant::now();
        let mut w = writer(now);
        let mut q = queue(&[b"a", b"b"]);
        let out = w.write(Ack::ok(3), Ack::NONE, &mut q, now);
        assert!(out.sent_new());
        let pkt = out.packet.unwrap();
        assert_eq!(pkt.send_index, 1);
        assert_eq!(pkt.payload, b"a");
        assert_eq!(pkt.ack(), Ack::ok(3));

        assert_eq!(send_next(&mut w, &mut q, now), 2);
        assert_eq!(w.pending_indices(), vec![1, 2]);
        assert!(!w.is_quiescent());
    }

    #[test]
    fn window_limits_in_flight() {
        let now = Instant::now();
        let mut w = writer(now);
        let mut q = queue(&[b"1", b"2", b"3", b"4", b"5"]);
        for expected in 1..=4 {
            assert_eq!(send_next(&mut w, &mut q, now), expected);
        }
        let out = w.write(Ack::NONE, Ack::NONE, &mut q, now);
        assert!(out.packet.is_none());
        assert_eq!(q.len(), 1, "fifth payload must stay queued");

        // Acking the oldest opens one slot.
        let out = w.write(Ack::NONE, Ack::ok(1), &mut q, now);
        assert!(out.sent_new());
        assert_eq!(out.packet.unwrap().send_index, 5);
    }

    #[test]
    fn ok_ack_removes_only_that_message() {
        let now = Instant::now();
        let mut w = writer(now);
        let mut q = queue(&[b"a"]);
        send_next(&mut w, &mut q, now);
        w.write(Ack::NONE, Ack::ok(1), &mut q, now);
        assert_eq!(w.in_flight(), 0);
        assert!(w.is_quiescent());
    }

    #[test]
    fn ok_ack_with_gap_retries_earlier_messages_first() {
        let now = Instant::now();
        let mut w = writer(now);
        let mut q = queue(&[b"1", b"2", b"3", b"4", b"5"]);
        for _ in 0..3 {
            send_next(&mut w, &mut q, now);
        }
        // Peer acked 3 but never saw 1 and 2.
        w.reconcile_ack(Ack::ok(3));
        assert_eq!(w.retry_len(), 2);
        assert_eq!(w.in_flight(), 0);

        assert_eq!(send_next(&mut w, &mut q, now), 1);
        assert_eq!(send_next(&mut w, &mut q, now), 2);
        assert_eq!(send_next(&mut w, &mut q, now), 4);
    }

    #[test]
    fn error_ack_resends_through_failed_index_before_new_data() {
        let now = Instant::now();
        let mut w = writer(now);
        let mut q = queue(&[b"1", b"2", b"3"]);
        for _ in 0..3 {
            send_next(&mut w, &mut q, now);
        }
        q.extend(queue(&[b"4", b"5"]));

        let out = w.write(Ack::NONE, Ack::error(3), &mut q, now);
        assert_eq!(out.kind, PayloadKind::Retry);
        let mut sent = vec![out.packet.unwrap().send_index];
        for _ in 0..3 {
            sent.push(send_next(&mut w, &mut q, now));
        }
        assert_eq!(sent, vec![1, 2, 3, 4]);
    }

    #[test]
    fn retried_payload_is_unchanged() {
        let now = Instant::now();
        let mut w = writer(now);
        let mut q = queue(&[b"payload"]);
        send_next(&mut w, &mut q, now);
        let out = w.write(Ack::NONE, Ack::error(1), &mut q, now);
        let pkt = out.packet.unwrap();
        assert_eq!(pkt.send_index, 1);
        assert_eq!(pkt.payload, b"payload");
    }

    #[test]
    fn unknown_ack_ignored() {
        let now = Instant::now();
        let mut w = writer(now);
        let mut q = queue(&[b"a", b"b"]);
        send_next(&mut w, &mut q, now);
        send_next(&mut w, &mut q, now);
        w.reconcile_ack(Ack::ok(99));
        w.reconcile_ack(Ack::error(42));
        assert_eq!(w.pending_indices(), vec![1, 2]);
        assert_eq!(w.retry_len(), 0);
    }

    #[test]
    fn repeated_ack_is_idempotent() {
        let now = Instant::now();
        let mut w = writer(now);
        let mut q = queue(&[b"a", b"b", b"c"]);
        for _ in 0..3 {
            send_next(&mut w, &mut q, now);
        }
        w.reconcile_ack(Ack::ok(2));
        let pending = w.pending_indices();
        let retry = w.retry_len();
        w.reconcile_ack(Ack::ok(2));
        assert_eq!(w.pending_indices(), pending);
        assert_eq!(w.retry_len(), retry);

        w.reconcile_ack(Ack::error(3));
        let retry = w.retry_len();
        w.reconcile_ack(Ack::error(3));
        assert_eq!(w.retry_len(), retry);
        assert!(w.pending_indices().is_empty());
    }

    #[test]
    fn speculative_retry_after_idle_interval() {
        let start = Instant::now();
        let mut w = writer(start);
        let mut q = queue(&[b"a", b"b"]);
        send_next(&mut w, &mut q, start);
        send_next(&mut w, &mut q, start);

        // Not yet idle long enough.
        let soon = start + Duration::from_millis(100);
        assert!(w.write(Ack::NONE, Ack::NONE, &mut q, soon).packet.is_none());

        let late = start + Duration::from_millis(250);
        let out = w.write(Ack::NONE, Ack::NONE, &mut q, late);
        assert_eq!(out.kind, PayloadKind::Retry);
        assert_eq!(out.packet.unwrap().send_index, 1);
        assert_eq!(w.pending_indices(), vec![2, 1]);

        // The retry restarted the idle timer.
        let out = w.write(Ack::NONE, Ack::NONE, &mut q, late + Duration::from_millis(50));
        assert!(out.packet.is_none());
    }

    #[test]
    fn ack_activity_suppresses_speculative_retry() {
        let start = Instant::now();
        let mut w = writer(start);
        let mut q = queue(&[b"a", b"b"]);
        send_next(&mut w, &mut q, start);
        send_next(&mut w, &mut q, start);

        let late = start + Duration::from_secs(1);
        let out = w.write(Ack::NONE, Ack::ok(2), &mut q, late);
        // The ack for 2 sweeps 1 into retry; no speculative move of 2.
        assert_eq!(out.packet.unwrap().send_index, 1);
        assert_eq!(w.pending_indices(), vec![1]);
    }

    #[test]
    fn indices_wrap_from_127_to_1() {
        let now = Instant::now();
        let mut w = writer(now);
        let mut q: VecDeque<Vec<u8>> = (0..300).map(|i: u32| i.to_be_bytes().to_vec()).collect();
        let mut last_ack = Ack::NONE;
        let mut sent = Vec::new();
        for _ in 0..300 {
            let out = w.write(Ack::NONE, last_ack, &mut q, now);
            let idx = out.packet.unwrap().send_index;
            sent.push(idx);
            last_ack = Ack::ok(idx);
        }
        let expected: Vec<u8> = (0..300).map(|n| (n % 127) as u8 + 1).collect();
        assert_eq!(sent, expected);
        assert!(!sent.contains(&0));
    }

    #[test]
    fn oversize_payload_is_skipped() {
        let now = Instant::now();
        let mut w = writer(now);
        let mut q: VecDeque<Vec<u8>> = VecDeque::from(vec![vec![0; 300], b"fits".to_vec()]);
        let out = w.write(Ack::NONE, Ack::NONE, &mut q, now);
        let pkt = out.packet.unwrap();
        assert_eq!(pkt.send_index, 1);
        assert_eq!(pkt.payload, b"fits");
    }

    #[tokio::test]
    async fn mpsc_receiver_is_an_outbound_queue() {
        let (tx, mut rx) = mpsc::channel(4);
        assert!(OutboundQueue::pop(&mut rx).is_none());
        tx.send(b"x".to_vec()).await.unwrap();
        assert_eq!(OutboundQueue::pop(&mut rx), Some(b"x".to_vec()));
    }
}
