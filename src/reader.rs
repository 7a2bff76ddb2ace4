//! Receive side of a link: byte buffering, frame parsing, signal extraction.
//!
//! [`Reader::read`] pulls every available byte from the transport into an
//! internal buffer, then makes a single decode attempt.  What the decoder
//! finds is turned into four kinds of *signals* for the writer:
//!
//! | Queue             | Pushed when                               | Meaning                      |
//! |-------------------|-------------------------------------------|------------------------------|
//! | incoming ack      | a data packet arrived intact              | we must ack it to the peer   |
//! | incoming error    | a data packet's payload failed checksum   | we must ask the peer to retry|
//! | outgoing ack      | the peer acked one of our packets         | feed to the writer           |
//! | outgoing error    | the peer reported one of ours corrupted   | feed to the writer           |
//!
//! Intact packets are filed in the [`ReorderBuffer`]; `read` returns the ones
//! that became deliverable in index order.

use std::collections::VecDeque;

use crate::config::LinkConfig;
use crate::packet::Packet;
use crate::reorder::ReorderBuffer;
use crate::transport::Transport;

/// A FIFO of indices that drops its oldest entry when full.
#[derive(Debug)]
pub struct SignalQueue {
    items: VecDeque<u8>,
    capacity: usize,
}

impl SignalQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append `index`.  Index 0 carries no information and is ignored.
    pub fn push(&mut self, index: u8) {
        if index == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(index);
    }

    pub fn pop(&mut self) -> Option<u8> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Inbound state for one link.
#[derive(Debug)]
pub struct Reader {
    name: String,
    buffer: Vec<u8>,
    reorder: ReorderBuffer,
    incoming_acks: SignalQueue,
    incoming_errors: SignalQueue,
    outgoing_acks: SignalQueue,
    outgoing_errors: SignalQueue,
}

impl Reader {
    pub fn new(name: impl Into<String>, config: &LinkConfig) -> Self {
        let cap = config.signal_capacity;
        Self {
            name: name.into(),
            buffer: Vec::new(),
            reorder: ReorderBuffer::new(),
            incoming_acks: SignalQueue::new(cap),
            incoming_errors: SignalQueue::new(cap),
            outgoing_acks: SignalQueue::new(cap),
            outgoing_errors: SignalQueue::new(cap),
        }
    }

    /// Drain the transport into the buffer and decode at most one frame.
    ///
    /// Returns the packets that are now deliverable, in index order.
    pub fn read(&mut self, transport: &mut impl Transport) -> Vec<Packet> {
        while let Some(byte) = transport.read() {
            self.buffer.push(byte);
        }
        self.process()
    }

    /// Decode at most one frame from the bytes already buffered.
    pub fn process(&mut self) -> Vec<Packet> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let (packet, rest) = Packet::decode(&self.buffer);
        let consumed = self.buffer.len() - rest.len();
        self.buffer.drain(..consumed);

        if !packet.parsed {
            return Vec::new();
        }

        let ack = packet.ack();
        if !ack.is_none() {
            if ack.ok {
                self.outgoing_acks.push(ack.index);
            } else {
                self.outgoing_errors.push(ack.index);
            }
        }

        if !packet.payload_valid {
            log::debug!(
                "[{}] ← CORRUPT idx={} len={}; requesting retry",
                self.name,
                packet.send_index,
                packet.payload.len()
            );
            self.incoming_errors.push(packet.send_index);
            return Vec::new();
        }

        log::debug!(
            "[{}] ← idx={} len={} ack={ack}",
            self.name,
            packet.send_index,
            packet.payload.len()
        );
        if !packet.has_data() {
            return Vec::new();
        }
        self.incoming_acks.push(packet.send_index);
        self.reorder.insert(packet);
        self.reorder.drain()
    }

    pub fn pop_incoming_ack(&mut self) -> Option<u8> {
        self.incoming_acks.pop()
    }

    pub fn pop_incoming_error(&mut self) -> Option<u8> {
        self.incoming_errors.pop()
    }

    pub fn pop_outgoing_ack(&mut self) -> Option<u8> {
        self.outgoing_acks.pop()
    }

    pub fn pop_outgoing_error(&mut self) -> Option<u8> {
        self.outgoing_errors.pop()
    }

    /// No buffered bytes and nothing waiting in the reorder window.
    pub fn is_drained(&self) -> bool {
        self.buffer.is_empty() && self.reorder.is_empty()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn reorder(&self) -> &ReorderBuffer {
        &self.reorder
    }
}
