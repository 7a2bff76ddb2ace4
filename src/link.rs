//! Link driver: one reader plus one writer bound to one transport.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │  send(payload) / receive(timeout)      LinkHandle
//!      │                                ┌──────────────────────┐
//!      └──────────────────────────────▶ │ outbound (mpsc, 5)   │
//!                                       │ inbound  (mpsc, 5)   │
//!                                       │ LinkShared (atomics) │
//!                                       └──────────┬───────────┘
//!                                                  │ tick loop task
//!  Link                                            │
//!    ├── Reader  (buffer, signals, reorder) ◀──────┤
//!    ├── Writer  (pending, retry, idle timer)      │
//!    └── Transport ◀───────────────────────────────┘
//! ```
//!
//! # Two usage modes
//!
//! **Manual**: call [`Link::tick`] yourself with any [`OutboundQueue`]
//! and an explicit `now`.  Useful for deterministic tests:
//! ```ignore
//! let mut link = Link::new("A", transport, LinkConfig::default());
//! let mut queue = VecDeque::from(vec![b"hello".to_vec()]);
//! let tick = link.tick(&mut queue, Instant::now());
//! ```
//!
//! **Spawned**: [`Link::spawn`] moves the link into a tokio task that ticks
//! until [`LinkHandle::close`] is awaited or the handle is dropped:
//! ```ignore
//! let mut handle = Link::new("A", transport, LinkConfig::default()).spawn();
//! handle.send(b"hello".to_vec()).await?;
//! let reply = handle.receive(Duration::from_secs(1)).await;
//! handle.close().await;
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::LinkConfig;
use crate::packet::{Ack, PacketError, MAX_PAYLOAD};
use crate::reader::Reader;
use crate::transport::Transport;
use crate::writer::{OutboundQueue, Writer};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by [`LinkHandle`].
#[derive(Debug, Error)]
pub enum LinkError {
    /// The tick loop has stopped; nothing more can be sent.
    #[error("link is closed")]
    Closed,
    #[error(transparent)]
    Packet(#[from] PacketError),
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// Outcome of one [`Link::tick`].
#[derive(Debug, Default)]
pub struct Tick {
    /// Payloads released in order by this tick.
    pub delivered: Vec<Vec<u8>>,
    /// A packet was written to the transport.
    pub transmitted: bool,
    /// A new payload was taken from the outbound queue.
    pub accepted_new: bool,
}

impl Tick {
    /// Something happened; the caller should tick again right away.
    pub fn is_active(&self) -> bool {
        self.transmitted || !self.delivered.is_empty()
    }
}

/// Protocol state for one end of a link.
pub struct Link<T> {
    name: String,
    transport: T,
    reader: Reader,
    writer: Writer,
    config: LinkConfig,
}

impl<T: Transport> Link<T> {
    pub fn new(name: impl Into<String>, transport: T, config: LinkConfig) -> Self {
        let name = format!("link {}", name.into());
        Self {
            reader: Reader::new(name.clone(), &config),
            writer: Writer::new(name.clone(), &config, Instant::now()),
            name,
            transport,
            config,
        }
    }

    /// Run one read/decide/write pass.
    ///
    /// Error signals win over ok signals in both directions: a retry request
    /// is more urgent than a confirmation.
    pub fn tick(&mut self, outbound: &mut impl OutboundQueue, now: Instant) -> Tick {
        let delivered: Vec<Vec<u8>> = self
            .reader
            .read(&mut self.transport)
            .into_iter()
            .map(|packet| packet.payload)
            .collect();

        let incoming_ack = match self.reader.pop_incoming_error() {
            Some(index) => Ack::error(index),
            None => self.reader.pop_incoming_ack().map_or(Ack::NONE, Ack::ok),
        };
        let outgoing_ack = match self.reader.pop_outgoing_error() {
            Some(index) => Ack::error(index),
            None => self.reader.pop_outgoing_ack().map_or(Ack::NONE, Ack::ok),
        };

        let out = self.writer.write(incoming_ack, outgoing_ack, outbound, now);
        let transmitted = match &out.packet {
            Some(packet) => {
                self.transport.write_all(&packet.encode());
                true
            }
            None => false,
        };

        Tick {
            delivered,
            transmitted,
            accepted_new: out.sent_new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// No pending or retry-queued sends.
    pub fn is_quiescent(&self) -> bool {
        self.writer.is_quiescent()
    }

    pub fn reader(&self) -> &Reader {
        &self.reader
    }

    pub fn writer(&self) -> &Writer {
        &self.writer
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }
}

impl<T: Transport + 'static> Link<T> {
    /// Move the link into a background tokio task and return its handle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> LinkHandle {
        let capacity = self.config.queue_capacity.max(1);
        let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(LinkShared {
            quiescent: AtomicBool::new(true),
            ..LinkShared::default()
        });
        let name = self.name.clone();

        let task = tokio::spawn(tick_loop(
            self,
            outbound_rx,
            inbound_tx,
            Arc::clone(&shared),
            shutdown_rx,
        ));

        LinkHandle {
            name,
            outbound: outbound_tx,
            inbound: inbound_rx,
            shared,
            shutdown: shutdown_tx,
            task,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared counters
// ---------------------------------------------------------------------------

/// State visible to both the tick loop and the application.
#[derive(Debug, Default)]
struct LinkShared {
    requested: AtomicU64,
    accepted: AtomicU64,
    delivered: AtomicU64,
    ticks: AtomicU64,
    quiescent: AtomicBool,
    stopped: AtomicBool,
}

/// Point-in-time copy of a link's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Payloads handed to [`LinkHandle::send`].
    pub requested: u64,
    /// Payloads the writer has taken from the outbound queue.
    pub accepted: u64,
    /// Payloads released to the inbound queue.
    pub delivered: u64,
    pub ticks: u64,
}

impl LinkShared {
    fn snapshot(&self) -> LinkStats {
        LinkStats {
            requested: self.requested.load(Ordering::SeqCst),
            accepted: self.accepted.load(Ordering::SeqCst),
            delivered: self.delivered.load(Ordering::SeqCst),
            ticks: self.ticks.load(Ordering::SeqCst),
        }
    }
}

// ---------------------------------------------------------------------------
// LinkHandle
// ---------------------------------------------------------------------------

/// Application-side handle to a spawned link.
pub struct LinkHandle {
    name: String,
    outbound: mpsc::Sender<Vec<u8>>,
    inbound: mpsc::Receiver<Vec<u8>>,
    shared: Arc<LinkShared>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LinkHandle {
    /// Queue a payload for delivery.
    ///
    /// Waits while the outbound queue is full.
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), LinkError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLong(payload.len()).into());
        }
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(LinkError::Closed);
        }
        // Count before queueing so `is_idle` never sees a queued payload as
        // already handled.
        self.shared.requested.fetch_add(1, Ordering::SeqCst);
        if self.outbound.send(payload).await.is_err() {
            self.shared.requested.fetch_sub(1, Ordering::SeqCst);
            return Err(LinkError::Closed);
        }
        Ok(())
    }

    /// Next delivered payload, waiting at most `timeout`.
    ///
    /// A zero timeout polls without waiting.
    pub async fn receive(&mut self, timeout: Duration) -> Option<Vec<u8>> {
        if timeout.is_zero() {
            return self.inbound.try_recv().ok();
        }
        tokio::time::timeout(timeout, self.inbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Every requested payload was accepted and acknowledged, or the link
    /// has stopped.
    pub fn is_idle(&self) -> bool {
        let s = &self.shared;
        if s.stopped.load(Ordering::SeqCst) {
            return true;
        }
        s.requested.load(Ordering::SeqCst) == s.accepted.load(Ordering::SeqCst)
            && s.quiescent.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> LinkStats {
        self.shared.snapshot()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the tick loop and wait for it to finish.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            log::warn!("[{}] tick loop ended abnormally: {e}", self.name);
        }
    }
}

// ---------------------------------------------------------------------------
// Background tick loop
// ---------------------------------------------------------------------------

fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    // A dropped handle closes the channel.
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

async fn tick_loop<T: Transport>(
    mut link: Link<T>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    inbound: mpsc::Sender<Vec<u8>>,
    shared: Arc<LinkShared>,
    mut shutdown: watch::Receiver<bool>,
) {
    log::info!("[{}] started", link.name);
    let mut backlog = VecDeque::new();

    'run: while !shutdown_requested(&shutdown) {
        let tick = link.tick(&mut outbound, Instant::now());

        // Publish quiescence before the accepted count so an observer never
        // pairs a fresh count with a stale flag.
        shared.quiescent.store(link.is_quiescent(), Ordering::SeqCst);
        if tick.accepted_new {
            shared.accepted.fetch_add(1, Ordering::SeqCst);
        }
        shared.ticks.fetch_add(1, Ordering::SeqCst);

        let active = tick.is_active();
        backlog.extend(tick.delivered);
        hand_over(&mut backlog, &inbound, &shared, &link.name);

        if !active {
            match link.config.idle_pause {
                Some(pause) => {
                    tokio::select! {
                        _ = tokio::time::sleep(pause) => {}
                        _ = shutdown.changed() => break 'run,
                    }
                }
                None => tokio::task::yield_now().await,
            }
        }
    }

    shared.stopped.store(true, Ordering::SeqCst);
    let stats = shared.snapshot();
    log::info!(
        "[{}] stopped after {} ticks (accepted={} delivered={})",
        link.name,
        stats.ticks,
        stats.accepted,
        stats.delivered
    );
}

/// Move delivered payloads into the inbound queue without blocking.
///
/// Whatever does not fit stays in `backlog` for the next tick, so a slow
/// reader never stalls acknowledgements.
fn hand_over(
    backlog: &mut VecDeque<Vec<u8>>,
    inbound: &mpsc::Sender<Vec<u8>>,
    shared: &LinkShared,
    name: &str,
) {
    while let Some(payload) = backlog.pop_front() {
        match inbound.try_send(payload) {
            Ok(()) => {
                shared.delivered.fetch_add(1, Ordering::SeqCst);
            }
            Err(TrySendError::Full(payload)) => {
                backlog.push_front(payload);
                return;
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!(
                    "[{name}] inbound receiver gone; dropping {} payload(s)",
                    backlog.len() + 1
                );
                backlog.clear();
                return;
            }
        }
    }
}
