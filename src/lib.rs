//! `serial-arq`: a reliable point-to-point packet link over an unreliable
//! byte transport such as a serial line.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐   packets + piggybacked acks   ┌──────────┐
//!  │  Writer  │───────────────────────────────▶│  Reader  │
//!  └────┬─────┘                                └─────┬────┘
//!       │          ack / error signals               │
//!       │◀───────────────────────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │               Link                │
//!  │  (tick loop, owns both + bytes)   │
//!  └────┬──────────────────────────────┘
//!       │ raw bytes
//!  ┌────▼──────┐
//!  │ Transport │  (memory pipe, file pair, fault injector)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]   : wire format and checksums
//! - [`reader`]   : byte buffering, frame parsing, ack/error signals
//! - [`reorder`]  : in-order release across the 127-index wraparound
//! - [`writer`]   : retry/ack window for outbound payloads
//! - [`timer`]    : idle-retry timer
//! - [`link`]     : per-link driver and the async application handle
//! - [`config`]   : per-link tunables
//! - [`transport`]: byte transport trait and implementations
//! - [`simulator`]: fault-injecting transport for testing

pub mod config;
pub mod link;
pub mod packet;
pub mod reader;
pub mod reorder;
pub mod simulator;
pub mod timer;
pub mod transport;
pub mod writer;

pub use config::LinkConfig;
pub use link::{Link, LinkError, LinkHandle, LinkStats};
pub use packet::{Ack, Packet, PacketError};
pub use transport::{FileTransport, MemoryTransport, Transport, TransportError};
