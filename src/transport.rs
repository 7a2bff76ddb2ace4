//! Byte transport abstraction.
//!
//! A [`Transport`] is a duplex, non-blocking byte channel: `write` pushes one
//! byte toward the peer and `read` returns the next received byte, or `None`
//! when nothing has arrived yet.  Framing, checksums and retries all live in
//! the layers above; this module owns only byte I/O.
//!
//! Two implementations ship with the crate:
//! - [`MemoryTransport`]: cross-connected in-memory queues, for tests and the
//!   loopback demo.
//! - [`FileTransport`]: reads one file and appends to another, so two
//!   processes (or two links) can talk through a pair of files.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A duplex byte channel.
///
/// Implementations must not block in `read`; `None` means "nothing yet" and
/// the caller will poll again later.
pub trait Transport: Send {
    fn write(&mut self, byte: u8);

    fn read(&mut self) -> Option<u8>;

    /// Write every byte of `bytes` in order.
    fn write_all(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write(b);
        }
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, byte: u8) {
        (**self).write(byte);
    }

    fn read(&mut self) -> Option<u8> {
        (**self).read()
    }

    fn write_all(&mut self, bytes: &[u8]) {
        (**self).write_all(bytes);
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while setting up a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// MemoryTransport
// ---------------------------------------------------------------------------

type Pipe = Arc<Mutex<VecDeque<u8>>>;

/// One end of an in-memory byte pipe pair.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    incoming: Pipe,
    outgoing: Pipe,
}

impl MemoryTransport {
    /// Two cross-connected ends: bytes written on one are read on the other.
    pub fn pair() -> (Self, Self) {
        let a_to_b = Pipe::default();
        let b_to_a = Pipe::default();
        let a = Self {
            incoming: Arc::clone(&b_to_a),
            outgoing: Arc::clone(&a_to_b),
        };
        let b = Self {
            incoming: a_to_b,
            outgoing: b_to_a,
        };
        (a, b)
    }

    /// Bytes written toward the peer that it has not read yet.
    pub fn unread_by_peer(&self) -> usize {
        self.outgoing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Transport for MemoryTransport {
    fn write(&mut self, byte: u8) {
        self.outgoing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(byte);
    }

    fn read(&mut self) -> Option<u8> {
        self.incoming
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn write_all(&mut self, bytes: &[u8]) {
        self.outgoing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(bytes);
    }
}

// ---------------------------------------------------------------------------
// FileTransport
// ---------------------------------------------------------------------------

/// Reads bytes from one file and appends to another.
///
/// Reaching end-of-file on the incoming side is not an error: the peer may
/// append more later and the next `read` picks it up.
#[derive(Debug)]
pub struct FileTransport {
    incoming: File,
    outgoing: File,
    outgoing_path: PathBuf,
}

impl FileTransport {
    /// Open `incoming` for reading and `outgoing` for appending.
    ///
    /// Both files are created if missing.
    pub fn open(incoming: impl AsRef<Path>, outgoing: impl AsRef<Path>) -> Result<Self, TransportError> {
        let incoming = incoming.as_ref();
        let outgoing = outgoing.as_ref();
        // Create the incoming side first so a peer that has not started yet
        // does not make the open fail.
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(incoming)
            .map_err(|source| io_error(incoming, source))?;
        let reader = File::open(incoming).map_err(|source| io_error(incoming, source))?;
        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(outgoing)
            .map_err(|source| io_error(outgoing, source))?;
        log::info!(
            "[file] reading {} / writing {}",
            incoming.display(),
            outgoing.display()
        );
        Ok(Self {
            incoming: reader,
            outgoing: writer,
            outgoing_path: outgoing.to_path_buf(),
        })
    }

    /// Two transports wired through files `a` and `b`: the first writes `a`
    /// and reads `b`, the second the other way around.
    pub fn pair(a: impl AsRef<Path>, b: impl AsRef<Path>) -> Result<(Self, Self), TransportError> {
        let first = Self::open(b.as_ref(), a.as_ref())?;
        let second = Self::open(a.as_ref(), b.as_ref())?;
        Ok((first, second))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> TransportError {
    TransportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl Transport for FileTransport {
    fn write(&mut self, byte: u8) {
        self.write_all(&[byte]);
    }

    fn read(&mut self) -> Option<u8> {
        let mut buf = [0u8; 1];
        match self.incoming.read(&mut buf) {
            Ok(1) => Some(buf[0]),
            Ok(_) => None,
            Err(e) => {
                log::warn!("[file] read failed: {e}");
                None
            }
        }
    }

    fn write_all(&mut self, bytes: &[u8]) {
        if let Err(e) = self.outgoing.write_all(bytes).and_then(|()| self.outgoing.flush()) {
            log::warn!(
                "[file] dropping {} byte(s) for {}: {e}",
                bytes.len(),
                self.outgoing_path.display()
            );
        }
    }
}
