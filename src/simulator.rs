//! Fault-injecting transport for deterministic testing.
//!
//! Real serial lines flip bits and lose or gain bytes.  To exercise the
//! recovery paths without hardware, [`FaultyTransport`] wraps any
//! [`Transport`] and perturbs the bytes written through it:
//!
//! | Fault        | Description                                            |
//! |--------------|--------------------------------------------------------|
//! | Mutation     | Replace a byte with a random one (`mutation_rate`).    |
//! | Drop         | Silently lose a byte (half of `add_drop_rate`).        |
//! | Insertion    | Emit a random extra byte first (other half).           |
//! | Duplication  | Write a byte twice (`duplicate_rate`).                 |
//!
//! Reads pass through untouched, so wrapping both ends of a pair corrupts
//! both directions exactly once.  The RNG is seeded, so a failing run can be
//! replayed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::transport::Transport;

/// Configuration for the fault model.
///
/// All rates are probabilities in `[0.0, 1.0]`, applied per written byte.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// Probability that a byte is replaced with a random byte.
    pub mutation_rate: f64,
    /// Probability that a byte is either dropped or preceded by a random
    /// extra byte (50/50).
    pub add_drop_rate: f64,
    /// Probability that a byte is written twice.
    pub duplicate_rate: f64,
    /// RNG seed.
    pub seed: u64,
}

impl FaultConfig {
    /// Byte mutations only.
    pub fn mutations(rate: f64, seed: u64) -> Self {
        Self {
            mutation_rate: rate,
            seed,
            ..Self::default()
        }
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        // Transparent pass-through.
        Self {
            mutation_rate: 0.0,
            add_drop_rate: 0.0,
            duplicate_rate: 0.0,
            seed: 42,
        }
    }
}

/// Running totals of injected faults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub written: u64,
    pub mutated: u64,
    pub dropped: u64,
    pub inserted: u64,
    pub duplicated: u64,
}

/// A [`Transport`] decorator that corrupts outgoing bytes.
#[derive(Debug)]
pub struct FaultyTransport<T> {
    inner: T,
    config: FaultConfig,
    rng: StdRng,
    stats: FaultStats,
}

impl<T: Transport> FaultyTransport<T> {
    pub fn new(inner: T, config: FaultConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            inner,
            config,
            rng,
            stats: FaultStats::default(),
        }
    }

    pub fn stats(&self) -> FaultStats {
        self.stats
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Transport> Transport for FaultyTransport<T> {
    fn write(&mut self, byte: u8) {
        self.stats.written += 1;
        if self.rng.random::<f64>() < self.config.add_drop_rate {
            if self.rng.random_bool(0.5) {
                self.stats.dropped += 1;
                return;
            }
            self.stats.inserted += 1;
            let extra = self.rng.random::<u8>();
            self.inner.write(extra);
        }
        let byte = if self.rng.random::<f64>() < self.config.mutation_rate {
            self.stats.mutated += 1;
            self.rng.random::<u8>()
        } else {
            byte
        };
        self.inner.write(byte);
        if self.rng.random::<f64>() < self.config.duplicate_rate {
            self.stats.duplicated += 1;
            self.inner.write(byte);
        }
    }

    fn read(&mut self) -> Option<u8> {
        self.inner.read()
    }
}
