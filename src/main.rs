//! Entry point for `serial-arq`.
//!
//! Parses CLI arguments and dispatches into **loopback** or **files** mode.
//! All protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing) and the demo drivers.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use serial_arq::simulator::{FaultConfig, FaultyTransport};
use serial_arq::{FileTransport, Link, LinkConfig, LinkHandle, MemoryTransport};

/// Reliable packet link over an unreliable byte transport.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run two links against each other over a faulty in-memory pipe.
    Loopback {
        /// Messages to send in each direction.
        #[arg(short, long, default_value_t = 400)]
        count: usize,
        /// Per-byte mutation probability.
        #[arg(long, default_value_t = 0.05)]
        mutation_rate: f64,
        /// Per-byte drop/insert probability.
        #[arg(long, default_value_t = 0.0)]
        add_drop_rate: f64,
        /// Per-byte duplication probability.
        #[arg(long, default_value_t = 0.0)]
        duplicate_rate: f64,
        /// RNG seed for the fault injector.
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Give up after this many seconds.
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },
    /// Run one link over a pair of files; stdin lines are sent and received
    /// payloads are printed.
    Files {
        /// File the peer writes and this side reads.
        #[arg(long)]
        incoming: PathBuf,
        /// File this side writes and the peer reads.
        #[arg(long)]
        outgoing: PathBuf,
        /// Link name used in log lines.
        #[arg(short, long, default_value = "files")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Loopback {
            count,
            mutation_rate,
            add_drop_rate,
            duplicate_rate,
            seed,
            timeout_secs,
        } => {
            let faults = FaultConfig {
                mutation_rate,
                add_drop_rate,
                duplicate_rate,
                seed,
            };
            loopback(count, faults, Duration::from_secs(timeout_secs)).await
        }
        Mode::Files {
            incoming,
            outgoing,
            name,
        } => files(&name, incoming, outgoing).await,
    }
}

async fn loopback(count: usize, faults: FaultConfig, limit: Duration) -> Result<()> {
    log::info!("loopback: {count} message(s) each way, faults {faults:?}");
    let (ta, tb) = MemoryTransport::pair();
    let b_faults = FaultConfig {
        seed: faults.seed.wrapping_add(1),
        ..faults.clone()
    };
    let a = Link::new("A", FaultyTransport::new(ta, faults), LinkConfig::default()).spawn();
    let b = Link::new("B", FaultyTransport::new(tb, b_faults), LinkConfig::default()).spawn();

    let started = Instant::now();
    let (a_result, b_result) = tokio::join!(
        exchange(a, "A", count, limit),
        exchange(b, "B", count, limit)
    );
    let (a, b) = (a_result?, b_result?);
    let elapsed = started.elapsed();

    for handle in [&a, &b] {
        let stats = handle.stats();
        println!(
            "{}: sent {} delivered {} in {} ticks",
            handle.name(),
            stats.accepted,
            stats.delivered,
            stats.ticks
        );
    }
    println!("{count} message(s) each way in {elapsed:?}");
    a.close().await;
    b.close().await;
    Ok(())
}

/// Send `count` numbered payloads while collecting the peer's, then wait
/// for the send window to drain.
async fn exchange(mut handle: LinkHandle, tag: &str, count: usize, limit: Duration) -> Result<LinkHandle> {
    let peer = if tag == "A" { "B" } else { "A" };
    let deadline = Instant::now() + limit;
    let mut sent = 0;
    let mut received = 0;

    while sent < count || received < count || !handle.is_idle() {
        if Instant::now() > deadline {
            bail!("{tag}: timed out with {sent} sent and {received} received");
        }
        if sent < count {
            handle.send(format!("{tag}-{sent}").into_bytes()).await?;
            sent += 1;
        }
        if let Some(payload) = handle.receive(Duration::from_millis(1)).await {
            let expected = format!("{peer}-{received}");
            if payload != expected.as_bytes() {
                bail!(
                    "{tag}: expected {expected:?}, got {:?}",
                    String::from_utf8_lossy(&payload)
                );
            }
            received += 1;
        }
    }
    Ok(handle)
}

async fn files(name: &str, incoming: PathBuf, outgoing: PathBuf) -> Result<()> {
    let transport = FileTransport::open(&incoming, &outgoing)
        .with_context(|| format!("opening {} / {}", incoming.display(), outgoing.display()))?;
    let config = LinkConfig {
        idle_pause: Some(Duration::from_millis(1)),
        ..LinkConfig::default()
    };
    let mut handle = Link::new(name, transport, config).spawn();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line.context("reading stdin")? {
                    Some(line) => handle.send(line.into_bytes()).await?,
                    None => {
                        log::info!("stdin closed; waiting for outstanding sends");
                        stdin_open = false;
                    }
                }
            }
            payload = handle.receive(Duration::from_millis(50)) => {
                if let Some(payload) = payload {
                    println!("{}", String::from_utf8_lossy(&payload));
                } else if !stdin_open && handle.is_idle() {
                    break;
                }
            }
        }
    }

    handle.close().await;
    Ok(())
}
