//! Outbound link to one peer: a bounded send queue drained by a background
//! writer thread that owns the socket and reconnects with capped
//! exponential backoff.
//!
//! Sends are a non-blocking enqueue; the caller learns about transport
//! trouble either as `QueueFull` (writer can't keep up) or `LinkDown`
//! (writer exhausted its failure budget). A packet that fails mid-write is
//! requeued and retried after reconnecting, so per-link ordering holds.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};

use crate::config::{LinkConfig, PartyId};
use crate::error::{FabricError, FabricResult};
use crate::wire;

/// How often blocked backoff sleeps recheck the shutdown flag.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Counters shared between a link handle and its writer thread.
#[derive(Debug, Default)]
struct LinkCounters {
    packets_queued: AtomicU64,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    reconnects: AtomicU64,
}

/// Snapshot of one outbound link's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    /// Packets accepted onto the send queue.
    pub packets_queued: u64,
    /// Packets fully written to the socket.
    pub packets_sent: u64,
    /// Payload-plus-header bytes written to the socket.
    pub bytes_sent: u64,
    /// Connections established after the first one.
    pub reconnects: u64,
}

/// Handle to one outbound link. Dropping it closes the queue and joins the
/// writer thread (best effort, errors swallowed).
pub(crate) struct Link {
    peer: PartyId,
    tx: Option<Sender<Vec<u8>>>,
    shutdown: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    counters: Arc<LinkCounters>,
    capacity: usize,
    enqueue_timeout: Duration,
    writer: Option<JoinHandle<()>>,
}

impl Link {
    /// Spawn the writer thread for a link to `peer` at `addr`.
    ///
    /// The writer thread connects immediately (fire-and-forget from the
    /// caller's perspective); any payloads the peer writes back on this
    /// stream are decoded and forwarded to `reply_tx`.
    pub(crate) fn spawn(
        peer: PartyId,
        addr: String,
        config: LinkConfig,
        reply_tx: Sender<Vec<u8>>,
    ) -> FabricResult<Self> {
        let (tx, rx) = bounded(config.max_queue_size);
        let shutdown = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(LinkCounters::default());

        let capacity = config.max_queue_size;
        let enqueue_timeout = config.enqueue_timeout;
        let writer = thread::Builder::new()
            .name(format!("link-{peer}"))
            .spawn({
                let shutdown = shutdown.clone();
                let alive = alive.clone();
                let counters = counters.clone();
                move || writer_loop(peer, &addr, &config, &rx, &reply_tx, &shutdown, &alive, &counters)
            })
            .map_err(FabricError::from)?;

        Ok(Self {
            peer,
            tx: Some(tx),
            shutdown,
            alive,
            counters,
            capacity,
            enqueue_timeout,
            writer: Some(writer),
        })
    }

    /// Enqueue an already-encoded envelope for this peer.
    pub(crate) fn send_packet(&self, packet: Vec<u8>) -> FabricResult<()> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(FabricError::LinkDown { peer: self.peer });
        }
        let tx = match &self.tx {
            Some(tx) => tx,
            None => return Err(FabricError::LinkDown { peer: self.peer }),
        };
        match tx.send_timeout(packet, self.enqueue_timeout) {
            Ok(()) => {
                self.counters.packets_queued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => Err(FabricError::QueueFull {
                capacity: self.capacity,
            }),
            Err(SendTimeoutError::Disconnected(_)) => {
                Err(FabricError::LinkDown { peer: self.peer })
            }
        }
    }

    /// Snapshot the link's counters.
    pub(crate) fn stats(&self) -> LinkStats {
        LinkStats {
            packets_queued: self.counters.packets_queued.load(Ordering::Relaxed),
            packets_sent: self.counters.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.tx.take(); // unblocks the writer's queue recv
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn writer_loop(
    peer: PartyId,
    addr: &str,
    config: &LinkConfig,
    rx: &Receiver<Vec<u8>>,
    reply_tx: &Sender<Vec<u8>>,
    shutdown: &AtomicBool,
    alive: &AtomicBool,
    counters: &LinkCounters,
) {
    // Establish eagerly: creation is the connect trigger, so that the
    // bootstrap pass (and not the first timed send) pays connection setup.
    let mut stream: Option<TcpStream> = match connect_with_retry(addr, config, shutdown) {
        Ok(s) => {
            tracing::info!(peer, %addr, "outbound link connected");
            if let Ok(read_half) = s.try_clone() {
                spawn_reply_reader(peer, read_half, reply_tx.clone());
            }
            Some(s)
        }
        Err(e) => {
            tracing::warn!(peer, %addr, error = %e, "outbound link gave up");
            alive.store(false, Ordering::Release);
            return;
        }
    };
    let mut connections: u64 = 1;

    'main: loop {
        let packet = match rx.recv() {
            Ok(p) => p,
            Err(_) => break, // handle dropped, queue drained
        };

        // (Re)connect and write, retrying the same packet across
        // reconnections so nothing accepted onto the queue is lost.
        loop {
            if shutdown.load(Ordering::Acquire) {
                break 'main;
            }
            if stream.is_none() {
                match connect_with_retry(addr, config, shutdown) {
                    Ok(s) => {
                        connections += 1;
                        if connections > 1 {
                            counters.reconnects.fetch_add(1, Ordering::Relaxed);
                        }
                        tracing::info!(peer, %addr, "outbound link connected");
                        if let Ok(read_half) = s.try_clone() {
                            spawn_reply_reader(peer, read_half, reply_tx.clone());
                        }
                        stream = Some(s);
                    }
                    Err(e) => {
                        tracing::warn!(peer, %addr, error = %e, "outbound link gave up");
                        alive.store(false, Ordering::Release);
                        break 'main;
                    }
                }
            }
            let result = match stream.as_mut() {
                Some(s) => s.write_all(&packet),
                None => continue,
            };
            match result {
                Ok(()) => {
                    counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                    counters
                        .bytes_sent
                        .fetch_add(packet.len() as u64, Ordering::Relaxed);
                    continue 'main;
                }
                Err(e) => {
                    tracing::debug!(peer, error = %e, "write failed, reconnecting");
                    if let Some(s) = stream.take() {
                        let _ = s.shutdown(Shutdown::Both);
                    }
                }
            }
        }
    }

    alive.store(false, Ordering::Release);
    if let Some(s) = stream {
        // Wake the detached reply reader so it exits too.
        let _ = s.shutdown(Shutdown::Both);
    }
}

/// One connection attempt against every resolved address.
fn connect_once(addr: &str, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for sockaddr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&sockaddr, timeout) {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved")
    }))
}

/// Connect with capped exponential backoff, bounded by the link's failure
/// budget. Aborts early when `shutdown` is raised.
pub(crate) fn connect_with_retry(
    addr: &str,
    config: &LinkConfig,
    shutdown: &AtomicBool,
) -> io::Result<TcpStream> {
    let mut delay = config.initial_reconnect_delay;
    let mut failures: u32 = 0;
    loop {
        if shutdown.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "shutting down"));
        }
        match connect_once(addr, config.connect_timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                failures += 1;
                if let Some(max) = config.max_connection_failures {
                    if failures >= max {
                        return Err(e);
                    }
                }
                if !sleep_unless_shutdown(delay, shutdown) {
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "shutting down"));
                }
                delay = std::cmp::min(delay * 2, config.max_reconnect_delay);
            }
        }
    }
}

/// Sleep for `duration` in slices, returning false if `shutdown` was raised.
fn sleep_unless_shutdown(duration: Duration, shutdown: &AtomicBool) -> bool {
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if shutdown.load(Ordering::Acquire) {
            return false;
        }
        let slice = std::cmp::min(remaining, SHUTDOWN_POLL_INTERVAL);
        thread::sleep(slice);
        remaining -= slice;
    }
    !shutdown.load(Ordering::Acquire)
}

/// Detached reader for reply traffic the peer writes back on an outbound
/// stream. Exits on EOF, socket error, or wire error; the writer shuts the
/// socket down on teardown, which unblocks the read.
fn spawn_reply_reader(peer: PartyId, stream: TcpStream, reply_tx: Sender<Vec<u8>>) {
    let _ = thread::Builder::new()
        .name(format!("link-rx-{peer}"))
        .spawn(move || {
            let mut stream = stream;
            let mut buffer: Vec<u8> = Vec::with_capacity(4096);
            let mut chunk = [0u8; 4096];
            loop {
                let n = match stream.read(&mut chunk) {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                buffer.extend_from_slice(&chunk[..n]);
                loop {
                    match wire::try_decode_envelope(&buffer) {
                        Ok(Some((frames, consumed))) => {
                            buffer.drain(..consumed);
                            if reply_tx.send(wire::last_payload(frames)).is_err() {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(peer, error = %e, "reply stream wire error");
                            return;
                        }
                    }
                }
            }
        });
}
