//! Fire-and-forget one-to-many broadcast path, separate from the reliable
//! unicast links.
//!
//! The source accepts subscriber connections and fans published payloads
//! out to each of them through a small per-subscriber queue; a slow
//! subscriber loses messages rather than stalling the publisher. The
//! subscriber side connects to every peer's source; a subscriber that
//! connects after a publish simply misses it (slow joiner).

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::config::{LinkConfig, PartyId};
use crate::error::{FabricError, FabricResult};
use crate::fabric::link::connect_with_retry;
use crate::wire;

/// Poll interval of the non-blocking accept loop.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Queue depth per subscriber before messages are dropped.
const SUBSCRIBER_QUEUE_DEPTH: usize = 1024;

/// Outbound broadcast socket: one per party, bound on the broadcast offset
/// endpoint.
pub(crate) struct BroadcastSource {
    subscribers: Arc<Mutex<Vec<Sender<Vec<u8>>>>>,
    shutdown: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
}

impl BroadcastSource {
    pub(crate) fn bind(addr: &str) -> FabricResult<Self> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| FabricError::Io(format!("bind broadcast source {addr}: {e}")))?;
        listener.set_nonblocking(true)?;

        let subscribers: Arc<Mutex<Vec<Sender<Vec<u8>>>>> = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let accept = thread::Builder::new()
            .name("broadcast-accept".to_string())
            .spawn({
                let subscribers = subscribers.clone();
                let shutdown = shutdown.clone();
                move || accept_subscribers(&listener, &subscribers, &shutdown)
            })
            .map_err(FabricError::from)?;

        tracing::info!(%addr, "broadcast source bound");
        Ok(Self {
            subscribers,
            shutdown,
            accept: Some(accept),
        })
    }

    /// Publish to every currently connected subscriber.
    ///
    /// Success reflects the local enqueue only; there is no delivery
    /// confirmation. Full subscriber queues drop the message.
    pub(crate) fn publish(&self, payload: &[u8]) -> FabricResult<()> {
        let packet = wire::encode_bare(payload)?;
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(packet.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!("slow subscriber, dropping broadcast message");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        Ok(())
    }
}

impl Drop for BroadcastSource {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.accept.take() {
            let _ = handle.join();
        }
        // Dropping the senders ends every subscriber writer thread.
        self.subscribers.lock().clear();
    }
}

fn accept_subscribers(
    listener: &TcpListener,
    subscribers: &Mutex<Vec<Sender<Vec<u8>>>>,
    shutdown: &AtomicBool,
) {
    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                let _ = stream.set_nonblocking(false);
                let _ = stream.set_nodelay(true);
                tracing::debug!(%peer_addr, "broadcast subscriber connected");
                let (tx, rx) = bounded(SUBSCRIBER_QUEUE_DEPTH);
                subscribers.lock().push(tx);
                spawn_subscriber_writer(stream, rx);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                tracing::warn!(error = %e, "broadcast accept failed");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

/// Detached writer draining one subscriber's queue. Exits when the source
/// drops the queue or the subscriber goes away.
fn spawn_subscriber_writer(stream: TcpStream, rx: Receiver<Vec<u8>>) {
    let _ = thread::Builder::new()
        .name("broadcast-sub-writer".to_string())
        .spawn(move || {
            let mut stream = stream;
            while let Ok(packet) = rx.recv() {
                if stream.write_all(&packet).is_err() {
                    break;
                }
            }
            let _ = stream.shutdown(Shutdown::Both);
        });
}

/// Inbound broadcast socket: subscribed to every peer's broadcast feed.
pub(crate) struct BroadcastSubscriber {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    connected: Vec<PartyId>,
    streams: Arc<Mutex<Vec<TcpStream>>>,
    shutdown: Arc<AtomicBool>,
}

impl BroadcastSubscriber {
    pub(crate) fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            connected: Vec::new(),
            streams: Arc::new(Mutex::new(Vec::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Connect to `peer`'s broadcast source. Repeat calls for the same peer
    /// are no-ops, so `subscribe_to_all` is safe to call multiple times.
    pub(crate) fn subscribe(
        &mut self,
        peer: PartyId,
        addr: String,
        config: &LinkConfig,
    ) -> FabricResult<()> {
        if self.connected.contains(&peer) {
            return Ok(());
        }
        self.connected.push(peer);

        let tx = self.tx.clone();
        let streams = self.streams.clone();
        let shutdown = self.shutdown.clone();
        let config = config.clone();
        thread::Builder::new()
            .name(format!("broadcast-sub-{peer}"))
            .spawn(move || {
                let stream = match connect_with_retry(&addr, &config, &shutdown) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(peer, %addr, error = %e, "broadcast subscribe failed");
                        return;
                    }
                };
                tracing::debug!(peer, %addr, "subscribed to broadcast feed");
                if let Ok(clone) = stream.try_clone() {
                    streams.lock().push(clone);
                }
                read_broadcast_feed(peer, stream, &tx);
            })
            .map_err(FabricError::from)?;
        Ok(())
    }

    /// Wait up to `timeout` (`None` = indefinitely) for one payload.
    ///
    /// Sender identity is not recoverable on this path.
    pub(crate) fn recv(&self, timeout: Option<Duration>) -> Option<Vec<u8>> {
        match timeout {
            Some(t) => self.rx.recv_timeout(t).ok(),
            None => self.rx.recv().ok(),
        }
    }
}

impl Drop for BroadcastSubscriber {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for stream in self.streams.lock().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

fn read_broadcast_feed(peer: PartyId, mut stream: TcpStream, tx: &Sender<Vec<u8>>) {
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
                    if tx.send(wire::last_payload(frames)).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(peer, error = %e, "broadcast feed wire error");
                    return;
                }
            }
        }
    }
}
