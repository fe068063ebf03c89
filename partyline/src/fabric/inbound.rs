//! Inbound listener: accepts peer connections, decodes addressed envelopes,
//! and can reply directly to any previously observed sender identity.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::PartyId;
use crate::error::{FabricError, FabricResult};
use crate::wire;

/// Poll interval of the non-blocking accept loop.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Write halves of inbound connections, keyed by the sender identity last
/// observed on them. Used to address replies without an outbound link.
type ReplyWriters = Arc<Mutex<HashMap<PartyId, TcpStream>>>;

pub(crate) struct Inbound {
    rx: Receiver<(PartyId, Vec<u8>)>,
    writers: ReplyWriters,
    shutdown: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl Inbound {
    /// Bind the listener and start accepting connections.
    pub(crate) fn bind(addr: &str) -> FabricResult<Self> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| FabricError::Io(format!("bind {addr}: {e}")))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = unbounded();
        let writers: ReplyWriters = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let accept = thread::Builder::new()
            .name("inbound-accept".to_string())
            .spawn({
                let writers = writers.clone();
                let shutdown = shutdown.clone();
                move || accept_loop(&listener, &tx, &writers, &shutdown)
            })
            .map_err(FabricError::from)?;

        tracing::info!(%local_addr, "inbound listener bound");
        Ok(Self {
            rx,
            writers,
            shutdown,
            accept: Some(accept),
            local_addr,
        })
    }

    /// Wait up to `timeout` (`None` = indefinitely) for one message.
    pub(crate) fn recv(&self, timeout: Option<Duration>) -> Option<(PartyId, Vec<u8>)> {
        match timeout {
            Some(t) => self.rx.recv_timeout(t).ok(),
            None => self.rx.recv().ok(),
        }
    }

    /// Reply to a previously observed sender over its own connection.
    pub(crate) fn reply(&self, to: PartyId, payload: &[u8]) -> FabricResult<()> {
        let packet = wire::encode_bare(payload)?;
        let mut writers = self.writers.lock();
        let stream = writers.get_mut(&to).ok_or_else(|| FabricError::NotReady {
            message: format!("no inbound connection from party {to}"),
        })?;
        if let Err(e) = stream.write_all(&packet) {
            writers.remove(&to);
            return Err(FabricError::Io(format!("reply to party {to}: {e}")));
        }
        Ok(())
    }

    /// The address the listener actually bound.
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for Inbound {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.accept.take() {
            let _ = handle.join();
        }
        // Shut down connection sockets so their detached readers exit.
        for (_, stream) in self.writers.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

fn accept_loop(
    listener: &TcpListener,
    tx: &Sender<(PartyId, Vec<u8>)>,
    writers: &ReplyWriters,
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
                tracing::debug!(%peer_addr, "inbound connection accepted");
                spawn_connection_reader(stream, peer_addr, tx.clone(), writers.clone());
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

/// Detached per-connection reader. Registers the sender identity for the
/// reply path on the first decoded envelope, then forwards every message.
fn spawn_connection_reader(
    stream: TcpStream,
    peer_addr: SocketAddr,
    tx: Sender<(PartyId, Vec<u8>)>,
    writers: ReplyWriters,
) {
    let _ = thread::Builder::new()
        .name("inbound-conn".to_string())
        .spawn(move || {
            let mut stream = stream;
            let mut buffer: Vec<u8> = Vec::with_capacity(4096);
            let mut chunk = [0u8; 4096];
            let mut registered: Option<PartyId> = None;

            'read: loop {
                let n = match stream.read(&mut chunk) {
                    Ok(0) | Err(_) => break 'read,
                    Ok(n) => n,
                };
                buffer.extend_from_slice(&chunk[..n]);
                loop {
                    match wire::try_decode_envelope(&buffer) {
                        Ok(Some((frames, consumed))) => {
                            buffer.drain(..consumed);
                            let (sender, payload) = match wire::split_addressed(frames) {
                                Ok(message) => message,
                                Err(e) => {
                                    tracing::warn!(%peer_addr, error = %e, "dropping malformed message");
                                    continue;
                                }
                            };
                            if registered != Some(sender) {
                                if let Ok(write_half) = stream.try_clone() {
                                    writers.lock().insert(sender, write_half);
                                    registered = Some(sender);
                                }
                            }
                            if tx.send((sender, payload)).is_err() {
                                break 'read;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            // Tear the connection down on wire errors.
                            tracing::warn!(%peer_addr, error = %e, "wire error, closing connection");
                            break 'read;
                        }
                    }
                }
            }

            // Unregister the reply writer if it still points at this stream.
            if let Some(sender) = registered {
                let mut writers = writers.lock();
                let stale = writers
                    .get(&sender)
                    .and_then(|s| s.peer_addr().ok())
                    .map(|a| a == peer_addr)
                    .unwrap_or(false);
                if stale {
                    writers.remove(&sender);
                }
            }
        });
}
