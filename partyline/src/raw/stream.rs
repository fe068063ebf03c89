//! One direct pair connection: blocking, ordered, byte-counted.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use super::{RawError, RawResult};

/// A single established pair stream with running byte counters.
///
/// All operations block the calling thread. A send or receive error after
/// establishment is fatal for the stream (and, by design, for the whole
/// multi-party run); it is surfaced as [`RawError::Fatal`] rather than
/// terminating the process, so a process-level wrapper can decide.
#[derive(Debug)]
pub struct RawStream {
    stream: TcpStream,
    bytes_sent: u64,
    bytes_received: u64,
}

impl RawStream {
    /// Bind `addr`, accept exactly one connection, and drop the listener.
    ///
    /// # Errors
    ///
    /// Bind or accept failures are fatal bootstrap errors.
    pub fn listen(addr: &str) -> RawResult<Self> {
        let listener = TcpListener::bind(addr).map_err(|source| RawError::Fatal {
            op: "bind",
            source,
        })?;
        let (stream, peer_addr) = listener.accept().map_err(|source| RawError::Fatal {
            op: "accept",
            source,
        })?;
        tracing::debug!(%addr, %peer_addr, "raw pair connection accepted");
        Ok(Self::established(stream))
    }

    /// Connect to `addr` with bounded retry: `attempts` tries separated by
    /// a fixed `backoff`, tolerating a peer that has not bound its listener
    /// yet.
    ///
    /// # Errors
    ///
    /// Returns [`RawError::ConnectExhausted`] once the attempts run out.
    pub fn connect(addr: &str, attempts: u32, backoff: Duration) -> RawResult<Self> {
        let mut attempt: u32 = 0;
        loop {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    tracing::debug!(%addr, attempt, "raw pair connection established");
                    return Ok(Self::established(stream));
                }
                Err(source) => {
                    attempt += 1;
                    if attempt >= attempts {
                        return Err(RawError::ConnectExhausted {
                            addr: addr.to_string(),
                            attempts,
                            source,
                        });
                    }
                    thread::sleep(backoff);
                }
            }
        }
    }

    fn established(stream: TcpStream) -> Self {
        Self {
            stream,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    /// Enable `TCP_NODELAY` on the underlying socket. Best effort.
    pub fn set_nodelay(&self) {
        let _ = self.stream.set_nodelay(true);
    }

    /// Blocking send: loops until every byte of `data` is written.
    ///
    /// # Errors
    ///
    /// A write error is fatal for the stream.
    pub fn send(&mut self, data: &[u8]) -> RawResult<()> {
        let mut sent = 0;
        while sent < data.len() {
            match self.stream.write(&data[sent..]) {
                Ok(0) => {
                    return Err(RawError::Fatal {
                        op: "send",
                        source: io::Error::from(io::ErrorKind::WriteZero),
                    });
                }
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => return Err(RawError::Fatal { op: "send", source }),
            }
        }
        self.bytes_sent += data.len() as u64;
        Ok(())
    }

    /// Blocking receive: loops until `buf` is full or the peer closes the
    /// stream, in which case it returns the bytes obtained so far without
    /// error. Callers that care about partial reads on close must check
    /// the returned count.
    ///
    /// # Errors
    ///
    /// A read error is fatal for the stream.
    pub fn recv(&mut self, buf: &mut [u8]) -> RawResult<usize> {
        let mut received = 0;
        while received < buf.len() {
            match self.stream.read(&mut buf[received..]) {
                Ok(0) => break, // peer closed, short read is not an error
                Ok(n) => received += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => return Err(RawError::Fatal { op: "recv", source }),
            }
        }
        self.bytes_received += received as u64;
        Ok(received)
    }

    /// Explicit no-op: the stream transport has no user-space buffering.
    /// Kept so higher layers can pair every send burst with a flush call
    /// regardless of transport.
    pub fn flush(&mut self) {}

    /// Total bytes written on this stream.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Total bytes read on this stream.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
}
