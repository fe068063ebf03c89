//! Raw point-to-point transport: one direct TCP stream per unordered party
//! pair, blocking semantics, no framing, byte counters.
//!
//! For pair `(i, j)` with `i < j`, party `i` listens and party `j`
//! initiates the connection. This total ordering removes the "who binds
//! first" ambiguity without negotiation; the connecting side retries with
//! a fixed backoff to tolerate startup skew.
//!
//! This transport trades resilience for simplicity: any send or receive
//! error after establishment invalidates the whole multi-party run and is
//! surfaced as [`RawError::Fatal`].

mod stream;

pub use stream::RawStream;

use std::collections::HashMap;
use std::io;

use crate::config::{FabricConfig, PartyId, RawConfig};

/// Errors that can occur in the raw transport.
#[derive(Debug, thiserror::Error)]
pub enum RawError {
    /// A send or receive targeted this party's own id.
    #[error("cannot target own party id {id}")]
    SelfTarget {
        /// The offending party id.
        id: PartyId,
    },

    /// The party id is not in the configured party set.
    #[error("party {id} is not in the configured party set")]
    UnknownParty {
        /// The unknown party id.
        id: PartyId,
    },

    /// No pair connection exists for the peer; `connect_all` was not run
    /// or did not complete.
    #[error("no raw link to party {id}; run connect_all first")]
    NotConnected {
        /// The peer without an established pair connection.
        id: PartyId,
    },

    /// The derived pair endpoint does not fit in a TCP port number.
    #[error("endpoint port overflows for party {id}")]
    EndpointOverflow {
        /// The party id whose endpoint could not be derived.
        id: PartyId,
    },

    /// Connection retries exhausted while the peer's listener stayed down.
    #[error("connection to {addr} failed after {attempts} attempts: {source}")]
    ConnectExhausted {
        /// The address that never accepted.
        addr: String,
        /// How many attempts were made.
        attempts: u32,
        /// The last underlying error.
        #[source]
        source: io::Error,
    },

    /// A transport operation failed after establishment. By design this
    /// invalidates the whole run; the caller decides whether to terminate.
    #[error("fatal transport error during {op}: {source}")]
    Fatal {
        /// The operation that failed (`bind`, `accept`, `send`, `recv`).
        op: &'static str,
        /// The underlying system error.
        #[source]
        source: io::Error,
    },
}

/// Result type for raw transport operations.
pub type RawResult<T> = Result<T, RawError>;

/// N-party raw transport: one established [`RawStream`] per peer.
pub struct RawTransport {
    config: FabricConfig,
    raw_config: RawConfig,
    links: HashMap<PartyId, RawStream>,
}

impl RawTransport {
    /// Create the transport with default retry and socket tuning.
    /// No connections are made until [`connect_all`](Self::connect_all).
    pub fn new(config: FabricConfig) -> Self {
        Self::with_raw_config(config, RawConfig::default())
    }

    /// Create the transport with explicit tuning.
    pub fn with_raw_config(config: FabricConfig, raw_config: RawConfig) -> Self {
        Self {
            config,
            raw_config,
            links: HashMap::new(),
        }
    }

    /// This party's own id.
    pub fn id(&self) -> PartyId {
        self.config.id
    }

    /// Establish the pair connection to every peer, in ascending peer
    /// order: accept where this party has the lower id, connect (with
    /// bounded retry) where it has the higher id.
    ///
    /// # Errors
    ///
    /// Bind/accept failures and exhausted retries are fatal for the run.
    pub fn connect_all(&mut self) -> RawResult<()> {
        let own = self.config.id;
        let peers: Vec<PartyId> = self.config.peers().collect();
        for peer in peers {
            let stream = if own < peer {
                let addr = self.pair_addr(own, peer)?;
                RawStream::listen(&addr)?
            } else {
                let addr = self.pair_addr(peer, own)?;
                RawStream::connect(
                    &addr,
                    self.raw_config.connect_attempts,
                    self.raw_config.connect_backoff,
                )?
            };
            if self.raw_config.nodelay {
                stream.set_nodelay();
            }
            tracing::info!(id = own, peer, "raw pair link established");
            self.links.insert(peer, stream);
        }
        Ok(())
    }

    /// Blocking send of the whole buffer to `peer`.
    ///
    /// # Errors
    ///
    /// Configuration errors are rejected without I/O; a write error after
    /// establishment is fatal for the run.
    pub fn send_to(&mut self, peer: PartyId, data: &[u8]) -> RawResult<()> {
        self.link_mut(peer)?.send(data)
    }

    /// Blocking receive into the whole buffer from `peer`; returns the
    /// byte count actually obtained, which is short only if the peer
    /// closed its stream.
    ///
    /// # Errors
    ///
    /// Configuration errors are rejected without I/O; a read error after
    /// establishment is fatal for the run.
    pub fn receive_from(&mut self, peer: PartyId, buf: &mut [u8]) -> RawResult<usize> {
        self.link_mut(peer)?.recv(buf)
    }

    /// Explicit no-op flush for one peer's stream.
    ///
    /// # Errors
    ///
    /// Fails only for configuration errors or a missing connection.
    pub fn flush(&mut self, peer: PartyId) -> RawResult<()> {
        self.link_mut(peer)?.flush();
        Ok(())
    }

    /// Explicit no-op flush across all established streams.
    pub fn flush_all(&mut self) {
        for stream in self.links.values_mut() {
            stream.flush();
        }
    }

    /// Bytes written across all pair links.
    pub fn bytes_sent(&self) -> u64 {
        self.links.values().map(RawStream::bytes_sent).sum()
    }

    /// Bytes read across all pair links.
    pub fn bytes_received(&self) -> u64 {
        self.links.values().map(RawStream::bytes_received).sum()
    }

    /// Per-peer `(sent, received)` byte counters, if the link exists.
    pub fn link_counters(&self, peer: PartyId) -> Option<(u64, u64)> {
        self.links
            .get(&peer)
            .map(|s| (s.bytes_sent(), s.bytes_received()))
    }

    fn link_mut(&mut self, peer: PartyId) -> RawResult<&mut RawStream> {
        if peer == self.config.id {
            return Err(RawError::SelfTarget { id: peer });
        }
        if !self.config.contains(peer) {
            return Err(RawError::UnknownParty { id: peer });
        }
        self.links
            .get_mut(&peer)
            .ok_or(RawError::NotConnected { id: peer })
    }

    fn pair_addr(&self, low: PartyId, high: PartyId) -> RawResult<String> {
        self.config
            .raw_addr(low, high)
            .map_err(|_| RawError::EndpointOverflow { id: high })
    }
}
