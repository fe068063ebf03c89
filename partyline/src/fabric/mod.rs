//! The identity-addressed unicast/broadcast messaging layer.
//!
//! A [`Fabric`] owns every socket for one party: the inbound listener, the
//! shared outbound link, the per-peer link pool, the fan-out engine, and
//! the broadcast source/subscriber pair. Bootstrap is two-phase: every
//! party binds its listeners first, then connects its outbound links.
//! Connect attempts issued before the remote listener is bound retry
//! internally, so the phases only need to be ordered per party, not
//! globally synchronized.

mod broadcast;
mod fanout;
mod inbound;
mod link;
mod pool;

pub use link::LinkStats;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::config::{FabricConfig, LinkConfig, PartyId};
use crate::error::{FabricError, FabricResult};
use crate::wire;

use broadcast::{BroadcastSource, BroadcastSubscriber};
use fanout::FanoutEngine;
use inbound::Inbound;
use link::Link;
use pool::LinkPool;

/// Shared outbound link: one logical socket connected to every peer,
/// distributing un-addressed sends round-robin and carrying this party's
/// identity on every envelope.
struct SharedOutbound {
    links: Vec<Arc<Link>>,
    next: AtomicUsize,
}

impl SharedOutbound {
    fn send(&self, packet: Vec<u8>) -> FabricResult<()> {
        if self.links.is_empty() {
            return Err(FabricError::NotReady {
                message: "shared outbound link has no peers".to_string(),
            });
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.links.len();
        self.links[index].send_packet(packet)
    }
}

/// One party's connection-and-messaging fabric.
///
/// Typical bootstrap, on every party:
///
/// ```ignore
/// let mut fabric = Fabric::new(config)?;
/// fabric.bind_inbound()?;             // phase 1: everyone binds
/// fabric.bind_broadcast_source()?;
/// fabric.connect_peer_links()?;       // phase 2: everyone connects
/// fabric.subscribe_to_all()?;
/// ```
pub struct Fabric {
    config: Arc<FabricConfig>,
    link_config: LinkConfig,
    inbound: Option<Inbound>,
    shared: Option<SharedOutbound>,
    pool: LinkPool,
    fanout: FanoutEngine,
    reply_tx: Sender<Vec<u8>>,
    reply_rx: Receiver<Vec<u8>>,
    source: Option<BroadcastSource>,
    subscriber: Option<BroadcastSubscriber>,
}

impl Fabric {
    /// Create a fabric with default link tuning.
    ///
    /// No sockets are created yet; call the bind/connect bootstrap
    /// operations before exchanging messages.
    pub fn new(config: FabricConfig) -> FabricResult<Self> {
        Self::with_link_config(config, LinkConfig::default())
    }

    /// Create a fabric with explicit link tuning.
    pub fn with_link_config(config: FabricConfig, link_config: LinkConfig) -> FabricResult<Self> {
        if !config.contains(config.id) {
            return Err(FabricError::InvalidConfig {
                message: format!("own id {} is not in the party set", config.id),
            });
        }
        let config = Arc::new(config);
        let (reply_tx, reply_rx) = unbounded();
        let pool = LinkPool::new(config.clone(), link_config.clone(), reply_tx.clone());
        let fanout = FanoutEngine::new(&config);
        Ok(Self {
            config,
            link_config,
            inbound: None,
            shared: None,
            pool,
            fanout,
            reply_tx,
            reply_rx,
            source: None,
            subscriber: None,
        })
    }

    /// This party's own id.
    pub fn id(&self) -> PartyId {
        self.config.id
    }

    /// The configured party set.
    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    /// Bind the inbound listener on this party's own endpoint.
    ///
    /// Idempotent: a second call is a no-op. Must complete before any peer
    /// can deliver to this party.
    pub fn bind_inbound(&mut self) -> FabricResult<()> {
        if self.inbound.is_some() {
            return Ok(());
        }
        let addr = self.config.unicast_addr(self.config.id)?;
        self.inbound = Some(Inbound::bind(&addr)?);
        Ok(())
    }

    /// The address the inbound listener actually bound, if any.
    pub fn local_inbound_addr(&self) -> Option<SocketAddr> {
        self.inbound.as_ref().map(Inbound::local_addr)
    }

    /// Connect the shared outbound link to every peer's listener.
    ///
    /// Idempotent. Connecting is fire-and-forget; delivery only succeeds
    /// once the remote listener is bound.
    pub fn connect_outbound(&mut self) -> FabricResult<()> {
        if self.shared.is_some() {
            return Ok(());
        }
        let mut links = Vec::with_capacity(self.config.party_count().saturating_sub(1));
        for peer in self.config.peers() {
            let addr = self.config.unicast_addr(peer)?;
            links.push(Arc::new(Link::spawn(
                peer,
                addr,
                self.link_config.clone(),
                self.reply_tx.clone(),
            )?));
        }
        tracing::info!(id = self.config.id, peers = links.len(), "shared outbound link connected");
        self.shared = Some(SharedOutbound {
            links,
            next: AtomicUsize::new(0),
        });
        Ok(())
    }

    /// Establish the dedicated per-peer links up front.
    ///
    /// Optional: `send_to` creates links lazily. Latency-sensitive callers
    /// should run this (plus one untimed warm-up round) so the first timed
    /// fan-out does not pay connection setup.
    pub fn connect_peer_links(&mut self) -> FabricResult<()> {
        for peer in self.config.peers() {
            self.pool.get_or_create(peer)?;
        }
        Ok(())
    }

    /// Number of dedicated per-peer links established so far.
    pub fn established_links(&self) -> usize {
        self.pool.len()
    }

    /// Counter snapshot for the dedicated link to `peer`, if it exists.
    pub fn link_stats(&self, peer: PartyId) -> Option<LinkStats> {
        self.pool.get(peer).map(|link| link.stats())
    }

    /// Send `payload` to `peer` over its dedicated link, creating the link
    /// on first use.
    ///
    /// Non-blocking enqueue: success means the payload was handed to the
    /// transport, not that it was delivered.
    pub fn send_to(&self, peer: PartyId, payload: &[u8]) -> FabricResult<()> {
        let link = self.pool.get_or_create(peer)?;
        let packet = wire::encode_addressed(self.config.id, payload)?;
        link.send_packet(packet)
    }

    /// Send `payload` over the shared outbound link, distributed
    /// round-robin across the connected peers.
    pub fn send_outbound(&self, payload: &[u8]) -> FabricResult<()> {
        let shared = self.shared.as_ref().ok_or_else(|| FabricError::NotReady {
            message: "shared outbound link not connected".to_string(),
        })?;
        let packet = wire::encode_addressed(self.config.id, payload)?;
        shared.send(packet)
    }

    /// Wait up to `timeout` (`None` = indefinitely) for one inbound
    /// message; returns the sender's identity and the payload.
    ///
    /// A timeout is not an error: the call returns `Ok(None)`. The receive
    /// path cannot distinguish "peer disconnected" from "nothing sent".
    pub fn receive(&self, timeout: Option<Duration>) -> FabricResult<Option<(PartyId, Vec<u8>)>> {
        let inbound = self.inbound.as_ref().ok_or_else(|| FabricError::NotReady {
            message: "inbound listener not bound".to_string(),
        })?;
        Ok(inbound.recv(timeout))
    }

    /// Reply directly to a previously observed sender identity, over that
    /// sender's own inbound connection. No outbound link is required.
    pub fn send_reply(&self, to: PartyId, payload: &[u8]) -> FabricResult<()> {
        self.config.validate_peer(to)?;
        let inbound = self.inbound.as_ref().ok_or_else(|| FabricError::NotReady {
            message: "inbound listener not bound".to_string(),
        })?;
        inbound.reply(to, payload)
    }

    /// Wait up to `timeout` (`None` = indefinitely) for one reply payload
    /// observed on any outbound link. Payload only; empty delimiter frames
    /// are skipped and the last non-empty frame is taken.
    pub fn recv_outbound(&self, timeout: Option<Duration>) -> FabricResult<Option<Vec<u8>>> {
        Ok(match timeout {
            Some(t) => self.reply_rx.recv_timeout(t).ok(),
            None => self.reply_rx.recv().ok(),
        })
    }

    /// Send `payload` to every peer concurrently, one worker thread per
    /// destination, joining all workers before returning.
    ///
    /// Returns `Ok(true)` only if every worker's send succeeded. An
    /// individual peer failure (for example a link whose writer gave up
    /// connecting) marks that peer's outcome false without aborting the
    /// others.
    pub fn send_to_all_parallel(&mut self, payload: &[u8]) -> FabricResult<bool> {
        let packet = wire::encode_addressed(self.config.id, payload)?;
        Ok(self.fanout.send_to_all(&self.pool, &packet))
    }

    /// Bind the broadcast source on the fixed-offset broadcast endpoint.
    /// Idempotent.
    pub fn bind_broadcast_source(&mut self) -> FabricResult<()> {
        if self.source.is_some() {
            return Ok(());
        }
        let addr = self.config.broadcast_addr(self.config.id)?;
        self.source = Some(BroadcastSource::bind(&addr)?);
        Ok(())
    }

    /// Subscribe to every peer's broadcast feed.
    ///
    /// Safe to call multiple times; peers already subscribed to are
    /// skipped. Subscriptions established after a peer publishes miss that
    /// publish (slow joiner).
    pub fn subscribe_to_all(&mut self) -> FabricResult<()> {
        let subscriber = self.subscriber.get_or_insert_with(BroadcastSubscriber::new);
        for peer in self.config.peers() {
            let addr = self.config.broadcast_addr(peer)?;
            subscriber.subscribe(peer, addr, &self.link_config)?;
        }
        Ok(())
    }

    /// Fire-and-forget publish to all currently connected subscribers.
    ///
    /// Success reflects the local enqueue only: no acknowledgment, no
    /// retry, no delivery guarantee.
    pub fn broadcast(&self, payload: &[u8]) -> FabricResult<()> {
        let source = self.source.as_ref().ok_or_else(|| FabricError::NotReady {
            message: "broadcast source not bound".to_string(),
        })?;
        source.publish(payload)
    }

    /// Wait up to `timeout` (`None` = indefinitely) for one broadcast
    /// payload. Sender identity is not recoverable on this path.
    pub fn recv_broadcast(&self, timeout: Option<Duration>) -> FabricResult<Option<Vec<u8>>> {
        let subscriber = self.subscriber.as_ref().ok_or_else(|| FabricError::NotReady {
            message: "not subscribed to any broadcast feed".to_string(),
        })?;
        Ok(subscriber.recv(timeout))
    }
}
