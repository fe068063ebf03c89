//! Parallel fan-out: one worker thread per destination peer, joined before
//! the aggregate outcome is reported.

use std::thread;

use crate::config::{FabricConfig, PartyId};
use crate::fabric::pool::LinkPool;

/// Bounded task group for one-to-all sends.
///
/// Holds a pre-sized outcome slot per peer position, reused across calls.
/// Workers share no mutable state beyond their own slot, so the hot path
/// needs no locking; the final join is the only synchronization.
pub(crate) struct FanoutEngine {
    peers: Vec<PartyId>,
    outcomes: Vec<bool>,
}

impl FanoutEngine {
    pub(crate) fn new(config: &FabricConfig) -> Self {
        let peers: Vec<PartyId> = config.peers().collect();
        let outcomes = vec![false; peers.len()];
        Self { peers, outcomes }
    }

    /// Send an already-encoded envelope to every peer concurrently.
    ///
    /// A worker whose peer link was never established (or has since given
    /// up) records a failed outcome without aborting the others. Returns
    /// true only if every worker succeeded.
    pub(crate) fn send_to_all(&mut self, pool: &LinkPool, packet: &[u8]) -> bool {
        for outcome in &mut self.outcomes {
            *outcome = false;
        }
        let peers = &self.peers;
        thread::scope(|scope| {
            for (slot, &peer) in self.outcomes.iter_mut().zip(peers.iter()) {
                scope.spawn(move || {
                    let result = pool
                        .get_or_create(peer)
                        .and_then(|link| link.send_packet(packet.to_vec()));
                    if let Err(e) = &result {
                        tracing::warn!(peer, error = %e, "fan-out send failed");
                    }
                    *slot = result.is_ok();
                });
            }
        });
        self.outcomes.iter().all(|&ok| ok)
    }
}
