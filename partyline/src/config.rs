//! Configuration structures: party set, endpoint derivation, link tuning.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FabricError, FabricResult};

/// Identifier of one participant in the N-party protocol.
///
/// Ids are positive and unique among `1..=N` for a run of N parties.
pub type PartyId = u32;

/// Port offset of the broadcast source relative to the unicast listener:
/// the source for party `i` binds `port_base + 1000 + i`.
pub const BROADCAST_PORT_OFFSET: u16 = 1000;

/// Port offset of the raw pairwise links: pair `(i, j)` with `i < j` uses
/// `port_base + 2000 + i * N + j` on party `i`'s address.
pub const RAW_PORT_OFFSET: u16 = 2000;

/// The shared party set and endpoint convention.
///
/// Every party constructs an identical map (apart from `id`); any party can
/// then compute any other party's endpoints from its id alone, with no
/// discovery. The structure is serde-derived so deployments can load it from
/// an external configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricConfig {
    /// This party's own id.
    pub id: PartyId,

    /// Base TCP port shared by all parties.
    pub port_base: u16,

    /// Party id to host address, for every party including self.
    pub parties: BTreeMap<PartyId, String>,
}

impl FabricConfig {
    /// Build a configuration, validating the party set.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the set is empty, contains id 0, or does
    /// not contain `id` itself.
    pub fn new(
        id: PartyId,
        port_base: u16,
        parties: BTreeMap<PartyId, String>,
    ) -> FabricResult<Self> {
        if parties.is_empty() {
            return Err(FabricError::InvalidConfig {
                message: "party set is empty".to_string(),
            });
        }
        if parties.contains_key(&0) {
            return Err(FabricError::InvalidConfig {
                message: "party ids must be positive".to_string(),
            });
        }
        if !parties.contains_key(&id) {
            return Err(FabricError::InvalidConfig {
                message: format!("own id {id} is not in the party set"),
            });
        }
        Ok(Self {
            id,
            port_base,
            parties,
        })
    }

    /// Convenience constructor for a loopback deployment of parties `1..=n`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `own_id` is not within `1..=n`.
    pub fn local(own_id: PartyId, n: u32, port_base: u16) -> FabricResult<Self> {
        let parties = (1..=n).map(|i| (i, "127.0.0.1".to_string())).collect();
        Self::new(own_id, port_base, parties)
    }

    /// Number of parties in the set, including self.
    pub fn party_count(&self) -> usize {
        self.parties.len()
    }

    /// Whether `id` is part of the configured set.
    pub fn contains(&self, id: PartyId) -> bool {
        self.parties.contains_key(&id)
    }

    /// All party ids except self, in ascending order.
    pub fn peers(&self) -> impl Iterator<Item = PartyId> + '_ {
        let own = self.id;
        self.parties.keys().copied().filter(move |&p| p != own)
    }

    /// Reject self-targeted or unknown peer ids before any I/O.
    pub(crate) fn validate_peer(&self, peer: PartyId) -> FabricResult<()> {
        if peer == self.id {
            return Err(FabricError::SelfTarget { id: peer });
        }
        if !self.contains(peer) {
            return Err(FabricError::UnknownParty { id: peer });
        }
        Ok(())
    }

    fn host(&self, id: PartyId) -> FabricResult<&str> {
        self.parties
            .get(&id)
            .map(String::as_str)
            .ok_or(FabricError::UnknownParty { id })
    }

    fn port(&self, id: PartyId, offset: u16) -> FabricResult<u16> {
        u16::try_from(id)
            .ok()
            .and_then(|id16| self.port_base.checked_add(offset)?.checked_add(id16))
            .ok_or(FabricError::EndpointOverflow { id })
    }

    /// `host:port` of party `id`'s unicast listener (`port_base + id`).
    pub fn unicast_addr(&self, id: PartyId) -> FabricResult<String> {
        Ok(format!("{}:{}", self.host(id)?, self.port(id, 0)?))
    }

    /// `host:port` of party `id`'s broadcast source
    /// (`port_base + 1000 + id`).
    pub fn broadcast_addr(&self, id: PartyId) -> FabricResult<String> {
        Ok(format!(
            "{}:{}",
            self.host(id)?,
            self.port(id, BROADCAST_PORT_OFFSET)?
        ))
    }

    /// `host:port` of the raw pair link `(low, high)`, bound on the lower
    /// party's address.
    pub fn raw_addr(&self, low: PartyId, high: PartyId) -> FabricResult<String> {
        let n = self.party_count() as u32;
        let slot = low
            .checked_mul(n)
            .and_then(|s| s.checked_add(high))
            .and_then(|s| u16::try_from(s).ok())
            .ok_or(FabricError::EndpointOverflow { id: high })?;
        let port = self
            .port_base
            .checked_add(RAW_PORT_OFFSET)
            .and_then(|p| p.checked_add(slot))
            .ok_or(FabricError::EndpointOverflow { id: high })?;
        Ok(format!("{}:{}", self.host(low)?, port))
    }
}

/// Tuning for one outbound link's queue and reconnection behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Maximum number of packets queued while the writer catches up.
    pub max_queue_size: usize,

    /// How long a send waits for queue space before failing with
    /// `QueueFull` instead of blocking forever.
    pub enqueue_timeout: Duration,

    /// Timeout for a single connection attempt.
    pub connect_timeout: Duration,

    /// Initial delay before reattempting a failed connection.
    pub initial_reconnect_delay: Duration,

    /// Cap on the reconnection backoff.
    pub max_reconnect_delay: Duration,

    /// Consecutive connection failures before the link gives up.
    /// `None` means unlimited retries.
    pub max_connection_failures: Option<u32>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            enqueue_timeout: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(5),
            initial_reconnect_delay: Duration::from_millis(100),
            max_reconnect_delay: Duration::from_secs(30),
            max_connection_failures: None,
        }
    }
}

impl LinkConfig {
    /// Profile for low-latency loopback or LAN deployments.
    pub fn local_network() -> Self {
        Self {
            max_queue_size: 100,
            enqueue_timeout: Duration::from_millis(20),
            connect_timeout: Duration::from_millis(500),
            initial_reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_secs(1),
            max_connection_failures: Some(10),
        }
    }
}

/// Tuning for the raw point-to-point transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConfig {
    /// Connection attempts before `connect_all` fails for a peer.
    pub connect_attempts: u32,

    /// Fixed backoff between connection attempts.
    pub connect_backoff: Duration,

    /// Whether to set `TCP_NODELAY` on established pair links.
    pub nodelay: bool,
}

impl Default for RawConfig {
    fn default() -> Self {
        // 50 attempts x 100ms tolerates ~5s of startup skew between parties.
        Self {
            connect_attempts: 50,
            connect_backoff: Duration::from_millis(100),
            nodelay: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_party() -> FabricConfig {
        FabricConfig::local(2, 3, 9000).expect("valid config")
    }

    #[test]
    fn test_endpoint_derivation() {
        let config = three_party();
        assert_eq!(
            config.unicast_addr(1).expect("addr"),
            "127.0.0.1:9001".to_string()
        );
        assert_eq!(
            config.broadcast_addr(3).expect("addr"),
            "127.0.0.1:10003".to_string()
        );
        // Pair (1, 3) with N=3: 9000 + 2000 + 1*3 + 3 = 11006.
        assert_eq!(
            config.raw_addr(1, 3).expect("addr"),
            "127.0.0.1:11006".to_string()
        );
    }

    #[test]
    fn test_peers_excludes_self() {
        let config = three_party();
        let peers: Vec<PartyId> = config.peers().collect();
        assert_eq!(peers, vec![1, 3]);
    }

    #[test]
    fn test_validate_peer() {
        let config = three_party();
        assert!(matches!(
            config.validate_peer(2),
            Err(FabricError::SelfTarget { id: 2 })
        ));
        assert!(matches!(
            config.validate_peer(7),
            Err(FabricError::UnknownParty { id: 7 })
        ));
        assert!(config.validate_peer(3).is_ok());
    }

    #[test]
    fn test_rejects_missing_own_id() {
        let parties: BTreeMap<PartyId, String> =
            [(1, "10.0.0.1".to_string())].into_iter().collect();
        let result = FabricConfig::new(5, 9000, parties);
        assert!(matches!(result, Err(FabricError::InvalidConfig { .. })));
    }

    #[test]
    fn test_rejects_zero_id() {
        let parties: BTreeMap<PartyId, String> = [
            (0, "10.0.0.1".to_string()),
            (1, "10.0.0.2".to_string()),
        ]
        .into_iter()
        .collect();
        let result = FabricConfig::new(1, 9000, parties);
        assert!(matches!(result, Err(FabricError::InvalidConfig { .. })));
    }

    #[test]
    fn test_port_overflow() {
        let config = FabricConfig::local(1, 2, u16::MAX - 1).expect("valid config");
        assert!(matches!(
            config.unicast_addr(2),
            Err(FabricError::EndpointOverflow { id: 2 })
        ));
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = three_party();
        let json = serde_json::to_string(&config).expect("serialize");
        let parsed: FabricConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(config, parsed);
    }
}
