//! Per-peer link pool: one persistent outbound link per destination party,
//! created on first need and reused until the fabric is destroyed.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::config::{FabricConfig, LinkConfig, PartyId};
use crate::error::FabricResult;
use crate::fabric::link::Link;

pub(crate) struct LinkPool {
    config: Arc<FabricConfig>,
    link_config: LinkConfig,
    reply_tx: Sender<Vec<u8>>,
    links: Mutex<HashMap<PartyId, Arc<Link>>>,
}

impl LinkPool {
    pub(crate) fn new(
        config: Arc<FabricConfig>,
        link_config: LinkConfig,
        reply_tx: Sender<Vec<u8>>,
    ) -> Self {
        Self {
            config,
            link_config,
            reply_tx,
            links: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `peer` to its cached link, creating it on first use.
    ///
    /// Self-targeted and unknown ids fail before any I/O. Creation only
    /// spawns the writer; connecting is fire-and-forget on that thread.
    pub(crate) fn get_or_create(&self, peer: PartyId) -> FabricResult<Arc<Link>> {
        self.config.validate_peer(peer)?;
        let mut links = self.links.lock();
        if let Some(link) = links.get(&peer) {
            return Ok(link.clone());
        }
        let addr = self.config.unicast_addr(peer)?;
        tracing::debug!(peer, %addr, "creating dedicated outbound link");
        let link = Arc::new(Link::spawn(
            peer,
            addr,
            self.link_config.clone(),
            self.reply_tx.clone(),
        )?);
        links.insert(peer, link.clone());
        Ok(link)
    }

    /// Look up an existing link without creating one.
    pub(crate) fn get(&self, peer: PartyId) -> Option<Arc<Link>> {
        self.links.lock().get(&peer).cloned()
    }

    /// Number of established links.
    pub(crate) fn len(&self) -> usize {
        self.links.lock().len()
    }
}
