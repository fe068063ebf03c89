//! Error types for the messaging fabric.

use std::io;

use crate::config::PartyId;
use crate::wire::WireError;

/// Errors that can occur in the messaging layer.
///
/// Configuration errors (`SelfTarget`, `UnknownParty`, `EndpointOverflow`,
/// `InvalidConfig`) are rejected before any I/O is attempted. Timeouts are
/// not errors; receive operations report them as `Ok(None)`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FabricError {
    /// A send or connect targeted this party's own id.
    #[error("cannot target own party id {id}")]
    SelfTarget {
        /// The offending party id (equal to the fabric's own id).
        id: PartyId,
    },

    /// The party id is not in the configured party set.
    #[error("party {id} is not in the configured party set")]
    UnknownParty {
        /// The unknown party id.
        id: PartyId,
    },

    /// The derived endpoint port does not fit in a TCP port number.
    #[error("endpoint port overflows for party {id}")]
    EndpointOverflow {
        /// The party id whose endpoint could not be derived.
        id: PartyId,
    },

    /// The party set itself is malformed.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Details about what is wrong with the configuration.
        message: String,
    },

    /// The operation requires a socket that has not been set up yet.
    #[error("not ready: {message}")]
    NotReady {
        /// Which bootstrap step is missing.
        message: String,
    },

    /// The outbound queue rejected the send within the enqueue timeout.
    #[error("outbound queue full: capacity {capacity}")]
    QueueFull {
        /// Maximum capacity of the queue.
        capacity: usize,
    },

    /// The link's writer gave up after exhausting its failure budget.
    #[error("link to party {peer} is down")]
    LinkDown {
        /// The peer whose link is dead.
        peer: PartyId,
    },

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// Envelope encoding or decoding failed.
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl From<io::Error> for FabricError {
    fn from(error: io::Error) -> Self {
        FabricError::Io(error.to_string())
    }
}

/// Result type for messaging-layer operations.
pub type FabricResult<T> = Result<T, FabricError>;
