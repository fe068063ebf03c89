//! # Partyline
//!
//! An N-party TCP communication fabric: a fixed set of numbered parties
//! exchanging opaque byte payloads, as the transport layer beneath a
//! secure multi-party computation protocol.
//!
//! Two components solve the same problem with different trade-offs:
//! - **[`Fabric`]**: identity-addressed unicast with per-peer link
//!   pooling, parallel-threaded fan-out, reply-to-observed-sender, and a
//!   fire-and-forget pub/sub broadcast path. Sends are non-blocking
//!   enqueues; links reconnect internally.
//! - **[`RawTransport`]**: one direct blocking stream per party pair
//!   (lower id listens, higher id connects with bounded retry), raw bytes
//!   with byte counters, fatal-on-error semantics.
//!
//! The peer set is small, fixed, and known at startup: every party can
//! compute every other party's endpoints from the shared
//! [`FabricConfig`]. There is no discovery, no authentication, and no
//! durability beyond the process lifetime.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// Configuration structures and endpoint derivation.
pub mod config;

/// Error types for the messaging fabric.
pub mod error;

/// The unicast/broadcast messaging layer.
pub mod fabric;

/// The raw point-to-point transport.
pub mod raw;

/// Multipart envelope wire format.
pub mod wire;

pub use config::{
    FabricConfig, LinkConfig, PartyId, RawConfig, BROADCAST_PORT_OFFSET, RAW_PORT_OFFSET,
};
pub use error::{FabricError, FabricResult};
pub use fabric::{Fabric, LinkStats};
pub use raw::{RawError, RawResult, RawStream, RawTransport};
pub use wire::{
    encode_addressed, encode_bare, encode_envelope, last_payload, split_addressed,
    try_decode_envelope, WireError, ENVELOPE_HEADER_SIZE, MAX_FRAME_COUNT, MAX_FRAME_SIZE,
};
