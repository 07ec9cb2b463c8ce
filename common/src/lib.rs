//! Shared types for the pruned block dispatcher workspace: peer descriptors,
//! the service-flags eligibility filter, and the network-adjusted clock.
#![warn(missing_docs)]

pub mod peer;
pub mod time;

pub use bitcoincash as bitcoin;
pub use bitcoin::hash_types::BlockHash;

pub use peer::{PeerDescriptor, ServiceFlags};
pub use time::{AdjustedClock, Clock, MedianTime};

/// Identifies a peer by the address string the backend reported it under.
/// A plain string (rather than [`std::net::SocketAddr`]) because the
/// backend's connection list may include overlay addresses (Tor, I2P, ...)
/// that don't parse as one.
pub type PeerId = String;
