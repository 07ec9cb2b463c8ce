//! Peer descriptors as reported by the backend, and the eligibility filter
//! used to decide which of them are worth dialing.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use thiserror::Error;

/// Bits of the peer-to-peer service-flags bitfield that the dispatcher cares
/// about.
///
/// The backend reports this as an opaque hex-encoded 64-bit big-endian
/// integer; we only ever inspect three bits of it. Other bits are preserved
/// but ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceFlags(u64);

impl ServiceFlags {
    /// Peer serves full (unpruned) blocks.
    pub const NETWORK: ServiceFlags = ServiceFlags(1 << 0);
    /// Peer serves witness-bearing blocks (BIP 144).
    pub const WITNESS: ServiceFlags = ServiceFlags(1 << 3);
    /// Peer has pruned historical blocks and can only serve recent ones.
    pub const PRUNED: ServiceFlags = ServiceFlags(1 << 11);

    /// Construct from the raw bitfield.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bitfield value.
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// True if `self` has every bit set that `other` has set.
    pub const fn has(self, other: ServiceFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if `self` and `other` share no set bits.
    pub const fn disjoint(self, other: ServiceFlags) -> bool {
        self.0 & other.0 == 0
    }
}

impl std::ops::BitOr for ServiceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for ServiceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

/// Error parsing a peer descriptor's hex-encoded service-flag field.
#[derive(Debug, Error)]
#[error("invalid service-flags hex string {0:?}")]
pub struct ParseServiceFlagsError(String);

impl FromStr for ServiceFlags {
    type Err = ParseServiceFlagsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        u64::from_str_radix(digits, 16)
            .map(ServiceFlags)
            .map_err(|_| ParseServiceFlagsError(s.to_owned()))
    }
}

/// A peer candidate as reported by the trusted backend's peer list.
///
/// Only `address` and `services` are inspected by the dispatcher; other
/// fields the backend may return (ping time, user agent, ...) aren't modeled
/// here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDescriptor {
    /// Network address, in whatever form the injected `Dial` function
    /// understands (including onion/overlay addresses that don't parse as a
    /// [`SocketAddr`]).
    pub address: String,
    /// Advertised service-flag bitfield.
    pub services: ServiceFlags,
}

impl PeerDescriptor {
    /// Services a candidate must advertise to be worth dialing: it must
    /// serve full, witness-bearing blocks.
    pub const REQUIRED: ServiceFlags = ServiceFlags(ServiceFlags::NETWORK.0 | ServiceFlags::WITNESS.0);

    /// Whether this candidate is eligible for historical block fetching: it
    /// advertises [`Self::REQUIRED`] and does not advertise
    /// [`ServiceFlags::PRUNED`].
    pub fn is_eligible(&self) -> bool {
        self.services.has(Self::REQUIRED) && self.services.disjoint(ServiceFlags::PRUNED)
    }
}

/// Parse a peer's socket address, where possible. Addresses the transport
/// doesn't recognize as an `ip:port` pair (onion, i2p, ...) are passed
/// through to `Dial` untouched and this returns `None`.
pub fn parse_socket_addr(address: &str) -> Option<SocketAddr> {
    address.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(services: u64) -> PeerDescriptor {
        PeerDescriptor {
            address: "203.0.113.1:8333".into(),
            services: ServiceFlags::from_bits(services),
        }
    }

    #[test]
    fn eligibility_filter() {
        // NETWORK | WITNESS | some other bit: eligible.
        assert!(candidate(0x0409).is_eligible());
        // NETWORK only: missing WITNESS.
        assert!(!candidate(0x0001).is_eligible());
        // NETWORK | PRUNED: pruned disqualifies outright.
        assert!(!candidate(0x0801).is_eligible());
        // NETWORK | WITNESS | PRUNED | other: pruned still disqualifies.
        assert!(!candidate(0x0409 | 0x0800).is_eligible());
    }

    #[test]
    fn parses_hex_service_flags() {
        assert_eq!("0409".parse::<ServiceFlags>().unwrap().bits(), 0x0409);
        assert_eq!("0x0409".parse::<ServiceFlags>().unwrap().bits(), 0x0409);
        assert!("not-hex".parse::<ServiceFlags>().is_err());
    }
}
