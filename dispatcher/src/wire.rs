//! The transport abstraction the dispatcher is built against: a [`Connection`]
//! trait wrapping a single peer-to-peer link, and the [`Dial`]/[`GetPeers`]
//! collaborator functions used to obtain one. The concrete message and
//! inventory types come from the `bitcoincash` wire-format crate; the
//! dispatcher never constructs sockets or codecs itself.

use std::sync::Arc;
use std::time::Duration;

use bitcoincash::blockdata::block::Block;
use bitcoincash::network::message_blockdata::Inventory;

use pbd_common::PeerDescriptor;

use crate::error::{BackendError, DialError};

/// A message relevant to the dispatcher, already filtered by the
/// connection's read path. Handshake messages (`version`/`verack`) are
/// consumed internally by [`Connection::handshake`] and never surface here;
/// anything else the protocol defines is logged and dropped by the
/// implementation before it reaches this type.
#[derive(Debug, Clone)]
pub enum Message {
    /// A full block, sent in response to a `getdata` inventory request.
    Block(Block),
}

/// One live connection to a peer.
///
/// Implementations own the socket and the protocol codec. Supplied by the
/// embedder — typically a thin adapter around the wire crate's own
/// connection/reactor type — so the dispatcher is agnostic to the transport.
pub trait Connection: Send {
    /// Performs the handshake with relay-transactions disabled. Invokes
    /// `on_version` once with the peer's advertised Unix timestamp as soon
    /// as its version message is seen. Blocks until the peer's version-ack
    /// is received or the handshake fails.
    fn handshake(&mut self, on_version: &mut dyn FnMut(i64)) -> Result<(), DialError>;

    /// Sends an inventory request (`getdata`) for the given entries.
    fn send_getdata(&mut self, invs: &[Inventory]) -> Result<(), DialError>;

    /// Waits up to `timeout` for the next dispatcher-relevant message.
    /// Returns `Ok(None)` on a plain timeout (nothing arrived yet, the
    /// connection is still open) so the owning thread can interleave
    /// outbound sends; returns `Err(DialError::Closed)` once the connection
    /// has ended.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Message>, DialError>;

    /// Tears down the connection. Called once, after the read loop ends.
    fn close(&mut self);
}

/// Establishes a connection to `address`. Must accept any address form the
/// backend may report, including onion/overlay addresses that don't parse
/// as a [`std::net::SocketAddr`]; a single dial failure aborts only this
/// connection attempt.
pub type Dial = Arc<dyn Fn(&str) -> Result<Box<dyn Connection>, DialError> + Send + Sync>;

/// Retrieves the backend's current list of connected peer candidates.
pub type GetPeers = Arc<dyn Fn() -> Result<Vec<PeerDescriptor>, BackendError> + Send + Sync>;
