//! A real, demo-grade [`Connection`] over a raw TCP socket: the adapter the
//! dispatcher's `wire` module documents as "typically a thin wrapper around
//! the wire crate's own connection type." Performs the version/verack
//! handshake and translates inbound `block`/`ping` messages; everything else
//! the protocol defines is logged and dropped.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bitcoincash::consensus::encode::{self, Decodable};
use bitcoincash::network::constants::{Network, ServiceFlags};
use bitcoincash::network::message::{NetworkMessage, RawNetworkMessage};
use bitcoincash::network::message_blockdata::Inventory;
use bitcoincash::network::message_network::VersionMessage;
use bitcoincash::network::Address;
use log::{debug, trace};
use pbd_dispatcher::error::DialError;
use pbd_dispatcher::wire::{Connection, Message};

const USER_AGENT: &str = "/pbd-node:0.1.0/";

/// A connected TCP socket to a single peer, on a given network.
pub struct TcpConnection {
    addr: String,
    network: Network,
    stream: TcpStream,
    nonce: u64,
    allow_self_conns: bool,
}

impl TcpConnection {
    /// Dial `addr` (an `ip:port` pair) on `network`. Connect-only; the
    /// handshake happens separately so it can run on the dispatcher's own
    /// peer thread and honor `on_version`.
    pub fn connect(addr: &str, network: Network, allow_self_conns: bool) -> Result<TcpConnection, DialError> {
        let socket: SocketAddr = addr
            .parse()
            .map_err(|e| DialError::ConnectionFailed(addr.to_string(), format!("bad address: {e}")))?;
        let stream = TcpStream::connect_timeout(&socket, Duration::from_secs(10))
            .map_err(|e| DialError::ConnectionFailed(addr.to_string(), e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| DialError::ConnectionFailed(addr.to_string(), e.to_string()))?;
        Ok(TcpConnection {
            addr: addr.to_string(),
            network,
            stream,
            nonce: fastrand::u64(..),
            allow_self_conns,
        })
    }

    fn write_message(&mut self, payload: NetworkMessage) -> Result<(), DialError> {
        let raw = RawNetworkMessage {
            magic: self.network.magic(),
            payload,
        };
        let bytes = encode::serialize(&raw);
        self.stream
            .write_all(&bytes)
            .map_err(|e| DialError::ConnectionFailed(self.addr.clone(), e.to_string()))
    }

    /// Read one framed message, honoring `timeout`. `Ok(None)` means nothing
    /// arrived before the deadline and the socket is still open.
    fn read_message(&mut self, timeout: Duration) -> Result<Option<NetworkMessage>, DialError> {
        self.stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| DialError::Closed(self.addr.clone(), e.to_string()))?;
        match RawNetworkMessage::consensus_decode(&mut self.stream) {
            Ok(raw) => Ok(Some(raw.payload)),
            Err(encode::Error::Io(ref e))
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(encode::Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(DialError::Closed(self.addr.clone(), "peer closed connection".into()))
            }
            Err(err) => Err(DialError::Closed(self.addr.clone(), err.to_string())),
        }
    }

    fn version_message(&self) -> VersionMessage {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        let no_addr = Address::new(&"0.0.0.0:0".parse().unwrap(), ServiceFlags::NONE);
        VersionMessage::new(
            ServiceFlags::NONE,
            now,
            no_addr.clone(),
            no_addr,
            self.nonce,
            USER_AGENT.to_string(),
            0,
        )
    }
}

impl Connection for TcpConnection {
    fn handshake(&mut self, on_version: &mut dyn FnMut(i64)) -> Result<(), DialError> {
        self.write_message(NetworkMessage::Version(self.version_message()))?;

        let mut got_version = false;
        let mut sent_verack = false;
        let mut got_verack = false;
        let deadline = std::time::Instant::now() + Duration::from_secs(15);

        while !(got_verack && sent_verack) {
            if std::time::Instant::now() >= deadline {
                return Err(DialError::HandshakeTimeout(self.addr.clone()));
            }
            match self.read_message(Duration::from_secs(5))? {
                Some(NetworkMessage::Version(version)) if !got_version => {
                    if version.nonce == self.nonce && !self.allow_self_conns {
                        return Err(DialError::SelfConnection(self.addr.clone()));
                    }
                    got_version = true;
                    on_version(version.timestamp);
                    self.write_message(NetworkMessage::Verack)?;
                    sent_verack = true;
                }
                Some(NetworkMessage::Verack) => got_verack = true,
                Some(_) => continue,
                None => continue,
            }
        }
        debug!(target: "node::tcp", "{}: handshake complete", self.addr);
        Ok(())
    }

    fn send_getdata(&mut self, invs: &[Inventory]) -> Result<(), DialError> {
        self.write_message(NetworkMessage::GetData(invs.to_vec()))
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Message>, DialError> {
        match self.read_message(timeout)? {
            Some(NetworkMessage::Block(block)) => Ok(Some(Message::Block(block))),
            Some(NetworkMessage::Ping(nonce)) => {
                self.write_message(NetworkMessage::Pong(nonce))?;
                Ok(None)
            }
            Some(other) => {
                trace!(target: "node::tcp", "{}: ignoring {:?}", self.addr, other);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
