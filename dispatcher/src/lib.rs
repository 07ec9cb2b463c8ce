//! Fetches historical full blocks from the peer-to-peer network on behalf
//! of a wallet whose trusted backend node has pruned them.
//!
//! The backend exposes its currently connected peer set but cannot serve
//! blocks itself; this crate dials a bounded subset of those peers
//! directly, negotiates the handshake, multiplexes incoming `Query` calls
//! onto them, validates responses, and bans peers that misbehave.
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod facade;
pub mod peer;
pub mod pool;
pub mod registry;
pub mod validator;
pub mod wire;
pub mod workmgr;

pub use config::{ChainParams, Config};
pub use error::{BackendError, ConfigError, DialError, Error, QueryError};
pub use facade::Dispatcher;
pub use wire::{Connection, Dial, GetPeers, Message};
