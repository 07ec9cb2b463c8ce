//! Dispatcher configuration.

use std::sync::Arc;
use std::time::Duration;

use bitcoincash::consensus::params::Params;
use bitcoincash::network::constants::Network;
use bitcoincash::util::uint::Uint256;

use crate::error::ConfigError;
use crate::pool::{DEFAULT_READY_TIMEOUT, DEFAULT_REFRESH_INTERVAL};
use crate::wire::{Dial, GetPeers};
use crate::workmgr::{DEFAULT_MAX_RETRIES, DEFAULT_RESPONSE_TIMEOUT};

/// Protocol's maximum inventory entries per `getdata`/`inv` message.
pub const MAX_INV_PER_MSG: usize = 50_000;

/// Chain parameters relevant to block sanity validation.
#[derive(Clone)]
pub struct ChainParams {
    /// Network identity (mainnet/testnet/regtest/...).
    pub network: Network,
    /// Minimum-difficulty proof-of-work target for this chain.
    pub pow_limit: Uint256,
}

impl ChainParams {
    /// Parameters for a given network, using its well-known PoW limit.
    pub fn for_network(network: Network) -> ChainParams {
        let params = Params::new(network);
        ChainParams {
            network,
            pow_limit: params.pow_limit,
        }
    }
}

/// Dispatcher configuration (§12). Every optional field has a default;
/// required fields are validated in [`crate::Dispatcher::new`].
#[derive(Clone)]
pub struct Config {
    /// Chain parameters used by block sanity validation.
    pub chain: ChainParams,
    /// Number of peers the pool tries to keep connected.
    pub num_target_peers: usize,
    /// Establishes a connection to a candidate address.
    pub dial: Dial,
    /// Retrieves the backend's current peer list.
    pub get_peers: GetPeers,
    /// How long to wait for a freshly dialed peer's handshake.
    pub peer_ready_timeout: Duration,
    /// Interval between pool connection-maintenance passes.
    pub refresh_interval: Duration,
    /// Disables self-connection rejection; test-only.
    pub allow_self_conns: bool,
    /// Maximum inventory entries per emitted request batch.
    pub max_request_invs: usize,
    /// Attempts before a request is reported exhausted.
    pub max_retries: usize,
    /// How long a job may go unanswered by its assigned peer.
    pub response_timeout: Duration,
}

impl Config {
    /// Construct a config with every optional field at its default, given
    /// the two collaborators the embedder must supply.
    pub fn new(chain: ChainParams, dial: Dial, get_peers: GetPeers) -> Config {
        Config {
            chain,
            num_target_peers: 8,
            dial,
            get_peers,
            peer_ready_timeout: DEFAULT_READY_TIMEOUT,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            allow_self_conns: false,
            max_request_invs: MAX_INV_PER_MSG,
            max_retries: DEFAULT_MAX_RETRIES,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.num_target_peers == 0 {
            return Err(ConfigError::NoTargetPeers);
        }
        if self.max_request_invs > MAX_INV_PER_MSG {
            return Err(ConfigError::RequestBatchTooLarge(
                self.max_request_invs,
                MAX_INV_PER_MSG,
            ));
        }
        Ok(())
    }
}

pub(crate) fn clock_from_config() -> Arc<dyn pbd_common::AdjustedClock> {
    Arc::new(pbd_common::MedianTime::new())
}
