//! Demo binary for the pruned block dispatcher.
//!
//! The backend RPC client that lists connected peers is out of scope for the
//! dispatcher crate itself; here it's stood in for by a static `--peer` list
//! supplied on the command line, each entry `address[/services]` where
//! `services` is the hex-encoded service-flags bitfield (defaults to
//! advertising full, witness-serving, unpruned: `0x0409`).

mod tcp;

use std::sync::Arc;
use std::time::Duration;

use argh::FromArgs;
use bitcoincash::hash_types::BlockHash;
use bitcoincash::network::constants::Network;
use pbd_common::{PeerDescriptor, ServiceFlags};
use pbd_dispatcher::error::{BackendError, DialError};
use pbd_dispatcher::{ChainParams, Config, Connection, Dispatcher};

/// Fetch historical full blocks directly from the peer-to-peer network on
/// behalf of a backend that has pruned them.
#[derive(FromArgs)]
struct Args {
    /// candidate peer, `address[/hex-service-flags]`; repeatable
    #[argh(option, long = "peer")]
    peers: Vec<String>,

    /// network to connect on: main, test, regtest (default: main)
    #[argh(option, default = "\"main\".to_string()")]
    network: String,

    /// number of peers the pool tries to keep connected
    #[argh(option, default = "8")]
    num_target_peers: usize,

    /// maximum inventory entries per outbound request batch
    #[argh(option, default = "50_000")]
    max_request_invs: usize,

    /// seconds to wait for a freshly dialed peer's handshake
    #[argh(option, default = "15")]
    peer_ready_timeout: u64,

    /// seconds between pool connection-maintenance passes
    #[argh(option, default = "30")]
    refresh_interval: u64,

    /// don't reject connecting to ourselves; test-only
    #[argh(switch)]
    allow_self_conns: bool,

    /// block hashes to fetch, hex-encoded; repeatable
    #[argh(option, long = "fetch")]
    fetch: Vec<String>,
}

fn parse_network(s: &str) -> Network {
    match s {
        "test" | "testnet" => Network::Testnet,
        "regtest" => Network::Regtest,
        _ => Network::Bitcoin,
    }
}

fn parse_peer(spec: &str) -> PeerDescriptor {
    match spec.split_once('/') {
        Some((address, flags)) => PeerDescriptor {
            address: address.to_string(),
            services: flags.parse().unwrap_or(PeerDescriptor::REQUIRED),
        },
        None => PeerDescriptor {
            address: spec.to_string(),
            services: PeerDescriptor::REQUIRED,
        },
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Args = argh::from_env();
    let network = parse_network(&args.network);
    let peers: Vec<PeerDescriptor> = args.peers.iter().map(|s| parse_peer(s)).collect();

    let allow_self_conns = args.allow_self_conns;
    let dial = Arc::new(move |address: &str| -> Result<Box<dyn Connection>, DialError> {
        tcp::TcpConnection::connect(address, network, allow_self_conns).map(|c| Box::new(c) as Box<dyn Connection>)
    });

    let get_peers = {
        let peers = peers.clone();
        Arc::new(move || -> Result<Vec<PeerDescriptor>, BackendError> { Ok(peers.clone()) })
    };

    let mut config = Config::new(ChainParams::for_network(network), dial, get_peers);
    config.num_target_peers = args.num_target_peers;
    config.max_request_invs = args.max_request_invs;
    config.peer_ready_timeout = Duration::from_secs(args.peer_ready_timeout);
    config.refresh_interval = Duration::from_secs(args.refresh_interval);
    config.allow_self_conns = args.allow_self_conns;

    let dispatcher = match Dispatcher::new(config) {
        Ok(dispatcher) => dispatcher,
        Err(err) => {
            log::error!("invalid configuration: {err}");
            std::process::exit(1);
        }
    };
    dispatcher.start();

    if args.fetch.is_empty() {
        log::info!("no --fetch hashes given; running until interrupted");
        loop {
            std::thread::sleep(Duration::from_secs(3600));
        }
    }

    let hashes: Vec<BlockHash> = args
        .fetch
        .iter()
        .filter_map(|hex| {
            hex.parse().ok().or_else(|| {
                log::error!("skipping unparseable block hash {hex:?}");
                None
            })
        })
        .collect();

    let (blocks, errors) = dispatcher.query(hashes.clone());
    let errors = errors.unwrap_or_else(crossbeam_channel::never);
    let mut remaining = hashes.len();
    while remaining > 0 {
        crossbeam_channel::select! {
            recv(blocks) -> block => match block {
                Ok(block) => {
                    log::info!("received block {}", block.block_hash());
                    remaining -= 1;
                }
                Err(_) => break,
            },
            recv(errors) -> err => match err {
                Ok(err) => {
                    log::error!("query failed: {err}");
                    remaining -= 1;
                }
                Err(_) => break,
            },
        }
    }

    dispatcher.stop();
}
