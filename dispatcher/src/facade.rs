//! Dispatcher Facade (C6): the externally visible object that owns the
//! peer pool, request registry, and work manager, and wires shutdown across
//! them.

use std::sync::{Arc, Mutex};
use std::thread;

use bitcoincash::blockdata::block::Block;
use bitcoincash::hash_types::BlockHash;
use crossbeam_channel as chan;
use log::info;

use crate::config::Config;
use crate::error::{Error, QueryError};
use crate::peer::{PeerHandle, Signal, SignalSource};
use crate::pool::Pool;
use crate::registry::Registry;
use crate::validator::Validator;
use crate::workmgr::WorkManager;

/// The pruned block dispatcher.
pub struct Dispatcher {
    registry: Arc<Registry>,
    pool: Arc<Pool>,
    workmgr: Arc<WorkManager>,
    announced: chan::Receiver<Arc<PeerHandle>>,
    shutdown_src: Mutex<Option<SignalSource>>,
    shutdown: Signal,
    pool_task: Mutex<Option<thread::JoinHandle<()>>>,
    announce_task: Mutex<Option<thread::JoinHandle<()>>>,
    num_target_peers: usize,
}

impl Dispatcher {
    /// Validate `config` and construct the dispatcher. Performs no I/O;
    /// nothing is dialed until [`Dispatcher::start`].
    pub fn new(config: Config) -> Result<Dispatcher, Error> {
        config.validate()?;

        let (shutdown_src, shutdown) = SignalSource::new();
        let clock = crate::config::clock_from_config();

        let (pool, announced) = Pool::new(
            config.num_target_peers,
            Arc::clone(&config.dial),
            Arc::clone(&config.get_peers),
            config.peer_ready_timeout,
            config.refresh_interval,
            Arc::clone(&clock),
            shutdown.clone(),
        );

        let registry = Arc::new(Registry::new(config.max_request_invs));
        let validator = Validator::new(
            Arc::clone(&registry),
            Arc::clone(&pool),
            clock,
            config.chain.pow_limit,
        );
        let workmgr = WorkManager::new(
            validator,
            config.max_retries,
            config.response_timeout,
            shutdown.clone(),
        );

        Ok(Dispatcher {
            registry,
            pool,
            workmgr,
            announced,
            shutdown_src: Mutex::new(Some(shutdown_src)),
            shutdown,
            pool_task: Mutex::new(None),
            announce_task: Mutex::new(None),
            num_target_peers: config.num_target_peers,
        })
    }

    /// Start the pool's connection-maintenance task and begin handing newly
    /// connected peers to the work manager.
    pub fn start(&self) {
        info!(target: "dispatcher", "starting (target {} peers)", self.num_target_peers);
        *self.pool_task.lock().unwrap() = Some(self.pool.spawn());

        let workmgr = Arc::clone(&self.workmgr);
        let announced = self.announced.clone();
        let shutdown = self.shutdown.clone();
        let handle = thread::spawn(move || loop {
            chan::select! {
                recv(announced) -> peer => match peer {
                    Ok(peer) => workmgr.spawn_worker(peer),
                    Err(_) => break,
                },
                recv(shutdown) -> _ => break,
            }
        });
        *self.announce_task.lock().unwrap() = Some(handle);
    }

    /// Close the shutdown signal and wait for every spawned task to exit.
    pub fn stop(&self) {
        info!(target: "dispatcher", "stopping");
        self.shutdown_src.lock().unwrap().take();
        if let Some(handle) = self.pool_task.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.announce_task.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.workmgr.join();
        self.pool.join_peers();
    }

    /// Request a set of block hashes from the network. Returns a delivery
    /// channel buffered to hold every requested block, and an error channel
    /// reporting per-request exhaustion — `None` if every hash was already
    /// in flight from a prior caller, in which case no new error channel is
    /// created.
    pub fn query(
        &self,
        hashes: Vec<BlockHash>,
    ) -> (chan::Receiver<Block>, Option<chan::Receiver<QueryError>>) {
        let (batches, blocks) = self.registry.new_request(&hashes);
        if batches.is_empty() {
            return (blocks, None);
        }
        let (errors_tx, errors_rx) = chan::unbounded();
        self.workmgr.submit(batches, errors_tx);
        (blocks, Some(errors_rx))
    }

    /// Number of peers currently connected.
    pub fn connected_peers(&self) -> usize {
        self.pool.connected_len()
    }
}
