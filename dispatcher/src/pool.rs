//! Peer Pool (C2): maintains up to `target` connected peer handles by
//! periodically polling the backend for candidates, filtering by
//! eligibility, dialing, and tracking a permanent ban-set.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel as chan;
use log::{debug, info, warn};

use pbd_common::{AdjustedClock, PeerDescriptor, PeerId};

use crate::peer::{has_fired, PeerHandle, Signal};
use crate::wire::{Dial, GetPeers};

/// Default interval between connection-maintenance passes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
/// Default time to wait for a freshly dialed peer to complete its handshake.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(15);

struct State {
    connected: HashMap<PeerId, Arc<PeerHandle>>,
    banned: HashSet<PeerId>,
}

/// Peer Pool (C2).
pub struct Pool {
    state: Mutex<State>,
    target: usize,
    dial: Dial,
    get_peers: GetPeers,
    ready_timeout: Duration,
    refresh_interval: Duration,
    clock: Arc<dyn AdjustedClock>,
    shutdown: Signal,
    announce: chan::Sender<Arc<PeerHandle>>,
    peer_threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Pool {
    /// Construct the pool. Returns the pool and the channel on which newly
    /// connected peers are announced to the work manager (one handle per
    /// connection event, per invariant 6).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        target: usize,
        dial: Dial,
        get_peers: GetPeers,
        ready_timeout: Duration,
        refresh_interval: Duration,
        clock: Arc<dyn AdjustedClock>,
        shutdown: Signal,
    ) -> (Arc<Pool>, chan::Receiver<Arc<PeerHandle>>) {
        let (announce, announced) = chan::unbounded();
        let pool = Arc::new(Pool {
            state: Mutex::new(State {
                connected: HashMap::new(),
                banned: HashSet::new(),
            }),
            target,
            dial,
            get_peers,
            ready_timeout,
            refresh_interval,
            clock,
            shutdown,
            peer_threads: Mutex::new(Vec::new()),
        });
        (pool, announced)
    }

    /// Number of currently connected peers.
    pub fn connected_len(&self) -> usize {
        self.state.lock().unwrap().connected.len()
    }

    /// Spawn the long-lived refresh task: an initial connection pass,
    /// followed by a tick-driven pass whenever below target.
    pub fn spawn(self: &Arc<Self>) -> thread::JoinHandle<()> {
        let pool = Arc::clone(self);
        thread::spawn(move || {
            pool.connection_pass();
            let ticker = chan::tick(pool.refresh_interval);
            loop {
                chan::select! {
                    recv(ticker) -> _ => {
                        if pool.connected_len() < pool.target {
                            pool.connection_pass();
                        }
                    }
                    default(Duration::from_millis(200)) => {}
                }
                if has_fired(&pool.shutdown) {
                    debug!(target: "dispatcher::pool", "refresh task exiting on shutdown");
                    break;
                }
            }
        })
    }

    fn connection_pass(self: &Arc<Self>) {
        let candidates = match (self.get_peers)() {
            Ok(peers) => peers,
            Err(err) => {
                warn!(target: "dispatcher::pool", "getpeers failed: {}", err);
                return;
            }
        };

        let mut eligible: Vec<PeerDescriptor> =
            candidates.into_iter().filter(|c| c.is_eligible()).collect();
        fastrand::shuffle(&mut eligible);

        for candidate in eligible {
            if has_fired(&self.shutdown) {
                debug!(target: "dispatcher::pool", "connection pass aborted on shutdown");
                return;
            }
            if self.connected_len() >= self.target {
                return;
            }
            {
                let state = self.state.lock().unwrap();
                if state.banned.contains(&candidate.address) || state.connected.contains_key(&candidate.address)
                {
                    continue;
                }
            }

            debug!(target: "dispatcher::pool", "dialing {}", candidate.address);
            let conn = match (self.dial)(&candidate.address) {
                Ok(conn) => conn,
                Err(err) => {
                    debug!(target: "dispatcher::pool", "dial {} failed: {}", candidate.address, err);
                    continue;
                }
            };

            let address = candidate.address.clone();
            let pool_for_cleanup = Arc::clone(self);
            let (handle, join_handle) = PeerHandle::spawn(
                address.clone(),
                conn,
                Arc::clone(&self.clock),
                self.shutdown.clone(),
                move |id| {
                    // Runs on the peer's own thread once its read loop ends.
                    // A banned peer has already been removed by `ban`; this
                    // is a no-op in that case.
                    pool_for_cleanup.forget(id);
                },
            );
            let handle = Arc::new(handle);
            self.peer_threads.lock().unwrap().push(join_handle);

            match wait_ready_or_shutdown(handle.ready(), handle.disconnect(), &self.shutdown, self.ready_timeout) {
                WaitOutcome::Ready => {}
                WaitOutcome::Failed => {
                    debug!(target: "dispatcher::pool", "{}: handshake failed", address);
                    handle.kill();
                    continue;
                }
                WaitOutcome::Timeout => {
                    debug!(target: "dispatcher::pool", "{}: ready timeout", address);
                    handle.kill();
                    continue;
                }
                WaitOutcome::Shutdown => return,
            }

            if self.announce.send(Arc::clone(&handle)).is_err() {
                return;
            }
            self.state
                .lock()
                .unwrap()
                .connected
                .insert(address.clone(), handle);
            info!(target: "dispatcher::pool", "{}: connected ({}/{})", address, self.connected_len(), self.target);
        }
    }

    /// Remove a disconnected peer from `connected`. Called once its
    /// `disconnect` signal has fired.
    pub fn forget(&self, id: &PeerId) {
        self.state.lock().unwrap().connected.remove(id);
    }

    /// Permanently ban a peer: disconnects it and ensures the pool never
    /// redials it for the lifetime of this process.
    pub fn ban(&self, id: &PeerId) {
        let handle = {
            let mut state = self.state.lock().unwrap();
            state.banned.insert(id.clone());
            state.connected.remove(id)
        };
        if let Some(handle) = handle {
            warn!(target: "dispatcher::pool", "{}: banned", id);
            handle.kill();
        }
    }

    /// Join every peer thread spawned so far. Called once the dispatcher is
    /// stopping, after `shutdown` has fired, so each thread's read loop has
    /// already observed it and is winding down.
    pub fn join_peers(&self) {
        let handles = std::mem::take(&mut *self.peer_threads.lock().unwrap());
        for handle in handles {
            let _ = handle.join();
        }
    }
}

enum WaitOutcome {
    Ready,
    /// The peer thread's `disconnect` fired before `ready` did — the
    /// handshake failed (or the connection dropped) before completing.
    Failed,
    Timeout,
    Shutdown,
}

fn wait_ready_or_shutdown(ready: &Signal, disconnect: &Signal, shutdown: &Signal, timeout: Duration) -> WaitOutcome {
    let deadline = chan::after(timeout);
    chan::select! {
        recv(ready) -> _ => WaitOutcome::Ready,
        recv(disconnect) -> _ => WaitOutcome::Failed,
        recv(shutdown) -> _ => WaitOutcome::Shutdown,
        recv(deadline) -> _ => WaitOutcome::Timeout,
    }
}
