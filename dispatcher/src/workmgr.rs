//! Work Manager (C4): assigns inventory-request jobs to ranked peers, awaits
//! responses via the validator, retries on failure or timeout, and reports
//! exhausted requests on a per-query error channel.
//!
//! Not an external library in this codebase — the distilled design assumed
//! one existed, but nothing in this dependency graph provides ranked
//! dispatch with retry, so it's implemented directly here in the style of
//! the codebase's other internal managers.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bitcoincash::hash_types::BlockHash;
use crossbeam_channel as chan;
use log::{debug, warn};

use pbd_common::PeerId;

use crate::error::QueryError;
use crate::peer::{has_fired, PeerHandle, Signal};
use crate::registry::Batch;
use crate::validator::Validator;

/// Default number of attempts before a job is reported as exhausted.
pub const DEFAULT_MAX_RETRIES: usize = 3;
/// Default time a job may remain unanswered by its assigned peer before it
/// is rescheduled to another one.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
/// Consecutive failures after which a peer is skipped for new jobs until its
/// bench cooldown (one `response_timeout`) elapses, or it succeeds sooner.
const FAILURE_THRESHOLD: u32 = 3;

const IDLE_POLL: Duration = Duration::from_millis(100);

/// A unit of work: one inventory batch plus its retry bookkeeping and the
/// error channel of the `query()` call it belongs to.
#[derive(Clone)]
struct Job {
    hashes: Vec<BlockHash>,
    attempts: usize,
    errors: chan::Sender<QueryError>,
}

#[derive(Default, Clone, Copy)]
struct Ranking {
    consecutive_failures: u32,
    /// Set once `consecutive_failures` crosses `FAILURE_THRESHOLD`; the peer
    /// is skipped for new jobs until this instant passes, then gets another
    /// chance regardless of its failure count.
    benched_until: Option<Instant>,
}

impl Ranking {
    fn is_viable(&self) -> bool {
        self.benched_until.map_or(true, |until| Instant::now() >= until)
    }
}

/// Work Manager (C4).
pub struct WorkManager {
    jobs: Mutex<VecDeque<Job>>,
    ranking: Mutex<HashMap<PeerId, Ranking>>,
    max_retries: usize,
    response_timeout: Duration,
    validator: Arc<Validator>,
    shutdown: Signal,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkManager {
    /// Construct a work manager bound to the given validator.
    pub fn new(
        validator: Arc<Validator>,
        max_retries: usize,
        response_timeout: Duration,
        shutdown: Signal,
    ) -> Arc<WorkManager> {
        Arc::new(WorkManager {
            jobs: Mutex::new(VecDeque::new()),
            ranking: Mutex::new(HashMap::new()),
            max_retries,
            response_timeout,
            validator,
            shutdown,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Submit every batch produced by a single `query()` call, sharing one
    /// error channel across them.
    pub fn submit(&self, batches: Vec<Batch>, errors: chan::Sender<QueryError>) {
        let mut jobs = self.jobs.lock().unwrap();
        for batch in batches {
            let hashes = batch
                .invs
                .iter()
                .filter_map(|inv| match inv {
                    bitcoincash::network::message_blockdata::Inventory::Block(h) => Some(*h),
                    bitcoincash::network::message_blockdata::Inventory::WitnessBlock(h) => Some(*h),
                    _ => None,
                })
                .collect();
            jobs.push_back(Job {
                hashes,
                attempts: 0,
                errors: errors.clone(),
            });
        }
    }

    /// Spawn a dedicated worker thread for a newly connected peer. Exits
    /// once the peer disconnects or the dispatcher shuts down.
    pub fn spawn_worker(self: &Arc<Self>, peer: Arc<PeerHandle>) {
        let wm = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let handle = thread::spawn(move || wm.run_worker(peer, shutdown));
        self.workers.lock().unwrap().push(handle);
    }

    /// Block until every spawned worker thread has exited. Called by
    /// `Stop`.
    pub fn join(&self) {
        let handles = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn run_worker(&self, peer: Arc<PeerHandle>, shutdown: Signal) {
        let messages = peer.subscribe_recv();
        loop {
            if has_fired(&shutdown) || has_fired(peer.disconnect()) {
                break;
            }
            if !self.is_viable(&peer.id) {
                thread::sleep(IDLE_POLL);
                continue;
            }
            let mut job = match self.jobs.lock().unwrap().pop_front() {
                Some(job) => job,
                None => {
                    thread::sleep(IDLE_POLL);
                    continue;
                }
            };

            let invs: Vec<_> = job
                .hashes
                .iter()
                .map(|h| bitcoincash::network::message_blockdata::Inventory::Block(*h))
                .collect();
            if peer.send_getdata(invs).is_err() {
                self.record_failure(&peer.id);
                self.requeue(job);
                continue;
            }

            let finished = self.drive_job(&job, &peer, &messages, &shutdown);
            if finished {
                self.record_success(&peer.id);
                continue;
            }

            self.record_failure(&peer.id);
            job.attempts += 1;
            if job.attempts >= self.max_retries {
                debug!(target: "dispatcher::workmgr", "request exhausted after {} attempts", job.attempts);
                let _ = job.errors.send(QueryError::Exhausted {
                    attempts: job.attempts,
                });
            } else {
                self.requeue(job);
            }
        }
    }

    /// Drive a single job to completion against one peer: feed every
    /// message it sends to the validator until the request finishes, times
    /// out, or the peer disconnects.
    fn drive_job(
        &self,
        job: &Job,
        peer: &Arc<PeerHandle>,
        messages: &chan::Receiver<crate::wire::Message>,
        shutdown: &Signal,
    ) -> bool {
        let deadline = Instant::now() + self.response_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(target: "dispatcher::workmgr", "{}: response timeout", peer.id);
                return false;
            }
            chan::select! {
                recv(messages) -> msg => match msg {
                    Ok(msg) => {
                        let progress = self.validator.handle_resp(&job.hashes, &msg, &peer.id);
                        if progress.finished {
                            return true;
                        }
                    }
                    Err(_) => return false,
                },
                recv(shutdown) -> _ => return false,
                recv(peer.disconnect()) -> _ => return false,
                default(remaining) => return false,
            }
        }
    }

    fn requeue(&self, job: Job) {
        self.jobs.lock().unwrap().push_back(job);
    }

    fn is_viable(&self, id: &PeerId) -> bool {
        self.ranking
            .lock()
            .unwrap()
            .get(id)
            .map(Ranking::is_viable)
            .unwrap_or(true)
    }

    fn record_success(&self, id: &PeerId) {
        let mut ranking = self.ranking.lock().unwrap();
        let entry = ranking.entry(id.clone()).or_default();
        entry.consecutive_failures = 0;
        entry.benched_until = None;
    }

    fn record_failure(&self, id: &PeerId) {
        let mut ranking = self.ranking.lock().unwrap();
        let entry = ranking.entry(id.clone()).or_default();
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= FAILURE_THRESHOLD {
            entry.benched_until = Some(Instant::now() + self.response_timeout);
            warn!(target: "dispatcher::workmgr", "{}: benched for {:?} after {} consecutive failures", id, self.response_timeout, entry.consecutive_failures);
        }
    }
}
