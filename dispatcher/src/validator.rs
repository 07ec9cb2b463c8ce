//! Response Validator (C5): decides whether an inbound message satisfies an
//! outstanding request, sanity-checks the block, bans the peer on invalid
//! input, and fans the validated block out to every waiting caller.

use std::sync::Arc;
use std::thread;

use bitcoincash::blockdata::block::Block;
use bitcoincash::blockdata::constants::MAX_BLOCK_WEIGHT;
use bitcoincash::hash_types::BlockHash;
use bitcoincash::util::uint::Uint256;
use log::{debug, trace};

use pbd_common::{AdjustedClock, PeerId};

use crate::pool::Pool;
use crate::registry::Registry;
use crate::wire::Message;

/// Maximum plausible future drift, in seconds, a block's timestamp may sit
/// ahead of the network-adjusted clock before being rejected.
pub const MAX_FUTURE_DRIFT_SECS: i64 = 2 * 60 * 60;

/// Result of [`Validator::handle_resp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Whether this response advanced any outstanding request.
    pub progressed: bool,
    /// Whether the request this response belonged to is now complete.
    pub finished: bool,
}

#[derive(Debug)]
enum Invalid {
    ProofOfWork,
    Timestamp,
    MerkleRoot,
    EmptyBlock,
    NotCoinbaseFirst,
    DuplicateTransaction,
    TooLarge,
}

impl std::fmt::Display for Invalid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Invalid::ProofOfWork => "proof-of-work below chain limit",
            Invalid::Timestamp => "timestamp outside plausible range",
            Invalid::MerkleRoot => "merkle root mismatch",
            Invalid::EmptyBlock => "block has no transactions",
            Invalid::NotCoinbaseFirst => "first transaction is not coinbase-shaped",
            Invalid::DuplicateTransaction => "duplicate transaction in block",
            Invalid::TooLarge => "serialized block exceeds protocol maximum",
        };
        f.write_str(s)
    }
}

/// Response Validator (C5).
pub struct Validator {
    registry: Arc<Registry>,
    pool: Arc<Pool>,
    clock: Arc<dyn AdjustedClock>,
    pow_limit: Uint256,
}

impl Validator {
    /// Construct a validator. `pow_limit` is the chain's minimum-difficulty
    /// target, from [`crate::config::ChainParams`].
    pub fn new(
        registry: Arc<Registry>,
        pool: Arc<Pool>,
        clock: Arc<dyn AdjustedClock>,
        pow_limit: Uint256,
    ) -> Arc<Validator> {
        Arc::new(Validator {
            registry,
            pool,
            clock,
            pow_limit,
        })
    }

    /// Handle one inbound message on a peer that has outstanding work.
    /// `request_hashes` is unused for routing beyond a sanity check — the
    /// registry lookup on the block's own hash is authoritative, since a
    /// peer may (harmlessly) answer a job with a block belonging to a
    /// different in-flight job.
    pub fn handle_resp(&self, request_hashes: &[BlockHash], msg: &Message, peer: &PeerId) -> Progress {
        let Message::Block(block) = msg;
        let hash = block.block_hash();
        if !request_hashes.is_empty() {
            trace!(target: "dispatcher::validator", "{}: received block {}", peer, hash);
        }

        let outcome = self.registry.with_pending(|pending| {
            if !pending.contains_key(&hash) {
                return None;
            }
            if let Err(reason) = self.validate(block) {
                return Some(Err(reason));
            }
            let waiters = pending.remove(&hash).expect("just checked contains_key");
            let finished = Registry::none_pending(pending, request_hashes);
            Some(Ok((waiters, finished)))
        });

        match outcome {
            None => Progress::default(),
            Some(Err(reason)) => {
                debug!(target: "dispatcher::validator", "{}: invalid block {}: {}", peer, hash, reason);
                self.pool.ban(peer);
                Progress::default()
            }
            Some(Ok((waiters, finished))) => {
                self.fan_out(waiters, block.clone());
                Progress {
                    progressed: true,
                    finished,
                }
            }
        }
    }

    /// Structural validation, run without reference to chain state: proof
    /// of work against the chain's minimum target, timestamp plausibility,
    /// merkle-root consistency, and transaction shape.
    fn validate(&self, block: &Block) -> Result<(), Invalid> {
        block
            .header
            .validate_pow(&self.pow_limit)
            .map_err(|_| Invalid::ProofOfWork)?;

        let now = self.clock.adjusted_time();
        if (block.header.time as i64) > now + MAX_FUTURE_DRIFT_SECS {
            return Err(Invalid::Timestamp);
        }

        if !block.check_merkle_root() {
            return Err(Invalid::MerkleRoot);
        }

        if block.txdata.is_empty() {
            return Err(Invalid::EmptyBlock);
        }
        if !block.txdata[0].is_coin_base() {
            return Err(Invalid::NotCoinbaseFirst);
        }

        let mut seen = std::collections::HashSet::with_capacity(block.txdata.len());
        for tx in &block.txdata {
            if !seen.insert(tx.txid()) {
                return Err(Invalid::DuplicateTransaction);
            }
        }

        if bitcoincash::consensus::encode::serialize(block).len() > MAX_BLOCK_WEIGHT as usize / 4 {
            return Err(Invalid::TooLarge);
        }

        Ok(())
    }

    /// Deliver the validated block to every waiting caller off the worker
    /// thread, so a slow reader on one query can't stall the work manager's
    /// job loop.
    fn fan_out(&self, waiters: Vec<crossbeam_channel::Sender<Block>>, block: Block) {
        thread::spawn(move || {
            for tx in waiters {
                let _ = tx.send(block.clone());
            }
        });
    }
}
