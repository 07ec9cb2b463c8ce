//! Request Registry (C3): for each block hash outstanding, records the
//! caller delivery channels awaiting it, deduplicates in-flight requests,
//! and batches hashes into protocol-sized inventory requests.

use std::collections::HashMap;
use std::sync::Mutex;

use bitcoincash::blockdata::block::Block;
use bitcoincash::hash_types::BlockHash;
use bitcoincash::network::message_blockdata::Inventory;
use crossbeam_channel as chan;
use log::debug;

/// One inventory-request batch produced by [`Registry::new_request`]: hashes
/// not already pending, whose length never exceeds `max_request_invs`.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Inventory entries to request from a peer.
    pub invs: Vec<Inventory>,
}

type Waiters = HashMap<BlockHash, Vec<chan::Sender<Block>>>;

/// Request Registry state (C3). `pending` is guarded by a single mutex that
/// is also held, by the validator, across block sanity validation — this
/// keeps hash removal atomic with validation so a concurrent `new_request`
/// can never observe a half-removed hash.
pub struct Registry {
    max_request_invs: usize,
    pending: Mutex<Waiters>,
}

impl Registry {
    /// Construct a registry that splits requests into batches of at most
    /// `max_request_invs` inventory entries.
    pub fn new(max_request_invs: usize) -> Self {
        Self {
            max_request_invs,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register interest in `hashes` in input order, returning the inventory
    /// batches that need a fresh fetch and a delivery channel buffered to
    /// hold every requested hash. A hash already pending from an earlier
    /// caller is *not* re-added to any batch — the in-flight request will
    /// satisfy it — but this caller's channel is still registered against
    /// it, so it still receives the eventual block.
    pub fn new_request(&self, hashes: &[BlockHash]) -> (Vec<Batch>, chan::Receiver<Block>) {
        let (tx, rx) = chan::bounded(hashes.len().max(1));
        if hashes.is_empty() {
            return (Vec::new(), rx);
        }

        let mut batches = Vec::new();
        let mut current = Vec::new();
        let mut pending = self.pending.lock().unwrap();

        for (i, hash) in hashes.iter().enumerate() {
            let waiters = pending.entry(*hash).or_insert_with(Vec::new);
            if waiters.is_empty() {
                current.push(Inventory::Block(*hash));
            }
            waiters.push(tx.clone());

            let last = i == hashes.len() - 1;
            if !current.is_empty() && (current.len() == self.max_request_invs || last) {
                batches.push(Batch {
                    invs: std::mem::take(&mut current),
                });
            }
        }
        debug!(
            target: "dispatcher::registry",
            "new_request: {} hashes -> {} batches",
            hashes.len(),
            batches.len()
        );
        (batches, rx)
    }

    /// Run `f` with exclusive access to the pending-hash table. Used by the
    /// validator to perform the lookup, block sanity validation, and the
    /// removal that completes a request as a single atomic step.
    pub fn with_pending<R>(&self, f: impl FnOnce(&mut Waiters) -> R) -> R {
        let mut guard = self.pending.lock().unwrap();
        f(&mut guard)
    }

    /// True if none of `hashes` are still pending. Used to compute whether a
    /// multi-hash request has finished after one of its hashes resolves.
    pub fn none_pending(pending: &Waiters, hashes: &[BlockHash]) -> bool {
        hashes.iter().all(|h| !pending.contains_key(h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin_hashes::Hash;
    use bitcoincash::blockdata::block::BlockHeader;

    fn hash(byte: u8) -> BlockHash {
        BlockHash::from_slice(&[byte; 32]).unwrap()
    }

    fn dummy_block() -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                prev_blockhash: hash(0),
                merkle_root: Default::default(),
                time: 0,
                bits: 0,
                nonce: 0,
            },
            txdata: Vec::new(),
        }
    }

    #[test]
    fn batch_splitting() {
        let registry = Registry::new(2);
        let hashes = vec![hash(1), hash(2), hash(3), hash(4), hash(5)];
        let (batches, _rx) = registry.new_request(&hashes);
        let sizes: Vec<usize> = batches.iter().map(|b| b.invs.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn deduplicates_in_flight_hashes() {
        let registry = Registry::new(50_000);
        let (batches1, _rx1) = registry.new_request(&[hash(1), hash(2)]);
        assert_eq!(batches1[0].invs.len(), 2);

        let (batches2, _rx2) = registry.new_request(&[hash(2), hash(3)]);
        // Only h3 needed a fresh inventory entry; h2 is already in flight.
        assert_eq!(batches2[0].invs.len(), 1);
        assert_eq!(batches2[0].invs[0], Inventory::Block(hash(3)));
    }

    #[test]
    fn fan_out_delivers_to_every_waiting_caller() {
        let registry = Registry::new(50_000);
        let (_b1, rx1) = registry.new_request(&[hash(2)]);
        let (_b2, rx2) = registry.new_request(&[hash(2)]);

        let waiters = registry.with_pending(|pending| pending.remove(&hash(2)).unwrap());
        assert_eq!(waiters.len(), 2);
        for tx in waiters {
            tx.send(dummy_block()).unwrap();
        }
        assert!(rx1.recv_timeout(std::time::Duration::from_secs(1)).is_ok());
        assert!(rx2.recv_timeout(std::time::Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn empty_request_produces_no_batches() {
        let registry = Registry::new(50_000);
        let (batches, _rx) = registry.new_request(&[]);
        assert!(batches.is_empty());
    }
}
