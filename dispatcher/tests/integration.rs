//! Integration scenarios exercising the pool, registry, work manager, and
//! validator together, driven by hand-written fakes instead of real
//! sockets. Eligibility filtering and batching/dedup are covered by unit
//! tests alongside `registry.rs` and `peer.rs` in `pbd-common`; the
//! scenarios here need multiple components wired together.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitcoin_hashes::Hash;
use bitcoincash::blockdata::block::{Block, BlockHeader};
use bitcoincash::blockdata::transaction::{OutPoint, Transaction, TxIn, TxOut};
use bitcoincash::hash_types::BlockHash;
use bitcoincash::consensus::params::Params;
use bitcoincash::network::constants::Network;
use bitcoincash::network::message_blockdata::Inventory;
use crossbeam_channel as chan;

use pbd_common::{PeerDescriptor, ServiceFlags};
use pbd_dispatcher::error::{BackendError, DialError};
use pbd_dispatcher::peer::{has_fired, Signal, SignalSource};
use pbd_dispatcher::wire::{Connection, Message};
use pbd_dispatcher::{ChainParams, Config, Dispatcher};

const WAIT: Duration = Duration::from_secs(5);

struct FakeConnection {
    name: String,
    requests_tx: chan::Sender<Vec<Inventory>>,
    inbox: chan::Receiver<Message>,
    closed: Signal,
}

impl Connection for FakeConnection {
    fn handshake(&mut self, on_version: &mut dyn FnMut(i64)) -> Result<(), DialError> {
        on_version(1_700_000_000);
        Ok(())
    }

    fn send_getdata(&mut self, invs: &[Inventory]) -> Result<(), DialError> {
        self.requests_tx
            .send(invs.to_vec())
            .map_err(|_| DialError::Closed(self.name.clone(), "harness dropped".into()))
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Message>, DialError> {
        if has_fired(&self.closed) {
            return Err(DialError::Closed(self.name.clone(), "closed by test".into()));
        }
        match self.inbox.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(chan::RecvTimeoutError::Timeout) => Ok(None),
            Err(chan::RecvTimeoutError::Disconnected) => {
                Err(DialError::Closed(self.name.clone(), "inbox closed".into()))
            }
        }
    }

    fn close(&mut self) {}
}

/// A fake peer plus the handles a test uses to drive it: the inventory
/// requests it received, a way to push messages into it, and a way to
/// sever it to simulate an external disconnect.
struct FakePeer {
    requests: chan::Receiver<Vec<Inventory>>,
    inbox_tx: chan::Sender<Message>,
    sever: SignalSource,
}

fn fake_peer(name: &str) -> (Box<dyn Connection>, FakePeer) {
    let (requests_tx, requests_rx) = chan::unbounded();
    let (inbox_tx, inbox_rx) = chan::unbounded();
    let (sever, closed) = SignalSource::new();
    let conn: Box<dyn Connection> = Box::new(FakeConnection {
        name: name.to_string(),
        requests_tx,
        inbox: inbox_rx,
        closed,
    });
    (
        conn,
        FakePeer {
            requests: requests_rx,
            inbox_tx,
            sever,
        },
    )
}

impl FakePeer {
    /// Simulate the peer hanging up from the outside.
    fn disconnect(self) {
        self.sever.fire();
    }
}

fn hash(byte: u8) -> BlockHash {
    BlockHash::from_slice(&[byte; 32]).unwrap()
}

fn coinbase_with_value(value: u64) -> Transaction {
    Transaction {
        version: 1,
        lock_time: 0,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: Default::default(),
            sequence: 0xffff_ffff,
            witness: vec![],
        }],
        output: vec![TxOut {
            value,
            script_pubkey: Default::default(),
        }],
    }
}

fn regtest_bits() -> u32 {
    BlockHeader::compact_target_from_u256(&Params::new(Network::Regtest).pow_limit)
}

/// A block's hash commits only to its 80-byte header, not to its
/// transaction list — a peer can answer a request for a given hash with
/// any txdata, correct or not, as long as the header is unchanged. This
/// builds one shared header (so both candidates answer with the *same*
/// requested hash) along with a valid block whose txdata matches the
/// header's claimed merkle root, and an invalid one whose txdata doesn't.
fn scenario(target_value: u64, wrong_value: u64) -> (BlockHash, Block, Block) {
    let good_tx = coinbase_with_value(target_value);
    let correct_root =
        bitcoincash::hash_types::TxMerkleNode::from_inner(good_tx.txid().into_inner());
    let header = BlockHeader {
        version: 1,
        prev_blockhash: hash(0),
        merkle_root: correct_root,
        time: 1_700_000_000,
        bits: regtest_bits(),
        nonce: 0,
    };
    let target = header.block_hash();

    let valid = Block {
        header,
        txdata: vec![good_tx],
    };
    let bad_tx = coinbase_with_value(wrong_value);
    let invalid = Block {
        header,
        txdata: vec![bad_tx],
    };
    (target, valid, invalid)
}

type DialTable = Arc<Mutex<HashMap<String, Box<dyn Connection>>>>;

fn dial_table() -> DialTable {
    Arc::new(Mutex::new(HashMap::new()))
}

fn test_config(
    dials: DialTable,
    descriptors: Arc<Mutex<Vec<PeerDescriptor>>>,
    num_target_peers: usize,
) -> Config {
    let dial = {
        let dials = Arc::clone(&dials);
        Arc::new(move |addr: &str| -> Result<Box<dyn Connection>, DialError> {
            dials
                .lock()
                .unwrap()
                .remove(addr)
                .ok_or_else(|| DialError::ConnectionFailed(addr.to_string(), "no fake registered".into()))
        })
    };
    let get_peers = {
        let descriptors = Arc::clone(&descriptors);
        Arc::new(move || -> Result<Vec<PeerDescriptor>, BackendError> {
            Ok(descriptors.lock().unwrap().clone())
        })
    };

    let mut config = Config::new(ChainParams::for_network(Network::Regtest), dial, get_peers);
    config.num_target_peers = num_target_peers;
    config.peer_ready_timeout = Duration::from_secs(2);
    config.refresh_interval = Duration::from_millis(150);
    config.response_timeout = Duration::from_secs(2);
    config.max_retries = 3;
    config
}

fn eligible(address: &str) -> PeerDescriptor {
    PeerDescriptor {
        address: address.to_string(),
        services: PeerDescriptor::REQUIRED,
    }
}

fn ineligible(address: &str) -> PeerDescriptor {
    PeerDescriptor {
        address: address.to_string(),
        services: ServiceFlags::from_bits(ServiceFlags::NETWORK.bits()),
    }
}

fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    predicate()
}

/// S4 — a peer that returns an invalid block is banned and disconnected;
/// the request is retried on another peer and the caller still receives
/// the valid block.
#[test]
fn s4_ban_on_bad_block_and_retry_succeeds() {
    let dials = dial_table();
    let (bad_conn, bad) = fake_peer("bad");
    dials.lock().unwrap().insert("bad:8333".into(), bad_conn);

    let descriptors = Arc::new(Mutex::new(vec![eligible("bad:8333"), ineligible("good:8333")]));
    let config = test_config(Arc::clone(&dials), Arc::clone(&descriptors), 1);
    let dispatcher = Dispatcher::new(config).unwrap();
    dispatcher.start();

    assert!(wait_until(|| dispatcher.connected_peers() == 1, WAIT));

    let (target, valid, invalid) = scenario(50_0000_0000, 1_0000_0000);
    let (blocks, errors) = dispatcher.query(vec![target]);
    assert!(errors.is_some());

    let invs = bad.requests.recv_timeout(WAIT).expect("bad peer should receive request");
    assert_eq!(invs, vec![Inventory::Block(target)]);
    bad.inbox_tx.send(Message::Block(invalid)).unwrap();

    // The bad peer is banned and disconnected; the pool drops to zero
    // connected peers.
    assert!(wait_until(|| dispatcher.connected_peers() == 0, WAIT));

    // Make the second candidate eligible and register its fake connection,
    // so the next refresh pass connects it.
    let (good_conn, good) = fake_peer("good");
    dials.lock().unwrap().insert("good:8333".into(), good_conn);
    *descriptors.lock().unwrap() = vec![eligible("good:8333")];

    assert!(wait_until(|| dispatcher.connected_peers() == 1, WAIT));

    let invs = good.requests.recv_timeout(WAIT).expect("good peer should receive retried request");
    assert_eq!(invs, vec![Inventory::Block(target)]);
    good.inbox_tx.send(Message::Block(valid)).unwrap();

    let delivered = blocks.recv_timeout(WAIT).expect("caller should receive the valid block");
    assert_eq!(delivered.block_hash(), target);

    dispatcher.stop();
}

/// S5 — the pool maintains its target peer count: it notices an external
/// disconnect and replaces the lost peer with a new candidate.
#[test]
fn s5_target_peer_maintenance() {
    let dials = dial_table();
    let (conn_a, peer_a) = fake_peer("a");
    let (conn_b, _peer_b) = fake_peer("b");
    let (conn_c, _peer_c) = fake_peer("c");
    dials.lock().unwrap().insert("a:8333".into(), conn_a);
    dials.lock().unwrap().insert("b:8333".into(), conn_b);
    dials.lock().unwrap().insert("c:8333".into(), conn_c);

    // Exactly as many eligible candidates as the target, so all three are
    // connected deterministically regardless of shuffle order.
    let descriptors = Arc::new(Mutex::new(vec![
        eligible("a:8333"),
        eligible("b:8333"),
        eligible("c:8333"),
    ]));
    let config = test_config(Arc::clone(&dials), Arc::clone(&descriptors), 3);
    let dispatcher = Dispatcher::new(config).unwrap();
    dispatcher.start();

    assert!(wait_until(|| dispatcher.connected_peers() == 3, WAIT));

    // Sever one connection from the outside, as if the peer hung up.
    peer_a.disconnect();
    assert!(wait_until(|| dispatcher.connected_peers() == 2, WAIT));

    // Register a fourth candidate to replace it; "a" is no longer offered
    // by the backend (simulating it also dropping from the peer list).
    let (conn_d, _peer_d) = fake_peer("d");
    dials.lock().unwrap().insert("d:8333".into(), conn_d);
    *descriptors.lock().unwrap() = vec![eligible("b:8333"), eligible("c:8333"), eligible("d:8333")];

    assert!(wait_until(|| dispatcher.connected_peers() == 3, WAIT));

    dispatcher.stop();
}

/// S6 — `Stop` returns promptly while a large query is in flight, and no
/// further blocks are delivered afterwards.
#[test]
fn s6_shutdown_cleanliness() {
    let dials = dial_table();
    let mut peers = Vec::new();
    let mut descriptors = Vec::new();
    for i in 0..3 {
        let name = format!("peer-{i}");
        let addr = format!("{name}:8333");
        let (conn, peer) = fake_peer(&name);
        dials.lock().unwrap().insert(addr.clone(), conn);
        descriptors.push(eligible(&addr));
        peers.push(peer);
    }

    let config = test_config(dials, Arc::new(Mutex::new(descriptors)), 3);
    let dispatcher = Dispatcher::new(config).unwrap();
    dispatcher.start();
    assert!(wait_until(|| dispatcher.connected_peers() == 3, WAIT));

    let hashes: Vec<BlockHash> = (0..100u8).map(hash).collect();
    let (blocks, _errors) = dispatcher.query(hashes);

    let start = std::time::Instant::now();
    dispatcher.stop();
    assert!(start.elapsed() < Duration::from_secs(10));

    // No blocks were ever supplied by the fakes; the channel yields nothing
    // further once shutdown has completed.
    assert!(blocks.try_recv().is_err());
}
