//! Peer Handle (C1): wraps a single live peer connection, exposing a stream
//! of received messages plus one-shot `ready` and `disconnect` signals.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bitcoincash::network::message_blockdata::Inventory;
use crossbeam_channel as chan;
use log::{debug, trace};

use pbd_common::{AdjustedClock, PeerId};

use crate::error::DialError;
use crate::wire::{Connection, Message};

/// How often the peer thread interleaves a check of the outbound command
/// queue with blocking on the connection's read path.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A one-shot signal, modeled as a zero-capacity channel of an uninhabited
/// type. Firing it means dropping every clone of its [`SignalSource`]; every
/// clone of the `Signal` then observes `recv()` return `Err`, so any number
/// of independent waiters wake from a single fire.
pub type Signal = chan::Receiver<std::convert::Infallible>;

/// The firing half of a [`Signal`].
#[derive(Clone)]
pub struct SignalSource(#[allow(dead_code)] chan::Sender<std::convert::Infallible>);

impl SignalSource {
    /// Construct a signal and its source.
    pub fn new() -> (SignalSource, Signal) {
        let (tx, rx) = chan::bounded(0);
        (SignalSource(tx), rx)
    }

    /// Fire the signal by dropping this source.
    pub fn fire(self) {}
}

/// Whether a [`Signal`] has fired.
pub fn has_fired(signal: &Signal) -> bool {
    matches!(signal.try_recv(), Err(chan::TryRecvError::Disconnected))
}

/// A live connection to a single peer.
///
/// Created on successful dial; the handshake and subsequent read loop run on
/// a dedicated background thread so a slow or malicious peer can only ever
/// stall its own thread. `ready` fires once the handshake completes;
/// `disconnect` fires when the read loop ends for any reason (peer closed
/// the connection, a decode error, or shutdown).
pub struct PeerHandle {
    /// Address this handle is connected to.
    pub id: PeerId,
    ready: Signal,
    disconnect: Signal,
    messages: chan::Receiver<Message>,
    getdata: chan::Sender<Vec<Inventory>>,
    /// Fires to tear down just this one peer (used by the validator to ban
    /// it) without affecting any other connected peer. `None` once fired.
    kill: Mutex<Option<SignalSource>>,
}

impl PeerHandle {
    /// Spawn the handshake + read-loop thread for a freshly dialed
    /// connection. `on_disconnect` runs on the peer thread once `disconnect`
    /// fires, after the connection is closed — used by the pool to remove
    /// this peer from its connected set.
    pub fn spawn(
        id: PeerId,
        mut conn: Box<dyn Connection>,
        clock: Arc<dyn AdjustedClock>,
        shutdown: Signal,
        on_disconnect: impl FnOnce(&PeerId) + Send + 'static,
    ) -> (PeerHandle, thread::JoinHandle<()>) {
        let (ready_src, ready) = SignalSource::new();
        let (disconnect_src, disconnect) = SignalSource::new();
        let (kill_src, kill) = SignalSource::new();
        let (msg_tx, msg_rx) = chan::unbounded();
        let (getdata_tx, getdata_rx) = chan::unbounded::<Vec<Inventory>>();

        let thread_id = id.clone();
        let join_handle = thread::spawn(move || {
            let sample_id = thread_id.clone();
            let mut on_version = move |timestamp: i64| clock.add_sample(sample_id.clone(), timestamp);

            if let Err(err) = conn.handshake(&mut on_version) {
                debug!(target: "dispatcher::peer", "{}: handshake failed: {}", thread_id, err);
                // Never let `ready` observe success on this path: forget,
                // don't drop, so it doesn't fire when this scope ends.
                // `disconnect` is the only signal this attempt ever fires.
                std::mem::forget(ready_src);
                on_disconnect(&thread_id);
                drop(disconnect_src);
                return;
            }
            debug!(target: "dispatcher::peer", "{}: handshake complete", thread_id);
            drop(ready_src);

            loop {
                if has_fired(&shutdown) || has_fired(&kill) {
                    break;
                }
                chan::select! {
                    recv(getdata_rx) -> invs => match invs {
                        Ok(invs) => {
                            if let Err(err) = conn.send_getdata(&invs) {
                                debug!(target: "dispatcher::peer", "{}: send failed: {}", thread_id, err);
                                break;
                            }
                        }
                        Err(_) => break,
                    },
                    default(POLL_INTERVAL) => {}
                }
                match conn.recv_timeout(POLL_INTERVAL) {
                    Ok(Some(msg)) => {
                        trace!(target: "dispatcher::peer", "{}: received message", thread_id);
                        if msg_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => continue,
                    Err(err) => {
                        debug!(target: "dispatcher::peer", "{}: connection ended: {}", thread_id, err);
                        break;
                    }
                }
            }
            conn.close();
            on_disconnect(&thread_id);
            drop(disconnect_src);
        });

        PeerHandle {
            id,
            ready,
            disconnect,
            messages: msg_rx,
            getdata: getdata_tx,
            kill: Mutex::new(Some(kill_src)),
        }
    }

    /// The `ready` signal: fires once after a successful handshake.
    pub fn ready(&self) -> &Signal {
        &self.ready
    }

    /// The `disconnect` signal: fires once when the peer's read loop ends.
    pub fn disconnect(&self) -> &Signal {
        &self.disconnect
    }

    /// Subscribe to this peer's inbound dispatcher-relevant messages.
    /// Single-subscriber by convention (the work manager); cloning the
    /// receiver is possible but only one side is expected to drain it.
    pub fn subscribe_recv(&self) -> chan::Receiver<Message> {
        self.messages.clone()
    }

    /// Queue an inventory request to be sent on this peer's connection.
    pub fn send_getdata(&self, invs: Vec<Inventory>) -> Result<(), DialError> {
        self.getdata
            .send(invs)
            .map_err(|_| DialError::ConnectionFailed(self.id.clone(), "peer thread exited".into()))
    }

    /// Tear down this peer's connection immediately, independent of the
    /// global shutdown signal. Used to disconnect a banned peer. Idempotent.
    pub fn kill(&self) {
        self.kill.lock().unwrap().take();
    }
}
