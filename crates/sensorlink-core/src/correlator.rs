// ── Request / event correlation ──
//
// Routes decoded socket traffic to the signal that owns it. Three lookup
// tables per connection: path -> signal, request id -> signal (consumed by
// the first acknowledgement or failure), and device signal id -> signal.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use sensorlink_api::{Inbound, Transport};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::signal::{Decoder, Signal, SignalInner, SignalPath};

const RECONNECT_CHANNEL_SIZE: usize = 16;

/// Type-erased view of a `SignalInner<T>` used by the routing tables.
pub(crate) trait SignalSlot: Send + Sync + 'static {
    fn path(&self) -> &SignalPath;
    fn on_ack(&self, request_id: u64, body: Option<Value>);
    fn on_event(&self, body: Value);
    fn on_failure(&self, request_id: u64, error: CoreError);
    /// The socket carrying this signal's subscription is gone. `abandoned`
    /// lists the unanswered requests that went with it.
    fn on_socket_lost(&self, abandoned: &[u64], loss: SocketLoss);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Why a socket's device-side state went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SocketLoss {
    /// A new socket took its place.
    Replaced,
    /// Closed for good: retries ran out or the caller disconnected.
    Closed,
}

/// Signal registry and dispatcher for one connection.
pub struct Correlator {
    transport: Transport,
    by_path: DashMap<SignalPath, Arc<dyn SignalSlot>>,
    by_request: DashMap<u64, Arc<dyn SignalSlot>>,
    by_signal: DashMap<u64, Arc<dyn SignalSlot>>,
    reconnect_count: AtomicU64,
    reconnect_tx: broadcast::Sender<u64>,
}

impl Correlator {
    pub fn new(transport: Transport) -> Self {
        let (reconnect_tx, _) = broadcast::channel(RECONNECT_CHANNEL_SIZE);
        Self {
            transport,
            by_path: DashMap::new(),
            by_request: DashMap::new(),
            by_signal: DashMap::new(),
            reconnect_count: AtomicU64::new(0),
            reconnect_tx,
        }
    }

    /// Get or register the signal at `path`.
    ///
    /// The first registration fixes the value type and decoder; later
    /// calls with the same `T` share it, a different `T` is an error.
    pub(crate) fn signal<T: Send + Sync + 'static>(
        self: &Arc<Self>,
        path: SignalPath,
        decode: Decoder<T>,
    ) -> Result<Signal<T>, CoreError> {
        let slot = Arc::clone(
            self.by_path
                .entry(path.clone())
                .or_insert_with(|| {
                    let slot: Arc<dyn SignalSlot> = Arc::new(SignalInner::new(
                        path.clone(),
                        decode,
                        self.transport.clone(),
                        Arc::downgrade(self),
                    ));
                    slot
                })
                .value(),
        );

        let inner = slot
            .into_any()
            .downcast::<SignalInner<T>>()
            .map_err(|_| CoreError::SignalTypeMismatch {
                path: path.to_string(),
            })?;
        Ok(Signal::from_inner(inner))
    }

    pub(crate) fn register_request(&self, request_id: u64, path: &SignalPath) {
        let slot = self.by_path.get(path).map(|s| Arc::clone(s.value()));
        match slot {
            Some(slot) => {
                self.by_request.insert(request_id, slot);
            }
            None => warn!(signal = %path, request_id, "request for unregistered signal"),
        }
    }

    pub(crate) fn forget_request(&self, request_id: u64) {
        self.by_request.remove(&request_id);
    }

    pub(crate) fn activate(&self, signal_id: u64, path: &SignalPath) {
        let slot = self.by_path.get(path).map(|s| Arc::clone(s.value()));
        if let Some(slot) = slot {
            self.by_signal.insert(signal_id, slot);
        }
    }

    pub(crate) fn deactivate(&self, signal_id: u64) {
        self.by_signal.remove(&signal_id);
    }

    /// Number of registered signals.
    pub fn signal_count(&self) -> usize {
        self.by_path.len()
    }

    /// Subscribe requests still waiting for their first response.
    pub fn pending_subscribes(&self) -> usize {
        self.by_request.len()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.by_signal.len()
    }

    /// Receiver notified with a running count after every socket reconnect.
    pub fn reconnects(&self) -> broadcast::Receiver<u64> {
        self.reconnect_tx.subscribe()
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Route one inbound message. Slots are cloned out of the tables
    /// before they are called, so no table lock is held during callbacks.
    pub fn dispatch(&self, inbound: Inbound) {
        match inbound {
            Inbound::Ack { id, body } => match self.by_request.remove(&id) {
                Some((_, slot)) => slot.on_ack(id, body),
                None => debug!(id, "ack for unknown request dropped"),
            },
            Inbound::Event { signal, body } => {
                let slot = self.by_signal.get(&signal).map(|s| Arc::clone(s.value()));
                match slot {
                    Some(slot) => slot.on_event(body),
                    None => debug!(signal_id = signal, "event for unknown signal dropped"),
                }
            }
            Inbound::Failed { id, error } => {
                match id.and_then(|id| self.by_request.remove(&id)) {
                    Some((request_id, slot)) => slot.on_failure(request_id, error.into()),
                    None => warn!(?id, error = %error, "device error for unknown request"),
                }
            }
            Inbound::Reconnected { abandoned } => {
                let signals = self.socket_lost(&abandoned, SocketLoss::Replaced);
                let count = self.reconnect_count.fetch_add(1, Ordering::Relaxed) + 1;
                info!(signals, count, "socket reconnected, subscriptions reset");
                // Ignore send errors -- just means nobody is listening
                let _ = self.reconnect_tx.send(count);
            }
            Inbound::Closed { abandoned } => {
                let signals = self.socket_lost(&abandoned, SocketLoss::Closed);
                warn!(signals, "socket closed after failed reconnects, subscriptions reset");
            }
        }
    }

    /// Return every signal to `Unsubscribed` after an explicit disconnect,
    /// failing every pending subscribe. Returns the number of registered
    /// signals.
    pub(crate) fn reset_subscriptions(&self) -> usize {
        let pending: Vec<u64> = self.by_request.iter().map(|r| *r.key()).collect();
        self.socket_lost(&pending, SocketLoss::Closed)
    }

    /// Drop routing state tied to a dead socket. Active subscriptions are
    /// all gone; only the `abandoned` requests are, since a request still
    /// waiting to be written goes out on the next socket.
    fn socket_lost(&self, abandoned: &[u64], loss: SocketLoss) -> usize {
        for id in abandoned {
            self.by_request.remove(id);
        }
        self.by_signal.clear();

        let slots: Vec<Arc<dyn SignalSlot>> =
            self.by_path.iter().map(|s| Arc::clone(s.value())).collect();
        for slot in &slots {
            slot.on_socket_lost(abandoned, loss);
        }
        slots.len()
    }

    /// Dispatch loop: one per connection, preserving arrival order.
    pub async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<Inbound>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                msg = inbound.recv() => match msg {
                    Some(msg) => self.dispatch(msg),
                    None => break,
                },
            }
        }
        debug!("dispatch loop exiting");
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("signals", &self.by_path.len())
            .field("pending", &self.by_request.len())
            .field("active", &self.by_signal.len())
            .finish_non_exhaustive()
    }
}
