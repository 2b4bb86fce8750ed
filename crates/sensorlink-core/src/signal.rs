// ── Ref-counted signal subscriptions ──
//
// One `Signal<T>` exists per `(object path, signal name)` on a connection.
// Any number of local listeners share a single device-side subscription:
// the first listener subscribes, the last one to leave unsubscribes. State
// transitions happen under a per-signal lock that is never held across I/O;
// socket writes are spawned or awaited after the lock is released.

use std::any::Any;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures_core::Stream;
use sensorlink_api::protocol::event_fields;
use sensorlink_api::{ConnectionState, Method, Transport};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::correlator::{Correlator, SignalSlot, SocketLoss};
use crate::error::CoreError;

/// Socket path that cancels a device-side subscription; the body is the
/// signal id.
pub const UNSUBSCRIBE_PATH: &str = "signal:unsubscribe";

/// Maps an event's `[timestamp, ...fields]` array to a typed value.
pub type Decoder<T> = Arc<dyn Fn(&[Value]) -> Result<T, CoreError> + Send + Sync>;

type Callback<T> = Arc<dyn Fn(&Arc<T>) + Send + Sync>;

// ── SignalPath ───────────────────────────────────────────────────────

/// Address of a signal: the owning object path plus the signal name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalPath {
    pub object: String,
    pub signal: String,
}

impl SignalPath {
    pub fn new(object: impl Into<String>, signal: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            signal: signal.into(),
        }
    }
}

impl fmt::Display for SignalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object, self.signal)
    }
}

// ── State ────────────────────────────────────────────────────────────

/// Device-side subscription state of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    /// Subscribe request sent, acknowledgement outstanding.
    AwaitingAck { request_id: u64 },
    /// Subscribed; events arrive tagged with `signal_id`.
    Active { signal_id: u64 },
}

/// What awaiting callers observe.
#[derive(Debug, Clone)]
enum Progress {
    Idle,
    Pending,
    Active,
    Failed(CoreError),
}

struct Shared<T> {
    state: SubscriptionState,
    listeners: Vec<(u64, Callback<T>)>,
}

pub(crate) struct SignalInner<T> {
    path: SignalPath,
    decode: Decoder<T>,
    transport: Transport,
    correlator: Weak<Correlator>,
    shared: Mutex<Shared<T>>,
    next_listener: AtomicU64,
    progress: watch::Sender<Progress>,
}

// ── Signal ───────────────────────────────────────────────────────────

/// Typed handle to a registered signal. Cheaply cloneable; every clone
/// refers to the same subscription.
pub struct Signal<T> {
    inner: Arc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Signal<T> {
    pub(crate) fn from_inner(inner: Arc<SignalInner<T>>) -> Self {
        Self { inner }
    }

    pub fn path(&self) -> &SignalPath {
        &self.inner.path
    }

    pub fn state(&self) -> SubscriptionState {
        self.inner.lock().state
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Register a callback. Callbacks run in registration order on the
    /// connection's dispatch task, so they should return quickly.
    ///
    /// The first listener starts a subscribe in the background. Must be
    /// called from within a Tokio runtime.
    pub fn add_listener<F>(&self, callback: F) -> Listener<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.add_callback(Arc::new(move |value: &Arc<T>| callback(value.as_ref())))
    }

    /// Register a callback and wait until the device acknowledges the
    /// subscription.
    ///
    /// On failure the listener is removed again before the error is
    /// returned.
    pub async fn add_listener_and_wait<F>(&self, callback: F) -> Result<Listener<T>, CoreError>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let listener = self.add_listener(callback);
        self.wait_active().await?;
        Ok(listener)
    }

    /// Channel-backed listener usable as a [`Stream`].
    pub fn subscribe(&self) -> SignalStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = self.add_callback(Arc::new(move |value: &Arc<T>| {
            let _ = tx.send(Arc::clone(value));
        }));
        SignalStream {
            rx,
            listener: Some(listener),
        }
    }

    /// Wait for the subscription to become active.
    ///
    /// Every caller waiting on the same attempt shares it. Restarts the
    /// subscribe when listeners exist but nothing is in flight (after a
    /// failure or a reconnect). Fails with `NotSubscribed` when there are no
    /// listeners.
    pub async fn wait_active(&self) -> Result<(), CoreError> {
        let mut progress = {
            let mut shared = self.inner.lock();
            match shared.state {
                SubscriptionState::Active { .. } => return Ok(()),
                SubscriptionState::AwaitingAck { .. } => {}
                SubscriptionState::Unsubscribed => {
                    if shared.listeners.is_empty() {
                        return Err(CoreError::NotSubscribed {
                            path: self.inner.path.to_string(),
                        });
                    }
                    self.inner.begin_subscribe(&mut shared);
                }
            }
            self.inner.progress.subscribe()
        };

        let outcome = progress
            .wait_for(|p| matches!(p, Progress::Active | Progress::Failed(_)))
            .await
            .map_err(|_| CoreError::Internal("signal dropped while waiting".into()))?
            .clone();

        match outcome {
            Progress::Failed(err) => Err(err),
            _ => Ok(()),
        }
    }

    /// Re-issue the subscription after a reconnect or a failed attempt.
    ///
    /// Returns `true` when a subscribe was started; `false` when there are
    /// no listeners or a subscription is already active or in flight.
    pub fn resubscribe(&self) -> bool {
        let mut shared = self.inner.lock();
        if shared.state != SubscriptionState::Unsubscribed || shared.listeners.is_empty() {
            return false;
        }
        self.inner.begin_subscribe(&mut shared);
        true
    }

    fn add_callback(&self, callback: Callback<T>) -> Listener<T> {
        let key = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        let mut shared = self.inner.lock();
        shared.listeners.push((key, callback));
        if shared.listeners.len() == 1 && shared.state == SubscriptionState::Unsubscribed {
            self.inner.begin_subscribe(&mut shared);
        }
        drop(shared);

        Listener {
            inner: Arc::clone(&self.inner),
            key,
            removed: false,
        }
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("path", &self.inner.path)
            .finish_non_exhaustive()
    }
}

// ── SignalInner ──────────────────────────────────────────────────────

impl<T: Send + Sync + 'static> SignalInner<T> {
    pub(crate) fn new(
        path: SignalPath,
        decode: Decoder<T>,
        transport: Transport,
        correlator: Weak<Correlator>,
    ) -> Self {
        let (progress, _) = watch::channel(Progress::Idle);
        Self {
            path,
            decode,
            transport,
            correlator,
            shared: Mutex::new(Shared {
                state: SubscriptionState::Unsubscribed,
                listeners: Vec::new(),
            }),
            next_listener: AtomicU64::new(0),
            progress,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared<T>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `AwaitingAck` and send the subscribe request.
    ///
    /// The request id is registered with the correlator before the request
    /// is written, so a fast acknowledgement always finds its signal.
    fn begin_subscribe(self: &Arc<Self>, shared: &mut Shared<T>) {
        let Some(correlator) = self.correlator.upgrade() else {
            self.progress
                .send_replace(Progress::Failed(CoreError::Disconnected));
            return;
        };

        let request_id = self.transport.allocate_id();
        shared.state = SubscriptionState::AwaitingAck { request_id };
        self.progress.send_replace(Progress::Pending);
        correlator.register_request(request_id, &self.path);
        debug!(signal = %self.path, request_id, "subscribing");

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let wire_path = inner.path.to_string();
            if let Err(e) = inner
                .transport
                .send_as(request_id, &wire_path, Method::Post, &[])
                .await
            {
                warn!(signal = %inner.path, error = %e, "subscribe request failed");
                correlator.forget_request(request_id);
                inner.fail_request(request_id, e.into());
            }
        });
    }

    /// Remove a listener. Returns the signal id to unsubscribe when this
    /// was the last listener of an active subscription.
    fn detach(&self, key: u64) -> Option<u64> {
        let mut shared = self.lock();
        let before = shared.listeners.len();
        shared.listeners.retain(|(k, _)| *k != key);
        if shared.listeners.len() == before || !shared.listeners.is_empty() {
            return None;
        }

        match shared.state {
            SubscriptionState::Active { signal_id } => {
                shared.state = SubscriptionState::Unsubscribed;
                self.progress.send_replace(Progress::Idle);
                if let Some(correlator) = self.correlator.upgrade() {
                    correlator.deactivate(signal_id);
                }
                Some(signal_id)
            }
            SubscriptionState::AwaitingAck { request_id } => {
                // The request stays registered: a late ack is unsubscribed
                // as an orphan.
                debug!(signal = %self.path, request_id, "last listener left before ack");
                shared.state = SubscriptionState::Unsubscribed;
                self.progress
                    .send_replace(Progress::Failed(CoreError::NotSubscribed {
                        path: self.path.to_string(),
                    }));
                None
            }
            SubscriptionState::Unsubscribed => None,
        }
    }

    fn fail_request(&self, request_id: u64, error: CoreError) {
        let mut shared = self.lock();
        if shared.state != (SubscriptionState::AwaitingAck { request_id }) {
            debug!(signal = %self.path, request_id, "failure for stale request ignored");
            return;
        }
        warn!(signal = %self.path, request_id, error = %error, "subscribe failed");
        shared.state = SubscriptionState::Unsubscribed;
        self.progress.send_replace(Progress::Failed(error));
    }
}

/// Send one unsubscribe for `signal_id`, unless the socket that carried
/// the subscription is already gone.
async fn send_unsubscribe(
    transport: &Transport,
    path: &SignalPath,
    signal_id: u64,
) -> Result<(), CoreError> {
    if transport.state() != ConnectionState::Connected {
        debug!(signal = %path, signal_id, "socket not connected, skipping unsubscribe");
        return Ok(());
    }
    debug!(signal = %path, signal_id, "unsubscribing");
    transport
        .send(UNSUBSCRIBE_PATH, Method::Post, &[json!(signal_id)])
        .await?;
    Ok(())
}

fn spawn_unsubscribe(transport: Transport, path: SignalPath, signal_id: u64) {
    let task = async move {
        if let Err(e) = send_unsubscribe(&transport, &path, signal_id).await {
            warn!(signal = %path, signal_id, error = %e, "unsubscribe failed");
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(_) => debug!(signal_id, "no runtime available, unsubscribe skipped"),
    }
}

/// Signal id from an acknowledgement body: a number or a numeric string.
fn signal_id_from(body: Option<&Value>) -> Option<u64> {
    let body = body?;
    body.as_u64()
        .or_else(|| body.as_str().and_then(|s| s.trim().parse().ok()))
}

impl<T: Send + Sync + 'static> SignalSlot for SignalInner<T> {
    fn path(&self) -> &SignalPath {
        &self.path
    }

    fn on_ack(&self, request_id: u64, body: Option<Value>) {
        let mut shared = self.lock();
        if shared.state != (SubscriptionState::AwaitingAck { request_id }) {
            drop(shared);
            if let Some(signal_id) = signal_id_from(body.as_ref()) {
                info!(signal = %self.path, signal_id, "orphaned subscription, unsubscribing");
                spawn_unsubscribe(self.transport.clone(), self.path.clone(), signal_id);
            }
            return;
        }

        if let Some(signal_id) = signal_id_from(body.as_ref()) {
            shared.state = SubscriptionState::Active { signal_id };
            if let Some(correlator) = self.correlator.upgrade() {
                correlator.activate(signal_id, &self.path);
            }
            self.progress.send_replace(Progress::Active);
            info!(signal = %self.path, signal_id, "subscription active");
        } else {
            warn!(signal = %self.path, request_id, ?body, "acknowledgement without signal id");
            shared.state = SubscriptionState::Unsubscribed;
            self.progress.send_replace(Progress::Failed(CoreError::Decode {
                message: format!("acknowledgement for {} carried no signal id", self.path),
            }));
        }
    }

    fn on_event(&self, body: Value) {
        let fields = match event_fields(body) {
            Ok(fields) => fields,
            Err(e) => {
                warn!(signal = %self.path, error = %e, "dropping malformed event");
                return;
            }
        };
        let value = match (self.decode)(&fields) {
            Ok(value) => Arc::new(value),
            Err(e) => {
                warn!(signal = %self.path, error = %e, "dropping undecodable event");
                return;
            }
        };

        let listeners: Vec<Callback<T>> = self
            .lock()
            .listeners
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for listener in listeners {
            listener(&value);
        }
    }

    fn on_failure(&self, request_id: u64, error: CoreError) {
        self.fail_request(request_id, error);
    }

    fn on_socket_lost(&self, abandoned: &[u64], loss: SocketLoss) {
        let mut shared = self.lock();
        match shared.state {
            SubscriptionState::AwaitingAck { request_id } if abandoned.contains(&request_id) => {
                let error = match loss {
                    SocketLoss::Replaced => CoreError::Reconnected {
                        path: self.path.to_string(),
                    },
                    SocketLoss::Closed => CoreError::Disconnected,
                };
                self.progress.send_replace(Progress::Failed(error));
            }
            // Not written yet: it goes out on the next socket and its ack
            // is still routed here.
            SubscriptionState::AwaitingAck { .. } | SubscriptionState::Unsubscribed => return,
            SubscriptionState::Active { .. } => {
                self.progress.send_replace(Progress::Idle);
            }
        }
        debug!(signal = %self.path, listeners = shared.listeners.len(), ?loss, "subscription lost with socket");
        shared.state = SubscriptionState::Unsubscribed;
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ── Listener ─────────────────────────────────────────────────────────

/// Registration of one callback on a [`Signal`].
///
/// Dropping it has the same effect as [`remove`](Self::remove), except that
/// a resulting unsubscribe is sent in the background.
#[must_use = "dropping a Listener removes it immediately"]
pub struct Listener<T: Send + Sync + 'static> {
    inner: Arc<SignalInner<T>>,
    key: u64,
    removed: bool,
}

impl<T: Send + Sync + 'static> Listener<T> {
    /// Remove this listener. The last removal from an active signal sends
    /// exactly one unsubscribe.
    pub async fn remove(mut self) -> Result<(), CoreError> {
        self.removed = true;
        match self.inner.detach(self.key) {
            Some(signal_id) => {
                send_unsubscribe(&self.inner.transport, &self.inner.path, signal_id).await
            }
            None => Ok(()),
        }
    }
}

impl<T: Send + Sync + 'static> Drop for Listener<T> {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Some(signal_id) = self.inner.detach(self.key) {
            spawn_unsubscribe(
                self.inner.transport.clone(),
                self.inner.path.clone(),
                signal_id,
            );
        }
    }
}

// ── SignalStream ─────────────────────────────────────────────────────

/// Listener that buffers decoded values in an unbounded channel.
pub struct SignalStream<T: Send + Sync + 'static> {
    rx: mpsc::UnboundedReceiver<Arc<T>>,
    listener: Option<Listener<T>>,
}

impl<T: Send + Sync + 'static> SignalStream<T> {
    /// Next value, or `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<Arc<T>> {
        self.rx.recv().await
    }

    /// Remove the underlying listener, unsubscribing if it was the last.
    pub async fn close(mut self) -> Result<(), CoreError> {
        match self.listener.take() {
            Some(listener) => listener.remove().await,
            None => Ok(()),
        }
    }
}

impl<T: Send + Sync + 'static> Stream for SignalStream<T> {
    type Item = Arc<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
