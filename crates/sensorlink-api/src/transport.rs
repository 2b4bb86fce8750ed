//! Persistent device socket with serialized writes and auto-reconnect.
//!
//! A [`Transport`] owns exactly one live socket at a time. A single
//! background task reads frames, reassembles and decodes them, and forwards
//! the result through an unbounded channel in arrival order. On any socket
//! failure the task discards the socket, opens a new one with exponential
//! backoff + jitter, and emits [`Inbound::Reconnected`] naming the requests
//! that died with the old socket. Subscriptions that were active on the old
//! socket are not re-issued; consumers of the channel decide what to do
//! about the gap. When retries run out the loop emits [`Inbound::Closed`]
//! and stops.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sensorlink_api::{Method, SocketConfig, Transport, WebSocketConnector};
//!
//! let connector = WebSocketConnector::new(url, "json");
//! let (transport, mut inbound) = Transport::new(Arc::new(connector), SocketConfig::default());
//!
//! transport.connect().await?;
//! let id = transport.send("system/battery:level", Method::Post, &[]).await?;
//!
//! while let Some(msg) = inbound.recv().await {
//!     println!("{msg:?}");
//! }
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::Error;
use crate::frame::{FrameReassembler, WireFrame, decode_message};
use crate::protocol::{Envelope, Method, OutboundMessage};

// ── Socket abstraction ───────────────────────────────────────────────

/// Frames written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutFrame {
    Text(String),
    Ping,
}

pub type FrameSink = Pin<Box<dyn Sink<OutFrame, Error = Error> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<WireFrame, Error>> + Send>>;

/// A freshly opened socket, split into its write and read halves.
pub struct Socket {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens sockets to one device. Called once per connect and once per
/// reconnect attempt; every call must produce a brand-new socket.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, Result<Socket, Error>>;
}

// ── Configuration ────────────────────────────────────────────────────

/// Exponential backoff configuration for socket reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

/// Socket lifecycle tuning.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Interval between keep-alive pings. `Duration::ZERO` disables them.
    pub keepalive: Duration,
    /// How long `disconnect()` waits for the receive loop and close handshake.
    pub close_grace: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            keepalive: Duration::from_secs(10),
            close_grace: Duration::from_millis(500),
            reconnect: ReconnectConfig::default(),
        }
    }
}

// ── State and inbound traffic ────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Decoded traffic forwarded by the receive loop, in arrival order.
#[derive(Debug)]
pub enum Inbound {
    /// Answer to request `id`.
    Ack { id: u64, body: Option<Value> },
    /// Push event for device-assigned subscription `signal`.
    Event { signal: u64, body: Value },
    /// Device error envelope, already converted to [`Error::Device`].
    Failed { id: Option<u64>, error: Error },
    /// A new socket replaced a failed one. Device-side state from the old
    /// socket is gone. `abandoned` holds the ids of requests written on the
    /// old socket that were never answered; requests still waiting to be
    /// written go out on the new socket and are not listed.
    Reconnected { abandoned: Vec<u64> },
    /// Reconnection gave up and the state is `Disconnected`. `abandoned`
    /// as for `Reconnected`.
    Closed { abandoned: Vec<u64> },
}

// ── Transport ────────────────────────────────────────────────────────

/// Handle to the device socket. Cheaply cloneable.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    connector: Arc<dyn Connector>,
    config: SocketConfig,
    state: watch::Sender<ConnectionState>,
    /// Write half of the live socket. The lock serializes all writers.
    writer: Mutex<Option<FrameSink>>,
    next_id: AtomicU64,
    /// Outgoing text by request id, kept until the first correlated
    /// response so device errors can quote the request. Only touched while
    /// `writer` is locked, so every entry belongs to the current socket.
    sent: DashMap<u64, String>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    cancel: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    /// Child token for the current receive loop, replaced on every connect.
    session: Option<CancellationToken>,
    reader: Option<JoinHandle<()>>,
}

impl Transport {
    /// Create a transport and the receiver for its inbound traffic.
    /// Does NOT connect -- call [`connect()`](Self::connect).
    pub fn new(
        connector: Arc<dyn Connector>,
        config: SocketConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let transport = Self {
            inner: Arc::new(TransportInner {
                connector,
                config,
                state,
                writer: Mutex::new(None),
                next_id: AtomicU64::new(1),
                sent: DashMap::new(),
                inbound_tx,
                cancel: CancellationToken::new(),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        };
        (transport, inbound_rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open the socket and spawn the receive loop.
    ///
    /// Idempotent: if a connect is already in flight the caller waits for
    /// it; if the loop is already running (connected or reconnecting) the
    /// caller waits for it to settle.
    ///
    /// Fails with [`Error::NotConnected`] after [`shutdown()`](Self::shutdown).
    pub async fn connect(&self) -> Result<(), Error> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::NotConnected);
        }
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let running = lifecycle.reader.as_ref().is_some_and(|h| !h.is_finished());
        if running && self.state() != ConnectionState::Disconnected {
            drop(lifecycle);
            return self.settled().await;
        }
        if let Some(reader) = lifecycle.reader.take() {
            // Either finished or on its way out after running out of retries.
            let _ = reader.await;
        }

        self.inner.state.send_replace(ConnectionState::Connecting);
        info!("Connecting to device socket");

        let socket = match self.inner.connector.connect().await {
            Ok(socket) => socket,
            Err(e) => {
                self.inner.state.send_replace(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        *self.inner.writer.lock().await = Some(socket.sink);

        let session = self.inner.cancel.child_token();
        let inner = Arc::clone(&self.inner);
        let token = session.clone();
        lifecycle.reader = Some(tokio::spawn(async move {
            receive_loop(inner, socket.stream, token).await;
        }));
        lifecycle.session = Some(session);

        self.inner.state.send_replace(ConnectionState::Connected);
        info!("Device socket connected");
        Ok(())
    }

    /// Stop the receive loop and close the socket.
    ///
    /// Waits up to `close_grace` for the loop to stop before aborting it.
    /// Close errors are logged and swallowed.
    pub async fn disconnect(&self) {
        let (session, reader) = {
            let mut lifecycle = self.inner.lifecycle.lock().await;
            (lifecycle.session.take(), lifecycle.reader.take())
        };
        let grace = self.inner.config.close_grace;

        if let Some(token) = session {
            token.cancel();
        }
        if let Some(mut handle) = reader {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!("receive loop did not stop within grace period, aborting");
                handle.abort();
            }
        }

        let sink = self.inner.writer.lock().await.take();
        if let Some(mut sink) = sink {
            match tokio::time::timeout(grace, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "socket close failed (ignored)"),
                Err(_) => debug!("socket close timed out (ignored)"),
            }
        }

        self.inner.sent.clear();
        self.inner.state.send_replace(ConnectionState::Disconnected);
        info!("Device socket disconnected");
    }

    /// Permanently stop the transport without waiting: the receive loop
    /// exits and later connects fail with [`Error::NotConnected`].
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    // ── Requests ─────────────────────────────────────────────────────

    /// Reserve the next request id without sending anything.
    ///
    /// Lets callers register the id for correlation before the request
    /// hits the wire, so a fast acknowledgement cannot be missed.
    pub fn allocate_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send a request and return its freshly assigned id.
    pub async fn send(&self, path: &str, method: Method, params: &[Value]) -> Result<u64, Error> {
        let id = self.allocate_id();
        self.send_as(id, path, method, params).await?;
        Ok(id)
    }

    /// Send a request under an id obtained from [`allocate_id`](Self::allocate_id).
    pub async fn send_as(
        &self,
        id: u64,
        path: &str,
        method: Method,
        params: &[Value],
    ) -> Result<(), Error> {
        let text = serde_json::to_string(&OutboundMessage::new(path, id, method, params))?;
        loop {
            self.ensure_connected().await?;
            debug!(id, path, ?method, "sending request");
            match self.inner.write_request(id, &text).await {
                // The socket failed between the state check and the write;
                // wait for its replacement.
                Err(Error::NotConnected) if self.state() == ConnectionState::Connecting => {
                    debug!(id, "socket being replaced, retrying on the new one");
                }
                other => return other,
            }
        }
    }

    /// Outgoing text for a request still awaiting its first response.
    pub fn request_text(&self, id: u64) -> Option<String> {
        self.inner.sent.get(&id).map(|r| r.value().clone())
    }

    /// Number of requests sent but not yet answered.
    pub fn pending_requests(&self) -> usize {
        self.inner.sent.len()
    }

    async fn ensure_connected(&self) -> Result<(), Error> {
        let current = self.state();
        match current {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Disconnected => self.connect().await,
            ConnectionState::Connecting => self.settled().await,
        }
    }

    /// Wait until the state leaves `Connecting`.
    async fn settled(&self) -> Result<(), Error> {
        let mut rx = self.inner.state.subscribe();
        let connected = matches!(
            *rx.wait_for(|s| *s != ConnectionState::Connecting)
                .await
                .map_err(|_| Error::NotConnected)?,
            ConnectionState::Connected
        );
        if connected {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }
}

impl TransportInner {
    async fn write(&self, frame: OutFrame) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(Error::NotConnected)?;
        sink.send(frame).await
    }

    /// Write a request and record its text, both under the writer lock.
    async fn write_request(&self, id: u64, text: &str) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(Error::NotConnected)?;
        self.sent.insert(id, text.to_owned());
        let result = sink.send(OutFrame::Text(text.to_owned())).await;
        if result.is_err() {
            self.sent.remove(&id);
        }
        result
    }

    /// Drop the writer and return the ids of every unanswered request it
    /// carried.
    async fn discard_socket(&self) -> Vec<u64> {
        let mut writer = self.writer.lock().await;
        writer.take();
        let mut abandoned: Vec<u64> = self.sent.iter().map(|entry| *entry.key()).collect();
        self.sent.clear();
        abandoned.sort_unstable();
        abandoned
    }

    /// Decode one reassembled message and forward it.
    fn dispatch(&self, raw: &[u8]) {
        let message = match decode_message(raw) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "dropping undecodable socket message");
                return;
            }
        };

        let inbound = match message.classify() {
            Envelope::Failure { id, code, message } => {
                let request = id.and_then(|id| self.sent.remove(&id)).map(|(_, text)| text);
                warn!(
                    ?id,
                    code,
                    message = %message,
                    request = request.as_deref().unwrap_or("<unknown>"),
                    "device reported an error"
                );
                Inbound::Failed {
                    id,
                    error: Error::Device {
                        code,
                        message,
                        id,
                        request,
                    },
                }
            }
            Envelope::Ack { id, body } => {
                self.sent.remove(&id);
                Inbound::Ack { id, body }
            }
            Envelope::Event { signal, body } => Inbound::Event { signal, body },
            Envelope::Unroutable => {
                debug!("dropping socket message with neither id nor signal");
                return;
            }
        };

        // Ignore send errors -- just means nobody is consuming right now
        let _ = self.inbound_tx.send(inbound);
    }

    /// Replace a failed socket. Returns the new read half, or `None` when
    /// cancelled or out of retries.
    async fn reconnect(&self, cancel: &CancellationToken) -> Option<FrameStream> {
        self.state.send_replace(ConnectionState::Connecting);
        let abandoned = self.discard_socket().await;
        if !abandoned.is_empty() {
            debug!(?abandoned, "requests lost with the old socket");
        }

        let mut attempt: u32 = 0;
        loop {
            if let Some(max) = self.config.reconnect.max_retries {
                if attempt >= max {
                    error!(max_retries = max, "socket reconnection limit reached, giving up");
                    self.state.send_replace(ConnectionState::Disconnected);
                    let _ = self.inbound_tx.send(Inbound::Closed { abandoned });
                    return None;
                }
            }

            let delay = calculate_backoff(attempt, &self.config.reconnect);
            debug!(delay_ms = delay.as_millis(), attempt, "waiting before reconnect");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                result = self.connector.connect() => result,
            };

            match result {
                Ok(socket) => {
                    *self.writer.lock().await = Some(socket.sink);
                    self.state.send_replace(ConnectionState::Connected);
                    info!(attempt, "device socket reconnected");
                    let _ = self.inbound_tx.send(Inbound::Reconnected { abandoned });
                    return Some(socket.stream);
                }
                Err(e) => warn!(error = %e, attempt, "reconnect attempt failed"),
            }
        }
    }
}

// ── Receive loop ─────────────────────────────────────────────────────

async fn receive_loop(inner: Arc<TransportInner>, mut stream: FrameStream, cancel: CancellationToken) {
    let mut reassembler = FrameReassembler::new();
    let mut keepalive = keepalive_interval(inner.config.keepalive);

    loop {
        let step = tokio::select! {
            biased;
            () = cancel.cancelled() => Step::Stop,
            frame = stream.next() => Step::Frame(frame),
            () = tick(&mut keepalive) => Step::Ping,
        };

        match step {
            Step::Stop => break,
            Step::Ping => {
                trace!("keep-alive ping");
                if let Err(e) = inner.write(OutFrame::Ping).await {
                    debug!(error = %e, "keep-alive ping failed");
                }
            }
            Step::Frame(Some(Ok(frame))) => {
                if let Some(message) = reassembler.push(frame) {
                    inner.dispatch(&message);
                }
            }
            Step::Frame(failure) => {
                let e = failure.and_then(Result::err).unwrap_or(Error::WebSocketClosed {
                    code: 1006,
                    reason: "stream ended".into(),
                });
                warn!(error = %e, "device socket failed, reconnecting");
                reassembler.clear();
                match inner.reconnect(&cancel).await {
                    Some(next) => {
                        stream = next;
                        keepalive = keepalive_interval(inner.config.keepalive);
                    }
                    None => break,
                }
            }
        }
    }

    debug!("receive loop exiting");
}

enum Step {
    Stop,
    Frame(Option<Result<WireFrame, Error>>),
    Ping,
}

fn keepalive_interval(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25%, deterministic in the attempt number.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(32)).unwrap_or(32);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
