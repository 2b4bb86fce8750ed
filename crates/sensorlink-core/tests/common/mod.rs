#![allow(dead_code, clippy::unwrap_used)]
// Shared fixtures: an in-memory socket connector and a connection wired to it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use sensorlink_api::{Connector, Error, OutFrame, Socket, WireFrame};
use sensorlink_core::{Connection, DeviceConfig, ReconnectConfig};

pub const WAIT: Duration = Duration::from_secs(2);
pub const QUIET: Duration = Duration::from_millis(50);

// ── Device side of a mock socket ────────────────────────────────────

pub struct DeviceEnd {
    sent: mpsc::UnboundedReceiver<OutFrame>,
    frames: mpsc::UnboundedSender<Result<WireFrame, Error>>,
}

impl DeviceEnd {
    /// Next request written by the client, as JSON. Pings are skipped.
    pub async fn next_request(&mut self) -> Value {
        loop {
            match tokio::time::timeout(WAIT, self.sent.recv()).await.unwrap() {
                Some(OutFrame::Text(text)) => return serde_json::from_str(&text).unwrap(),
                Some(OutFrame::Ping) => {}
                None => panic!("socket closed before a request arrived"),
            }
        }
    }

    /// Assert the client writes nothing more for a short while.
    pub async fn assert_quiet(&mut self) {
        tokio::time::sleep(QUIET).await;
        while let Ok(frame) = self.sent.try_recv() {
            if let OutFrame::Text(text) = frame {
                panic!("unexpected request: {text}");
            }
        }
    }

    pub fn push(&self, message: &Value) {
        self.frames
            .send(Ok(WireFrame::complete(Bytes::from(message.to_string()))))
            .unwrap();
    }

    /// Acknowledge `request` with `body`.
    pub fn ack(&self, request: &Value, body: Value) {
        self.push(&json!({ "id": request["id"], "body": body }));
    }

    pub fn event(&self, signal_id: u64, body: Value) {
        self.push(&json!({ "signal": signal_id, "body": body }));
    }

    pub fn fail(&self) {
        let _ = self
            .frames
            .send(Err(Error::WebSocketIo("connection reset".into())));
    }
}

// ── Connector ───────────────────────────────────────────────────────

pub struct MockConnector {
    ends: mpsc::UnboundedSender<DeviceEnd>,
    pub connects: AtomicUsize,
    refuse: AtomicBool,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DeviceEnd>) {
        let (ends, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            ends,
            connects: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        });
        (connector, rx)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Make every following connect attempt fail (or succeed again).
    pub fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl Connector for MockConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Socket, Error>> {
        Box::pin(async move {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse.load(Ordering::SeqCst) {
                return Err(Error::WebSocketConnect("refused".into()));
            }

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            let sink = futures_util::sink::unfold(out_tx, |tx, frame: OutFrame| async move {
                tx.send(frame).map_err(|_| Error::NotConnected)?;
                Ok::<_, Error>(tx)
            });

            let _ = self.ends.send(DeviceEnd {
                sent: out_rx,
                frames: in_tx,
            });
            Ok(Socket {
                sink: Box::pin(sink),
                stream: Box::pin(UnboundedReceiverStream::new(in_rx)),
            })
        })
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub fn test_config(address: &str) -> DeviceConfig {
    DeviceConfig {
        keepalive: Duration::ZERO,
        close_grace: Duration::from_millis(100),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            max_retries: Some(5),
        },
        ..DeviceConfig::new(address)
    }
}

pub struct Harness {
    pub conn: Connection,
    pub connector: Arc<MockConnector>,
    ends: mpsc::UnboundedReceiver<DeviceEnd>,
}

impl Harness {
    /// Connection whose REST side points at an unused local port.
    pub fn new() -> Self {
        Self::with_address("127.0.0.1:9")
    }

    pub fn with_address(address: &str) -> Self {
        let (connector, ends) = MockConnector::new();
        let conn = Connection::with_connector(test_config(address), connector.clone()).unwrap();
        Self {
            conn,
            connector,
            ends,
        }
    }

    /// Connect and return the device side of the new socket.
    pub async fn connect(&mut self) -> DeviceEnd {
        self.conn.connect().await.unwrap();
        self.next_socket().await
    }

    /// Device side of the next socket the transport opens.
    pub async fn next_socket(&mut self) -> DeviceEnd {
        tokio::time::timeout(WAIT, self.ends.recv())
            .await
            .unwrap()
            .unwrap()
    }
}
