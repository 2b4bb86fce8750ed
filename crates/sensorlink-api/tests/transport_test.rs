#![allow(clippy::unwrap_used)]
// Socket transport tests against an in-memory connector.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use sensorlink_api::{
    ConnectionState, Connector, Error, Inbound, Method, OutFrame, ReconnectConfig, Socket,
    SocketConfig, Transport, WireFrame,
};

// ── Helpers ─────────────────────────────────────────────────────────

const WAIT: Duration = Duration::from_secs(2);

/// Device side of one mock socket.
struct DeviceEnd {
    sent: mpsc::UnboundedReceiver<OutFrame>,
    frames: mpsc::UnboundedSender<Result<WireFrame, Error>>,
}

impl DeviceEnd {
    async fn next_request(&mut self) -> Value {
        loop {
            match tokio::time::timeout(WAIT, self.sent.recv()).await.unwrap() {
                Some(OutFrame::Text(text)) => return serde_json::from_str(&text).unwrap(),
                Some(OutFrame::Ping) => {}
                None => panic!("socket closed before a request arrived"),
            }
        }
    }

    fn push(&self, message: &Value) {
        let text = message.to_string();
        self.frames
            .send(Ok(WireFrame::complete(Bytes::from(text))))
            .unwrap();
    }

    fn push_raw(&self, frame: WireFrame) {
        self.frames.send(Ok(frame)).unwrap();
    }

    fn fail(&self) {
        self.frames
            .send(Err(Error::WebSocketIo("connection reset".into())))
            .unwrap();
    }
}

struct MockConnector {
    ends: mpsc::UnboundedSender<DeviceEnd>,
    connects: AtomicUsize,
    refuse: AtomicBool,
}

impl MockConnector {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DeviceEnd>) {
        let (ends, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            ends,
            connects: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        });
        (connector, rx)
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

fn test_config() -> SocketConfig {
    SocketConfig {
        keepalive: Duration::ZERO,
        close_grace: Duration::from_millis(100),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            max_retries: Some(3),
        },
    }
}

fn setup() -> (
    Transport,
    mpsc::UnboundedReceiver<Inbound>,
    Arc<MockConnector>,
    mpsc::UnboundedReceiver<DeviceEnd>,
) {
    let (connector, ends) = MockConnector::new();
    let (transport, inbound) = Transport::new(connector.clone(), test_config());
    (transport, inbound, connector, ends)
}

async fn next_end(ends: &mut mpsc::UnboundedReceiver<DeviceEnd>) -> DeviceEnd {
    tokio::time::timeout(WAIT, ends.recv()).await.unwrap().unwrap()
}

async fn next_inbound(rx: &mut mpsc::UnboundedReceiver<Inbound>) -> Inbound {
    tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

// ── Requests ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_connects_lazily_and_numbers_requests() {
    let (transport, _inbound, connector, mut ends) = setup();

    let first = transport.send("system/battery:changed", Method::Post, &[]).await.unwrap();
    let second = transport
        .send("system.label", Method::Post, &[json!("x"), json!(2)])
        .await
        .unwrap();
    assert_eq!((first, second), (1, 2));
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

    let mut dev = next_end(&mut ends).await;
    assert_eq!(
        dev.next_request().await,
        json!({"path": "//system/battery:changed", "id": 1, "method": "POST", "body": null})
    );
    assert_eq!(
        dev.next_request().await,
        json!({"path": "//system.label", "id": 2, "method": "POST", "body": ["x", 2]})
    );
    assert_eq!(transport.pending_requests(), 2);
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let (transport, _inbound, connector, _ends) = setup();

    let (a, b) = tokio::join!(transport.connect(), transport.connect());
    a.unwrap();
    b.unwrap();
    transport.connect().await.unwrap();

    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    assert_eq!(transport.state(), ConnectionState::Connected);
}

// ── Receive path ────────────────────────────────────────────────────

#[tokio::test]
async fn test_fragmented_ack_is_reassembled() {
    let (transport, mut inbound, _connector, mut ends) = setup();
    transport.connect().await.unwrap();
    let dev = next_end(&mut ends).await;

    dev.push_raw(WireFrame::fragment(Bytes::from_static(b"{\"id\":1,")));
    dev.push_raw(WireFrame::fragment(Bytes::from_static(b"\"body\"")));
    dev.push_raw(WireFrame::complete(Bytes::from_static(b":17}")));

    match next_inbound(&mut inbound).await {
        Inbound::Ack { id, body } => {
            assert_eq!(id, 1);
            assert_eq!(body, Some(json!(17)));
        }
        other => panic!("expected ack, got {other:?}"),
    }
}

#[tokio::test]
async fn test_device_error_quotes_the_request() {
    let (transport, mut inbound, _connector, mut ends) = setup();
    let id = transport.send("imu:changed", Method::Post, &[]).await.unwrap();
    let mut dev = next_end(&mut ends).await;
    dev.next_request().await;

    dev.push(&json!({"id": id, "error": 1, "message": "bad-arg"}));

    match next_inbound(&mut inbound).await {
        Inbound::Failed { id: failed, error } => {
            assert_eq!(failed, Some(id));
            assert!(error.to_string().contains("bad-arg"));
            match error {
                Error::Device { request, .. } => {
                    assert!(request.unwrap().contains("//imu:changed"));
                }
                other => panic!("expected device error, got {other:?}"),
            }
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(transport.pending_requests(), 0);
}

#[tokio::test]
async fn test_undecodable_message_is_dropped() {
    let (transport, mut inbound, _connector, mut ends) = setup();
    transport.connect().await.unwrap();
    let dev = next_end(&mut ends).await;

    dev.push_raw(WireFrame::complete(Bytes::from_static(b"{not json")));
    dev.push(&json!({"signal": 9, "body": [0.5, 1]}));

    match next_inbound(&mut inbound).await {
        Inbound::Event { signal, body } => {
            assert_eq!(signal, 9);
            assert_eq!(body, json!([0.5, 1]));
        }
        other => panic!("expected event, got {other:?}"),
    }
}

// ── Reconnect ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_socket_failure_reconnects() {
    let (transport, mut inbound, connector, mut ends) = setup();
    transport.connect().await.unwrap();
    let dev = next_end(&mut ends).await;

    dev.push_raw(WireFrame::fragment(Bytes::from_static(b"{\"id\":")));
    dev.fail();

    assert!(matches!(
        next_inbound(&mut inbound).await,
        Inbound::Reconnected { ref abandoned } if abandoned.is_empty()
    ));
    assert_eq!(transport.state(), ConnectionState::Connected);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);

    // The half-received message from the old socket must not leak into the new one.
    let mut dev = next_end(&mut ends).await;
    dev.push(&json!({"id": 4, "body": 1}));
    assert!(matches!(
        next_inbound(&mut inbound).await,
        Inbound::Ack { id: 4, .. }
    ));

    let id = transport.send("imu:changed", Method::Post, &[]).await.unwrap();
    assert_eq!(dev.next_request().await["id"], json!(id));
}

#[tokio::test]
async fn test_reconnect_lists_unanswered_requests() {
    let (transport, mut inbound, _connector, mut ends) = setup();
    transport.connect().await.unwrap();
    let mut dev = next_end(&mut ends).await;

    let answered = transport.send("imu:changed", Method::Post, &[]).await.unwrap();
    let lost = transport.send("system/battery:changed", Method::Post, &[]).await.unwrap();
    dev.next_request().await;
    dev.next_request().await;
    dev.push(&json!({"id": answered, "body": 3}));
    assert!(matches!(next_inbound(&mut inbound).await, Inbound::Ack { .. }));

    dev.fail();
    match next_inbound(&mut inbound).await {
        Inbound::Reconnected { abandoned } => assert_eq!(abandoned, vec![lost]),
        other => panic!("expected reconnect, got {other:?}"),
    }
    assert_eq!(transport.pending_requests(), 0);
    assert_eq!(transport.request_text(lost), None);

    // A request sent after the swap belongs to the new socket.
    let mut dev = next_end(&mut ends).await;
    let fresh = transport.send("imu:changed", Method::Post, &[]).await.unwrap();
    assert_eq!(dev.next_request().await["id"], json!(fresh));
    assert_eq!(transport.pending_requests(), 1);
}

#[tokio::test]
async fn test_gives_up_after_max_retries() {
    let (transport, mut inbound, connector, mut ends) = setup();
    transport.connect().await.unwrap();
    let mut dev = next_end(&mut ends).await;
    let id = transport.send("imu:changed", Method::Post, &[]).await.unwrap();
    dev.next_request().await;

    connector.refuse.store(true, Ordering::SeqCst);
    let mut states = transport.state_changes();
    dev.fail();

    tokio::time::timeout(
        WAIT,
        states.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(connector.connects.load(Ordering::SeqCst), 4);

    match next_inbound(&mut inbound).await {
        Inbound::Closed { abandoned } => assert_eq!(abandoned, vec![id]),
        other => panic!("expected close notice, got {other:?}"),
    }

    // The transport stays usable: the next request opens a fresh socket.
    connector.refuse.store(false, Ordering::SeqCst);
    transport.send("imu:changed", Method::Post, &[]).await.unwrap();
    assert_eq!(transport.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_connect_after_shutdown_fails() {
    let (transport, _inbound, connector, _ends) = setup();
    transport.shutdown();

    assert!(matches!(transport.connect().await, Err(Error::NotConnected)));
    assert!(transport.send("imu:changed", Method::Post, &[]).await.is_err());
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_disconnect_closes_and_resets() {
    let (transport, _inbound, _connector, mut ends) = setup();
    transport.send("imu:changed", Method::Post, &[]).await.unwrap();
    let mut dev = next_end(&mut ends).await;
    dev.next_request().await;

    transport.disconnect().await;

    assert_eq!(transport.state(), ConnectionState::Disconnected);
    assert_eq!(transport.pending_requests(), 0);
    assert!(tokio::time::timeout(WAIT, dev.sent.recv()).await.unwrap().is_none());
}
