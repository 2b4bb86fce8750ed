// ── Device connection facade ──
//
// Owns the socket transport, the correlator and its dispatch task, the
// REST client, and the registration metadata for one device. Signals,
// properties and commands are all created through here.

use std::fmt::Display;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use sensorlink_api::{
    ConnectionState, Connector, Description, Inbound, RestClient, Transport, WebSocketConnector,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::command::Command;
use crate::config::DeviceConfig;
use crate::correlator::Correlator;
use crate::error::CoreError;
use crate::property::{Property, ReadProperty};
use crate::schema::{self, ObjectReport, Registrations};
use crate::signal::{Signal, SignalPath};

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ConnectionInner>`.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    config: DeviceConfig,
    transport: Transport,
    correlator: Arc<Correlator>,
    rest: RestClient,
    registrations: Registrations,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Connection {
    /// Connection over the device's websocket. Does NOT connect -- call
    /// [`connect()`](Self::connect), or let the first subscribe do it.
    pub fn new(config: DeviceConfig) -> Result<Self, CoreError> {
        let connector = WebSocketConnector::new(config.socket_url()?, config.subprotocol.clone());
        Self::with_connector(config, Arc::new(connector))
    }

    /// Connection over a caller-supplied socket connector.
    pub fn with_connector(
        config: DeviceConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, CoreError> {
        let rest = RestClient::new(config.rest_url()?, &config.rest_config())?;
        let (transport, inbound_rx) = Transport::new(connector, config.socket_config());
        let correlator = Arc::new(Correlator::new(transport.clone()));

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                config,
                transport,
                correlator,
                rest,
                registrations: Registrations::new(),
                inbound_rx: Mutex::new(Some(inbound_rx)),
                dispatcher: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    pub fn rest(&self) -> &RestClient {
        &self.inner.rest
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.inner.correlator
    }

    pub fn registrations(&self) -> &Registrations {
        &self.inner.registrations
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Open the socket and start dispatching inbound traffic.
    ///
    /// Idempotent; concurrent callers share one attempt.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.start_dispatcher();
        self.inner
            .transport
            .connect()
            .await
            .map_err(|e| CoreError::ConnectionFailed {
                address: self.inner.config.address.clone(),
                reason: e.to_string(),
            })?;
        info!(address = %self.inner.config.address, "connected to device");
        Ok(())
    }

    /// Close the socket. Signals keep their listeners; call
    /// [`Signal::resubscribe`] after reconnecting.
    pub async fn disconnect(&self) {
        self.inner.transport.disconnect().await;
        // Nothing survives on the device once the socket is closed.
        let signals = self.inner.correlator.reset_subscriptions();
        debug!(signals, "disconnected");
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.transport.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.transport.state_changes()
    }

    /// Notified after each socket replacement, once every signal whose
    /// subscription died with the old socket is back to `Unsubscribed`.
    ///
    /// Nothing is sent when reconnection gives up; watch
    /// [`state_changes()`](Self::state_changes) for `Disconnected`.
    pub fn reconnects(&self) -> broadcast::Receiver<u64> {
        self.inner.correlator.reconnects()
    }

    /// Spawn the dispatch task on first use.
    fn start_dispatcher(&self) {
        let rx = self
            .inner
            .inbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(rx) = rx {
            let correlator = Arc::clone(&self.inner.correlator);
            let cancel = self.inner.cancel.child_token();
            let handle = tokio::spawn(correlator.run(rx, cancel));
            *self
                .inner
                .dispatcher
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }
    }

    // ── Signals ──────────────────────────────────────────────────

    /// The signal `object:name`, decoding each event's
    /// `[timestamp, ...fields]` array with `decode`.
    ///
    /// Every call for the same path returns the same underlying signal;
    /// the decoder of the first call wins. Must be called from within a
    /// Tokio runtime.
    pub fn signal<T, F>(&self, object: &str, name: &str, decode: F) -> Result<Signal<T>, CoreError>
    where
        T: Send + Sync + 'static,
        F: Fn(&[Value]) -> Result<T, CoreError> + Send + Sync + 'static,
    {
        self.start_dispatcher();
        self.inner.registrations.note_signal(object, name);
        self.inner
            .correlator
            .signal(SignalPath::new(object, name), Arc::new(decode))
    }

    /// Signal whose event array deserializes directly into `T`
    /// (a tuple or a struct with sequence-compatible fields).
    pub fn signal_json<T>(&self, object: &str, name: &str) -> Result<Signal<T>, CoreError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.signal(object, name, |fields: &[Value]| {
            serde_json::from_value(Value::Array(fields.to_vec())).map_err(|e| CoreError::Decode {
                message: e.to_string(),
            })
        })
    }

    // ── Properties and commands ──────────────────────────────────

    /// Writable property parsed with `FromStr` and written with `Display`.
    pub fn property<T>(&self, path: &str, name: &str) -> Property<T>
    where
        T: FromStr + Display + 'static,
    {
        self.inner.registrations.note_property(path, name, true);
        Property::parsed(self.inner.rest.clone(), path, name)
    }

    pub fn read_property<T>(&self, path: &str, name: &str) -> ReadProperty<T>
    where
        T: FromStr + 'static,
    {
        self.inner.registrations.note_property(path, name, false);
        ReadProperty::parsed(self.inner.rest.clone(), path, name)
    }

    /// Writable string property; `null` reads as `None`.
    pub fn string_property(&self, path: &str, name: &str) -> Property<Option<String>> {
        self.inner.registrations.note_property(path, name, true);
        Property::string(self.inner.rest.clone(), path, name)
    }

    /// Writable property exchanged as JSON.
    pub fn json_property<T>(&self, path: &str, name: &str) -> Property<T>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        self.inner.registrations.note_property(path, name, true);
        Property::json(self.inner.rest.clone(), path, name)
    }

    pub fn command(&self, path: &str, name: &str) -> Command {
        self.inner.registrations.note_command(path, name);
        Command::new(self.inner.rest.clone(), path, name)
    }

    // ── Introspection ────────────────────────────────────────────

    /// The device's self-description of `path`.
    pub async fn describe(&self, path: &str) -> Result<Description, CoreError> {
        Ok(self.inner.rest.describe(path).await?)
    }

    /// Compare every binding created through this connection with the
    /// device's self-description.
    pub async fn check(&self) -> Result<Vec<ObjectReport>, CoreError> {
        schema::check(&self.inner.rest, &self.inner.registrations.snapshot()).await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.inner.config.address)
            .field("state", &self.state())
            .field("correlator", &self.inner.correlator)
            .finish_non_exhaustive()
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.transport.shutdown();
        if let Some(handle) = self
            .dispatcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
