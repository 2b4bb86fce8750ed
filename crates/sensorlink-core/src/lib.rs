//! Device protocol layer on top of `sensorlink-api`.
//!
//! - **[`Connection`]**: Facade over one device: owns the socket
//!   [`Transport`](sensorlink_api::Transport), the REST client, and the
//!   [`Correlator`](correlator::Correlator) that routes acknowledgements and
//!   push events back to their signals.
//!
//! - **[`Signal<T>`]**: One device-side subscription shared by any number of
//!   local listeners. The first listener subscribes, the last one to leave
//!   unsubscribes. Events are decoded once and fanned out in registration
//!   order.
//!
//! - **[`Property<T>`] / [`ReadProperty<T>`] / [`Command`]**: Typed REST
//!   bindings for an `(object path, name)` pair.
//!
//! - **[`schema`]**: Compares locally registered bindings against the
//!   device's self-description.

pub mod command;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod property;
pub mod schema;
pub mod signal;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::Command;
pub use config::DeviceConfig;
pub use connection::Connection;
pub use error::CoreError;
pub use property::{Property, ReadProperty};
pub use schema::{ObjectRegistration, ObjectReport, Registrations};
pub use signal::{Listener, Signal, SignalPath, SignalStream, SubscriptionState};

pub use sensorlink_api::{ConnectionState, Description, Method, ReconnectConfig};
