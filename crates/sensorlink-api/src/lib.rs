// sensorlink-api: Async wire layer for networked wearable sensor devices

pub mod describe;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod rest;
pub mod transport;
pub mod websocket;

pub use describe::{ActionDescription, Description, PropertyDescription, SignalDescription};
pub use error::Error;
pub use frame::{FrameReassembler, WireFrame};
pub use protocol::{Envelope, InboundMessage, Method, OutboundMessage};
pub use rest::{RestClient, RestConfig};
pub use transport::{
    ConnectionState, Connector, Inbound, OutFrame, ReconnectConfig, Socket, SocketConfig,
    Transport,
};
pub use websocket::WebSocketConnector;
