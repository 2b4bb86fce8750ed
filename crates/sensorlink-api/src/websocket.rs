//! WebSocket [`Connector`] for the device's JSON socket.

use bytes::Bytes;
use futures_util::future::{BoxFuture, ready};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use url::Url;

use crate::error::Error;
use crate::frame::WireFrame;
use crate::transport::{Connector, OutFrame, Socket};

/// Subprotocol the device expects on the upgrade request.
pub const DEFAULT_SUBPROTOCOL: &str = "json";

/// Opens `ws://` sockets to a single device endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
    subprotocol: String,
}

impl WebSocketConnector {
    pub fn new(url: Url, subprotocol: impl Into<String>) -> Self {
        Self {
            url,
            subprotocol: subprotocol.into(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn open(&self) -> Result<Socket, Error> {
        tracing::info!(url = %self.url, subprotocol = %self.subprotocol, "Connecting to WebSocket");

        let uri: tungstenite::http::Uri = self
            .url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

        let request = ClientRequestBuilder::new(uri).with_sub_protocol(self.subprotocol.clone());

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        tracing::info!("WebSocket connected");

        let (write, read) = ws_stream.split();

        let sink = write.with(|frame: OutFrame| ready(Ok::<Message, Error>(to_message(frame))));
        let stream = read.filter_map(|msg| ready(to_frame(msg)));

        Ok(Socket {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Socket, Error>> {
        Box::pin(self.open())
    }
}

fn to_message(frame: OutFrame) -> Message {
    match frame {
        OutFrame::Text(text) => Message::text(text),
        OutFrame::Ping => Message::Ping(Bytes::new()),
    }
}

/// Map a tungstenite message onto the transport's frame stream.
///
/// tungstenite reassembles continuation frames itself, so every data
/// message arrives complete. Control frames are dropped; pong replies are
/// handled by tungstenite.
fn to_frame(msg: Result<Message, tungstenite::Error>) -> Option<Result<WireFrame, Error>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(WireFrame::complete(Bytes::copy_from_slice(
            text.as_bytes(),
        )))),
        Ok(Message::Binary(data)) => Some(Ok(WireFrame::complete(data))),
        Ok(Message::Close(frame)) => {
            let (code, reason) = frame.map_or((1005, String::new()), |cf| {
                (u16::from(cf.code), cf.reason.to_string())
            });
            tracing::info!(code, reason = %reason, "WebSocket close frame received");
            Some(Err(Error::WebSocketClosed { code, reason }))
        }
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e) => Some(Err(e.into())),
    }
}
