use std::pin::Pin;

use futures_util::future::{self, BoxFuture};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::TransportError;

pub type BoxSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type BoxStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// An established session: outbound text frames and inbound text frames.
/// The stream ending means the peer closed the session.
pub struct Socket {
    pub sink: BoxSink,
    pub stream: BoxStream,
}

/// Opens sessions for a [`Transport`](crate::Transport). Called once by
/// `connect()` and once per reconnection attempt.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, Result<Socket, TransportError>>;
}

/// WebSocket sessions via tokio-tungstenite. Only text frames are surfaced;
/// ping/pong is answered by the protocol layer.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Socket, TransportError>> {
        Box::pin(async move {
            let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            debug!("WebSocket handshake with {} complete", self.url);

            let (sink, stream) = ws.split();
            let sink = sink
                .sink_map_err(|e| TransportError::Socket(e.to_string()))
                .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text.into()))));
            let stream = stream.filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::Socket(e.to_string()))),
                })
            });

            Ok(Socket {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        })
    }
}

/// Gateway URL for an HTTP base URL and a session token.
pub fn gateway_url(server_url: &str, token: &str) -> String {
    let base = server_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/gateway?token={token}")
}
