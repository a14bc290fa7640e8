//! Socket seam between the forwarder and the network.
//!
//! The forwarder only sees [`FrameSink`] and [`FrameSource`]. The WebSocket
//! implementations wrap the two halves of a split tokio-tungstenite stream.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::{self, http};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};
use url::Url;

use crate::core::error::{StreamError, StreamResult};

/// Response header carrying the server-side log id.
pub const LOG_ID_HEADER: &str = "X-Tt-Logid";

/// Outbound half of a session socket.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one encoded frame as a single binary message.
    async fn send(&mut self, frame: Bytes) -> StreamResult<()>;

    /// Close the socket. Closing an already closed socket is not an error.
    async fn close(&mut self) -> StreamResult<()>;
}

/// Inbound half of a session socket.
#[async_trait]
pub trait FrameSource: Send {
    /// Next binary message, or `None` once the peer has closed.
    ///
    /// Must be cancel-safe: dropping the future loses no message.
    async fn recv(&mut self) -> Option<StreamResult<Bytes>>;
}

// =============================================================================
// WebSocket implementation
// =============================================================================

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsFrameSink<S> {
    inner: S,
}

impl<S> WsFrameSink<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> FrameSink for WsFrameSink<S>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin + Send,
{
    async fn send(&mut self, frame: Bytes) -> StreamResult<()> {
        self.inner
            .send(Message::Binary(frame))
            .await
            .map_err(|e| StreamError::ConnectionLost(format!("Failed to send frame: {e}")))
    }

    async fn close(&mut self) -> StreamResult<()> {
        match self.inner.close().await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(StreamError::ConnectionLost(format!(
                "Failed to close socket: {e}"
            ))),
        }
    }
}

pub struct WsFrameSource<S> {
    inner: S,
}

impl<S> WsFrameSource<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> FrameSource for WsFrameSource<S>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin + Send,
{
    async fn recv(&mut self) -> Option<StreamResult<Bytes>> {
        loop {
            let message = match self.inner.next().await? {
                Ok(message) => message,
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(e) => {
                    return Some(Err(StreamError::ConnectionLost(format!(
                        "WebSocket error: {e}"
                    ))));
                }
            };

            match message {
                Message::Binary(data) => return Some(Ok(data)),
                Message::Text(text) => {
                    return Some(Err(StreamError::ProtocolError(format!(
                        "Unexpected text message: {}",
                        text.as_str()
                    ))));
                }
                Message::Close(close_frame) => {
                    debug!("WebSocket closed by peer: {:?}", close_frame);
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }
}

/// A connected socket split for the forwarder.
pub struct WsConnection {
    pub sink: WsFrameSink<futures::stream::SplitSink<WsStream, Message>>,
    pub source: WsFrameSource<futures::stream::SplitStream<WsStream>>,
    /// Server log id from the upgrade response, when present.
    pub log_id: Option<String>,
}

/// Open a WebSocket to `url`, sending `headers` with the upgrade request.
pub async fn connect(
    url: &str,
    headers: &[(&str, String)],
    connect_timeout: Duration,
) -> StreamResult<WsConnection> {
    let parsed = Url::parse(url)
        .map_err(|e| StreamError::Configuration(format!("Invalid URL '{url}': {e}")))?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(StreamError::Configuration(format!(
            "URL '{url}' must use the ws or wss scheme"
        )));
    }
    let host = match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => {
            return Err(StreamError::Configuration(format!(
                "URL '{url}' has no host"
            )));
        }
    };

    let mut builder = http::Request::builder()
        .method("GET")
        .uri(parsed.as_str())
        .header("Host", host)
        .header("Upgrade", "websocket")
        .header("Connection", "upgrade")
        .header("Sec-WebSocket-Key", generate_key())
        .header("Sec-WebSocket-Version", "13");
    for (name, value) in headers {
        builder = builder.header(*name, value.as_str());
    }
    let request = builder.body(()).map_err(|e| {
        StreamError::ConnectionFailed(format!("Failed to create WebSocket request: {e}"))
    })?;

    let (ws_stream, response) = tokio::time::timeout(connect_timeout, connect_async(request))
        .await
        .map_err(|_| {
            StreamError::ConnectionFailed(format!(
                "Connecting to {url} timed out after {connect_timeout:?}"
            ))
        })?
        .map_err(|e| StreamError::ConnectionFailed(format!("Failed to connect to {url}: {e}")))?;

    let log_id = response
        .headers()
        .get(LOG_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    info!(url = %url, log_id = ?log_id, "Connected to speech service");

    let (sink, source) = ws_stream.split();
    Ok(WsConnection {
        sink: WsFrameSink::new(sink),
        source: WsFrameSource::new(source),
        log_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_http_scheme() {
        let result = connect("http://localhost:1/ws", &[], Duration::from_millis(100)).await;
        assert!(matches!(result, Err(StreamError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_failed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect(&format!("ws://{addr}/ws"), &[], Duration::from_secs(2)).await;
        assert!(matches!(result, Err(StreamError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_source_skips_control_frames() {
        let messages: Vec<Result<Message, tungstenite::Error>> = vec![
            Ok(Message::Ping(Bytes::new())),
            Ok(Message::Binary(Bytes::from_static(b"frame"))),
            Ok(Message::Close(None)),
        ];
        let mut source = WsFrameSource::new(futures::stream::iter(messages));

        assert_eq!(source.recv().await.unwrap().unwrap(), Bytes::from_static(b"frame"));
        assert!(source.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_source_rejects_text() {
        let messages: Vec<Result<Message, tungstenite::Error>> =
            vec![Ok(Message::Text("hello".into()))];
        let mut source = WsFrameSource::new(futures::stream::iter(messages));
        assert!(matches!(
            source.recv().await,
            Some(Err(StreamError::ProtocolError(_)))
        ));
    }
}
