//! Shared WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves. Both relay channels go through this module
//! rather than using `tokio-tungstenite` directly.
//!
//! The relay speaks JSON over text frames only; binary frames are skipped
//! at this layer so consumers never see them.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Received WebSocket message, reduced to what the relay protocol uses.
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame carrying one JSON envelope.
    Text(String),
    /// Ping frame with payload; the consumer must answer with a pong.
    Ping(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a UTF-8 text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails (connection closed, I/O error).
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    /// Send a pong frame in response to a ping.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    pub async fn send_pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Pong(data))
            .await
            .context("WebSocket send_pong failed")
    }

    /// Flush pending writes and close the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if closing fails.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Binary, pong, and raw frame variants are skipped internally; the
    /// relay never sends them as part of the protocol.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(WsMessage::Text(text.to_string())));
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    return Some(Ok(WsMessage::Ping(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    log::debug!("Skipping unexpected binary frame ({} bytes)", data.len());
                    continue;
                }
                Some(Ok(tungstenite::Message::Pong(_)))
                | Some(Ok(tungstenite::Message::Frame(_))) => {
                    continue;
                }
                Some(Err(e)) => {
                    return Some(Err(anyhow::anyhow!("WebSocket read error: {e}")));
                }
                None => return None,
            }
        }
    }
}

/// Connect to a WebSocket URL.
///
/// Performs the handshake and returns split (writer, reader) halves for
/// independent use in `tokio::select!` loops. The relay defines no extra
/// headers or subprotocols at this layer.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the WebSocket handshake fails.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("WebSocket connect to {url} failed"))?;

    let (sink, stream) = ws_stream.split();

    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Build a WebSocket URL from an HTTP(S) base URL and a path.
///
/// `https://` bases yield `wss://`, `http://` yields `ws://`; `ws://` and
/// `wss://` bases pass through unchanged. Host and port are inherited from
/// the base.
#[must_use]
pub fn ws_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let scheme_converted = if base.starts_with("wss://") || base.starts_with("ws://") {
        base.to_string()
    } else if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{base}")
    };
    format!("{scheme_converted}{path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_https() {
        assert_eq!(
            ws_url("https://hub.example.com", "/ws/events"),
            "wss://hub.example.com/ws/events"
        );
    }

    #[test]
    fn test_ws_url_http() {
        assert_eq!(
            ws_url("http://localhost:8080", "/ws/control"),
            "ws://localhost:8080/ws/control"
        );
    }

    #[test]
    fn test_ws_url_trailing_slash() {
        assert_eq!(
            ws_url("http://localhost:8080/", "/ws/events"),
            "ws://localhost:8080/ws/events"
        );
    }

    #[test]
    fn test_ws_url_ws_passthrough() {
        assert_eq!(
            ws_url("ws://127.0.0.1:9000", "/ws/events"),
            "ws://127.0.0.1:9000/ws/events"
        );
    }

    #[test]
    fn test_ws_url_bare_host() {
        assert_eq!(ws_url("127.0.0.1:8080", "/ws/events"), "ws://127.0.0.1:8080/ws/events");
    }

    #[tokio::test]
    async fn test_connect_invalid_url_returns_error() {
        let result = connect("not-a-url").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_unreachable_host_returns_error() {
        let result = connect("ws://127.0.0.1:1/ws/events").await;
        assert!(result.is_err());
    }
}
