//! WebSocket transport over `tokio-tungstenite`.
//!
//! Frames go out as binary messages. Inbound text and binary messages are
//! both forwarded as raw bytes; pings are answered by tungstenite itself.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use url::Url;

use crate::error::TransportError;

use super::{Transport, TransportEvent};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct WsTransport {
    url: Url,
    sink: Option<WsSink>,
    reader: Option<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            sink: None,
            reader: None,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(
        &mut self,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError> {
        self.close().await;

        debug!("Opening WebSocket to {}", self.url);
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(map_ws_error)?;
        let (sink, mut stream) = stream.split();

        if events.send(TransportEvent::Connected).await.is_err() {
            return Err(TransportError::Closed);
        }

        self.reader = Some(tokio::spawn(async move {
            while let Some(result) = stream.next().await {
                let event = match result {
                    Ok(WsMessage::Binary(data)) => TransportEvent::Data(data),
                    Ok(WsMessage::Text(text)) => TransportEvent::Data(text.into_bytes()),
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = events.send(TransportEvent::Error(map_ws_error(e))).await;
                        return;
                    }
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
            let _ = events.send(TransportEvent::Disconnected).await;
        }));
        self.sink = Some(sink);
        Ok(())
    }

    async fn send(&mut self, payload: &[u8], limit: Duration) -> Result<(), TransportError> {
        let sink = self.sink.as_mut().ok_or(TransportError::Closed)?;
        match timeout(limit, sink.send(WsMessage::Binary(payload.to_vec()))).await {
            Ok(result) => result.map_err(map_ws_error),
            Err(_) => Err(TransportError::Timeout(limit)),
        }
    }

    async fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut sink) = self.sink.take() {
            match timeout(CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => debug!("WebSocket closed"),
                Ok(Err(e)) => debug!("WebSocket close: {}", e),
                Err(_) => warn!("WebSocket close timed out"),
            }
        }
    }
}

fn map_ws_error(err: WsError) -> TransportError {
    match err {
        WsError::Io(e) => TransportError::Socket(e),
        WsError::Tls(e) => TransportError::Tls(e.to_string()),
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
        other => TransportError::Connect(other.to_string()),
    }
}
