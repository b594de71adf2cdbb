//! WebSocket transport over TCP.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error};

use super::{FrameReceiver, Transport};
use crate::error::Result;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

struct WebSocketTransport {
    sink: Mutex<WsSink>,
    reader: JoinHandle<()>,
}

/// Open a WebSocket to the given `ws://` URL.
///
/// Only text frames are surfaced; ping/pong is handled by the library and
/// binary frames are ignored (CDP never sends them).
pub async fn connect(url: &str) -> Result<(Arc<dyn Transport>, FrameReceiver)> {
    let (stream, _) = connect_async(url).await?;
    let (sink, mut source) = stream.split();
    let (tx, rx) = mpsc::unbounded_channel();

    let reader = tokio::spawn(async move {
        while let Some(msg) = source.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if tx.send(text).is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!("websocket closed by peer");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("websocket read error: {e}");
                    break;
                }
            }
        }
    });

    debug!("websocket transport connected to {url}");
    Ok((Arc::new(WebSocketTransport { sink: Mutex::new(sink), reader }), rx))
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, frame: &str) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let result = self.sink.lock().await.close().await;
        self.reader.abort();
        match result {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
