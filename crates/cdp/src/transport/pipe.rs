//! Local pipe transport: two byte streams carrying newline-delimited frames.
//!
//! Used when the browser is driven over inherited file descriptors instead
//! of a debug port. One JSON frame per line, no length prefix.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::{FrameReceiver, Transport};
use crate::error::Result;

struct PipeTransport<W> {
    writer: Mutex<W>,
    reader: JoinHandle<()>,
}

/// Wrap a reader/writer pair into a transport.
pub fn open<R, W>(reader: R, writer: W) -> (Arc<dyn Transport>, FrameReceiver)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();

    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.is_empty() {
                        continue;
                    }
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("pipe closed by peer");
                    break;
                }
                Err(e) => {
                    error!("pipe read error: {e}");
                    break;
                }
            }
        }
    });

    (Arc::new(PipeTransport { writer: Mutex::new(writer), reader }), rx)
}

#[async_trait]
impl<W> Transport for PipeTransport<W>
where
    W: AsyncWrite + Unpin + Send + Sync,
{
    async fn send(&self, frame: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let result = self.writer.lock().await.shutdown().await;
        self.reader.abort();
        result?;
        Ok(())
    }
}

impl<W> Drop for PipeTransport<W> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
