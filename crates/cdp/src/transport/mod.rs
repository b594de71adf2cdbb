//! Pluggable frame transports.
//!
//! A transport owns the write half of its connection; the read half runs in
//! a spawned task that pushes inbound text frames into an unbounded channel.
//! When the peer goes away the task exits and drops its sender, which ends
//! the receiver stream - that is the only failure signal the session needs.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

pub mod pipe;
pub mod websocket;

/// Stream of inbound text frames, one `String` per frame.
pub type FrameReceiver = mpsc::UnboundedReceiver<String>;

/// Send half of a connection carrying JSON text frames.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Enqueue one frame on the wire. Returns once the frame is handed to
    /// the outbound buffer.
    async fn send(&self, frame: &str) -> Result<()>;

    /// Close the writer and stop the reader task.
    async fn close(&self) -> Result<()>;
}

/// Suspend the current task, reporting how long it actually slept.
pub async fn sleep(duration: Duration) -> Duration {
    let start = Instant::now();
    tokio::time::sleep(duration).await;
    start.elapsed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_reports_elapsed_time() {
        let elapsed = sleep(Duration::from_millis(20)).await;
        assert!(elapsed >= Duration::from_millis(20));
    }
}
