//! Client-side dispatcher for the Chrome DevTools Protocol.
//!
//! Design decisions:
//! 1. One WebSocket (or pipe) per session; requests are correlated to
//!    replies by a monotonically increasing id.
//! 2. Unsolicited events fan out to persistent subscriptions, one-shot
//!    waiters and an optional catch-all sink.
//! 3. Fail fast - no retries, no reconnection. A dead session is terminal;
//!    callers build a fresh one.
//! 4. The transport is pluggable; the core owns message semantics, not I/O.

pub mod discovery;
mod dispatch;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;

pub use discovery::Discovery;
pub use error::{CdpError, ProtocolError, Result};
pub use protocol::{EventFrame, RequestFrame, RequestId, TabInfo, VersionInfo};
pub use registry::{EventCallback, EventWaiter, Subscription};
pub use session::{ConnectOptions, Session, TabSelector};
pub use transport::{sleep, Transport};
