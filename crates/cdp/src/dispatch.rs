//! Inbound frame routing.
//!
//! One decoded frame in, three ways out: a reply fulfills the matching
//! pending request, an event fans out through the registry and then the
//! sink, and anything malformed is logged and dropped. Nothing here is
//! fatal; a bad frame never takes the session down.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, trace};

use crate::error::{CdpError, Result};
use crate::protocol::{EventFrame, InboundFrame, RequestId};
use crate::registry::Registry;

/// Pending-request table: one single-use completion handle per request id.
pub(crate) type PendingTable = Arc<DashMap<RequestId, oneshot::Sender<Result<Value>>>>;

pub(crate) struct Dispatcher {
    pending: PendingTable,
    registry: Registry,
}

impl Dispatcher {
    pub(crate) fn new(pending: PendingTable, registry: Registry) -> Self {
        Self { pending, registry }
    }

    pub(crate) fn dispatch(&self, text: &str) {
        let frame: InboundFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("dropping unparseable frame: {e}");
                trace!(frame = text);
                return;
            }
        };

        if let Some(id) = frame.id {
            let Some((_, tx)) = self.pending.remove(&id) else {
                debug!(id, "reply for unknown request id");
                trace!(frame = text);
                return;
            };
            let result = match frame.error {
                Some(error) => Err(CdpError::Protocol(error)),
                None => Ok(frame.result.unwrap_or(Value::Null)),
            };
            // The caller may have dropped the future; late replies vanish.
            let _ = tx.send(result);
            return;
        }

        if frame.error.is_some() {
            debug!("dropping event frame carrying an error");
            trace!(frame = text);
            return;
        }

        let Some(method) = frame.method else {
            debug!("dropping frame with neither id nor method");
            trace!(frame = text);
            return;
        };

        let event = EventFrame {
            method,
            params: frame.params.unwrap_or(Value::Null),
        };
        let mut handled = self.registry.notify(&event);
        if let Some(sink) = self.registry.sink() {
            if catch_unwind(AssertUnwindSafe(|| sink(&event))).is_err() {
                error!("event sink panicked");
            }
            handled = true;
        }
        if !handled {
            trace!(method = %event.method, "ignored event");
        }
    }
}
