//! Subscription registry: persistent listeners, one-shot waiters, the sink.
//!
//! Design decisions:
//! 1. One mutex around all registry state; callbacks are cloned out of the
//!    lock before they run, so a listener may re-enter the session.
//! 2. Handles carry a unique token and remove their entry on drop - O(1)
//!    unsubscribe, no reaper pass over weak references.
//! 3. A listener that panics is logged and skipped; the rest of the fan-out
//!    still runs.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::error;

use crate::error::CdpError;
use crate::protocol::EventFrame;

/// Callback invoked with each matching event.
pub type EventCallback = Arc<dyn Fn(&EventFrame) + Send + Sync>;

struct Listener {
    token: u64,
    callback: EventCallback,
}

struct Waiter {
    events: HashSet<String>,
    tx: oneshot::Sender<EventFrame>,
}

#[derive(Default)]
struct Inner {
    next_token: u64,
    listeners: HashMap<String, Vec<Listener>>,
    waiters: Vec<Waiter>,
    sink: Option<EventCallback>,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }
}

/// Event routing table for one session.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<Inner>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persistent listener for one event name. The subscription
    /// lives until the returned handle is dropped or unsubscribed.
    pub fn subscribe(&self, event: &str, callback: EventCallback) -> Subscription {
        let mut inner = self.inner.lock();
        let token = inner.bump();
        inner
            .listeners
            .entry(event.to_string())
            .or_default()
            .push(Listener { token, callback });
        Subscription {
            registry: Arc::downgrade(&self.inner),
            event: event.to_string(),
            token,
        }
    }

    /// Register a one-shot waiter on a set of event names. The future
    /// resolves on the first inbound event whose name is in the set;
    /// dropping it cancels the waiter.
    pub fn once_any<I, S>(&self, events: I) -> EventWaiter
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        inner.waiters.push(Waiter {
            events: events.into_iter().map(Into::into).collect(),
            tx,
        });
        EventWaiter { rx }
    }

    /// Install the catch-all sink. Re-setting replaces the previous one.
    pub fn set_sink(&self, callback: EventCallback) {
        self.inner.lock().sink = Some(callback);
    }

    /// Remove the sink. No-op if none is set.
    pub fn clear_sink(&self) {
        self.inner.lock().sink = None;
    }

    pub(crate) fn sink(&self) -> Option<EventCallback> {
        self.inner.lock().sink.clone()
    }

    /// Fan an event out to the persistent listeners for its name, in
    /// subscription order, then resolve the first live matching one-shot
    /// waiter. Returns whether anything consumed the event.
    pub(crate) fn notify(&self, event: &EventFrame) -> bool {
        let callbacks: Vec<EventCallback> = {
            let inner = self.inner.lock();
            inner
                .listeners
                .get(&event.method)
                .map(|l| l.iter().map(|e| e.callback.clone()).collect())
                .unwrap_or_default()
        };

        let mut handled = !callbacks.is_empty();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(method = %event.method, "event listener panicked");
            }
        }

        let mut inner = self.inner.lock();
        inner.waiters.retain(|w| !w.tx.is_closed());
        while let Some(pos) = inner
            .waiters
            .iter()
            .position(|w| w.events.contains(&event.method))
        {
            let waiter = inner.waiters.remove(pos);
            if waiter.tx.send(event.clone()).is_ok() {
                handled = true;
                break;
            }
        }
        handled
    }

    /// Drop everything. Outstanding waiters resolve with `Disconnected`.
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.listeners.clear();
        inner.waiters.clear();
        inner.sink = None;
    }
}

/// Handle owning one persistent subscription.
pub struct Subscription {
    registry: Weak<Mutex<Inner>>,
    event: String,
    token: u64,
}

impl Subscription {
    /// Explicit removal. Dropping the handle does the same.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            let mut inner = inner.lock();
            if let Some(list) = inner.listeners.get_mut(&self.event) {
                list.retain(|l| l.token != self.token);
                if list.is_empty() {
                    inner.listeners.remove(&self.event);
                }
            }
        }
    }
}

/// Future for the first event out of a set of names.
pub struct EventWaiter {
    rx: oneshot::Receiver<EventFrame>,
}

impl Future for EventWaiter {
    type Output = Result<EventFrame, CdpError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|r| r.map_err(|_| CdpError::Disconnected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(method: &str) -> EventFrame {
        EventFrame {
            method: method.to_string(),
            params: json!({}),
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<u32>>>, tag: u32) -> EventCallback {
        let log = log.clone();
        Arc::new(move |_| log.lock().push(tag))
    }

    #[test]
    fn listeners_fire_in_subscription_order() {
        let registry = Registry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = registry.subscribe("Network.requestWillBeSent", recorder(&log, 1));
        let _b = registry.subscribe("Network.requestWillBeSent", recorder(&log, 2));

        assert!(registry.notify(&event("Network.requestWillBeSent")));
        assert_eq!(*log.lock(), vec![1, 2]);
    }

    #[test]
    fn dropping_the_handle_removes_the_listener() {
        let registry = Registry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = registry.subscribe("Page.loadEventFired", recorder(&log, 1));
        let _b = registry.subscribe("Page.loadEventFired", recorder(&log, 2));

        drop(a);
        registry.notify(&event("Page.loadEventFired"));
        assert_eq!(*log.lock(), vec![2]);
    }

    #[test]
    fn unrelated_events_reach_no_listener() {
        let registry = Registry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = registry.subscribe("Page.loadEventFired", recorder(&log, 1));

        assert!(!registry.notify(&event("Network.loadingFinished")));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn panicking_listener_does_not_stop_the_fanout() {
        let registry = Registry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _bad = registry.subscribe(
            "Page.loadEventFired",
            Arc::new(|_| panic!("listener bug")),
        );
        let _good = registry.subscribe("Page.loadEventFired", recorder(&log, 2));

        registry.notify(&event("Page.loadEventFired"));
        assert_eq!(*log.lock(), vec![2]);
    }

    #[tokio::test]
    async fn once_any_resolves_on_first_match_only() {
        let registry = Registry::new();
        let waiter = registry.once_any(["Page.loadEventFired", "Page.frameNavigated"]);

        let first = EventFrame {
            method: "Page.loadEventFired".to_string(),
            params: json!({ "timestamp": 1.5 }),
        };
        assert!(registry.notify(&first));
        let got = waiter.await.unwrap();
        assert_eq!(got.params["timestamp"], 1.5);

        // The waiter is gone; the same event is now unhandled.
        assert!(!registry.notify(&first));
    }

    #[tokio::test]
    async fn dropped_waiter_is_pruned() {
        let registry = Registry::new();
        let waiter = registry.once_any(["Page.loadEventFired"]);
        drop(waiter);

        assert!(!registry.notify(&event("Page.loadEventFired")));
    }

    #[tokio::test]
    async fn second_waiter_takes_over_after_the_first_resolves() {
        let registry = Registry::new();
        let first = registry.once_any(["Page.loadEventFired"]);
        let second = registry.once_any(["Page.loadEventFired"]);

        registry.notify(&event("Page.loadEventFired"));
        registry.notify(&event("Page.loadEventFired"));

        assert_eq!(first.await.unwrap().method, "Page.loadEventFired");
        assert_eq!(second.await.unwrap().method, "Page.loadEventFired");
    }

    #[tokio::test]
    async fn clear_rejects_outstanding_waiters() {
        let registry = Registry::new();
        let waiter = registry.once_any(["Page.loadEventFired"]);
        registry.clear();

        assert!(matches!(waiter.await, Err(CdpError::Disconnected)));
    }

    #[test]
    fn sink_is_settable_and_clearable() {
        let registry = Registry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        registry.set_sink(Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(registry.sink().is_some());

        // Re-set replaces rather than stacks.
        let c = count.clone();
        registry.set_sink(Arc::new(move |_| {
            c.fetch_add(10, Ordering::SeqCst);
        }));
        if let Some(sink) = registry.sink() {
            sink(&event("Page.loadEventFired"));
        }
        assert_eq!(count.load(Ordering::SeqCst), 10);

        registry.clear_sink();
        assert!(registry.sink().is_none());
    }
}
