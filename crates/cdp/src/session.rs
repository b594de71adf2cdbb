//! Session controller.
//!
//! Owns the sequence counter, the pending-request table and the subscription
//! registry; everything else goes through them. One spawned task drains the
//! transport's frame stream into the dispatcher; when that stream ends, for
//! any reason, every outstanding future is failed with `Disconnected`.
//!
//! A session is terminal: once closed (or once the transport dies) it stays
//! Idle, and callers construct a fresh one to reconnect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tracing::{debug, trace};
use url::Url;

use crate::discovery::Discovery;
use crate::dispatch::{Dispatcher, PendingTable};
use crate::error::{CdpError, Result};
use crate::protocol::{RequestFrame, RequestId, TabInfo, VersionInfo};
use crate::registry::{EventCallback, EventWaiter, Registry, Subscription};
use crate::transport::{self, FrameReceiver, Transport};

/// How to pick a tab out of `/json/list`.
#[derive(Debug, Clone)]
pub enum TabSelector {
    /// Position in the listing.
    Index(usize),
    /// First tab whose title matches.
    Title(Regex),
    /// Exact tab id.
    Id(String),
    /// A record from an earlier listing, matched by id.
    Record(TabInfo),
}

/// Connection options. The default targets the first debuggable page on
/// localhost:9222.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    /// Explicit WebSocket endpoint; skips tab selection entirely. The final
    /// path segment must be the tab id.
    pub endpoint: Option<String>,
    pub tab: Option<TabSelector>,
    /// Create a fresh tab instead of attaching to an existing one.
    pub new_tab: bool,
    /// Override for the `type` filter applied to `/json/list`.
    pub tab_type: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9222,
            endpoint: None,
            tab: None,
            new_tab: false,
            tab_type: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connected,
    Closing,
    Idle,
}

struct SessionInner {
    state: Mutex<State>,
    next_id: AtomicU64,
    pending: PendingTable,
    registry: Registry,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    discovery: Option<Discovery>,
    tab: Option<TabInfo>,
}

impl SessionInner {
    /// Fail everything outstanding and go Idle. Idempotent; called by both
    /// `close()` and the dispatch loop when the transport ends.
    fn teardown(&self) {
        {
            let mut state = self.state.lock();
            if *state == State::Idle {
                return;
            }
            *state = State::Idle;
        }
        drop(self.transport.lock().take());
        let ids: Vec<RequestId> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(CdpError::Disconnected));
            }
        }
        self.registry.clear();
    }
}

/// Removes the pending entry if the request future is dropped before its
/// reply arrives, so the late reply is silently discarded.
struct PendingGuard {
    pending: PendingTable,
    id: RequestId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// A live connection to one browser tab (or the browser endpoint itself).
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Resolve a target through HTTP discovery and attach over WebSocket.
    pub async fn connect(options: ConnectOptions) -> Result<Self> {
        let discovery = Discovery::new(&options.host, options.port);
        let (ws_url, tab) = resolve_endpoint(&discovery, &options).await?;
        debug!("attaching to {ws_url}");
        let (transport, frames) = transport::websocket::connect(&ws_url).await?;
        Ok(Self::start(transport, frames, Some(discovery), tab))
    }

    /// Attach over a local pipe pair carrying newline-delimited frames.
    /// No HTTP discovery is involved; tab-management helpers are
    /// unavailable on the resulting session.
    pub fn connect_pipe<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let (transport, frames) = transport::pipe::open(reader, writer);
        Self::start(transport, frames, None, None)
    }

    fn start(
        transport: Arc<dyn Transport>,
        mut frames: FrameReceiver,
        discovery: Option<Discovery>,
        tab: Option<TabInfo>,
    ) -> Self {
        let pending: PendingTable = Arc::new(dashmap::DashMap::new());
        let registry = Registry::new();
        let inner = Arc::new(SessionInner {
            state: Mutex::new(State::Connected),
            next_id: AtomicU64::new(1),
            pending: pending.clone(),
            registry: registry.clone(),
            transport: Mutex::new(Some(transport)),
            discovery,
            tab,
        });

        // The loop holds only a weak reference: dropping the session drops
        // the transport, which ends the stream and the task with it.
        let dispatcher = Dispatcher::new(pending, registry);
        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                trace!(%frame, "cdp recv");
                dispatcher.dispatch(&frame);
            }
            if let Some(inner) = weak.upgrade() {
                inner.teardown();
            }
        });

        Self { inner }
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.state.lock() == State::Connected
    }

    /// The tab record this session resolved at connect time, if any.
    pub fn tab(&self) -> Option<&TabInfo> {
        self.inner.tab.as_ref()
    }

    /// Send a request and await its correlated reply.
    ///
    /// The pending entry is registered before the frame is handed to the
    /// transport, so a reply racing the send cannot be lost. Dropping the
    /// returned future cancels the correlation.
    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value> {
        let transport = self.live_transport()?;
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = RequestFrame {
            id,
            method: method.to_string(),
            params,
        };
        let json = serde_json::to_string(&frame)?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id, tx);
        let _guard = PendingGuard {
            pending: self.inner.pending.clone(),
            id,
        };

        trace!(frame = %json, "cdp send");
        transport.send(&json).await?;

        rx.await.map_err(|_| CdpError::Disconnected)?
    }

    /// Send a request without waiting for a reply. Completion means the
    /// frame was handed to the transport; any eventual reply is dropped as
    /// an orphan.
    pub async fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        let transport = self.live_transport()?;
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = RequestFrame {
            id,
            method: method.to_string(),
            params,
        };
        let json = serde_json::to_string(&frame)?;
        trace!(frame = %json, "cdp send");
        transport.send(&json).await
    }

    /// Register a persistent listener for one event name.
    pub fn subscribe(&self, event: &str, callback: EventCallback) -> Subscription {
        self.inner.registry.subscribe(event, callback)
    }

    /// Wait for the first event whose name is in the given set.
    pub fn once_any<I, S>(&self, events: I) -> EventWaiter
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.registry.once_any(events)
    }

    /// Install the catch-all sink invoked for every inbound event.
    pub fn set_sink(&self, callback: EventCallback) {
        self.inner.registry.set_sink(callback);
    }

    pub fn clear_sink(&self) {
        self.inner.registry.clear_sink();
    }

    /// Close the transport and fail everything outstanding with
    /// `Disconnected`. Safe to call more than once.
    pub async fn close(&self) {
        let transport = {
            let mut state = self.inner.state.lock();
            if *state == State::Idle {
                return;
            }
            *state = State::Closing;
            self.inner.transport.lock().take()
        };
        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                debug!("transport close: {e}");
            }
        }
        self.inner.teardown();
    }

    fn live_transport(&self) -> Result<Arc<dyn Transport>> {
        if *self.inner.state.lock() != State::Connected {
            return Err(CdpError::NotConnected);
        }
        self.inner
            .transport
            .lock()
            .clone()
            .ok_or(CdpError::NotConnected)
    }

    fn discovery(&self) -> Result<&Discovery> {
        self.inner.discovery.as_ref().ok_or(CdpError::NoHttpEndpoint)
    }
}

/// Thin wrappers over common CDP calls and the discovery endpoints.
impl Session {
    /// `Runtime.evaluate` with `returnByValue: true` unless overridden.
    /// Resolves with the remote-object envelope.
    pub async fn evaluate(&self, expression: &str, opts: Option<Value>) -> Result<Value> {
        let mut params = Map::new();
        params.insert("expression".to_string(), Value::String(expression.to_string()));
        params.insert("returnByValue".to_string(), Value::Bool(true));
        self.send_request("Runtime.evaluate", merged(params, opts)).await
    }

    /// Evaluate and project the plain value out of the remote object.
    pub async fn eval(&self, expression: &str) -> Result<Value> {
        let reply = self.evaluate(expression, None).await?;
        Ok(reply
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// `Runtime.callFunctionOn` with `returnByValue: true` unless
    /// overridden. `opts` must carry the target (`objectId` or
    /// `executionContextId`) per the protocol.
    pub async fn call_function_on(&self, function: &str, opts: Option<Value>) -> Result<Value> {
        let mut params = Map::new();
        params.insert(
            "functionDeclaration".to_string(),
            Value::String(function.to_string()),
        );
        params.insert("returnByValue".to_string(), Value::Bool(true));
        self.send_request("Runtime.callFunctionOn", merged(params, opts))
            .await
    }

    /// `Schema.getDomains`.
    pub async fn get_domains(&self) -> Result<Value> {
        self.send_request("Schema.getDomains", Value::Object(Map::new()))
            .await
    }

    /// The `Protocol-Version` reported by `/json/version`.
    pub async fn protocol_version(&self) -> Result<String> {
        Ok(self.discovery()?.version_info().await?.protocol_version)
    }

    pub async fn version_info(&self) -> Result<VersionInfo> {
        self.discovery()?.version_info().await
    }

    pub async fn list_tabs(&self, type_filter: Option<&str>) -> Result<Vec<TabInfo>> {
        self.discovery()?.list_tabs(type_filter).await
    }

    pub async fn new_tab(&self, url: Option<&str>) -> Result<TabInfo> {
        self.discovery()?.new_tab(url).await
    }

    pub async fn activate_tab(&self, id: &str) -> Result<()> {
        self.discovery()?.activate_tab(id).await
    }

    pub async fn close_tab(&self, id: &str) -> Result<()> {
        self.discovery()?.close_tab(id).await;
        Ok(())
    }
}

async fn resolve_endpoint(
    discovery: &Discovery,
    options: &ConnectOptions,
) -> Result<(String, Option<TabInfo>)> {
    if let Some(endpoint) = &options.endpoint {
        let tab_id = endpoint_tab_id(endpoint)?;
        return Ok((endpoint.clone(), Some(TabInfo::with_id(&tab_id))));
    }
    if let Some(selector) = &options.tab {
        let tabs = discovery.list_tabs(options.tab_type.as_deref()).await?;
        let tab = select_tab(tabs, selector)?;
        let url = debugger_url(&tab)?;
        return Ok((url, Some(tab)));
    }
    if options.new_tab {
        let tab = discovery.new_tab(None).await?;
        let url = debugger_url(&tab)?;
        return Ok((url, Some(tab)));
    }
    let tabs = discovery.list_tabs(options.tab_type.as_deref()).await?;
    let tab = tabs
        .into_iter()
        .find(|t| t.web_socket_debugger_url.as_deref().is_some_and(|u| !u.is_empty()))
        .ok_or_else(|| CdpError::NotFound("no tab exposes a webSocketDebuggerUrl".to_string()))?;
    let url = debugger_url(&tab)?;
    Ok((url, Some(tab)))
}

fn select_tab(mut tabs: Vec<TabInfo>, selector: &TabSelector) -> Result<TabInfo> {
    match selector {
        TabSelector::Index(index) => {
            if *index < tabs.len() {
                Ok(tabs.swap_remove(*index))
            } else {
                Err(CdpError::NotFound(format!(
                    "tab index {index} out of range ({} tabs)",
                    tabs.len()
                )))
            }
        }
        TabSelector::Title(pattern) => tabs
            .into_iter()
            .find(|t| pattern.is_match(&t.title))
            .ok_or_else(|| CdpError::NotFound(format!("no tab title matches {pattern}"))),
        TabSelector::Id(id) => tabs
            .into_iter()
            .find(|t| &t.id == id)
            .ok_or_else(|| CdpError::NotFound(format!("no tab with id {id}"))),
        TabSelector::Record(record) => tabs
            .into_iter()
            .find(|t| t.id == record.id)
            .ok_or_else(|| CdpError::NotFound(format!("no tab with id {}", record.id))),
    }
}

fn debugger_url(tab: &TabInfo) -> Result<String> {
    tab.web_socket_debugger_url
        .clone()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| CdpError::MissingWebSocketUrl(tab.id.clone()))
}

fn endpoint_tab_id(endpoint: &str) -> Result<String> {
    let url =
        Url::parse(endpoint).map_err(|_| CdpError::MalformedEndpoint(endpoint.to_string()))?;
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CdpError::MalformedEndpoint(endpoint.to_string()))
}

fn merged(mut defaults: Map<String, Value>, opts: Option<Value>) -> Value {
    if let Some(Value::Object(overrides)) = opts {
        for (key, value) in overrides {
            defaults.insert(key, value);
        }
    }
    Value::Object(defaults)
}
