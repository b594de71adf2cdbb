//! Wire-level protocol types.
//!
//! CDP frames are UTF-8 JSON text. Outbound frames always carry an id; an
//! inbound frame with an id is a reply, one without is an event. Tab records
//! and version info come from the HTTP discovery endpoints and keep any keys
//! we do not model in a flattened map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// Request id on the wire. Strictly monotonically increasing within a
/// session, starting at 1.
pub type RequestId = u64;

/// Outbound request frame: `{"id":1,"method":"Domain.method","params":{}}`.
#[derive(Debug, Clone, Serialize)]
pub struct RequestFrame {
    pub id: RequestId,
    pub method: String,
    pub params: Value,
}

/// Inbound frame before routing. Every field is optional; the dispatcher
/// decides reply vs event from what is present.
#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    #[serde(default)]
    pub id: Option<RequestId>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ProtocolError>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

/// An unsolicited browser event, handed to listeners, waiters and the sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventFrame {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// A tab record from `/json/list` or `/json/new`.
///
/// Chrome reports more keys than we care about (url, devtoolsFrontendUrl,
/// faviconUrl, ...); those survive round-trips in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub tab_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_socket_debugger_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TabInfo {
    /// Minimal record for a tab known only by id (explicit endpoint URLs).
    pub(crate) fn with_id(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }
}

/// Browser metadata from `/json/version`.
///
/// Chrome uses PascalCase names on this endpoint only.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "Browser", default)]
    pub browser: String,
    #[serde(rename = "Protocol-Version", default)]
    pub protocol_version: String,
    #[serde(rename = "User-Agent", default)]
    pub user_agent: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub web_socket_debugger_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
