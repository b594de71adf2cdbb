//! HTTP discovery against the browser's /json endpoints.
//!
//! This is the small dance CDP layers over plain HTTP before any WebSocket
//! is opened: list tabs, create tabs, activate and close them. CDP is
//! local-only, so there is no TLS or auth here.

use reqwest::header::CONNECTION;
use tracing::debug;

use crate::error::Result;
use crate::protocol::{TabInfo, VersionInfo};

/// Client for `http://host:port/json`.
#[derive(Debug, Clone)]
pub struct Discovery {
    base: String,
    client: reqwest::Client,
}

impl Discovery {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            base: format!("http://{host}:{port}/json"),
            client: reqwest::Client::new(),
        }
    }

    /// GET /json/version - browser build, protocol version, user agent.
    pub async fn version_info(&self) -> Result<VersionInfo> {
        let url = format!("{}/version", self.base);
        debug!("fetching {url}");
        Ok(self.client.get(&url).send().await?.json().await?)
    }

    /// GET /json/list, filtered by a case-insensitive substring match on the
    /// record's `type`. The default filter is `"page"`, which hides workers
    /// and extension targets; pass another filter to see them.
    pub async fn list_tabs(&self, type_filter: Option<&str>) -> Result<Vec<TabInfo>> {
        let url = format!("{}/list", self.base);
        let tabs: Vec<TabInfo> = self.client.get(&url).send().await?.json().await?;
        Ok(filter_tabs(tabs, type_filter.unwrap_or("page")))
    }

    /// GET /json/new, optionally with a URL for the new tab to load.
    pub async fn new_tab(&self, url: Option<&str>) -> Result<TabInfo> {
        let endpoint = match url {
            Some(u) => format!("{}/new?{u}", self.base),
            None => format!("{}/new", self.base),
        };
        Ok(self.client.get(&endpoint).send().await?.json().await?)
    }

    /// GET /json/activate/<id> - bring a tab to the foreground. The response
    /// body is ignored.
    pub async fn activate_tab(&self, id: &str) -> Result<()> {
        let url = format!("{}/activate/{id}", self.base);
        self.client.get(&url).send().await?;
        Ok(())
    }

    /// GET /json/close/<id>. The tab may already be gone and the browser may
    /// reset the connection mid-reply; both count as success.
    pub async fn close_tab(&self, id: &str) {
        let url = format!("{}/close/{id}", self.base);
        let request = self.client.get(&url).header(CONNECTION, "close");
        if let Err(e) = request.send().await {
            debug!("close_tab {id}: {e}");
        }
    }
}

fn filter_tabs(tabs: Vec<TabInfo>, type_filter: &str) -> Vec<TabInfo> {
    let needle = type_filter.to_ascii_lowercase();
    tabs.into_iter()
        .filter(|t| t.tab_type.to_ascii_lowercase().contains(&needle))
        .collect()
}
