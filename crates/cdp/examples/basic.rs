//! Basic example - attach to a running Chrome, evaluate, watch events.
//!
//! Start Chrome first: chrome --remote-debugging-port=9222

use std::sync::Arc;
use std::time::Duration;

use cdp_client::{ConnectOptions, Session};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let session = Session::connect(ConnectOptions::default()).await?;
    println!("protocol version: {}", session.protocol_version().await?);
    if let Some(tab) = session.tab() {
        println!("attached to tab {} ({})", tab.id, tab.title);
    }

    let value = session.eval("6 * 7").await?;
    println!("6 * 7 = {value}");

    let _sub = session.subscribe(
        "Page.loadEventFired",
        Arc::new(|event| println!("load fired: {}", event.params)),
    );
    session
        .send_request("Page.enable", serde_json::json!({}))
        .await?;

    cdp_client::sleep(Duration::from_secs(2)).await;

    session.close().await;
    Ok(())
}
