use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

fn request_body(title: &str, message: &str, display_ms: u64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "GUI.ShowNotification",
        "params": {
            "title": title,
            "message": message,
            "displaytime": display_ms,
        },
        "id": 1,
    })
}

fn check_response(response: &RpcResponse) -> Result<()> {
    match &response.error {
        Some(e) => Err(Error::Notify(format!("{} (code {})", e.message, e.code))),
        None => Ok(()),
    }
}

/// Pops up a notification in the Kodi GUI through its JSON-RPC endpoint.
pub fn show(url: &str, title: &str, message: &str, display_ms: u64) -> Result<()> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(Duration::from_secs(10)))
        .build()
        .into();

    tracing::debug!(%url, title, "sending GUI notification");

    let response: RpcResponse = agent
        .post(url)
        .send_json(request_body(title, message, display_ms))
        .map_err(|e| Error::Notify(format!("{url}: {e}")))?
        .body_mut()
        .read_json()
        .map_err(|e| Error::Notify(format!("invalid response from {url}: {e}")))?;

    check_response(&response)
}
