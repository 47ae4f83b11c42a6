//! HTTP-over-BLE compatibility facade.
//!
//! Older application code talks to the controller as if it were the HTTP
//! API served over Wi-Fi.  Two routes are mapped onto framed requests:
//!
//! | Method | Endpoint      | Request             | Reply                      |
//! |--------|---------------|---------------------|----------------------------|
//! | GET    | `/api/status` | `request_status`    | `200 OK` + status JSON     |
//! | POST   | `/api`        | `send_settings_json`| `202 Accepted` + `{"queued":true}` |
//!
//! Everything else is refused with an error notification.

use log::debug;

use super::ports::EventSink;
use super::session::{NOT_CONNECTED_MESSAGE, ProtocolSession};
use crate::error::{LinkError, Result};
use crate::rpc::transport::Transport;

/// Body of the `202 Accepted` reply.
pub const QUEUED_BODY: &str = "{\"queued\":true}";

/// Perform `method endpoint` over the link and render an HTTP/1.1 reply.
pub async fn send_http_request<T: Transport, E: EventSink>(
    session: &ProtocolSession<T, E>,
    method: &str,
    endpoint: &str,
    body: Option<&str>,
) -> Result<String> {
    if !session.state().is_connected() {
        session.raise_error(NOT_CONNECTED_MESSAGE);
        return Err(LinkError::NotConnected);
    }
    debug!("http-shim: {} {}", method, endpoint);

    match (method, endpoint, body) {
        ("GET", "/api/status", _) => {
            let json = session.request_status().await?;
            Ok(format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                json.len(),
                json
            ))
        }
        ("POST", "/api", Some(body)) => {
            session.send_settings_json(body).await?;
            Ok(format!(
                "HTTP/1.1 202 Accepted\r\nContent-Length: {}\r\n\r\n{}",
                QUEUED_BODY.len(),
                QUEUED_BODY
            ))
        }
        _ => {
            let what = format!("{method} {endpoint}");
            session.raise_error(format!("Unsupported BLE HTTP request: {what}"));
            Err(LinkError::Unsupported(what))
        }
    }
}

/// `Content-Length` from a header block, matched case-insensitively.
pub fn parse_content_length(headers: &str) -> Option<usize> {
    headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}
