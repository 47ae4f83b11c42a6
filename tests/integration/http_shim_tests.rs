//! HTTP-over-BLE facade mapped onto framed requests.

use arklink::LinkError;
use arklink::app::http_shim::{QUEUED_BODY, parse_content_length, send_http_request};
use arklink::rpc::codec::MessageType;
use futures_lite::future;

use crate::mock_transport::{MockTransport, answer, ready_session, session_with};

#[test]
fn get_status_renders_200() {
    let s = ready_session();
    let body = r#"{"name":"Ärk"}"#;

    let (reply, _) = future::block_on(future::zip(
        send_http_request(&s, "GET", "/api/status", None),
        answer(&s, 0, Some((MessageType::StatusResponse, body))),
    ));
    let reply = reply.unwrap();

    let (head, payload) = reply.split_once("\r\n\r\n").unwrap();
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("Content-Type: application/json"));
    assert_eq!(payload, body);
    assert_eq!(parse_content_length(head), Some(body.len()));
    assert_ne!(body.len(), body.chars().count(), "length must count bytes");
}

#[test]
fn post_settings_renders_202() {
    let s = ready_session();

    let (reply, _) = future::block_on(future::zip(
        send_http_request(&s, "POST", "/api", Some(r#"{"power":false}"#)),
        answer(&s, 0, None),
    ));
    let reply = reply.unwrap();

    assert!(reply.starts_with("HTTP/1.1 202 Accepted"));
    assert!(reply.ends_with(QUEUED_BODY));
    let sent = s.with_transport(|t| t.requests()[0].clone());
    assert_eq!(sent.kind(), Some(MessageType::SettingsJson));
    assert_eq!(sent.payload_text(), r#"{"power":false}"#);
}

#[test]
fn unsupported_route_is_refused() {
    let s = ready_session();

    let r = future::block_on(send_http_request(&s, "DELETE", "/api/wifi", None));
    assert_eq!(r, Err(LinkError::Unsupported("DELETE /api/wifi".into())));
    s.with_sink(|sink| assert_eq!(sink.errors(), vec!["Unsupported BLE HTTP request: DELETE /api/wifi"]));
    s.with_transport(|t| assert!(t.chunks.is_empty()));
}

#[test]
fn post_without_body_is_unsupported() {
    let s = ready_session();
    let r = future::block_on(send_http_request(&s, "POST", "/api", None));
    assert!(matches!(r, Err(LinkError::Unsupported(_))));
}

#[test]
fn disconnected_shim_refuses() {
    let s = session_with(MockTransport::new());

    let r = future::block_on(send_http_request(&s, "GET", "/api/status", None));
    assert_eq!(r, Err(LinkError::NotConnected));
    s.with_sink(|sink| assert_eq!(sink.errors(), vec!["Not connected to device"]));
}

#[test]
fn device_error_surfaces_through_shim() {
    let s = ready_session();

    let (reply, _) = future::block_on(future::zip(
        send_http_request(&s, "GET", "/api/status", None),
        answer(&s, 0, Some((MessageType::Error, "busy"))),
    ));
    assert_eq!(reply, Err(LinkError::RemoteError("busy".into())));
}
