//! Correlated exchanges through the session: ACKs, responses, timeouts,
//! cancellation, remote errors and inbound ACK echo.

use arklink::error::TransportError;
use arklink::rpc::codec::{FLAG_ACK_REQUIRED, Frame, MessageType};
use arklink::rpc::transport::TransportEvent;
use arklink::LinkError;
use futures_lite::future;

use crate::mock_transport::{MockTransport, answer, deliver, nth_request, ready_session, session_with};

#[test]
fn settings_complete_on_ack() {
    let s = ready_session();

    let (result, seq) = future::block_on(future::zip(
        s.send_settings_json(r#"{"brightness":90}"#),
        answer(&s, 0, None),
    ));

    assert_eq!(result, Ok(()));
    let req = s.with_transport(|t| t.requests()[0].clone());
    assert_eq!(req.seq, seq);
    assert_eq!(req.kind(), Some(MessageType::SettingsJson));
    assert!(req.ack_required());
    assert_eq!(req.payload_text(), r#"{"brightness":90}"#);
}

#[test]
fn status_returns_correlated_body() {
    let s = ready_session();

    let (result, _) = future::block_on(future::zip(
        s.request_status(),
        answer(&s, 0, Some((MessageType::StatusResponse, r#"{"on":true}"#))),
    ));
    assert_eq!(result.as_deref(), Ok(r#"{"on":true}"#));
}

#[test]
fn ota_status_expects_ota_status_frame() {
    let s = ready_session();

    let (result, _) = future::block_on(future::zip(
        s.request_ota_status(),
        answer(&s, 0, Some((MessageType::OtaStatus, r#"{"progress":40}"#))),
    ));
    assert_eq!(result.as_deref(), Ok(r#"{"progress":40}"#));
}

#[test]
fn wrong_response_type_is_rejected() {
    let s = ready_session();

    let (result, _) = future::block_on(future::zip(
        s.request_status(),
        answer(&s, 0, Some((MessageType::OtaStatus, "{}"))),
    ));
    assert_eq!(
        result,
        Err(LinkError::UnexpectedResponse {
            expected: 0x03,
            got: 0x05
        })
    );
}

#[test]
fn missing_ack_times_out_and_frees_seq() {
    let s = ready_session();

    let result = future::block_on(s.start_ota("http://fw.example/a.bin"));
    assert_eq!(result, Err(LinkError::AckTimeout { seq: 0 }));
    assert!(!s.cancel(0), "timed-out exchange must leave no waiter");

    let (again, seq) = future::block_on(future::zip(s.start_ota("http://fw.example/a.bin"), answer(&s, 1, None)));
    assert_eq!(again, Ok(()));
    assert_eq!(seq, 1);
}

#[test]
fn missing_response_times_out() {
    let s = ready_session();

    let (result, seq) = future::block_on(future::zip(s.request_status(), answer(&s, 0, None)));
    assert_eq!(result, Err(LinkError::ResponseTimeout { seq }));
    assert!(!s.cancel(seq));
}

#[test]
fn remote_error_fails_request_and_notifies() {
    let s = ready_session();

    let (result, _) = future::block_on(future::zip(
        s.request_status(),
        answer(&s, 0, Some((MessageType::Error, "sensor offline"))),
    ));
    assert_eq!(result, Err(LinkError::RemoteError("sensor offline".into())));
    s.with_sink(|sink| assert_eq!(sink.errors(), vec!["BLE error: sensor offline"]));
}

#[test]
fn unsolicited_error_is_notified() {
    let s = ready_session();
    deliver(&s, &Frame::new(MessageType::Error, 200, 0, b"overheat"));
    s.with_sink(|sink| assert_eq!(sink.errors(), vec!["BLE error: overheat"]));
}

#[test]
fn disconnect_fails_pending_waiter() {
    let s = ready_session();

    let (result, ()) = future::block_on(future::zip(s.request_status(), async {
        nth_request(&s, 0).await;
        s.handle_event(TransportEvent::Disconnected);
    }));
    assert_eq!(result, Err(LinkError::Cancelled { seq: 0 }));
}

#[test]
fn explicit_cancel_fails_waiter() {
    let s = ready_session();

    let (result, cancelled) = future::block_on(future::zip(s.send_settings_json("{}"), async {
        let req = nth_request(&s, 0).await;
        s.cancel(req.seq)
    }));
    assert!(cancelled);
    assert_eq!(result, Err(LinkError::Cancelled { seq: 0 }));
}

#[test]
fn write_failure_aborts_exchange() {
    let s = ready_session();
    s.with_transport(|t| t.write_error = Some(TransportError::WriteRejected));

    let result = future::block_on(s.send_settings_json("{}"));
    assert_eq!(result, Err(LinkError::TransportWriteFailed(TransportError::WriteRejected)));
    s.with_sink(|sink| assert_eq!(sink.errors(), vec!["Failed to write BLE chunk"]));

    s.with_transport(|t| t.write_error = None);
    let (again, seq) = future::block_on(future::zip(s.send_settings_json("{}"), answer(&s, 0, None)));
    assert_eq!(again, Ok(()));
    assert_eq!(seq, 1, "a failed send still consumes its seq");
}

#[test]
fn permission_denied_write_is_reported() {
    let s = ready_session();
    s.with_transport(|t| t.write_error = Some(TransportError::PermissionDenied));

    let result = future::block_on(s.send_settings_json("{}"));
    assert_eq!(result, Err(LinkError::PermissionDenied));
    s.with_sink(|sink| assert_eq!(sink.errors(), vec!["Bluetooth permission denied"]));
}

#[test]
fn concurrent_requests_get_their_own_responses() {
    let s = ready_session();

    let responder = async {
        for n in 0..2 {
            let req = nth_request(&s, n).await;
            deliver(&s, &Frame::ack(req.seq));
            let body = format!("{{\"seq\":{}}}", req.seq);
            deliver(&s, &Frame::new(MessageType::StatusResponse, req.seq, 0, body.as_bytes()));
        }
    };

    let ((a, b), ()) = future::block_on(future::zip(
        future::zip(s.request_status(), s.request_status()),
        responder,
    ));

    let mut bodies = vec![a.unwrap(), b.unwrap()];
    bodies.sort();
    assert_eq!(bodies, vec![r#"{"seq":0}"#.to_string(), r#"{"seq":1}"#.to_string()]);
}

#[test]
fn one_request_in_flight_at_a_time() {
    let s = ready_session();

    let observer = async {
        let first = nth_request(&s, 0).await;
        for _ in 0..50 {
            future::yield_now().await;
        }
        let written = s.with_transport(|t| t.requests().len());
        deliver(&s, &Frame::ack(first.seq));
        let second = nth_request(&s, 1).await;
        deliver(&s, &Frame::ack(second.seq));
        written
    };

    let ((a, b), written) = future::block_on(future::zip(
        future::zip(s.send_settings_json("{\"a\":1}"), s.send_settings_json("{\"b\":2}")),
        observer,
    ));
    assert_eq!(written, 1, "second request must wait for the first ACK");
    assert_eq!((a, b), (Ok(()), Ok(())));
}

#[test]
fn inbound_frames_requesting_ack_are_acked() {
    let s = ready_session();
    deliver(&s, &Frame::new(MessageType::OtaStatus, 42, FLAG_ACK_REQUIRED, b"{}"));
    deliver(&s, &Frame::new(MessageType::StatusResponse, 43, 0, b"{}"));
    s.with_transport(|t| assert_eq!(t.acks(), vec![42]));
}

#[test]
fn late_ack_and_unknown_types_are_harmless() {
    let s = ready_session();
    deliver(&s, &Frame::ack(99));
    deliver(&s, &Frame { msg_type: 0x33, seq: 1, flags: 0, payload: vec![1, 2] });
    s.with_sink(|sink| assert!(sink.errors().is_empty()));
    assert!(s.is_ready());
}

#[test]
fn noise_between_frames_is_skipped() {
    let s = ready_session();
    let mut bytes = vec![0x00, 0x13, 0x37];
    bytes.extend(Frame::new(MessageType::Error, 7, 0, b"x").encode().unwrap());
    s.handle_event(TransportEvent::BytesReceived(bytes));

    s.with_sink(|sink| assert_eq!(sink.errors(), vec!["BLE error: x"]));
    assert!(s.decode_stats().discarded_bytes >= 3);
}

#[test]
fn sequence_survives_reconnect() {
    let s = ready_session();
    let (_, seq) = future::block_on(future::zip(s.send_settings_json("{}"), answer(&s, 0, None)));
    assert_eq!(seq, 0);

    s.post_event(TransportEvent::Disconnected);
    s.process_pending();
    crate::mock_transport::bring_up(&s);

    let (_, seq) = future::block_on(future::zip(s.send_settings_json("{}"), answer(&s, 1, None)));
    assert_eq!(seq, 1);
}

#[test]
fn settings_struct_is_serialized() {
    #[derive(serde::Serialize)]
    struct Scene {
        effect: &'static str,
        speed: u8,
    }

    let s = ready_session();
    let (r, _) = future::block_on(future::zip(
        s.send_settings(&Scene { effect: "pulse", speed: 3 }),
        answer(&s, 0, None),
    ));
    assert_eq!(r, Ok(()));
    let req = s.with_transport(|t| t.requests()[0].clone());
    assert_eq!(req.payload_text(), r#"{"effect":"pulse","speed":3}"#);
}

#[test]
fn disconnect_behind_byte_burst_still_fails_waiter() {
    let s = ready_session();

    let (result, ()) = future::block_on(future::zip(s.request_status(), async {
        let req = nth_request(&s, 0).await;
        deliver(&s, &Frame::ack(req.seq));
        let noise = Frame::new(MessageType::OtaStatus, 200, 0, &[b'n'; 1500]).encode().unwrap();
        for chunk in noise.chunks(20) {
            s.post_event(TransportEvent::BytesReceived(chunk.to_vec()));
        }
        s.post_event(TransportEvent::Disconnected);
        s.process_pending();
    }));

    assert_eq!(result, Err(LinkError::Cancelled { seq: 0 }));
    assert_eq!(s.state(), arklink::ConnectionState::Disconnected);
    assert_eq!(s.decode_stats().frames, 2, "ACK and the whole burst frame were decoded");
}

#[test]
fn raw_send_without_connection_is_reported() {
    let s = session_with(MockTransport::new());
    assert_eq!(future::block_on(s.send_raw(b"ping")), Err(LinkError::NotConnected));
    s.with_sink(|sink| assert_eq!(sink.errors(), vec!["Not connected to device"]));
}

#[test]
fn ack_echo_waits_for_outbound_frame() {
    let s = session_with(MockTransport::new());
    s.connect().unwrap();
    s.post_event(TransportEvent::Connected);
    s.post_event(TransportEvent::MtuChanged { mtu: 23, success: true });
    s.post_event(TransportEvent::ServicesDiscovered { success: true });
    s.post_event(TransportEvent::NotificationEnabled(true));
    s.process_pending();
    assert!(s.is_ready());

    let settings = format!(r#"{{"scene":"{}"}}"#, "a".repeat(120));
    let (result, ()) = future::block_on(future::zip(s.send_settings_json(&settings), async {
        while s.with_transport(|t| t.chunks.is_empty()) {
            future::yield_now().await;
        }
        deliver(&s, &Frame::new(MessageType::OtaStatus, 42, FLAG_ACK_REQUIRED, b"{}"));
        let req = nth_request(&s, 0).await;
        deliver(&s, &Frame::ack(req.seq));
    }));

    assert_eq!(result, Ok(()));
    s.with_transport(|t| {
        assert!(t.chunks.len() > 2);
        let frames = t.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload_text(), settings);
        assert_eq!(frames[1], Frame::ack(42));
    });
}
