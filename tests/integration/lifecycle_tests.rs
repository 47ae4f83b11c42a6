//! Connection lifecycle driven through the session: negotiation order,
//! fallbacks, readiness gating and disconnect cleanup.

use arklink::app::session::PERMISSION_DENIED_MESSAGE;
use arklink::error::TransportError;
use arklink::rpc::transport::{NotifySetup, TransportEvent};
use arklink::{ConnectionState, LinkError, LinkEvent};
use futures_lite::future;

use crate::mock_transport::{Call, MockTransport, bring_up, ready_session, session_with};

#[test]
fn negotiation_runs_in_order() {
    let s = session_with(MockTransport::new());
    bring_up(&s);

    s.with_transport(|t| {
        assert_eq!(
            t.calls,
            vec![
                Call::Connect,
                Call::RequestMtu(185),
                Call::DiscoverServices,
                Call::EnableNotifications
            ]
        );
    });
    assert_eq!(s.state(), ConnectionState::Ready);
    assert_eq!(s.mtu(), 185);
}

#[test]
fn state_changes_are_notified() {
    let s = ready_session();
    s.with_sink(|sink| {
        let states: Vec<_> = sink
            .events
            .iter()
            .filter_map(|e| match e {
                LinkEvent::StateChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Ready
            ]
        );
        assert_eq!(sink.events.last(), Some(&LinkEvent::ReadinessChanged(true)));
    });
}

#[test]
fn no_mtu_request_goes_straight_to_discovery() {
    let mut t = MockTransport::new();
    t.mtu_supported = false;
    let s = session_with(t);

    s.connect().unwrap();
    s.post_event(TransportEvent::Connected);
    s.process_pending();

    s.with_transport(|t| assert_eq!(t.calls.last(), Some(&Call::DiscoverServices)));
    assert_eq!(s.mtu(), 23);
}

#[test]
fn failed_mtu_negotiation_keeps_default() {
    let s = session_with(MockTransport::new());
    s.connect().unwrap();
    s.post_event(TransportEvent::Connected);
    s.post_event(TransportEvent::MtuChanged { mtu: 0, success: false });
    s.process_pending();

    assert_eq!(s.mtu(), 23);
    s.with_transport(|t| assert_eq!(t.calls.last(), Some(&Call::DiscoverServices)));
}

#[test]
fn missing_descriptor_takes_fallback() {
    let mut t = MockTransport::new();
    t.notify_setup = NotifySetup::Unconfirmable;
    let s = session_with(t);

    s.connect().unwrap();
    s.post_event(TransportEvent::Connected);
    s.post_event(TransportEvent::MtuChanged { mtu: 185, success: true });
    s.post_event(TransportEvent::ServicesDiscovered { success: true });
    s.process_pending();

    assert!(s.is_ready());
    assert!(s.ready_via_fallback());
}

#[test]
fn missing_characteristic_never_ready() {
    let mut t = MockTransport::new();
    t.characteristic_present = false;
    let s = session_with(t);

    s.connect().unwrap();
    s.post_event(TransportEvent::Connected);
    s.post_event(TransportEvent::MtuChanged { mtu: 185, success: true });
    s.post_event(TransportEvent::ServicesDiscovered { success: true });
    s.process_pending();

    assert_eq!(s.state(), ConnectionState::Connected);
    s.with_transport(|t| assert!(!t.calls.contains(&Call::EnableNotifications)));
}

#[test]
fn requests_fail_fast_until_ready() {
    let s = session_with(MockTransport::new());
    s.connect().unwrap();
    s.post_event(TransportEvent::Connected);
    s.process_pending();

    assert_eq!(future::block_on(s.send_settings_json("{}")), Err(LinkError::NotReady));
    assert_eq!(future::block_on(s.request_status()), Err(LinkError::NotReady));
    assert_eq!(future::block_on(s.start_ota("http://fw")), Err(LinkError::NotReady));
    assert_eq!(future::block_on(s.request_ota_status()), Err(LinkError::NotReady));
    s.with_transport(|t| assert!(t.chunks.is_empty()));
    assert_eq!(s.next_seq(), 0);
}

#[test]
fn disconnect_resets_link_state() {
    let s = ready_session();
    s.post_event(TransportEvent::Disconnected);
    s.process_pending();

    assert_eq!(s.state(), ConnectionState::Disconnected);
    assert_eq!(s.mtu(), 23);
    assert!(!s.is_ready());
    s.with_sink(|sink| assert!(sink.events.contains(&LinkEvent::ReadinessChanged(false))));
}

#[test]
fn explicit_disconnect_closes_transport() {
    let s = ready_session();
    s.disconnect();

    assert_eq!(s.state(), ConnectionState::Disconnected);
    s.with_transport(|t| assert_eq!(t.calls.last(), Some(&Call::Disconnect)));

    // The platform's own callback arrives later and changes nothing.
    s.post_event(TransportEvent::Disconnected);
    s.process_pending();
    assert_eq!(s.state(), ConnectionState::Disconnected);
}

#[test]
fn refused_connect_reports_permission() {
    let mut t = MockTransport::new();
    t.connect_error = Some(TransportError::PermissionDenied);
    let s = session_with(t);

    assert_eq!(s.connect(), Err(LinkError::NotConnected));
    s.with_sink(|sink| assert_eq!(sink.errors(), vec![PERMISSION_DENIED_MESSAGE]));
}

#[test]
fn platform_permission_event_is_surfaced() {
    let s = session_with(MockTransport::new());
    s.post_event(TransportEvent::PermissionDenied);
    s.process_pending();
    s.with_sink(|sink| assert_eq!(sink.errors(), vec![PERMISSION_DENIED_MESSAGE]));
}

#[test]
fn wait_ready_resolves_when_dispatcher_catches_up() {
    let s = session_with(MockTransport::new());
    s.connect().unwrap();
    s.post_event(TransportEvent::Connected);
    s.post_event(TransportEvent::MtuChanged { mtu: 185, success: true });
    s.post_event(TransportEvent::ServicesDiscovered { success: true });
    s.post_event(TransportEvent::NotificationEnabled(true));

    let r = future::block_on(s.run_until(s.wait_ready(embassy_time::Duration::from_secs(1))));
    assert_eq!(r, Ok(()));
}
