//! Scripted transport for integration tests.
//!
//! Records every command and chunk so tests can assert on the full history.
//! Completions are not generated; tests post them as the platform would.

use arklink::app::ports::RecordingSink;
use arklink::error::TransportError;
use arklink::rpc::codec::{Frame, MessageType, decode_all};
use arklink::rpc::transport::{CHARACTERISTIC_UUID, NotifySetup, SERVICE_UUID, Transport, TransportEvent};
use arklink::{LinkConfig, ProtocolSession};
use futures_lite::future;

// ── Call record ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    Disconnect,
    RequestMtu(u16),
    DiscoverServices,
    EnableNotifications,
}

// ── MockTransport ─────────────────────────────────────────────

pub struct MockTransport {
    pub calls: Vec<Call>,
    pub chunks: Vec<Vec<u8>>,
    pub mtu_supported: bool,
    pub notify_setup: NotifySetup,
    pub characteristic_present: bool,
    pub connect_error: Option<TransportError>,
    pub write_error: Option<TransportError>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            chunks: Vec::new(),
            mtu_supported: true,
            notify_setup: NotifySetup::Pending,
            characteristic_present: true,
            connect_error: None,
            write_error: None,
        }
    }

    /// Every frame written so far, ACKs included.
    pub fn frames(&self) -> Vec<Frame> {
        decode_all(&self.chunks.concat()).0
    }

    /// Written frames that are requests rather than ACKs.
    pub fn requests(&self) -> Vec<Frame> {
        self.frames()
            .into_iter()
            .filter(|f| f.kind() != Some(MessageType::Ack))
            .collect()
    }

    /// Sequence numbers of ACKs the session wrote.
    pub fn acks(&self) -> Vec<u8> {
        self.frames()
            .into_iter()
            .filter(|f| f.kind() == Some(MessageType::Ack))
            .map(|f| f.seq)
            .collect()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.calls.push(Call::Connect);
        self.connect_error.map_or(Ok(()), Err)
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.calls.push(Call::Disconnect);
        Ok(())
    }

    fn request_mtu(&mut self, mtu: u16) -> Result<bool, TransportError> {
        self.calls.push(Call::RequestMtu(mtu));
        Ok(self.mtu_supported)
    }

    fn discover_services(&mut self) -> Result<(), TransportError> {
        self.calls.push(Call::DiscoverServices);
        Ok(())
    }

    fn has_characteristic(&self, service: u128, characteristic: u128) -> bool {
        self.characteristic_present && service == SERVICE_UUID && characteristic == CHARACTERISTIC_UUID
    }

    fn enable_notifications(&mut self, _service: u128, _characteristic: u128) -> Result<NotifySetup, TransportError> {
        self.calls.push(Call::EnableNotifications);
        Ok(self.notify_setup)
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        if let Some(e) = self.write_error {
            return Err(e);
        }
        self.chunks.push(chunk.to_vec());
        Ok(())
    }
}

// ── Session helpers ───────────────────────────────────────────

pub type TestSession = ProtocolSession<MockTransport, RecordingSink>;

/// Config with timeouts short enough for tests.
pub fn fast_config() -> LinkConfig {
    LinkConfig {
        inter_chunk_delay_ms: 1,
        ack_timeout_ms: 60,
        response_timeout_ms: 60,
        status_timeout_ms: 80,
        ..LinkConfig::default()
    }
}

pub fn session_with(transport: MockTransport) -> TestSession {
    ProtocolSession::new(fast_config(), transport, RecordingSink::new())
}

/// Walk the session through the whole connect sequence.
pub fn bring_up(session: &TestSession) {
    session.connect().unwrap();
    session.post_event(TransportEvent::Connected);
    session.post_event(TransportEvent::MtuChanged { mtu: 185, success: true });
    session.post_event(TransportEvent::ServicesDiscovered { success: true });
    session.post_event(TransportEvent::NotificationEnabled(true));
    session.process_pending();
    assert!(session.is_ready(), "bring_up did not reach Ready");
}

pub fn ready_session() -> TestSession {
    let s = session_with(MockTransport::new());
    bring_up(&s);
    s
}

/// Wait until the session has written its `n`-th request (0-based).
pub async fn nth_request(session: &TestSession, n: usize) -> Frame {
    loop {
        if let Some(f) = session.with_transport(|t| t.requests().get(n).cloned()) {
            return f;
        }
        future::yield_now().await;
    }
}

/// Deliver `frame` as one notification and dispatch it.
pub fn deliver(session: &TestSession, frame: &Frame) {
    session.handle_event(TransportEvent::BytesReceived(frame.encode().unwrap()));
}

/// Answer the `n`-th request with an ACK and, optionally, a reply.
pub async fn answer(session: &TestSession, n: usize, reply: Option<(MessageType, &str)>) -> u8 {
    let req = nth_request(session, n).await;
    deliver(session, &Frame::ack(req.seq));
    if let Some((t, body)) = reply {
        deliver(session, &Frame::new(t, req.seq, 0, body.as_bytes()));
    }
    req.seq
}
