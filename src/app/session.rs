//! Protocol session, the hexagonal core of the link.
//!
//! [`ProtocolSession`] owns the lifecycle FSM, the correlation engine and
//! the receive buffer for one device.  The application calls the request
//! API; the platform feeds [`TransportEvent`]s through the session's
//! [`EventQueue`]; one dispatcher task ([`ProtocolSession::run`]) drains
//! that queue.
//!
//! ```text
//!  Application ──request──▶ ┌──────────────────────────┐ ──▶ EventSink
//!                           │     ProtocolSession      │
//!  EventQueue ──events────▶ │ Lifecycle · Engine · Rx  │ ──▶ Transport
//!                           └──────────────────────────┘
//! ```
//!
//! All state sits behind short blocking locks; none is held across an
//! `.await`.  The only lock that is held across awaits is the engine's
//! send gate.

use core::cell::RefCell;
use core::future::Future;
use std::collections::VecDeque;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, with_deadline};
use futures_lite::future;
use log::{debug, info, warn};
use serde::Serialize;

use super::commands::LinkRequest;
use super::events::LinkEvent;
use super::ports::EventSink;
use crate::config::LinkConfig;
use crate::error::{LinkError, Result, TransportError};
use crate::fsm::{Action, ConnectionState, Lifecycle, LinkInput};
use crate::rpc::channels::EventQueue;
use crate::rpc::chunked::Chunker;
use crate::rpc::codec::{Frame, FrameDecoder};
use crate::rpc::dispatch::{DispatchContext, dispatch_frame};
use crate::rpc::engine::{CorrelationEngine, FrameWriter};
use crate::rpc::transport::{CHARACTERISTIC_UUID, NotifySetup, SERVICE_UUID, Transport, TransportEvent};

type Locked<T> = BlockingMutex<CriticalSectionRawMutex, RefCell<T>>;

/// Message raised when the platform refuses a Bluetooth operation.
pub const PERMISSION_DENIED_MESSAGE: &str = "Bluetooth permission denied";

/// Message raised when a chunk write fails.
pub const WRITE_FAILED_MESSAGE: &str = "Failed to write BLE chunk";

/// Message raised when a write is attempted without a connection.
pub const NOT_CONNECTED_MESSAGE: &str = "Not connected to device";

/// Outbound write bookkeeping.  ACK echoes that arrive while a frame is
/// being written wait here until its last chunk is out.
#[derive(Default)]
struct Outbound {
    writers: usize,
    deferred_acks: Vec<Vec<u8>>,
}

// ───────────────────────────────────────────────────────────────
// ProtocolSession
// ───────────────────────────────────────────────────────────────

pub struct ProtocolSession<T: Transport, E: EventSink> {
    config: LinkConfig,
    engine: CorrelationEngine,
    lifecycle: Locked<Lifecycle>,
    decoder: Locked<FrameDecoder>,
    transport: Locked<T>,
    sink: Locked<E>,
    outbound: Locked<Outbound>,
    events: EventQueue,
    ready: Signal<CriticalSectionRawMutex, ()>,
}

impl<T: Transport, E: EventSink> ProtocolSession<T, E> {
    pub fn new(config: LinkConfig, transport: T, sink: E) -> Self {
        Self::with_event_queue(config, transport, sink, EventQueue::new())
    }

    /// Session consuming an existing queue the transport already posts to.
    pub fn with_event_queue(config: LinkConfig, transport: T, sink: E, events: EventQueue) -> Self {
        Self {
            lifecycle: BlockingMutex::new(RefCell::new(Lifecycle::new(config.requested_mtu))),
            decoder: BlockingMutex::new(RefCell::new(FrameDecoder::with_max_payload(
                config.max_rx_payload,
            ))),
            engine: CorrelationEngine::new(),
            transport: BlockingMutex::new(RefCell::new(transport)),
            sink: BlockingMutex::new(RefCell::new(sink)),
            outbound: BlockingMutex::new(RefCell::new(Outbound::default())),
            events,
            ready: Signal::new(),
            config,
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Handle for platform callbacks to post into.
    pub fn event_queue(&self) -> EventQueue {
        self.events.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.lock(|l| l.borrow().state())
    }

    pub fn is_ready(&self) -> bool {
        self.lifecycle.lock(|l| l.borrow().is_ready())
    }

    pub fn mtu(&self) -> u16 {
        self.lifecycle.lock(|l| l.borrow().mtu())
    }

    /// Whether `Ready` was reached without a CCCD confirmation.
    pub fn ready_via_fallback(&self) -> bool {
        self.lifecycle.lock(|l| l.borrow().context().ready_via_fallback)
    }

    /// Frames, rejections and noise seen by the receive buffer so far.
    pub fn decode_stats(&self) -> crate::rpc::codec::DecodeStats {
        self.decoder.lock(|d| d.borrow().stats())
    }

    /// Sequence number the next request will carry.
    pub fn next_seq(&self) -> u8 {
        self.engine.next_seq()
    }

    pub fn with_sink<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        self.sink.lock(|s| f(&mut s.borrow_mut()))
    }

    pub fn with_transport<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.transport.lock(|t| f(&mut t.borrow_mut()))
    }

    // ── Connection control ────────────────────────────────────

    /// Start connecting.  Fails if the platform refused to begin.
    pub fn connect(&self) -> Result<()> {
        self.drive(LinkInput::ConnectRequested);
        if self.state() == ConnectionState::Disconnected {
            return Err(LinkError::NotConnected);
        }
        Ok(())
    }

    /// Close the connection and fail every pending request now.
    pub fn disconnect(&self) {
        self.drive(LinkInput::DisconnectRequested);
    }

    /// Suspend until the lifecycle reaches `Ready`.  Something else must
    /// be draining the event queue meanwhile.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_ready() {
                return Ok(());
            }
            if with_deadline(deadline, self.ready.wait()).await.is_err() {
                return if self.is_ready() { Ok(()) } else { Err(LinkError::NotReady) };
            }
        }
    }

    // ── Dispatcher ────────────────────────────────────────────

    /// Post an event as a platform callback would.
    pub fn post_event(&self, event: TransportEvent) {
        self.events.post(event);
    }

    /// Dispatcher loop: handle queued events forever.
    pub async fn run(&self) {
        loop {
            let event = self.events.receive().await;
            self.handle_event(event);
        }
    }

    /// Run the dispatcher alongside `fut` until `fut` finishes.
    pub async fn run_until<F: Future>(&self, fut: F) -> F::Output {
        future::or(fut, async {
            loop {
                let event = self.events.receive().await;
                self.handle_event(event);
            }
        })
        .await
    }

    /// Handle every queued event, including ones queued while handling.
    /// Returns how many were handled.
    pub fn process_pending(&self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.events.try_receive() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Apply one transport event.
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::BytesReceived(bytes) => {
                let frames = self.decoder.lock(|d| d.borrow_mut().feed(&bytes));
                for frame in frames {
                    debug!(
                        "session: rx type=0x{:02X} seq={} flags=0x{:02X} len={}",
                        frame.msg_type,
                        frame.seq,
                        frame.flags,
                        frame.payload.len()
                    );
                    dispatch_frame(self, frame);
                }
            }
            TransportEvent::Connected => self.drive(LinkInput::Connected),
            TransportEvent::Disconnected => self.drive(LinkInput::Disconnected),
            TransportEvent::MtuChanged { mtu, success } => self.drive(LinkInput::MtuChanged { mtu, success }),
            TransportEvent::ServicesDiscovered { success } => {
                let found = success
                    && self.transport.lock(|t| {
                        t.borrow().has_characteristic(SERVICE_UUID, CHARACTERISTIC_UUID)
                    });
                self.drive(LinkInput::ServicesDiscovered { success, found });
            }
            TransportEvent::NotificationEnabled(ok) => self.drive(LinkInput::NotificationEnabled(ok)),
            TransportEvent::PermissionDenied => self.emit(LinkEvent::Error(PERMISSION_DENIED_MESSAGE.into())),
        }
    }

    // ── Request API ───────────────────────────────────────────

    /// Run one catalogued request.  Returns the response frame for
    /// requests that expect one.
    pub async fn execute(&self, request: &LinkRequest) -> Result<Option<Frame>> {
        if !self.is_ready() {
            warn!("session: {} refused, link not ready", request.name());
            return Err(LinkError::NotReady);
        }

        let timeouts = request.timeouts(&self.config);
        let result = match request.expected_response() {
            Some(expected) => self
                .engine
                .send_await_response(
                    self,
                    request.message_type(),
                    request.payload(),
                    expected,
                    timeouts.ack,
                    timeouts.response,
                )
                .await
                .map(Some),
            None => self
                .engine
                .send_await_ack(self, request.message_type(), request.payload(), timeouts.ack)
                .await
                .map(|()| None),
        };

        match &result {
            Ok(_) => debug!("session: {} ok", request.name()),
            Err(e) => warn!("session: {} failed: {}", request.name(), e),
        }
        result
    }

    /// Fetch the device status JSON.
    pub async fn request_status(&self) -> Result<String> {
        self.execute_for_text(&LinkRequest::Status).await
    }

    /// Fetch and parse the device status.
    pub async fn request_status_json(&self) -> Result<serde_json::Value> {
        let text = self.request_status().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Push a settings document.  Succeeds once the device ACKs it.
    pub async fn send_settings_json(&self, json: &str) -> Result<()> {
        self.execute(&LinkRequest::Settings(json.to_owned())).await.map(drop)
    }

    /// Serialize `settings` and push them.
    pub async fn send_settings<S: Serialize>(&self, settings: &S) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        self.send_settings_json(&json).await
    }

    /// Ask the device to fetch and install firmware from `url`.
    pub async fn start_ota(&self, url: &str) -> Result<()> {
        self.execute(&LinkRequest::OtaStart(url.to_owned())).await.map(drop)
    }

    /// Fetch the firmware update progress JSON.
    pub async fn request_ota_status(&self) -> Result<String> {
        self.execute_for_text(&LinkRequest::OtaStatus).await
    }

    /// Write unframed bytes in MTU-sized chunks.  Needs a connection but
    /// not readiness; nothing is acknowledged.
    pub async fn send_raw(&self, data: &[u8]) -> Result<()> {
        if !self.state().is_connected() {
            self.raise_error(NOT_CONNECTED_MESSAGE);
            return Err(LinkError::NotConnected);
        }
        self.write_chunks(data).await
    }

    /// Fail the pending exchange for `seq`, if any.
    pub fn cancel(&self, seq: u8) -> bool {
        self.engine.cancel(seq)
    }

    /// Raise a free-text error notification.
    pub fn raise_error(&self, message: impl Into<String>) {
        self.emit(LinkEvent::Error(message.into()));
    }

    // ── Internal ──────────────────────────────────────────────

    async fn execute_for_text(&self, request: &LinkRequest) -> Result<String> {
        match self.execute(request).await? {
            Some(frame) => Ok(frame.payload_text()),
            None => Ok(String::new()),
        }
    }

    fn emit(&self, event: LinkEvent) {
        debug!("session: event {:?}", event);
        self.sink.lock(|s| s.borrow_mut().emit(&event));
    }

    fn chunker(&self, delay: Duration) -> Chunker {
        Chunker::new(self.mtu(), delay)
    }

    async fn write_chunks(&self, data: &[u8]) -> Result<()> {
        let chunker = self.chunker(self.config.inter_chunk_delay());
        let written = {
            let _writing = WriteGuard::enter(self);
            chunker
                .write_all(data, |chunk| self.transport.lock(|t| t.borrow_mut().write_chunk(chunk)))
                .await
        };

        match written {
            Ok(_) => Ok(()),
            Err(TransportError::PermissionDenied) => {
                self.emit(LinkEvent::Error(PERMISSION_DENIED_MESSAGE.into()));
                Err(LinkError::PermissionDenied)
            }
            Err(e) => {
                warn!("session: chunk write failed: {}", e);
                self.emit(LinkEvent::Error(WRITE_FAILED_MESSAGE.into()));
                Err(LinkError::TransportWriteFailed(e))
            }
        }
    }

    fn write_ack_now(&self, frame: &[u8]) -> core::result::Result<(), TransportError> {
        let chunker = self.chunker(Duration::from_ticks(0));
        self.transport.lock(|t| chunker.write_now(&mut *t.borrow_mut(), frame))
    }

    /// Write ACK echoes held back by an outbound frame.
    fn flush_deferred_acks(&self) {
        let acks = self.outbound.lock(|o| core::mem::take(&mut o.borrow_mut().deferred_acks));
        for ack in acks {
            if let Err(e) = self.write_ack_now(&ack) {
                warn!("session: deferred ACK failed: {}", e);
                self.raise_error(format!("Failed to send ACK: {e}"));
            }
        }
    }

    /// Feed `input` to the lifecycle and carry out whatever it asks for,
    /// including inputs produced by those actions.
    fn drive(&self, input: LinkInput) {
        let mut inputs = VecDeque::from([input]);

        while let Some(input) = inputs.pop_front() {
            let (step, was_ready, is_ready, mtu_before, mtu_after) = self.lifecycle.lock(|l| {
                let mut l = l.borrow_mut();
                let was_ready = l.is_ready();
                let mtu_before = l.mtu();
                let step = l.handle(input);
                (step, was_ready, l.is_ready(), mtu_before, l.mtu())
            });

            if step.changed() {
                self.emit(LinkEvent::StateChanged {
                    from: step.from,
                    to: step.to,
                });
            }
            if mtu_after != mtu_before && step.to.is_connected() {
                self.emit(LinkEvent::MtuChanged(mtu_after));
            }
            if was_ready != is_ready {
                if is_ready {
                    info!("session: ready (mtu {})", mtu_after);
                    self.ready.signal(());
                } else {
                    self.ready.reset();
                }
                self.emit(LinkEvent::ReadinessChanged(is_ready));
            }

            for action in step.actions {
                if let Some(next) = self.perform(action) {
                    inputs.push_back(next);
                }
            }
        }
    }

    /// Carry out one lifecycle action.  Returns a follow-up input when the
    /// platform answers synchronously.
    fn perform(&self, action: Action) -> Option<LinkInput> {
        debug!("session: {:?}", action);
        match action {
            Action::Connect => match self.transport.lock(|t| t.borrow_mut().connect()) {
                Ok(()) => None,
                Err(e) => {
                    self.report(e);
                    Some(LinkInput::Disconnected)
                }
            },
            Action::Disconnect => {
                if let Err(e) = self.transport.lock(|t| t.borrow_mut().disconnect()) {
                    self.report(e);
                }
                None
            }
            Action::RequestMtu(mtu) => match self.transport.lock(|t| t.borrow_mut().request_mtu(mtu)) {
                Ok(true) => None,
                Ok(false) => Some(LinkInput::MtuUnavailable),
                Err(e) => {
                    self.report(e);
                    Some(LinkInput::MtuUnavailable)
                }
            },
            Action::DiscoverServices => {
                if let Err(e) = self.transport.lock(|t| t.borrow_mut().discover_services()) {
                    self.report(e);
                }
                None
            }
            Action::EnableNotifications => {
                let setup = self.transport.lock(|t| {
                    t.borrow_mut()
                        .enable_notifications(SERVICE_UUID, CHARACTERISTIC_UUID)
                });
                match setup {
                    Ok(NotifySetup::Pending) => None,
                    Ok(NotifySetup::Unconfirmable) => Some(LinkInput::NotificationsUnconfirmable),
                    Err(TransportError::PermissionDenied) => {
                        self.report(TransportError::PermissionDenied);
                        None
                    }
                    Err(e) => {
                        warn!("session: CCCD write failed ({}), using fallback", e);
                        Some(LinkInput::NotificationsUnconfirmable)
                    }
                }
            }
            Action::ResetSession => {
                let stats = self.decoder.lock(|d| {
                    let mut d = d.borrow_mut();
                    d.reset();
                    d.stats()
                });
                let cancelled = self.engine.cancel_all();
                self.ready.reset();
                info!(
                    "session: reset ({} waiter(s) failed, {} frames / {} rejected so far)",
                    cancelled, stats.frames, stats.rejected
                );
                None
            }
        }
    }

    fn report(&self, e: TransportError) {
        match e {
            TransportError::PermissionDenied => {
                warn!("session: {}", PERMISSION_DENIED_MESSAGE);
                self.emit(LinkEvent::Error(PERMISSION_DENIED_MESSAGE.into()));
            }
            other => warn!("session: transport error: {}", other),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Engine and dispatcher seams
// ───────────────────────────────────────────────────────────────

impl<T: Transport, E: EventSink> FrameWriter for ProtocolSession<T, E> {
    fn is_ready(&self) -> bool {
        ProtocolSession::is_ready(self)
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<()> {
        self.write_chunks(frame).await
    }
}

impl<T: Transport, E: EventSink> DispatchContext for ProtocolSession<T, E> {
    fn engine(&self) -> &CorrelationEngine {
        &self.engine
    }

    fn send_ack(&self, frame: &[u8]) -> core::result::Result<(), TransportError> {
        let deferred = self.outbound.lock(|o| {
            let mut o = o.borrow_mut();
            if o.writers > 0 {
                o.deferred_acks.push(frame.to_vec());
                true
            } else {
                false
            }
        });
        if deferred {
            debug!("session: ACK held until the outbound frame is written");
            return Ok(());
        }
        self.write_ack_now(frame)
    }

    fn notify_error(&self, message: String) {
        self.raise_error(message);
    }
}

/// Marks an outbound frame write in progress.  Dropping it, on completion
/// or when the writing future is abandoned, releases held ACK echoes.
struct WriteGuard<'a, T: Transport, E: EventSink> {
    session: &'a ProtocolSession<T, E>,
}

impl<'a, T: Transport, E: EventSink> WriteGuard<'a, T, E> {
    fn enter(session: &'a ProtocolSession<T, E>) -> Self {
        session.outbound.lock(|o| o.borrow_mut().writers += 1);
        Self { session }
    }
}

impl<T: Transport, E: EventSink> Drop for WriteGuard<'_, T, E> {
    fn drop(&mut self) {
        let idle = self.session.outbound.lock(|o| {
            let mut o = o.borrow_mut();
            o.writers -= 1;
            o.writers == 0
        });
        if idle {
            self.session.flush_deferred_acks();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
