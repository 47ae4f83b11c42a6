//! In-memory ArkLights controller.
//!
//! [`SimulatedDevice`] implements [`Transport`] by playing the firmware side
//! of the protocol: it reassembles written chunks, ACKs what asks for it,
//! answers status and OTA-status requests at the same `seq`, and posts
//! every completion and notification into the session's [`EventQueue`].
//!
//! ```text
//!  ProtocolSession ──write_chunk──▶ SimulatedDevice ──▶ FrameDecoder
//!         ▲                                │
//!         └──── EventQueue ◀── BytesReceived (mtu - 3 slices)
//! ```
//!
//! A cloneable [`SimHandle`] shares the device state so tests (or the demo
//! binary) can inspect what arrived and flip fault knobs mid-run.

use core::cell::RefCell;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{debug, info, warn};
use serde_json::json;

use crate::error::TransportError;
use crate::rpc::channels::EventQueue;
use crate::rpc::chunked::{DEFAULT_MTU, chunk_frame, max_chunk_payload};
use crate::rpc::codec::{FLAG_ACK_REQUIRED, Frame, FrameDecoder, MessageType};
use crate::rpc::transport::{CHARACTERISTIC_UUID, NotifySetup, SERVICE_UUID, Transport, TransportEvent};

/// Largest MTU the simulated radio accepts.
pub const SIM_MAX_MTU: u16 = 247;

// ── Fault knobs ──────────────────────────────────────────────

/// Misbehaviours the device can be told to exhibit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Faults {
    /// Every chunk write is rejected.
    pub fail_writes: bool,
    /// Frames are processed but never ACKed.
    pub drop_acks: bool,
    /// Requests are ACKed but never answered.
    pub drop_responses: bool,
    /// Answer requests with an `Error` frame carrying this text.
    pub error_reply: Option<String>,
    /// MTU requests cannot be issued.
    pub refuse_mtu: bool,
    /// CCCD confirmation never comes; notifications flow anyway.
    pub notify_fallback: bool,
    /// The platform lacks Bluetooth permission.
    pub deny_permission: bool,
    /// Discovery does not find the control characteristic.
    pub missing_characteristic: bool,
    /// Responses ask the client for an ACK.
    pub ack_responses: bool,
}

// ── Device state ─────────────────────────────────────────────

struct SimState {
    connected: bool,
    mtu: u16,
    max_mtu: u16,
    decoder: FrameDecoder,
    faults: Faults,
    status: serde_json::Value,
    ota: serde_json::Value,
    frames: Vec<Frame>,
    settings: Vec<String>,
    ota_urls: Vec<String>,
    client_acks: Vec<u8>,
    chunks_written: usize,
    device_seq: u8,
}

impl SimState {
    fn new() -> Self {
        Self {
            connected: false,
            mtu: DEFAULT_MTU,
            max_mtu: SIM_MAX_MTU,
            decoder: FrameDecoder::new(),
            faults: Faults::default(),
            status: json!({
                "device": "ARKLIGHTS-SIM",
                "firmware": "sim-1.0",
                "brightness": 128,
                "effect": "solid",
                "uptime_s": 0
            }),
            ota: json!({ "state": "idle", "progress": 0 }),
            frames: Vec::new(),
            settings: Vec::new(),
            ota_urls: Vec::new(),
            client_acks: Vec::new(),
            chunks_written: 0,
            device_seq: 0x80,
        }
    }
}

type Shared = Arc<BlockingMutex<CriticalSectionRawMutex, RefCell<SimState>>>;

// ── Handle ───────────────────────────────────────────────────

/// Inspection and control handle shared with a [`SimulatedDevice`].
#[derive(Clone)]
pub struct SimHandle {
    state: Shared,
    events: EventQueue,
}

impl SimHandle {
    fn with<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        self.state.lock(|s| f(&mut s.borrow_mut()))
    }

    pub fn set_faults(&self, faults: Faults) {
        self.with(|s| s.faults = faults);
    }

    pub fn update_faults(&self, f: impl FnOnce(&mut Faults)) {
        self.with(|s| f(&mut s.faults));
    }

    pub fn set_max_mtu(&self, mtu: u16) {
        self.with(|s| s.max_mtu = mtu);
    }

    /// Replace the status document the device reports.
    pub fn set_status(&self, status: serde_json::Value) {
        self.with(|s| s.status = status);
    }

    pub fn is_connected(&self) -> bool {
        self.with(|s| s.connected)
    }

    pub fn mtu(&self) -> u16 {
        self.with(|s| s.mtu)
    }

    /// Every non-ACK frame received, in order.
    pub fn frames(&self) -> Vec<Frame> {
        self.with(|s| s.frames.clone())
    }

    pub fn settings(&self) -> Vec<String> {
        self.with(|s| s.settings.clone())
    }

    pub fn ota_urls(&self) -> Vec<String> {
        self.with(|s| s.ota_urls.clone())
    }

    /// Sequence numbers the client has ACKed.
    pub fn client_acks(&self) -> Vec<u8> {
        self.with(|s| s.client_acks.clone())
    }

    pub fn chunks_written(&self) -> usize {
        self.with(|s| s.chunks_written)
    }

    /// Send a device-initiated frame to the client.
    pub fn notify(&self, frame: &Frame) {
        self.with(|s| send_to_client(s, &self.events, frame));
    }

    /// Send an unsolicited `Error` frame.
    pub fn notify_error(&self, message: &str) {
        self.with(|s| {
            let seq = next_device_seq(s);
            send_to_client(s, &self.events, &Frame::new(MessageType::Error, seq, 0, message.as_bytes()));
        });
    }

    /// Deliver raw bytes as one notification, framing or not.
    pub fn inject_raw(&self, bytes: &[u8]) {
        self.events.post(TransportEvent::BytesReceived(bytes.to_vec()));
    }

    /// Drop the link from the device side.
    pub fn drop_link(&self) {
        self.with(|s| {
            s.connected = false;
            s.mtu = DEFAULT_MTU;
            s.decoder.reset();
        });
        info!("sim: link dropped by device");
        self.events.post(TransportEvent::Disconnected);
    }
}

// ── Device ───────────────────────────────────────────────────

pub struct SimulatedDevice {
    handle: SimHandle,
}

impl SimulatedDevice {
    /// Device posting into `events`, plus a handle to inspect it.
    pub fn new(events: EventQueue) -> (Self, SimHandle) {
        let handle = SimHandle {
            state: Arc::new(BlockingMutex::new(RefCell::new(SimState::new()))),
            events,
        };
        (Self { handle: handle.clone() }, handle)
    }

    fn post(&self, event: TransportEvent) {
        self.handle.events.post(event);
    }

    fn permission(&self) -> Result<(), TransportError> {
        if self.handle.with(|s| s.faults.deny_permission) {
            return Err(TransportError::PermissionDenied);
        }
        Ok(())
    }

    fn require_connected(&self) -> Result<(), TransportError> {
        self.permission()?;
        if !self.handle.is_connected() {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }
}

impl Transport for SimulatedDevice {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.permission()?;
        self.handle.with(|s| {
            s.connected = true;
            s.mtu = DEFAULT_MTU;
            s.decoder.reset();
        });
        info!("sim: connected");
        self.post(TransportEvent::Connected);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        let was = self.handle.with(|s| {
            let was = s.connected;
            s.connected = false;
            s.mtu = DEFAULT_MTU;
            s.decoder.reset();
            was
        });
        if was {
            info!("sim: disconnected");
            self.post(TransportEvent::Disconnected);
        }
        Ok(())
    }

    fn request_mtu(&mut self, mtu: u16) -> Result<bool, TransportError> {
        self.require_connected()?;
        let granted = self.handle.with(|s| {
            if s.faults.refuse_mtu {
                return None;
            }
            s.mtu = mtu.clamp(DEFAULT_MTU, s.max_mtu);
            Some(s.mtu)
        });
        match granted {
            Some(mtu) => {
                debug!("sim: MTU {}", mtu);
                self.post(TransportEvent::MtuChanged { mtu, success: true });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn discover_services(&mut self) -> Result<(), TransportError> {
        self.require_connected()?;
        self.post(TransportEvent::ServicesDiscovered { success: true });
        Ok(())
    }

    fn has_characteristic(&self, service: u128, characteristic: u128) -> bool {
        !self.handle.with(|s| s.faults.missing_characteristic)
            && service == SERVICE_UUID
            && characteristic == CHARACTERISTIC_UUID
    }

    fn enable_notifications(&mut self, _service: u128, _characteristic: u128) -> Result<NotifySetup, TransportError> {
        self.require_connected()?;
        if self.handle.with(|s| s.faults.notify_fallback) {
            return Ok(NotifySetup::Unconfirmable);
        }
        self.post(TransportEvent::NotificationEnabled(true));
        Ok(NotifySetup::Pending)
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        self.require_connected()?;
        let events = &self.handle.events;
        self.handle.with(|s| {
            if s.faults.fail_writes {
                return Err(TransportError::WriteRejected);
            }
            if chunk.len() > max_chunk_payload(s.mtu) {
                warn!("sim: {} byte write exceeds MTU {}", chunk.len(), s.mtu);
                return Err(TransportError::WriteRejected);
            }
            s.chunks_written += 1;
            for frame in s.decoder.feed(chunk) {
                handle_frame(s, events, frame);
            }
            Ok(())
        })
    }
}

// ── Firmware behaviour ───────────────────────────────────────

fn handle_frame(s: &mut SimState, events: &EventQueue, frame: Frame) {
    let Some(kind) = frame.kind() else {
        debug!("sim: unknown type 0x{:02X}", frame.msg_type);
        return;
    };
    if kind == MessageType::Ack {
        s.client_acks.push(frame.seq);
        return;
    }

    debug!("sim: rx {:?} seq={}", kind, frame.seq);
    s.frames.push(frame.clone());

    if frame.ack_required() && !s.faults.drop_acks {
        send_to_client(s, events, &Frame::ack(frame.seq));
    }

    let reply = match kind {
        MessageType::SettingsJson => {
            s.settings.push(frame.payload_text());
            None
        }
        MessageType::OtaStart => {
            let url = frame.payload_text();
            s.ota = json!({ "state": "downloading", "progress": 0, "url": url });
            s.ota_urls.push(url);
            None
        }
        MessageType::StatusRequest => Some((MessageType::StatusResponse, s.status.to_string())),
        MessageType::OtaStatus => Some((MessageType::OtaStatus, s.ota.to_string())),
        _ => None,
    };

    let Some((reply_type, body)) = reply else {
        return;
    };
    if s.faults.drop_responses {
        return;
    }

    let flags = if s.faults.ack_responses { FLAG_ACK_REQUIRED } else { 0 };
    let response = match &s.faults.error_reply {
        Some(message) => Frame::new(MessageType::Error, frame.seq, flags, message.as_bytes()),
        None => Frame::new(reply_type, frame.seq, flags, body.as_bytes()),
    };
    send_to_client(s, events, &response);
}

fn next_device_seq(s: &mut SimState) -> u8 {
    let seq = s.device_seq;
    s.device_seq = seq.wrapping_add(1);
    seq
}

/// Notify `frame` in MTU-sized slices.
fn send_to_client(s: &SimState, events: &EventQueue, frame: &Frame) {
    if !s.connected {
        return;
    }
    let bytes = match frame.encode() {
        Ok(b) => b,
        Err(e) => {
            warn!("sim: cannot encode reply: {}", e);
            return;
        }
    };
    for chunk in chunk_frame(&bytes, max_chunk_payload(s.mtu)) {
        events.post(TransportEvent::BytesReceived(chunk.to_vec()));
    }
}

// ── Tests ────────────────────────────────────────────────────
