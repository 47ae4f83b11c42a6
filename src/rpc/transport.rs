//! Platform BLE transport abstraction.
//!
//! The link never talks to a Bluetooth stack directly.  A platform adapter
//! implements [`Transport`] (commands issued by the link) and posts
//! [`TransportEvent`]s (completions and inbound notifications) into the
//! session's event queue.
//!
//! ```text
//!   ProtocolSession ──commands──▶ Transport (GATT client)
//!          ▲                          │
//!          └────── TransportEvent ────┘   via EventQueue
//! ```

use crate::error::TransportError;

// ── GATT layout ──────────────────────────────────────────────

/// ArkLights control service.
pub const SERVICE_UUID: u128 = 0x12345678_1234_1234_1234_123456789abc;

/// Write + notify characteristic carrying the framed protocol.
pub const CHARACTERISTIC_UUID: u128 = 0x87654321_4321_4321_4321_cba987654321;

/// Client Characteristic Configuration Descriptor.
pub const CCCD_UUID: u16 = 0x2902;

/// MTU most Android stacks grant for the control characteristic.
pub const PREFERRED_MTU: u16 = 185;

// ── Events ───────────────────────────────────────────────────

/// Everything the platform reports back to the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// GATT connection established.
    Connected,
    /// GATT connection lost or closed.
    Disconnected,
    /// Result of an MTU request.  `mtu` is only meaningful on success.
    MtuChanged { mtu: u16, success: bool },
    /// Service discovery finished.
    ServicesDiscovered { success: bool },
    /// CCCD write acknowledged (`true`) or refused (`false`).
    NotificationEnabled(bool),
    /// One notification's worth of bytes from the characteristic.
    BytesReceived(Vec<u8>),
    /// The platform refused an operation for lack of Bluetooth permission.
    PermissionDenied,
}

/// Outcome of asking the platform to enable notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifySetup {
    /// CCCD write issued; a `NotificationEnabled` event will follow.
    Pending,
    /// Descriptor missing or its write was refused up front.  Notifications
    /// may still flow but nothing will confirm it.
    Unconfirmable,
}

// ── Transport trait ──────────────────────────────────────────

/// GATT client operations the link needs.
///
/// Calls are non-blocking: they start an operation and the completion (if
/// any) arrives later as a [`TransportEvent`].
pub trait Transport {
    /// Open the GATT connection.
    fn connect(&mut self) -> Result<(), TransportError>;

    /// Close the GATT connection.
    fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Ask for a larger MTU.  `Ok(false)` means the platform cannot make
    /// the request and no `MtuChanged` event will follow.
    fn request_mtu(&mut self, mtu: u16) -> Result<bool, TransportError>;

    /// Start service discovery.
    fn discover_services(&mut self) -> Result<(), TransportError>;

    /// Whether discovery found `characteristic` under `service`.
    fn has_characteristic(&self, service: u128, characteristic: u128) -> bool;

    /// Subscribe to notifications on `characteristic`.
    fn enable_notifications(
        &mut self,
        service: u128,
        characteristic: u128,
    ) -> Result<NotifySetup, TransportError>;

    /// Write one chunk (at most `mtu - 3` bytes) to the characteristic.
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransportError>;
}

/// A transport with no device behind it.  Every operation reports
/// `NotConnected`.
pub struct NullTransport;

impl Transport for NullTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        Err(TransportError::NotConnected)
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn request_mtu(&mut self, _mtu: u16) -> Result<bool, TransportError> {
        Err(TransportError::NotConnected)
    }

    fn discover_services(&mut self) -> Result<(), TransportError> {
        Err(TransportError::NotConnected)
    }

    fn has_characteristic(&self, _service: u128, _characteristic: u128) -> bool {
        false
    }

    fn enable_notifications(
        &mut self,
        _service: u128,
        _characteristic: u128,
    ) -> Result<NotifySetup, TransportError> {
        Err(TransportError::NotConnected)
    }

    fn write_chunk(&mut self, _chunk: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::NotConnected)
    }
}
