//! Unified error types for the ArkLights link.
//!
//! A single [`LinkError`] enum that every layer converts into, so callers of
//! the request API handle one type.  Codec and transport failures keep their
//! own small enums and fold in through `From`.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level link error
// ---------------------------------------------------------------------------

/// Every fallible request or lifecycle operation funnels into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Request issued before notifications were confirmed.  Nothing was sent.
    NotReady,
    /// Operation needs a GATT connection and there is none.
    NotConnected,
    /// A chunk write was refused by the platform; the exchange was aborted.
    TransportWriteFailed(TransportError),
    /// No ACK for `seq` arrived in time.
    AckTimeout { seq: u8 },
    /// ACK arrived but the application response for `seq` did not.
    ResponseTimeout { seq: u8 },
    /// The waiter for `seq` was failed by a disconnect or an explicit cancel.
    Cancelled { seq: u8 },
    /// The device answered with an `Error` frame.
    RemoteError(String),
    /// A correlated frame carried the wrong message type.
    UnexpectedResponse { expected: u8, got: u8 },
    /// Frame could not be built or parsed.
    Codec(CodecError),
    /// Platform refused a Bluetooth operation for lack of permission.
    PermissionDenied,
    /// Request shape is not supported by the link.
    Unsupported(String),
    /// Configuration is invalid.
    Config(&'static str),
    /// JSON payload could not be produced or parsed.
    Json(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "link not ready"),
            Self::NotConnected => write!(f, "not connected to device"),
            Self::TransportWriteFailed(e) => write!(f, "transport write failed: {e}"),
            Self::AckTimeout { seq } => write!(f, "no ACK for seq {seq}"),
            Self::ResponseTimeout { seq } => write!(f, "no response for seq {seq}"),
            Self::Cancelled { seq } => write!(f, "exchange seq {seq} cancelled"),
            Self::RemoteError(msg) => write!(f, "device error: {msg}"),
            Self::UnexpectedResponse { expected, got } => {
                write!(f, "expected response 0x{expected:02X}, got 0x{got:02X}")
            }
            Self::Codec(e) => write!(f, "codec: {e}"),
            Self::PermissionDenied => write!(f, "Bluetooth permission denied"),
            Self::Unsupported(what) => write!(f, "unsupported: {what}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Json(msg) => write!(f, "json: {msg}"),
        }
    }
}

impl std::error::Error for LinkError {}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

/// Frame-level faults.  The streaming decoder treats all of these except
/// `PayloadTooLarge` as line noise and resynchronises past them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// First two bytes are not the frame magic.
    BadMagic,
    /// Magic matched but the protocol version byte did not.
    BadVersion(u8),
    /// Trailing CRC does not match header + payload.
    CrcMismatch { expected: u16, actual: u16 },
    /// Buffer ends before the frame does.
    Incomplete { needed: usize },
    /// Payload exceeds what the length field (or the configured cap) allows.
    PayloadTooLarge(usize),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "bad frame magic"),
            Self::BadVersion(v) => write!(f, "unsupported frame version 0x{v:02X}"),
            Self::CrcMismatch { expected, actual } => {
                write!(f, "CRC mismatch (expected 0x{expected:04X}, got 0x{actual:04X})")
            }
            Self::Incomplete { needed } => write!(f, "incomplete frame, {needed} more bytes"),
            Self::PayloadTooLarge(len) => write!(f, "payload of {len} bytes too large"),
        }
    }
}

impl From<CodecError> for LinkError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    NotConnected,
    PermissionDenied,
    WriteRejected,
    Io,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "GATT not connected"),
            Self::PermissionDenied => write!(f, "Bluetooth permission denied"),
            Self::WriteRejected => write!(f, "characteristic write rejected"),
            Self::Io => write!(f, "GATT I/O error"),
        }
    }
}

impl From<TransportError> for LinkError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::PermissionDenied => Self::PermissionDenied,
            TransportError::NotConnected => Self::NotConnected,
            other => Self::TransportWriteFailed(other),
        }
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Link-wide `Result` alias.
pub type Result<T> = core::result::Result<T, LinkError>;
