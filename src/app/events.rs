//! Outbound link notifications.
//!
//! The [`ProtocolSession`](super::session::ProtocolSession) emits these
//! through the [`EventSink`](super::ports::EventSink) port.  Adapters on the
//! other side decide what to do with them: log them, update a UI, etc.

use crate::fsm::ConnectionState;

/// Structured events emitted by the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The lifecycle moved between states.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// Requests became possible (`true`) or stopped being possible.
    ReadinessChanged(bool),

    /// A new MTU was negotiated.
    MtuChanged(u16),

    /// Free-text error for the user: permission problems, failed ACK
    /// writes, `Error` frames from the device, unsupported requests.
    Error(String),
}
