//! Application-facing side of the link.
//!
//! [`session::ProtocolSession`] is the core: lifecycle orchestration plus
//! the request API.  Notifications leave through the [`ports::EventSink`]
//! port, so the session is testable without any UI or platform stack.

pub mod commands;
pub mod events;
pub mod http_shim;
pub mod ports;
pub mod session;
