//! ArkLights BLE link library.
//!
//! Framed, checksummed, acknowledged request/response messaging with an
//! ArkLights controller over a single GATT characteristic.  The platform
//! Bluetooth stack plugs in through [`rpc::transport::Transport`]; the
//! application talks to [`app::session::ProtocolSession`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod error;
pub mod fsm;
pub mod rpc;

pub use app::events::LinkEvent;
pub use app::ports::EventSink;
pub use app::session::ProtocolSession;
pub use config::LinkConfig;
pub use error::{LinkError, Result};
pub use fsm::ConnectionState;
pub use rpc::transport::{Transport, TransportEvent};
