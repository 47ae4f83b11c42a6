//! Context threaded through every lifecycle handler.
//!
//! `LinkContext` holds the per-connection flags the state handlers read and
//! write, plus the queue of [`Action`]s they request.  The session drains
//! the queue after each input and performs the actions on the transport.

use heapless::Vec;

use crate::rpc::chunked::DEFAULT_MTU;

/// Most actions a single input can request.
pub const MAX_ACTIONS: usize = 4;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Everything that can move the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkInput {
    /// The application asked to connect.
    ConnectRequested,
    /// The application asked to disconnect.
    DisconnectRequested,
    /// GATT connection established.
    Connected,
    /// MTU negotiation finished (successfully or not).
    MtuChanged { mtu: u16, success: bool },
    /// The platform could not issue an MTU request.
    MtuUnavailable,
    /// Discovery finished; `found` means the control characteristic exists.
    ServicesDiscovered { success: bool, found: bool },
    /// CCCD write confirmed (`true`) or refused (`false`).
    NotificationEnabled(bool),
    /// Notifications were requested but nothing will confirm them.
    NotificationsUnconfirmable,
    /// GATT connection lost or closed by the platform.
    Disconnected,
}

// ---------------------------------------------------------------------------
// Actions (written by handlers; performed by the session)
// ---------------------------------------------------------------------------

/// Work the session must do on the lifecycle's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Connect,
    Disconnect,
    RequestMtu(u16),
    DiscoverServices,
    EnableNotifications,
    /// Clear the receive buffer and fail every pending waiter.
    ResetSession,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LinkContext {
    /// MTU to ask for after connecting.
    pub requested_mtu: u16,
    /// Currently negotiated MTU.
    pub mtu: u16,
    /// An MTU request is outstanding and discovery waits on its result.
    pub awaiting_discovery: bool,
    pub notifications_enabled: bool,
    /// Ready was reached without a CCCD confirmation.
    pub ready_via_fallback: bool,
    /// Actions requested while handling the current input.
    pub actions: Vec<Action, MAX_ACTIONS>,
}

impl LinkContext {
    pub fn new(requested_mtu: u16) -> Self {
        Self {
            requested_mtu,
            mtu: DEFAULT_MTU,
            awaiting_discovery: false,
            notifications_enabled: false,
            ready_via_fallback: false,
            actions: Vec::new(),
        }
    }

    /// Queue an action for the session.
    pub fn request(&mut self, action: Action) {
        if self.actions.push(action).is_err() {
            log::warn!("lifecycle: action queue full, dropping {:?}", action);
        }
    }

    /// Forget everything learned about the current connection.
    pub fn clear_link(&mut self) {
        self.mtu = DEFAULT_MTU;
        self.awaiting_discovery = false;
        self.notifications_enabled = false;
        self.ready_via_fallback = false;
    }
}
