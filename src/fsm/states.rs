//! Concrete lifecycle handlers and table builder.
//!
//! Each state is a row of plain `fn` pointers.  Handlers mutate the
//! [`LinkContext`], queue [`Action`]s for the session and return the next
//! state, if any.
//!
//! ```text
//!  DISCONNECTED ──[connect]──▶ CONNECTING ──[connected]──▶ CONNECTED
//!       ▲                                                 │  request MTU
//!       │                                                 │  ─▶ discover
//!       │                                                 │  ─▶ enable notify
//!       │                          [CCCD confirmed]       ▼
//!       │                          [unconfirmable]  ──▶  READY
//!       │                                                 │
//!       └────────────[disconnect, from any state]─────────┘
//! ```

use log::{debug, info, warn};

use super::context::{Action, LinkContext, LinkInput};
use super::{ConnectionState, StateDescriptor};

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the static state table.
pub fn build_state_table() -> [StateDescriptor; ConnectionState::COUNT] {
    [
        // Index 0: Disconnected
        StateDescriptor {
            id: ConnectionState::Disconnected,
            name: "Disconnected",
            on_enter: Some(disconnected_enter),
            on_exit: None,
            on_input: disconnected_input,
        },
        // Index 1: Connecting
        StateDescriptor {
            id: ConnectionState::Connecting,
            name: "Connecting",
            on_enter: None,
            on_exit: None,
            on_input: connecting_input,
        },
        // Index 2: Connected (not ready)
        StateDescriptor {
            id: ConnectionState::Connected,
            name: "Connected",
            on_enter: None,
            on_exit: None,
            on_input: connected_input,
        },
        // Index 3: Ready
        StateDescriptor {
            id: ConnectionState::Ready,
            name: "Ready",
            on_enter: Some(ready_enter),
            on_exit: Some(ready_exit),
            on_input: ready_input,
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  Shared handling
// ═══════════════════════════════════════════════════════════════════════════

/// Disconnects are honoured in every state.
fn on_disconnect(ctx: &mut LinkContext, input: LinkInput) -> Option<ConnectionState> {
    match input {
        LinkInput::DisconnectRequested => {
            ctx.request(Action::Disconnect);
            Some(ConnectionState::Disconnected)
        }
        LinkInput::Disconnected => Some(ConnectionState::Disconnected),
        _ => None,
    }
}

fn begin_negotiation(ctx: &mut LinkContext) -> Option<ConnectionState> {
    ctx.clear_link();
    ctx.awaiting_discovery = true;
    ctx.request(Action::RequestMtu(ctx.requested_mtu));
    Some(ConnectionState::Connected)
}

fn record_mtu(ctx: &mut LinkContext, mtu: u16, success: bool) {
    if success {
        info!("lifecycle: MTU {}", mtu);
        ctx.mtu = mtu;
    } else {
        warn!("lifecycle: MTU negotiation failed, keeping {}", ctx.mtu);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  DISCONNECTED
// ═══════════════════════════════════════════════════════════════════════════

fn disconnected_enter(ctx: &mut LinkContext) {
    ctx.clear_link();
    ctx.request(Action::ResetSession);
}

fn disconnected_input(ctx: &mut LinkContext, input: LinkInput) -> Option<ConnectionState> {
    match input {
        LinkInput::ConnectRequested => {
            ctx.request(Action::Connect);
            Some(ConnectionState::Connecting)
        }
        // The platform may reconnect on its own (auto-connect).
        LinkInput::Connected => begin_negotiation(ctx),
        other => {
            debug!("lifecycle: {:?} ignored while disconnected", other);
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  CONNECTING
// ═══════════════════════════════════════════════════════════════════════════

fn connecting_input(ctx: &mut LinkContext, input: LinkInput) -> Option<ConnectionState> {
    match input {
        LinkInput::Connected => begin_negotiation(ctx),
        LinkInput::DisconnectRequested | LinkInput::Disconnected => on_disconnect(ctx, input),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  CONNECTED (not ready)
// ═══════════════════════════════════════════════════════════════════════════

fn connected_input(ctx: &mut LinkContext, input: LinkInput) -> Option<ConnectionState> {
    match input {
        LinkInput::MtuChanged { mtu, success } => {
            record_mtu(ctx, mtu, success);
            if ctx.awaiting_discovery {
                ctx.awaiting_discovery = false;
                ctx.request(Action::DiscoverServices);
            }
            None
        }
        LinkInput::MtuUnavailable => {
            if ctx.awaiting_discovery {
                ctx.awaiting_discovery = false;
                ctx.request(Action::DiscoverServices);
            }
            None
        }
        LinkInput::ServicesDiscovered { success: true, found: true } => {
            ctx.request(Action::EnableNotifications);
            None
        }
        LinkInput::ServicesDiscovered { success, .. } => {
            warn!(
                "lifecycle: control characteristic unavailable (discovery ok={})",
                success
            );
            None
        }
        LinkInput::NotificationEnabled(true) => Some(ConnectionState::Ready),
        LinkInput::NotificationEnabled(false) => {
            warn!("lifecycle: device refused notifications");
            ctx.notifications_enabled = false;
            None
        }
        LinkInput::NotificationsUnconfirmable => {
            warn!("lifecycle: notifications unconfirmable, assuming enabled");
            ctx.ready_via_fallback = true;
            Some(ConnectionState::Ready)
        }
        LinkInput::DisconnectRequested | LinkInput::Disconnected => on_disconnect(ctx, input),
        LinkInput::ConnectRequested | LinkInput::Connected => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  READY
// ═══════════════════════════════════════════════════════════════════════════

fn ready_enter(ctx: &mut LinkContext) {
    ctx.notifications_enabled = true;
}

fn ready_exit(ctx: &mut LinkContext) {
    ctx.notifications_enabled = false;
    ctx.ready_via_fallback = false;
}

fn ready_input(ctx: &mut LinkContext, input: LinkInput) -> Option<ConnectionState> {
    match input {
        LinkInput::MtuChanged { mtu, success } => {
            record_mtu(ctx, mtu, success);
            None
        }
        LinkInput::NotificationEnabled(false) => {
            warn!("lifecycle: notifications disabled while ready");
            Some(ConnectionState::Connected)
        }
        LinkInput::DisconnectRequested | LinkInput::Disconnected => on_disconnect(ctx, input),
        _ => None,
    }
}
