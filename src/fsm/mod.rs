//! Connection lifecycle state machine.
//!
//! Table-driven, event-fed FSM:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  StateTable                                                 │
//! │  ┌──────────────┬───────────┬──────────┬──────────────────┐ │
//! │  │ State        │ on_enter  │ on_exit  │ on_input         │ │
//! │  ├──────────────┼───────────┼──────────┼──────────────────┤ │
//! │  │ Disconnected │ fn(ctx)   │ -        │ fn(ctx, input)   │ │
//! │  │ Connecting   │ -         │ -        │ fn(ctx, input)   │ │
//! │  │ Connected    │ -         │ -        │ fn(ctx, input)   │ │
//! │  │ Ready        │ fn(ctx)   │ fn(ctx)  │ fn(ctx, input)   │ │
//! │  └──────────────┴───────────┴──────────┴──────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each [`LinkInput`] goes to the **current** state's `on_input`.  If it
//! returns `Some(next)`, the engine runs `on_exit` for the current state,
//! then `on_enter` for the next.  Handlers never touch the transport; they
//! queue [`Action`]s which [`Lifecycle::handle`] hands back in a [`Step`].

pub mod context;
pub mod states;

pub use context::{Action, LinkContext, LinkInput, MAX_ACTIONS};

use heapless::Vec;
use log::info;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Where the connection is.  Requests may only be sent in `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    /// Connected, notifications not yet confirmed.
    Connected = 2,
    Ready = 3,
}

impl ConnectionState {
    /// Total number of states, used to size the table.
    pub const COUNT: usize = 4;

    /// Any state with a live GATT connection.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Ready)
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// `on_enter` / `on_exit` action, run once per transition.
pub type StateActionFn = fn(&mut LinkContext);

/// Per-input handler.  Returns `Some(next)` to transition.
pub type StateInputFn = fn(&mut LinkContext, LinkInput) -> Option<ConnectionState>;

/// One row of the state table.
pub struct StateDescriptor {
    pub id: ConnectionState,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
    pub on_input: StateInputFn,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Result of feeding one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub from: ConnectionState,
    pub to: ConnectionState,
    /// Actions for the session, in order.
    pub actions: Vec<Action, MAX_ACTIONS>,
}

impl Step {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

pub struct Lifecycle {
    table: [StateDescriptor; ConnectionState::COUNT],
    current: usize,
    ctx: LinkContext,
}

impl Lifecycle {
    /// Start disconnected; `requested_mtu` is asked for on every connect.
    pub fn new(requested_mtu: u16) -> Self {
        Self {
            table: states::build_state_table(),
            current: ConnectionState::Disconnected as usize,
            ctx: LinkContext::new(requested_mtu),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.table[self.current].id
    }

    pub fn context(&self) -> &LinkContext {
        &self.ctx
    }

    pub fn mtu(&self) -> u16 {
        self.ctx.mtu
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready && self.ctx.notifications_enabled
    }

    /// Feed one input and collect the resulting transition and actions.
    pub fn handle(&mut self, input: LinkInput) -> Step {
        self.ctx.actions.clear();
        let from = self.state();

        if let Some(next) = (self.table[self.current].on_input)(&mut self.ctx, input) {
            if next != from {
                self.transition(next);
            }
        }

        Step {
            from,
            to: self.state(),
            actions: core::mem::take(&mut self.ctx.actions),
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        let next_idx = next as usize;
        info!(
            "lifecycle: {} -> {}",
            self.table[self.current].name, self.table[next_idx].name
        );

        if let Some(exit) = self.table[self.current].on_exit {
            exit(&mut self.ctx);
        }
        self.current = next_idx;
        if let Some(enter) = self.table[self.current].on_enter {
            enter(&mut self.ctx);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
