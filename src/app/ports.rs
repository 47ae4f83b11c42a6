//! Port traits, the boundary between the link core and the application.
//!
//! ```text
//!   ProtocolSession ──▶ EventSink ──▶ adapter (log, UI, test recorder)
//! ```
//!
//! The transport side of the boundary is
//! [`Transport`](crate::rpc::transport::Transport).

use super::events::LinkEvent;

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: link → application)
// ───────────────────────────────────────────────────────────────

/// The link emits structured [`LinkEvent`]s through this port.
pub trait EventSink {
    fn emit(&mut self, event: &LinkEvent);
}

/// Sink that drops everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: &LinkEvent) {}
}

/// Sink that keeps every event, for inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<LinkEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `Error` message, in order.
    pub fn errors(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                LinkEvent::Error(msg) => Some(msg.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &LinkEvent) {
        self.events.push(event.clone());
    }
}
