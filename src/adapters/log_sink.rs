//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing link notifications through the
//! `log` facade.  A UI adapter would implement the same trait.

use log::{info, warn};

use crate::app::events::LinkEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`LinkEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &LinkEvent) {
        match event {
            LinkEvent::StateChanged { from, to } => {
                info!("STATE | {:?} -> {:?}", from, to);
            }
            LinkEvent::ReadinessChanged(ready) => {
                info!("READY | {}", if *ready { "yes" } else { "no" });
            }
            LinkEvent::MtuChanged(mtu) => {
                info!("MTU   | {} ({} byte chunks)", mtu, crate::rpc::chunked::max_chunk_payload(*mtu));
            }
            LinkEvent::Error(message) => {
                warn!("ERROR | {}", message);
            }
        }
    }
}
