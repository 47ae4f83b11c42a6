//! Inbound event queue between platform callbacks and the dispatcher.
//!
//! GATT callbacks (any thread) hand events to the single dispatcher task
//! without sharing session state.  The queue never drops: lifecycle events
//! and notification bytes keep their arrival order, and back-to-back
//! `BytesReceived` deliveries are merged into one entry so a long
//! notification burst costs one slot, not one per chunk.
//!
//! ```text
//! ┌──────────────┐ TransportEvent ┌──────────────┐
//! │ GATT callback│───────────────▶│  Dispatcher  │
//! │ (platform)   │   EventQueue   │  (async)     │
//! └──────────────┘                └──────────────┘
//! ```

use core::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use log::warn;

use super::transport::TransportEvent;

/// Queue length above which a backlog warning is logged.
pub const EVENT_BACKLOG_WARN: usize = 64;

struct Shared {
    events: BlockingMutex<CriticalSectionRawMutex, RefCell<VecDeque<TransportEvent>>>,
    wake: Signal<CriticalSectionRawMutex, ()>,
}

/// Cloneable handle to one session's inbound queue.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<Shared>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shared {
                events: BlockingMutex::new(RefCell::new(VecDeque::new())),
                wake: Signal::new(),
            }),
        }
    }

    /// Enqueue without blocking.  Bytes following bytes are appended to the
    /// queued delivery.
    pub fn post(&self, event: TransportEvent) {
        let len = self.inner.events.lock(|q| {
            let mut q = q.borrow_mut();
            if let TransportEvent::BytesReceived(bytes) = &event {
                if let Some(TransportEvent::BytesReceived(tail)) = q.back_mut() {
                    tail.extend_from_slice(bytes);
                    return q.len();
                }
            }
            q.push_back(event);
            q.len()
        });
        if len == EVENT_BACKLOG_WARN {
            warn!("link: {} events waiting for the dispatcher", len);
        }
        self.inner.wake.signal(());
    }

    /// Wait for the next event.
    pub async fn receive(&self) -> TransportEvent {
        loop {
            if let Some(event) = self.try_receive() {
                return event;
            }
            self.inner.wake.wait().await;
        }
    }

    /// Take the next event if one is queued.
    pub fn try_receive(&self) -> Option<TransportEvent> {
        self.inner.events.lock(|q| q.borrow_mut().pop_front())
    }

    pub fn len(&self) -> usize {
        self.inner.events.lock(|q| q.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────
