//! Inbound frame dispatcher.
//!
//! Routes each decoded frame in arrival order:
//!
//! ```text
//!  Frame ──▶ type == Ack ? ──yes──▶ engine.resolve_ack(seq)
//!              │ no
//!              ├─ ACK_REQUIRED ? ──▶ echo Ack(seq)   (fire-and-forget)
//!              ├─ StatusResponse / OtaStatus ──▶ engine.resolve_response
//!              ├─ Error ──▶ notify "BLE error: …" + engine.resolve_response
//!              └─ anything else ──▶ ignored
//! ```

use log::{debug, warn};

use super::codec::{Frame, MessageType};
use super::engine::CorrelationEngine;
use crate::error::TransportError;

/// Prefix on the notification raised for every inbound `Error` frame.
pub const REMOTE_ERROR_PREFIX: &str = "BLE error: ";

/// What the dispatcher needs from its owner.
pub trait DispatchContext {
    fn engine(&self) -> &CorrelationEngine;

    /// Write an encoded ACK frame immediately.
    fn send_ack(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Raise a free-text error notification.
    fn notify_error(&self, message: String);
}

/// What happened to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// ACK frame; `matched` is false for late or duplicate ACKs.
    Ack { matched: bool },
    /// Response or error frame; `matched` if a waiter took it.
    Response { matched: bool },
    /// Unknown or request-type frame.
    Ignored,
}

/// Route one decoded frame.
pub fn dispatch_frame<C: DispatchContext>(ctx: &C, frame: Frame) -> Disposition {
    let kind = frame.kind();

    if kind == Some(MessageType::Ack) {
        return Disposition::Ack {
            matched: ctx.engine().resolve_ack(frame.seq),
        };
    }

    if frame.ack_required() {
        echo_ack(ctx, frame.seq);
    }

    match kind {
        Some(MessageType::Error) => {
            let message = frame.payload_text();
            warn!("dispatch: device error seq={}: {}", frame.seq, message);
            ctx.notify_error(format!("{REMOTE_ERROR_PREFIX}{message}"));
            Disposition::Response {
                matched: ctx.engine().resolve_response(frame),
            }
        }
        Some(t) if t.is_response() => {
            let seq = frame.seq;
            let matched = ctx.engine().resolve_response(frame);
            if !matched {
                debug!("dispatch: uncorrelated {:?} seq={}", t, seq);
            }
            Disposition::Response { matched }
        }
        _ => {
            debug!("dispatch: ignoring type=0x{:02X} seq={}", frame.msg_type, frame.seq);
            Disposition::Ignored
        }
    }
}

fn echo_ack<C: DispatchContext>(ctx: &C, seq: u8) {
    let ack = match Frame::ack(seq).encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("dispatch: cannot encode ACK: {}", e);
            return;
        }
    };
    if let Err(e) = ctx.send_ack(&ack) {
        warn!("dispatch: ACK for seq={} failed: {}", seq, e);
        ctx.notify_error(format!("Failed to send ACK: {e}"));
    }
}

// ── Tests ────────────────────────────────────────────────────
