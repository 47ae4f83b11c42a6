//! Request/response correlation engine.
//!
//! Owns the outbound sequence counter and two tables keyed by `seq`:
//! pending ACKs and pending application responses.  Every exchange runs
//! under a single send gate, so at most one request is unacknowledged at a
//! time and a `seq` value is never reused while its previous exchange is
//! still in a table.
//!
//! ```text
//!  caller ──▶ gate.lock ──▶ reserve seq ──▶ register waiters ──▶ write
//!                                                                  │
//!  dispatcher ──resolve_ack(seq)──────────▶ ack waiter   ◀── wait (timeout)
//!  dispatcher ──resolve_response(frame)───▶ resp waiter  ◀── wait (timeout)
//! ```
//!
//! Waiters are `embassy-sync` signals; the tables sit behind their own
//! blocking mutex, separate from the gate, so the dispatcher can resolve
//! while a caller holds the gate and is suspended in its wait.  Every exit
//! path (success, timeout, write failure, or the caller's future being
//! dropped) removes the exchange's entries through [`PendingGuard`].

use core::cell::RefCell;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, with_timeout};
use heapless::FnvIndexMap;
use log::{debug, info, warn};

use super::codec::{FLAG_ACK_REQUIRED, Frame, MAX_PAYLOAD_SIZE, MessageType, encode_frame};
use crate::error::{CodecError, LinkError, Result};

/// Slots per table.  One exchange is in flight at a time; the headroom only
/// matters if a caller's future is leaked mid-exchange.
pub const MAX_PENDING: usize = 16;

/// How an ACK wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acked,
    Cancelled,
}

/// How a response wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    Frame(Frame),
    Cancelled,
}

type AckSignal = Signal<CriticalSectionRawMutex, AckOutcome>;
type ResponseSignal = Signal<CriticalSectionRawMutex, ResponseOutcome>;

struct PendingAck {
    signal: Arc<AckSignal>,
    created: Instant,
}

struct PendingResponse {
    signal: Arc<ResponseSignal>,
    created: Instant,
}

struct ExchangeTable {
    next_seq: u8,
    acks: FnvIndexMap<u8, PendingAck, MAX_PENDING>,
    responses: FnvIndexMap<u8, PendingResponse, MAX_PENDING>,
}

/// What the engine needs from the session to put a frame on the air.
#[allow(async_fn_in_trait)]
pub trait FrameWriter {
    /// Whether requests may be sent right now.
    fn is_ready(&self) -> bool;

    /// Chunk and write one encoded frame.
    async fn write_frame(&self, frame: &[u8]) -> Result<()>;
}

/// Sequence counter, pending tables and the send gate.
pub struct CorrelationEngine {
    gate: Mutex<CriticalSectionRawMutex, ()>,
    table: BlockingMutex<CriticalSectionRawMutex, RefCell<ExchangeTable>>,
}

/// Removes `seq` from both tables when dropped.
struct PendingGuard<'a> {
    engine: &'a CorrelationEngine,
    seq: u8,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.engine.forget(self.seq);
    }
}

impl CorrelationEngine {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Engine whose first exchange uses `seq`.
    pub fn starting_at(seq: u8) -> Self {
        Self {
            gate: Mutex::new(()),
            table: BlockingMutex::new(RefCell::new(ExchangeTable {
                next_seq: seq,
                acks: FnvIndexMap::new(),
                responses: FnvIndexMap::new(),
            })),
        }
    }

    // ── Send path ────────────────────────────────────────────

    /// Send `payload` with the ACK-required flag and wait for its ACK.
    pub async fn send_await_ack<W: FrameWriter>(
        &self,
        link: &W,
        msg_type: MessageType,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<()> {
        check_payload(payload)?;

        let _gate = self.gate.lock().await;
        if !link.is_ready() {
            return Err(LinkError::NotReady);
        }

        let (seq, ack, _) = self.register(false)?;
        let guard = PendingGuard { engine: self, seq };

        let frame = encode_frame(msg_type.to_byte(), seq, FLAG_ACK_REQUIRED, payload)?;
        debug!("engine: seq={} {:?} ({} bytes)", seq, msg_type, frame.len());
        link.write_frame(&frame).await?;

        let result = wait_ack(&ack, seq, timeout).await;
        drop(guard);
        result
    }

    /// Send `payload`, wait for its ACK, then for a response frame of
    /// `expected` type carrying the same `seq`.
    pub async fn send_await_response<W: FrameWriter>(
        &self,
        link: &W,
        msg_type: MessageType,
        payload: &[u8],
        expected: MessageType,
        ack_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<Frame> {
        check_payload(payload)?;

        let _gate = self.gate.lock().await;
        if !link.is_ready() {
            return Err(LinkError::NotReady);
        }

        let (seq, ack, response) = self.register(true)?;
        let guard = PendingGuard { engine: self, seq };
        let Some(response) = response else {
            return Err(LinkError::Cancelled { seq });
        };

        let frame = encode_frame(msg_type.to_byte(), seq, FLAG_ACK_REQUIRED, payload)?;
        debug!("engine: seq={} {:?} ({} bytes), expecting {:?}", seq, msg_type, frame.len(), expected);
        link.write_frame(&frame).await?;

        wait_ack(&ack, seq, ack_timeout).await?;

        let outcome = match with_timeout(response_timeout, response.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("engine: response timeout for seq={}", seq);
                return Err(LinkError::ResponseTimeout { seq });
            }
        };
        drop(guard);

        match outcome {
            ResponseOutcome::Cancelled => Err(LinkError::Cancelled { seq }),
            ResponseOutcome::Frame(frame) if frame.msg_type == MessageType::Error.to_byte() => {
                Err(LinkError::RemoteError(frame.payload_text()))
            }
            ResponseOutcome::Frame(frame) if frame.msg_type != expected.to_byte() => {
                Err(LinkError::UnexpectedResponse {
                    expected: expected.to_byte(),
                    got: frame.msg_type,
                })
            }
            ResponseOutcome::Frame(frame) => Ok(frame),
        }
    }

    // ── Dispatcher side ──────────────────────────────────────

    /// Complete the ACK waiter for `seq`.  Returns `false` for a late or
    /// duplicate ACK.
    pub fn resolve_ack(&self, seq: u8) -> bool {
        let entry = self.table.lock(|t| t.borrow_mut().acks.remove(&seq));
        match entry {
            Some(pending) => {
                debug!(
                    "engine: ACK seq={} after {} ms",
                    seq,
                    pending.created.elapsed().as_millis()
                );
                pending.signal.signal(AckOutcome::Acked);
                true
            }
            None => {
                debug!("engine: unmatched ACK seq={}", seq);
                false
            }
        }
    }

    /// Hand `frame` to the response waiter for its `seq`, if any.
    pub fn resolve_response(&self, frame: Frame) -> bool {
        let seq = frame.seq;
        let entry = self.table.lock(|t| t.borrow_mut().responses.remove(&seq));
        match entry {
            Some(pending) => {
                debug!(
                    "engine: response type=0x{:02X} seq={} after {} ms",
                    frame.msg_type,
                    seq,
                    pending.created.elapsed().as_millis()
                );
                pending.signal.signal(ResponseOutcome::Frame(frame));
                true
            }
            None => false,
        }
    }

    // ── Cancellation ─────────────────────────────────────────

    /// Fail and remove any waiter for `seq`.
    pub fn cancel(&self, seq: u8) -> bool {
        let (ack, response) = self.table.lock(|t| {
            let mut t = t.borrow_mut();
            (t.acks.remove(&seq), t.responses.remove(&seq))
        });
        let found = ack.is_some() || response.is_some();
        if let Some(a) = ack {
            a.signal.signal(AckOutcome::Cancelled);
        }
        if let Some(r) = response {
            r.signal.signal(ResponseOutcome::Cancelled);
        }
        found
    }

    /// Fail every waiter.  Returns how many were pending.
    pub fn cancel_all(&self) -> usize {
        let (acks, responses) = self.table.lock(|t| {
            let mut t = t.borrow_mut();
            let acks: Vec<_> = t.acks.values().map(|p| p.signal.clone()).collect();
            let responses: Vec<_> = t.responses.values().map(|p| p.signal.clone()).collect();
            t.acks.clear();
            t.responses.clear();
            (acks, responses)
        });

        let count = acks.len() + responses.len();
        for s in acks {
            s.signal(AckOutcome::Cancelled);
        }
        for s in responses {
            s.signal(ResponseOutcome::Cancelled);
        }
        if count > 0 {
            info!("engine: cancelled {} pending waiter(s)", count);
        }
        count
    }

    // ── Introspection ────────────────────────────────────────

    pub fn pending_acks(&self) -> usize {
        self.table.lock(|t| t.borrow().acks.len())
    }

    pub fn pending_responses(&self) -> usize {
        self.table.lock(|t| t.borrow().responses.len())
    }

    pub fn is_pending(&self, seq: u8) -> bool {
        self.table.lock(|t| {
            let t = t.borrow();
            t.acks.contains_key(&seq) || t.responses.contains_key(&seq)
        })
    }

    /// The `seq` the next exchange will use.
    pub fn next_seq(&self) -> u8 {
        self.table.lock(|t| t.borrow().next_seq)
    }

    // ── Internal ─────────────────────────────────────────────

    fn register(&self, with_response: bool) -> Result<(u8, Arc<AckSignal>, Option<Arc<ResponseSignal>>)> {
        let ack = Arc::new(AckSignal::new());
        let response = with_response.then(|| Arc::new(ResponseSignal::new()));

        let (seq, stale, inserted) = self.table.lock(|t| {
            let mut t = t.borrow_mut();
            let seq = t.next_seq;
            t.next_seq = seq.wrapping_add(1);
            let now = Instant::now();

            let mut stale = Vec::new();
            let mut inserted = true;

            match t.acks.insert(seq, PendingAck { signal: ack.clone(), created: now }) {
                Ok(Some(old)) => stale.push(old.signal),
                Ok(None) => {}
                Err(_) => inserted = false,
            }
            if let Some(r) = &response {
                match t.responses.insert(seq, PendingResponse { signal: r.clone(), created: now }) {
                    Ok(Some(old)) => old.signal.signal(ResponseOutcome::Cancelled),
                    Ok(None) => {}
                    Err(_) => inserted = false,
                }
            }
            (seq, stale, inserted)
        });

        for s in stale {
            warn!("engine: seq={} reused while still pending", seq);
            s.signal(AckOutcome::Cancelled);
        }
        if !inserted {
            warn!("engine: exchange table full, seq={} not sent", seq);
            self.forget(seq);
            return Err(LinkError::Cancelled { seq });
        }
        Ok((seq, ack, response))
    }

    fn forget(&self, seq: u8) {
        self.table.lock(|t| {
            let mut t = t.borrow_mut();
            t.acks.remove(&seq);
            t.responses.remove(&seq);
        });
    }
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn check_payload(payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(CodecError::PayloadTooLarge(payload.len()).into());
    }
    Ok(())
}

async fn wait_ack(ack: &AckSignal, seq: u8, timeout: Duration) -> Result<()> {
    match with_timeout(timeout, ack.wait()).await {
        Ok(AckOutcome::Acked) => Ok(()),
        Ok(AckOutcome::Cancelled) => Err(LinkError::Cancelled { seq }),
        Err(_) => {
            warn!("engine: ACK timeout for seq={}", seq);
            Err(LinkError::AckTimeout { seq })
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
