//! MTU-bounded chunking of encoded frames.
//!
//! A GATT write carries at most `mtu - 3` bytes (opcode + handle take the
//! rest).  Frames are written as consecutive slices of that size with a
//! short pause between writes so the platform's outstanding-write queue
//! never overruns.
//!
//! ```text
//! Frame:   [A7 1C 01 01 07 01 2C 01 {"brightness":...} CRC]
//! Write 1: [A7 1C 01 01 07 01 2C 01 {"bri ...]   (mtu - 3 bytes)
//! Write 2: [ghtness":... ]                        (mtu - 3 bytes)
//! Write N: [... } CRC]                            (remainder)
//! ```
//!
//! There is no per-chunk header: the receiver's frame decoder reassembles
//! from the byte stream.  A failed write fails the whole send; retrying is
//! the caller's decision.

use core::slice::Chunks;

use embassy_time::{Duration, Timer};
use log::{debug, warn};

use super::transport::Transport;
use crate::error::TransportError;

/// ATT opcode + attribute handle.
pub const ATT_OVERHEAD: usize = 3;

/// MTU every BLE link starts with before negotiation.
pub const DEFAULT_MTU: u16 = 23;

/// Floor on the chunk size, matching the un-negotiated MTU.
pub const MIN_CHUNK_PAYLOAD: usize = 20;

/// Largest write payload for a negotiated `mtu`.
pub fn max_chunk_payload(mtu: u16) -> usize {
    (mtu as usize).saturating_sub(ATT_OVERHEAD).max(MIN_CHUNK_PAYLOAD)
}

/// Split `frame` into write-sized slices, in order.
pub fn chunk_frame(frame: &[u8], max_payload: usize) -> Chunks<'_, u8> {
    frame.chunks(max_payload.max(1))
}

/// Number of writes `len` bytes will take.
pub fn chunk_count(len: usize, max_payload: usize) -> usize {
    len.div_ceil(max_payload.max(1))
}

/// Paced chunk writer.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    max_payload: usize,
    inter_chunk_delay: Duration,
}

impl Chunker {
    pub fn new(mtu: u16, inter_chunk_delay: Duration) -> Self {
        Self {
            max_payload: max_chunk_payload(mtu),
            inter_chunk_delay,
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Write `data` chunk by chunk through `write`, pausing between writes.
    ///
    /// `write` is called once per chunk.  The first failure aborts the send
    /// and is returned; earlier chunks are already on the air.
    pub async fn write_all<F>(&self, data: &[u8], mut write: F) -> Result<usize, TransportError>
    where
        F: FnMut(&[u8]) -> Result<(), TransportError>,
    {
        let total = chunk_count(data.len(), self.max_payload);

        for (i, chunk) in chunk_frame(data, self.max_payload).enumerate() {
            if i > 0 && self.inter_chunk_delay > Duration::from_ticks(0) {
                Timer::after(self.inter_chunk_delay).await;
            }

            if let Err(e) = write(chunk) {
                warn!("chunker: write {}/{} failed: {}", i + 1, total, e);
                return Err(e);
            }
            debug!("chunker: wrote {}/{} ({} bytes)", i + 1, total, chunk.len());
        }

        Ok(total)
    }

    /// Write a short frame in one go, without pacing.
    ///
    /// Used for ACKs from the dispatcher, which always fit a single chunk.
    pub fn write_now<T: Transport>(&self, transport: &mut T, data: &[u8]) -> Result<(), TransportError> {
        for chunk in chunk_frame(data, self.max_payload) {
            transport.write_chunk(chunk)?;
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────
