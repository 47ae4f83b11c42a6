//! Checksummed frame codec.
//!
//! Wire format (little-endian multi-byte fields):
//! ```text
//! ┌──────┬──────┬─────┬──────┬─────┬───────┬────────┬─────────────┬────────┐
//! │ 0xA7 │ 0x1C │ Ver │ Type │ Seq │ Flags │ Len    │ Payload     │ CRC16  │
//! │ 1B   │ 1B   │ 1B  │ 1B   │ 1B  │ 1B    │ 2B LE  │ 0–65535 B   │ 2B LE  │
//! └──────┴──────┴─────┴──────┴─────┴───────┴────────┴─────────────┴────────┘
//! ```
//!
//! The CRC is CRC-16/CCITT-FALSE over everything before it.  The peer
//! firmware computes the same value bit-for-bit; any drift shows up as every
//! frame being rejected as corrupt.
//!
//! The streaming [`FrameDecoder`] accumulates notification bytes and yields
//! complete frames.  A single notification may carry part of a frame or
//! several frames; noise and corrupt frames are skipped by scanning forward
//! for the next magic.

use log::{debug, warn};

use crate::error::CodecError;

/// Frame start marker.
pub const MAGIC: [u8; 2] = [0xA7, 0x1C];

/// Protocol version carried in byte 2.
pub const VERSION: u8 = 0x01;

/// Magic + version + type + seq + flags + length.
pub const HEADER_SIZE: usize = 8;

/// Trailing CRC-16.
pub const CRC_SIZE: usize = 2;

/// Smallest well-formed frame (empty payload).
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + CRC_SIZE;

/// Largest payload the 2-byte length field can describe.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Flag bit 0: the receiver must answer with an ACK echoing `seq`.
pub const FLAG_ACK_REQUIRED: u8 = 0x01;

// ── Message types ────────────────────────────────────────────

/// Known message type tags.  Frames with other tags still decode; the
/// dispatcher ignores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    SettingsJson = 0x01,
    StatusRequest = 0x02,
    StatusResponse = 0x03,
    OtaStart = 0x04,
    OtaStatus = 0x05,
    Ack = 0x7E,
    Error = 0x7F,
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::SettingsJson),
            0x02 => Some(Self::StatusRequest),
            0x03 => Some(Self::StatusResponse),
            0x04 => Some(Self::OtaStart),
            0x05 => Some(Self::OtaStatus),
            0x7E => Some(Self::Ack),
            0x7F => Some(Self::Error),
            _ => None,
        }
    }

    pub const fn to_byte(self) -> u8 {
        self as u8
    }

    /// Types that complete a pending application response.
    pub fn is_response(self) -> bool {
        matches!(self, Self::StatusResponse | Self::OtaStatus)
    }
}

// ── Frame ────────────────────────────────────────────────────

/// One decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw type tag; see [`MessageType`].
    pub msg_type: u8,
    pub seq: u8,
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(msg_type: MessageType, seq: u8, flags: u8, payload: &[u8]) -> Self {
        Self {
            msg_type: msg_type.to_byte(),
            seq,
            flags,
            payload: payload.to_vec(),
        }
    }

    /// Zero-payload acknowledgement for `seq`.
    pub fn ack(seq: u8) -> Self {
        Self::new(MessageType::Ack, seq, 0, &[])
    }

    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_byte(self.msg_type)
    }

    pub fn ack_required(&self) -> bool {
        self.flags & FLAG_ACK_REQUIRED != 0
    }

    /// Payload as text, replacing invalid UTF-8.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_frame(self.msg_type, self.seq, self.flags, &self.payload)
    }

    /// Size of this frame on the wire.
    pub fn wire_len(&self) -> usize {
        MIN_FRAME_SIZE + self.payload.len()
    }
}

// ── CRC ──────────────────────────────────────────────────────

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, MSB-first, no final XOR.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

// ── Encoding ─────────────────────────────────────────────────

/// Build a complete frame: header, payload, CRC.
///
/// Output is exactly `MIN_FRAME_SIZE + payload.len()` bytes.
pub fn encode_frame(msg_type: u8, seq: u8, flags: u8, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(CodecError::PayloadTooLarge(payload.len()));
    }

    let len = (payload.len() as u16).to_le_bytes();
    let mut out = Vec::with_capacity(MIN_FRAME_SIZE + payload.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&[VERSION, msg_type, seq, flags, len[0], len[1]]);
    out.extend_from_slice(payload);

    let crc = crc16_ccitt(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

// ── Strict parsing ───────────────────────────────────────────

/// Parse one frame that starts at `buf[0]`.
///
/// Returns the frame and the number of bytes it occupied.  Trailing bytes
/// after the frame are ignored.
pub fn parse_frame(buf: &[u8]) -> Result<(Frame, usize), CodecError> {
    parse_frame_capped(buf, MAX_PAYLOAD_SIZE)
}

fn parse_frame_capped(buf: &[u8], max_payload: usize) -> Result<(Frame, usize), CodecError> {
    if buf.len() < MIN_FRAME_SIZE {
        return Err(CodecError::Incomplete {
            needed: MIN_FRAME_SIZE - buf.len(),
        });
    }
    if buf[..2] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    if buf[2] != VERSION {
        return Err(CodecError::BadVersion(buf[2]));
    }

    let len = u16::from_le_bytes([buf[6], buf[7]]) as usize;
    if len > max_payload {
        return Err(CodecError::PayloadTooLarge(len));
    }

    let size = MIN_FRAME_SIZE + len;
    if buf.len() < size {
        return Err(CodecError::Incomplete {
            needed: size - buf.len(),
        });
    }

    let body_end = HEADER_SIZE + len;
    let expected = u16::from_le_bytes([buf[body_end], buf[body_end + 1]]);
    let actual = crc16_ccitt(&buf[..body_end]);
    if expected != actual {
        return Err(CodecError::CrcMismatch { expected, actual });
    }

    let frame = Frame {
        msg_type: buf[3],
        seq: buf[4],
        flags: buf[5],
        payload: buf[HEADER_SIZE..body_end].to_vec(),
    };
    Ok((frame, size))
}

// ── Streaming decode ─────────────────────────────────────────

/// Result of one scan over a buffer.
#[derive(Debug, Default)]
struct ScanOutcome {
    frames: Vec<Frame>,
    /// Bytes at the front of the buffer that are fully processed.
    consumed: usize,
    /// Frames dropped for CRC, version or length faults.
    rejected: usize,
}

fn scan(buf: &[u8], max_payload: usize) -> ScanOutcome {
    let mut out = ScanOutcome::default();
    let mut i = 0;

    while i + MIN_FRAME_SIZE <= buf.len() {
        if buf[i..i + 2] != MAGIC {
            // If the second byte could open a magic, only step one.
            i += if buf[i + 1] == MAGIC[0] { 1 } else { 2 };
            continue;
        }

        match parse_frame_capped(&buf[i..], max_payload) {
            Ok((frame, size)) => {
                debug!(
                    "codec: frame type=0x{:02X} seq={} len={}",
                    frame.msg_type,
                    frame.seq,
                    frame.payload.len()
                );
                out.frames.push(frame);
                i += size;
            }
            Err(CodecError::Incomplete { .. }) => break,
            Err(e) => {
                warn!("codec: dropping frame at offset {}: {}", i, e);
                out.rejected += 1;
                i += 2;
            }
        }
    }

    out.consumed = resync_point(buf, i);
    out
}

/// First index at or after `from` where a frame could still start.
///
/// Everything before it is noise that no future bytes can complete.
fn resync_point(buf: &[u8], from: usize) -> usize {
    let mut j = from;
    while j < buf.len() {
        if buf[j] == MAGIC[0] && (j + 1 == buf.len() || buf[j + 1] == MAGIC[1]) {
            return j;
        }
        j += 1;
    }
    buf.len()
}

/// Extract every complete frame from `buffer`.
///
/// Returns the frames and the remainder to keep for the next pass: either an
/// incomplete frame starting at a magic, or nothing.
pub fn decode_all(buffer: &[u8]) -> (Vec<Frame>, &[u8]) {
    let outcome = scan(buffer, MAX_PAYLOAD_SIZE);
    (outcome.frames, &buffer[outcome.consumed..])
}

/// Running totals kept by a [`FrameDecoder`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub frames: u32,
    pub rejected: u32,
    pub discarded_bytes: u32,
}

/// Streaming decoder owning the receive buffer.
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_payload: usize,
    stats: DecodeStats,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD_SIZE)
    }

    /// Decoder that treats any declared length above `max_payload` as
    /// corrupt, which bounds the receive buffer to one such frame.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_payload: max_payload.min(MAX_PAYLOAD_SIZE),
            stats: DecodeStats::default(),
        }
    }

    /// Append `data` and return every frame now complete.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(data);

        let outcome = scan(&self.buf, self.max_payload);
        let skipped = outcome.consumed
            - outcome
                .frames
                .iter()
                .map(Frame::wire_len)
                .sum::<usize>()
                .min(outcome.consumed);

        self.stats.frames += outcome.frames.len() as u32;
        self.stats.rejected += outcome.rejected as u32;
        self.stats.discarded_bytes += skipped as u32;

        self.buf.drain(..outcome.consumed);
        outcome.frames
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Drop any partial frame (e.g. after a disconnect).
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────
