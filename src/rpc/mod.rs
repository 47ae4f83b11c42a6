//! Framed request/response protocol over a BLE characteristic.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      Link Stack                            │
//! │                                                            │
//! │  ┌──────────┐   ┌──────────┐   ┌───────────────────────┐   │
//! │  │  Engine  │──▶│  Codec   │──▶│ Chunker ──▶ Transport │   │
//! │  │ (seq/ACK)│   │ (framing)│   │  (mtu - 3 per write)  │   │
//! │  └──────────┘   └──────────┘   └───────────────────────┘   │
//! │       ▲                                    │               │
//! │       │              ┌─────────────────────┘               │
//! │       │              ▼  TransportEvent (EventQueue)        │
//! │  ┌──────────┐   ┌──────────────┐                           │
//! │  │ Dispatch │◀──│ FrameDecoder │   (resync on noise)       │
//! │  └──────────┘   └──────────────┘                           │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod channels;
pub mod chunked;
pub mod codec;
pub mod dispatch;
pub mod engine;
pub mod transport;
