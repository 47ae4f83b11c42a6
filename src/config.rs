//! Link configuration parameters
//!
//! All tunable parameters for the ArkLights BLE link.  Loadable from JSON;
//! any field left out keeps its default.

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};
use crate::rpc::chunked::DEFAULT_MTU;
use crate::rpc::codec::MAX_PAYLOAD_SIZE;
use crate::rpc::transport::PREFERRED_MTU;

/// Core link configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    // --- Negotiation ---
    /// MTU requested right after connecting
    pub requested_mtu: u16,

    // --- Chunking ---
    /// Pause between consecutive chunk writes (milliseconds)
    pub inter_chunk_delay_ms: u64,

    // --- Timeouts ---
    /// ACK wait for settings and OTA requests (milliseconds)
    pub ack_timeout_ms: u64,
    /// Response wait for OTA status (milliseconds)
    pub response_timeout_ms: u64,
    /// ACK and response wait for status requests (milliseconds)
    pub status_timeout_ms: u64,

    // --- Receive ---
    /// Largest payload length the decoder will buffer for
    pub max_rx_payload: usize,

    // --- Discovery ---
    /// Advertised-name prefix of ArkLights controllers
    pub device_name_prefix: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            requested_mtu: PREFERRED_MTU,
            inter_chunk_delay_ms: 5,
            ack_timeout_ms: 5_000,
            response_timeout_ms: 5_000,
            status_timeout_ms: 15_000,
            max_rx_payload: MAX_PAYLOAD_SIZE,
            device_name_prefix: "ARKLIGHTS".into(),
        }
    }
}

impl LinkConfig {
    /// Parse a JSON config and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.requested_mtu < DEFAULT_MTU {
            return Err(LinkError::Config("requested_mtu below 23"));
        }
        if self.ack_timeout_ms == 0 || self.response_timeout_ms == 0 || self.status_timeout_ms == 0 {
            return Err(LinkError::Config("timeouts must be non-zero"));
        }
        if self.max_rx_payload == 0 || self.max_rx_payload > MAX_PAYLOAD_SIZE {
            return Err(LinkError::Config("max_rx_payload must be 1..=65535"));
        }
        Ok(())
    }

    /// Whether an advertised device name belongs to an ArkLights controller.
    pub fn matches_device_name(&self, name: &str) -> bool {
        name.starts_with(&self.device_name_prefix)
    }

    pub fn inter_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.inter_chunk_delay_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }
}
