//! Request catalogue.
//!
//! Each application request maps to one correlated exchange with a fixed
//! message type, an optional expected response type and default timeouts.
//!
//! | Request       | Sends            | Expects          | ACK / response wait |
//! |---------------|------------------|------------------|---------------------|
//! | `Status`      | `StatusRequest`  | `StatusResponse` | status / status     |
//! | `Settings`    | `SettingsJson`   | ACK only         | ack                 |
//! | `OtaStart`    | `OtaStart`       | ACK only         | ack                 |
//! | `OtaStatus`   | `OtaStatus`      | `OtaStatus`      | ack / response      |

use embassy_time::Duration;

use crate::config::LinkConfig;
use crate::rpc::codec::MessageType;

/// Requests the application can make of the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRequest {
    /// Fetch the status JSON.
    Status,
    /// Push a settings JSON document.
    Settings(String),
    /// Start a firmware update from `url`.
    OtaStart(String),
    /// Fetch the firmware update progress JSON.
    OtaStatus,
}

/// Timeouts for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub ack: Duration,
    pub response: Duration,
}

impl LinkRequest {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Status => MessageType::StatusRequest,
            Self::Settings(_) => MessageType::SettingsJson,
            Self::OtaStart(_) => MessageType::OtaStart,
            Self::OtaStatus => MessageType::OtaStatus,
        }
    }

    /// Response type to wait for after the ACK, if any.
    pub fn expected_response(&self) -> Option<MessageType> {
        match self {
            Self::Status => Some(MessageType::StatusResponse),
            Self::OtaStatus => Some(MessageType::OtaStatus),
            Self::Settings(_) | Self::OtaStart(_) => None,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Settings(json) => json.as_bytes(),
            Self::OtaStart(url) => url.as_bytes(),
            Self::Status | Self::OtaStatus => &[],
        }
    }

    pub fn timeouts(&self, config: &LinkConfig) -> Timeouts {
        match self {
            Self::Status => Timeouts {
                ack: config.status_timeout(),
                response: config.status_timeout(),
            },
            _ => Timeouts {
                ack: config.ack_timeout(),
                response: config.response_timeout(),
            },
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Settings(_) => "settings",
            Self::OtaStart(_) => "ota-start",
            Self::OtaStatus => "ota-status",
        }
    }
}
