//! Adapters, concrete implementations of the port traits.
//!
//! | Adapter      | Implements  | Connects to                     |
//! |--------------|-------------|---------------------------------|
//! | `log_sink`   | EventSink   | `log` facade                    |
//! | `sim_device` | Transport   | In-memory ArkLights controller  |

pub mod log_sink;
#[cfg(feature = "sim")]
pub mod sim_device;
