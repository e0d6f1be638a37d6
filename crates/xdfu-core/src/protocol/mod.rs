//! Protocol module - control servicer frames for the companion controller.

pub mod constants;
pub mod device_state;
pub mod exchange;
pub mod request;

pub use constants::*;
pub use device_state::DeviceState;
pub use exchange::{ProtocolError, StatusResponse};
