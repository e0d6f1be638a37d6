//! State machine module.

pub mod handlers;
pub mod machine;
pub mod poller;

pub use handlers::{HandlerContext, handle_tick};
pub use machine::{DfuMachine, DfuStatus, SessionClock, SessionState, SessionTiming};
pub use poller::StatusPoller;
