//! Session-wide timeout policy, checked before any phase work.

use std::time::Instant;

use tracing::error;

use crate::state::machine::{DfuStatus, SessionState};

/// `Some(Timeout)` if the session budget or the stall budget is exhausted.
pub fn check_timeouts(status: DfuStatus, state: &SessionState, now: Instant) -> Option<DfuStatus> {
    let timing = &state.timing;

    if now > state.clock.started_at + timing.session_timeout {
        error!(
            bytes_written = state.clock.bytes_written,
            timeout_ms = timing.session_timeout.as_millis() as u64,
            "DFU timed out"
        );
        return Some(DfuStatus::Timeout);
    }

    // Readiness is only expected while streaming or waiting to reboot.
    let awaiting_ready = matches!(status, DfuStatus::InProgress | DfuStatus::RebootPending);
    if let Some(stall) = timing.stall_timeout
        && awaiting_ready
        && now > state.poller.last_ready() + stall
    {
        error!(
            bytes_written = state.clock.bytes_written,
            stall_ms = stall.as_millis() as u64,
            "DFU stalled: device not ready"
        );
        return Some(DfuStatus::Timeout);
    }

    None
}
