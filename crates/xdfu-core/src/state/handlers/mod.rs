//! Phase handlers - what one tick does in each session status.
//!
//! This module is split into submodules by phase:
//! - `control`: session-wide timeout policy
//! - `download`: block streaming and the end-of-download block
//! - `reboot`: reboot request once the device reports ready
//! - `verify`: post-reboot version check

mod control;
mod download;
mod reboot;
mod verify;

use std::time::Instant;

use tracing::warn;

use crate::events::{DfuEvent, DfuObserver};
use crate::payload::FirmwareImage;
use crate::state::machine::{DfuStatus, SessionState};
use crate::transport::BusTransport;
use crate::version::FirmwareVersion;

/// Handler context containing all resources a tick may touch.
pub struct HandlerContext<'a, T: BusTransport + ?Sized, O: DfuObserver + ?Sized> {
    pub transport: &'a mut T,
    pub observer: &'a O,
    pub image: &'a FirmwareImage,
    /// Last version reported by the device; only a successful GetVersion updates it.
    pub device_version: &'a mut Option<FirmwareVersion>,
    pub now: Instant,
}

impl<'a, T: BusTransport + ?Sized, O: DfuObserver + ?Sized> HandlerContext<'a, T, O> {
    pub(crate) fn emit(&self, event: DfuEvent) {
        self.observer.on_event(&event);
    }
}

/// Run one tick for `status` and return the next status.
pub fn handle_tick<T: BusTransport + ?Sized, O: DfuObserver + ?Sized>(
    status: DfuStatus,
    state: &mut SessionState,
    ctx: &mut HandlerContext<'_, T, O>,
) -> DfuStatus {
    if !status.is_active() {
        warn!(status = %status, "Tick in non-active status");
        return DfuStatus::BadState;
    }

    if let Some(expired) = control::check_timeouts(status, state, ctx.now) {
        return expired;
    }

    match status {
        DfuStatus::InProgress if state.clock.bytes_written < ctx.image.len() => {
            download::handle_block(state, ctx)
        }
        DfuStatus::InProgress => download::handle_end(state, ctx),
        DfuStatus::RebootPending => reboot::handle_reboot(state, ctx),
        DfuStatus::VerifyingNewVersion => verify::handle_verify(state, ctx),
        other => {
            warn!(status = %other, "Unknown state");
            DfuStatus::BadState
        }
    }
}
