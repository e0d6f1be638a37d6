//! Post-reboot version check.
//!
//! The device is expected to be unreachable for a while after the reboot,
//! so a failed GetVersion here only means "not yet".

use tracing::{error, info, warn};

use super::HandlerContext;
use crate::events::{DfuEvent, DfuObserver};
use crate::protocol::exchange;
use crate::state::machine::{DfuStatus, SessionState};
use crate::transport::BusTransport;

pub fn handle_verify<T: BusTransport + ?Sized, O: DfuObserver + ?Sized>(
    state: &mut SessionState,
    ctx: &mut HandlerContext<'_, T, O>,
) -> DfuStatus {
    if ctx.now < state.clock.verify_timer + state.timing.verify_interval {
        return DfuStatus::VerifyingNewVersion;
    }
    state.clock.verify_timer = ctx.now;

    let version = match exchange::get_version(ctx.transport) {
        Ok(version) => version,
        Err(e) => {
            warn!(error = %e, "Read version failed, device still rebooting?");
            return DfuStatus::VerifyingNewVersion;
        }
    };
    *ctx.device_version = Some(version);
    ctx.emit(DfuEvent::VersionRead { version });

    let expected = ctx.image.version();
    if version != expected {
        error!(expected = %expected, found = %version, "Update failed");
        return DfuStatus::Failed;
    }

    info!(version = %version, "Update complete");
    ctx.emit(DfuEvent::Complete {
        status: DfuStatus::Ok,
    });
    DfuStatus::Ok
}
