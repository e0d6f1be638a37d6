//! Reboot request once the device has manifested the image.

use tracing::{error, info};

use super::HandlerContext;
use crate::events::DfuObserver;
use crate::protocol::exchange;
use crate::state::machine::{DfuStatus, SessionState};
use crate::transport::BusTransport;

pub fn handle_reboot<T: BusTransport + ?Sized, O: DfuObserver + ?Sized>(
    state: &mut SessionState,
    ctx: &mut HandlerContext<'_, T, O>,
) -> DfuStatus {
    if !state.poller.check_ready(ctx.transport, ctx.now) {
        return DfuStatus::RebootPending;
    }

    let elapsed = ctx.now.duration_since(state.clock.started_at);
    info!(
        "Done in {:.0} seconds -- rebooting device...",
        elapsed.as_secs_f32()
    );
    if let Err(e) = exchange::reboot(ctx.transport) {
        error!(error = %e, "Reboot request failed");
        return DfuStatus::CommunicationError;
    }

    state.clock.verify_timer = ctx.now;
    DfuStatus::VerifyingNewVersion
}
