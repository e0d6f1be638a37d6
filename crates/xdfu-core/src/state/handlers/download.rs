//! Block streaming and the end-of-download block.

use tracing::{debug, error, info, trace};

use super::HandlerContext;
use crate::events::{DfuEvent, DfuObserver};
use crate::protocol::exchange;
use crate::state::machine::{DfuStatus, SessionState};
use crate::transport::BusTransport;

/// Send the next block if the device is ready. Stays `InProgress` either way.
pub fn handle_block<T: BusTransport + ?Sized, O: DfuObserver + ?Sized>(
    state: &mut SessionState,
    ctx: &mut HandlerContext<'_, T, O>,
) -> DfuStatus {
    if !state.poller.check_ready(ctx.transport, ctx.now) {
        return DfuStatus::InProgress;
    }

    let mut payload = vec![0u8; state.timing.max_xfer];
    let offset = state.clock.bytes_written;
    let chunk_len = ctx.image.load_chunk(offset, &mut payload);
    trace!(
        size = ctx.image.len(),
        bytes_written = offset,
        chunk_len,
        "Loaded block"
    );
    if chunk_len == 0 {
        return DfuStatus::InProgress;
    }

    if let Err(e) = exchange::download_block(ctx.transport, &payload, chunk_len) {
        error!(error = %e, offset, "DFU download request failed");
        return DfuStatus::CommunicationError;
    }
    state.clock.bytes_written += chunk_len;

    report_progress(state, ctx);
    DfuStatus::InProgress
}

/// Progress at most once per interval, and always on reaching 100%.
fn report_progress<T: BusTransport + ?Sized, O: DfuObserver + ?Sized>(
    state: &mut SessionState,
    ctx: &HandlerContext<'_, T, O>,
) {
    let total = ctx.image.len();
    let done = state.clock.bytes_written == total;
    let due = state
        .clock
        .last_progress_report
        .is_none_or(|last| ctx.now.duration_since(last) >= state.timing.progress_interval);
    if !(due || done) {
        return;
    }

    state.clock.last_progress_report = Some(ctx.now);
    let percent = state.clock.bytes_written as f32 * 100.0 / total as f32;
    debug!(progress = %format!("{:.1}%", percent), "Progress");
    ctx.emit(DfuEvent::Progress {
        percent,
        status: DfuStatus::InProgress,
    });
}

/// All bytes are out: send the zero-length block once the device is ready.
pub fn handle_end<T: BusTransport + ?Sized, O: DfuObserver + ?Sized>(
    state: &mut SessionState,
    ctx: &mut HandlerContext<'_, T, O>,
) -> DfuStatus {
    if !state.poller.check_ready(ctx.transport, ctx.now) {
        return DfuStatus::InProgress;
    }

    if let Err(e) = exchange::download_end(ctx.transport, state.timing.max_xfer) {
        error!(error = %e, "Final DFU download request failed");
        return DfuStatus::CommunicationError;
    }
    info!(bytes = state.clock.bytes_written, "Image transferred");
    DfuStatus::RebootPending
}
