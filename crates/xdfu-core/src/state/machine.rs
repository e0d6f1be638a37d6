//! DFU session state machine.
//!
//! One [`DfuMachine::advance`] call per scheduler tick. Waiting for the
//! device is expressed as returning early and re-checking on a later tick.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use super::handlers::{self, HandlerContext};
use super::poller::StatusPoller;
use crate::events::{DfuEvent, DfuObserver};
use crate::protocol::constants::*;
use crate::protocol::exchange;
use crate::transport::BusTransport;

/// Session status, persisted by the owner between ticks.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DfuStatus {
    /// Update verified.
    Ok = 0,
    CommunicationError = 1,
    Timeout = 2,
    /// Device came back with a version other than the image's.
    Failed = 3,
    /// Status the machine does not recognize.
    BadState = 4,
    /// Streaming blocks, or sending the end-of-download block.
    InProgress = 5,
    RebootPending = 6,
    VerifyingNewVersion = 7,
}

impl DfuStatus {
    /// Decode a persisted status code; anything unrecognized is `BadState`.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::CommunicationError,
            2 => Self::Timeout,
            3 => Self::Failed,
            4 => Self::BadState,
            5 => Self::InProgress,
            6 => Self::RebootPending,
            7 => Self::VerifyingNewVersion,
            other => {
                warn!(code = other, "Unrecognized DFU status");
                Self::BadState
            }
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// The machine still has work to do.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::InProgress | Self::RebootPending | Self::VerifyingNewVersion
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Terminal and unrecoverable for the owning component.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CommunicationError | Self::Timeout | Self::Failed | Self::BadState
        )
    }
}

impl fmt::Display for DfuStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::CommunicationError => write!(f, "COMMUNICATION_ERROR"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Failed => write!(f, "FAILED"),
            Self::BadState => write!(f, "BAD_STATE"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::RebootPending => write!(f, "REBOOT_PENDING"),
            Self::VerifyingNewVersion => write!(f, "VERIFYING_NEW_VERSION"),
        }
    }
}

/// Timing and sizing knobs, fixed for the life of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Firmware bytes per download block.
    pub max_xfer: usize,
    /// Overall budget, measured from session start.
    pub session_timeout: Duration,
    /// Budget since the device last reported ready, while it is expected to.
    /// Off unless configured; the session timeout always applies.
    pub stall_timeout: Option<Duration>,
    pub verify_interval: Duration,
    pub progress_interval: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            max_xfer: MAX_XFER,
            session_timeout: Duration::from_millis(DFU_SESSION_TIMEOUT_MS),
            stall_timeout: None,
            verify_interval: Duration::from_millis(VERIFY_INTERVAL_MS),
            progress_interval: Duration::from_millis(PROGRESS_INTERVAL_MS),
        }
    }
}

/// Per-session bookkeeping, reset once when the session starts.
#[derive(Debug, Clone)]
pub struct SessionClock {
    /// Image bytes acknowledged by the bus so far.
    pub bytes_written: usize,
    pub started_at: Instant,
    pub last_progress_report: Option<Instant>,
    /// Last version poll (or the reboot request) while verifying.
    pub verify_timer: Instant,
}

impl SessionClock {
    pub fn new(now: Instant) -> Self {
        Self {
            bytes_written: 0,
            started_at: now,
            last_progress_report: None,
            verify_timer: now,
        }
    }
}

/// Runtime state the phase handlers operate on.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub timing: SessionTiming,
    pub clock: SessionClock,
    pub poller: StatusPoller,
}

impl SessionState {
    pub fn new(timing: SessionTiming, now: Instant) -> Self {
        Self {
            timing,
            clock: SessionClock::new(now),
            poller: StatusPoller::new(now),
        }
    }
}

/// The DFU session: status plus the state needed to advance it.
#[derive(Debug, Clone)]
pub struct DfuMachine {
    status: DfuStatus,
    state: SessionState,
}

impl DfuMachine {
    /// Select the upgrade partition and begin a session.
    ///
    /// The returned machine is `InProgress`, or `CommunicationError` if the
    /// device did not take the request.
    pub fn start<T: BusTransport + ?Sized, O: DfuObserver + ?Sized>(
        timing: SessionTiming,
        ctx: &mut HandlerContext<'_, T, O>,
    ) -> Self {
        info!(
            size = ctx.image.len(),
            target = %ctx.image.version(),
            "Starting DFU session"
        );
        ctx.emit(DfuEvent::Start {
            status: DfuStatus::Ok,
        });

        match exchange::set_alternate(ctx.transport) {
            Ok(()) => Self {
                status: DfuStatus::InProgress,
                state: SessionState::new(timing, ctx.now),
            },
            Err(e) => {
                error!(error = %e, "SetAlternate request failed");
                // Terminal from the start; the clock is never advanced.
                Self {
                    status: DfuStatus::CommunicationError,
                    state: SessionState::new(timing, ctx.now),
                }
            }
        }
    }

    /// Advance by one tick and return the new status.
    pub fn advance<T: BusTransport + ?Sized, O: DfuObserver + ?Sized>(
        &mut self,
        ctx: &mut HandlerContext<'_, T, O>,
    ) -> DfuStatus {
        if self.status.is_terminal() {
            return self.status;
        }
        let next = handlers::handle_tick(self.status, &mut self.state, ctx);
        self.goto_status(next, ctx);
        self.status
    }

    fn goto_status<T: BusTransport + ?Sized, O: DfuObserver + ?Sized>(
        &mut self,
        next: DfuStatus,
        ctx: &HandlerContext<'_, T, O>,
    ) {
        if next != self.status {
            info!(from = %self.status, to = %next, "State transition");
            ctx.emit(DfuEvent::PhaseChanged {
                from: self.status,
                to: next,
            });
            self.status = next;
        }
    }

    pub fn status(&self) -> DfuStatus {
        self.status
    }

    pub fn bytes_written(&self) -> usize {
        self.state.clock.bytes_written
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn timing(&self) -> &SessionTiming {
        &self.state.timing
    }

    /// Percentage of `total` bytes written so far.
    pub fn progress_percent(&self, total: usize) -> f32 {
        if total == 0 {
            0.0
        } else {
            self.state.clock.bytes_written as f32 * 100.0 / total as f32
        }
    }
}
