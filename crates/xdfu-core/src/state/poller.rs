//! Readiness poller honoring the device's status backoff.

use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::protocol::DeviceState;
use crate::protocol::exchange;
use crate::transport::BusTransport;

/// Issues GetStatus no more often than the device allows and decides
/// whether the next request may be sent.
#[derive(Debug, Clone)]
pub struct StatusPoller {
    last_status_poll: Instant,
    /// Backoff from the most recent status response.
    next_poll_backoff: Duration,
    last_ready: Instant,
    device_state: Option<DeviceState>,
    device_status: u8,
}

impl StatusPoller {
    pub fn new(now: Instant) -> Self {
        Self {
            last_status_poll: now,
            next_poll_backoff: Duration::ZERO,
            last_ready: now,
            device_state: None,
            device_status: 0,
        }
    }

    /// A status poll would be meaningful at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.last_status_poll + self.next_poll_backoff
    }

    /// Whether the device is ready for the next request.
    ///
    /// Inside the backoff window this returns `false` without touching the
    /// bus. A failed poll also returns `false` and leaves the timestamps
    /// alone, so the next tick polls again.
    pub fn check_ready<T: BusTransport + ?Sized>(&mut self, bus: &mut T, now: Instant) -> bool {
        if !self.is_due(now) {
            return false;
        }

        let status = match exchange::get_status(bus) {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Read status failed");
                return false;
            }
        };

        self.last_status_poll = now;
        self.next_poll_backoff = status.next_poll;
        self.device_state = Some(status.state);
        self.device_status = status.status;
        trace!(
            state = %status.state,
            status = status.status,
            delay_ms = status.next_poll.as_millis() as u64,
            "DFU status"
        );

        if status.state.is_ready() {
            self.last_ready = now;
            true
        } else {
            false
        }
    }

    pub fn last_ready(&self) -> Instant {
        self.last_ready
    }

    pub fn last_status_poll(&self) -> Instant {
        self.last_status_poll
    }

    pub fn next_poll_backoff(&self) -> Duration {
        self.next_poll_backoff
    }

    /// Last state code read from the device, if any poll succeeded.
    pub fn device_state(&self) -> Option<DeviceState> {
        self.device_state
    }

    pub fn device_status(&self) -> u8 {
        self.device_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;
    use crate::transport::MockBus;

    #[test]
    fn test_not_due_means_no_traffic() {
        let t0 = Instant::now();
        let mut bus = MockBus::new().with_backoff_ms(100);
        let mut poller = StatusPoller::new(t0);

        assert!(poller.check_ready(&mut bus, t0));
        assert_eq!(poller.next_poll_backoff(), Duration::from_millis(100));
        assert_eq!(bus.write_count(), 1);

        assert!(!poller.check_ready(&mut bus, t0 + Duration::from_millis(99)));
        assert_eq!(bus.write_count(), 1);

        assert!(poller.check_ready(&mut bus, t0 + Duration::from_millis(100)));
        assert_eq!(bus.write_count(), 2);
    }

    #[test]
    fn test_busy_state_not_ready() {
        let t0 = Instant::now();
        let mut bus = MockBus::new();
        bus.queue_states(&[4]);
        let mut poller = StatusPoller::new(t0);

        let later = t0 + Duration::from_millis(10);
        assert!(!poller.check_ready(&mut bus, later));
        assert_eq!(poller.device_state(), Some(DeviceState::DfuDnBusy));
        assert_eq!(poller.last_status_poll(), later);
        assert_eq!(poller.last_ready(), t0);
    }

    #[test]
    fn test_failed_poll_keeps_timestamps() {
        let t0 = Instant::now();
        let mut bus = MockBus::new();
        bus.set_fail_reads(true);
        let mut poller = StatusPoller::new(t0);

        let later = t0 + Duration::from_millis(10);
        assert!(!poller.check_ready(&mut bus, later));
        assert_eq!(poller.last_status_poll(), t0);
        assert_eq!(poller.device_state(), None);
        assert!(poller.is_due(later));
    }

    #[test]
    fn test_bad_ack_is_not_ready() {
        let t0 = Instant::now();
        let mut bus = MockBus::new();
        bus.queue_response(&[CTRL_DONE + 1, 0, 0, 0, 0, 2]);
        let mut poller = StatusPoller::new(t0);
        assert!(!poller.check_ready(&mut bus, t0));
        assert_eq!(poller.device_state(), None);
    }
}
