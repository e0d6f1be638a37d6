//! Event system for decoupling the DFU core from whoever reports on it.
//!
//! Observers are invoked synchronously, within the tick that produced the
//! event.

use std::sync::Arc;

use crate::state::DfuStatus;
use crate::version::FirmwareVersion;

/// Events emitted by the device owner and the DFU state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum DfuEvent {
    /// An update session was triggered.
    Start { status: DfuStatus },
    /// Streaming progress, in percent of the image.
    Progress { percent: f32, status: DfuStatus },
    /// Update verified; device runs the image's version.
    Complete { status: DfuStatus },
    /// The session ended in a fatal status.
    Error { status_code: u8, status: DfuStatus },
    /// Session status changed.
    PhaseChanged { from: DfuStatus, to: DfuStatus },
    /// The device reported its firmware version.
    VersionRead { version: FirmwareVersion },
    /// The microphone mute switch changed.
    MuteStateChanged { muted: bool },
}

/// Observer trait for receiving DFU events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait DfuObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &DfuEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl DfuObserver for NullObserver {
    fn on_event(&self, _event: &DfuEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DfuObserver for TracingObserver {
    fn on_event(&self, event: &DfuEvent) {
        match event {
            DfuEvent::Start { .. } => {
                tracing::info!("DFU started");
            }
            DfuEvent::Progress { percent, .. } => {
                tracing::info!(progress = %format!("{:.1}%", percent), "Progress");
            }
            DfuEvent::Complete { .. } => {
                tracing::info!("DFU complete");
            }
            DfuEvent::Error {
                status_code,
                status,
            } => {
                tracing::error!(code = status_code, status = %status, "DFU failed");
            }
            DfuEvent::PhaseChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "Phase changed");
            }
            DfuEvent::VersionRead { version } => {
                tracing::info!(version = %version, "Device firmware version");
            }
            DfuEvent::MuteStateChanged { muted } => {
                tracing::info!(muted, "Mic mute state");
            }
        }
    }
}

/// Fan-out to any number of subscribers, in registration order.
#[derive(Clone, Default)]
pub struct ObserverList {
    observers: Vec<Arc<dyn DfuObserver>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Arc<dyn DfuObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl DfuObserver for ObserverList {
    fn on_event(&self, event: &DfuEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

/// Observer that keeps every event, for tests and tooling.
#[derive(Default)]
pub struct RecordingObserver {
    events: std::sync::Mutex<Vec<DfuEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DfuEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, pred: impl Fn(&DfuEvent) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

impl DfuObserver for RecordingObserver {
    fn on_event(&self, event: &DfuEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_out_in_order() {
        let first = Arc::new(RecordingObserver::new());
        let second = Arc::new(RecordingObserver::new());
        let mut list = ObserverList::new();
        list.subscribe(first.clone());
        list.subscribe(second.clone());
        assert_eq!(list.len(), 2);

        list.on_event(&DfuEvent::MuteStateChanged { muted: true });
        list.on_event(&DfuEvent::Complete {
            status: DfuStatus::Ok,
        });

        assert_eq!(first.events(), second.events());
        assert_eq!(first.events().len(), 2);
    }

    #[test]
    fn test_empty_list_is_noop() {
        let list = ObserverList::new();
        assert!(list.is_empty());
        list.on_event(&DfuEvent::Start {
            status: DfuStatus::Ok,
        });
    }
}
