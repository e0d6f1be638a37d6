//! Owner of the companion controller: boot probe, DFU sessions, telemetry.
//!
//! Ticked once per scheduler pass. Holds the health of the device
//! explicitly instead of a global "initialized" flag.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::events::{DfuEvent, DfuObserver, ObserverList};
use crate::payload::FirmwareImage;
use crate::protocol::constants::BOOT_DELAY_MS;
use crate::protocol::{ProtocolError, exchange};
use crate::state::{DfuMachine, DfuStatus, HandlerContext, SessionTiming};
use crate::transport::BusTransport;
use crate::version::FirmwareVersion;

/// Why the device was taken out of service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The boot probe could not talk to the device.
    Unreachable,
    /// A DFU session ended in a fatal status.
    Dfu(DfuStatus),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Unreachable => write!(f, "device unreachable"),
            Fault::Dfu(status) => write!(f, "DFU failed with {}", status),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceHealth {
    /// Not booted, or an automatic update could not start. No bus traffic.
    Idle,
    /// Reset issued; first probe due at `probe_at`.
    Booting { probe_at: Instant },
    Updating,
    Ready,
    Failed(Fault),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("No firmware image configured")]
    NoFirmware,
    #[error("Firmware image is empty")]
    EmptyFirmware,
    #[error("A DFU session is already active ({0})")]
    SessionActive(DfuStatus),
}

pub struct XmosDevice<T: BusTransport> {
    transport: T,
    image: Option<FirmwareImage>,
    timing: SessionTiming,
    boot_delay: Duration,
    observers: ObserverList,
    health: DeviceHealth,
    machine: Option<DfuMachine>,
    last_status: Option<DfuStatus>,
    device_version: Option<FirmwareVersion>,
    mic_muted: Option<bool>,
}

impl<T: BusTransport> XmosDevice<T> {
    pub fn new(transport: T, image: Option<FirmwareImage>, timing: SessionTiming) -> Self {
        Self {
            transport,
            image,
            timing,
            boot_delay: Duration::from_millis(BOOT_DELAY_MS),
            observers: ObserverList::new(),
            health: DeviceHealth::Idle,
            machine: None,
            last_status: None,
            device_version: None,
            mic_muted: None,
        }
    }

    /// Delay between the reset pulse and the first version probe.
    pub fn with_boot_delay(mut self, boot_delay: Duration) -> Self {
        self.boot_delay = boot_delay;
        self
    }

    pub fn subscribe(&mut self, observer: Arc<dyn DfuObserver>) {
        self.observers.subscribe(observer);
    }

    /// Reset the device and schedule the boot probe.
    #[instrument(skip(self, now))]
    pub fn boot(&mut self, now: Instant) {
        info!("Setting up device...");
        if let Err(e) = self.transport.pulse_reset() {
            error!(error = %e, "Reset failed");
            self.mark_failed(Fault::Unreachable);
            return;
        }
        self.health = DeviceHealth::Booting {
            probe_at: now + self.boot_delay,
        };
    }

    /// One scheduler pass.
    pub fn tick(&mut self, now: Instant) -> DeviceHealth {
        match self.health {
            DeviceHealth::Idle | DeviceHealth::Failed(_) => {}
            DeviceHealth::Booting { probe_at } => {
                if now >= probe_at {
                    self.probe(now);
                }
            }
            DeviceHealth::Updating => self.advance_update(now),
            DeviceHealth::Ready => self.poll_mute_state(),
        }
        self.health
    }

    /// Trigger a DFU session.
    ///
    /// Refused while a session is active. A previous failure is cleared.
    pub fn start_update(&mut self, now: Instant) -> Result<(), StartError> {
        if let Some(machine) = &self.machine {
            warn!(status = %machine.status(), "Ignoring DFU request, session active");
            return Err(StartError::SessionActive(machine.status()));
        }
        let Some(image) = self.image.as_ref() else {
            error!("Firmware invalid");
            return Err(StartError::NoFirmware);
        };
        if image.is_empty() {
            error!("Firmware invalid");
            return Err(StartError::EmptyFirmware);
        }

        match self.device_version {
            Some(v) => info!(from = %v, to = %image.version(), "Starting update"),
            None => info!(to = %image.version(), "Starting update"),
        }
        self.health = DeviceHealth::Updating;
        self.last_status = None;

        let mut ctx = HandlerContext {
            transport: &mut self.transport,
            observer: &self.observers,
            image,
            device_version: &mut self.device_version,
            now,
        };
        let machine = DfuMachine::start(self.timing, &mut ctx);
        let status = machine.status();
        self.machine = Some(machine);
        self.settle(status);
        Ok(())
    }

    /// Mute or unmute the speaker output. Failures are logged and returned.
    pub fn set_speaker_mute(&mut self, muted: bool) -> Result<(), ProtocolError> {
        exchange::set_speaker_mute(&mut self.transport, muted).inspect_err(|e| {
            warn!(error = %e, muted, "Speaker mute request failed");
        })
    }

    /// Voice-to-noise ratio reading; 0 when the read fails.
    pub fn read_vnr(&mut self) -> u8 {
        exchange::read_vnr(&mut self.transport).unwrap_or_else(|e| {
            error!(error = %e, "Failed to read VNR");
            0
        })
    }

    fn probe(&mut self, now: Instant) {
        let version = match exchange::get_version(&mut self.transport) {
            Ok(version) => version,
            Err(e) => {
                error!(error = %e, "Communication with device failed");
                self.mark_failed(Fault::Unreachable);
                return;
            }
        };
        self.device_version = Some(version);
        self.notify(DfuEvent::VersionRead { version });

        let expected = self
            .image
            .as_ref()
            .filter(|image| !image.is_empty())
            .map(|image| image.version());
        match expected {
            Some(expected) if expected != version => {
                warn!(
                    expected = %expected,
                    found = %version,
                    "Device firmware out of date. Updating..."
                );
                if let Err(e) = self.start_update(now) {
                    error!(error = %e, "Could not start update");
                    self.health = DeviceHealth::Idle;
                }
            }
            _ => {
                info!(version = %version, "Device ready");
                self.health = DeviceHealth::Ready;
            }
        }
    }

    fn advance_update(&mut self, now: Instant) {
        let (Some(machine), Some(image)) = (self.machine.as_mut(), self.image.as_ref()) else {
            error!("Updating without an active session");
            self.settle(DfuStatus::BadState);
            return;
        };
        let mut ctx = HandlerContext {
            transport: &mut self.transport,
            observer: &self.observers,
            image,
            device_version: &mut self.device_version,
            now,
        };
        let status = machine.advance(&mut ctx);
        self.settle(status);
    }

    /// Apply the outcome of a session step.
    fn settle(&mut self, status: DfuStatus) {
        if status.is_active() {
            return;
        }
        self.machine = None;
        self.last_status = Some(status);

        if status == DfuStatus::Ok {
            self.health = DeviceHealth::Ready;
            return;
        }

        error!(status = %status, code = status.code(), "DFU session failed");
        self.notify(DfuEvent::Error {
            status_code: status.code(),
            status,
        });
        self.mark_failed(Fault::Dfu(status));
    }

    fn poll_mute_state(&mut self) {
        match exchange::mic_mute_state(&mut self.transport) {
            Ok(muted) => {
                if self.mic_muted != Some(muted) {
                    info!(muted, "Mic mute state");
                    self.mic_muted = Some(muted);
                    self.notify(DfuEvent::MuteStateChanged { muted });
                }
            }
            Err(e) => warn!(error = %e, "Read mic mute state failed"),
        }
    }

    fn mark_failed(&mut self, fault: Fault) {
        warn!(fault = %fault, "Marking device failed");
        self.health = DeviceHealth::Failed(fault);
    }

    /// Deliver to subscribers unless the device is already failed.
    fn notify(&self, event: DfuEvent) {
        if !self.is_failed() {
            self.observers.on_event(&event);
        }
    }

    pub fn health(&self) -> DeviceHealth {
        self.health
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.health, DeviceHealth::Failed(_))
    }

    pub fn is_ready(&self) -> bool {
        self.health == DeviceHealth::Ready
    }

    /// Status of the active session, or of the last one to finish.
    pub fn dfu_status(&self) -> Option<DfuStatus> {
        self.machine.as_ref().map(|m| m.status()).or(self.last_status)
    }

    /// Streaming progress of the active session.
    pub fn progress_percent(&self) -> Option<f32> {
        let image = self.image.as_ref()?;
        self.machine.as_ref().map(|m| m.progress_percent(image.len()))
    }

    pub fn device_version(&self) -> Option<FirmwareVersion> {
        self.device_version
    }

    pub fn firmware_version(&self) -> Option<FirmwareVersion> {
        self.image.as_ref().map(|i| i.version())
    }

    pub fn mic_muted(&self) -> Option<bool> {
        self.mic_muted
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
