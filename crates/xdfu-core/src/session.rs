//! Session configuration and the blocking run-loop.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail, ensure};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::device::{DeviceHealth, XmosDevice};
use crate::payload::FirmwareImage;
use crate::protocol::constants::*;
use crate::state::SessionTiming;
use crate::transport::BusTransport;
use crate::version::FirmwareVersion;

/// Configuration for a DFU session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// I2C character device.
    pub bus: String,
    /// 7-bit bus address of the device.
    pub address: u8,
    /// Image to install. Without one the device is only probed.
    pub firmware: Option<FirmwareConfig>,
    pub timing: TimingConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bus: "/dev/i2c-1".to_string(),
            address: DEFAULT_BUS_ADDRESS,
            firmware: None,
            timing: TimingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareConfig {
    pub path: PathBuf,
    /// Version the image installs, as `major.minor.patch`.
    pub version: FirmwareVersion,
    /// Hex SHA-256 of the image file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub max_xfer: usize,
    pub session_timeout_ms: u64,
    /// Stall budget since the last ready status; 0 (default) disables it.
    pub stall_timeout_ms: u64,
    pub verify_interval_ms: u64,
    pub progress_interval_ms: u64,
    pub boot_delay_ms: u64,
    pub tick_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            max_xfer: MAX_XFER,
            session_timeout_ms: DFU_SESSION_TIMEOUT_MS,
            stall_timeout_ms: 0,
            verify_interval_ms: VERIFY_INTERVAL_MS,
            progress_interval_ms: PROGRESS_INTERVAL_MS,
            boot_delay_ms: BOOT_DELAY_MS,
            tick_interval_ms: TICK_INTERVAL_MS,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: SessionConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.timing;
        ensure!(
            (1..=MAX_XFER_LIMIT).contains(&t.max_xfer),
            "max_xfer must be within 1..={}, got {}",
            MAX_XFER_LIMIT,
            t.max_xfer
        );
        ensure!(self.address <= 0x7F, "address {:#x} is not a 7-bit address", self.address);
        ensure!(t.session_timeout_ms > 0, "session_timeout_ms must be non-zero");
        ensure!(t.verify_interval_ms > 0, "verify_interval_ms must be non-zero");
        ensure!(t.tick_interval_ms > 0, "tick_interval_ms must be non-zero");
        Ok(())
    }

    pub fn session_timing(&self) -> SessionTiming {
        let t = &self.timing;
        SessionTiming {
            max_xfer: t.max_xfer,
            session_timeout: Duration::from_millis(t.session_timeout_ms),
            stall_timeout: (t.stall_timeout_ms > 0)
                .then(|| Duration::from_millis(t.stall_timeout_ms)),
            verify_interval: Duration::from_millis(t.verify_interval_ms),
            progress_interval: Duration::from_millis(t.progress_interval_ms),
        }
    }

    pub fn boot_delay(&self) -> Duration {
        Duration::from_millis(self.timing.boot_delay_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.timing.tick_interval_ms)
    }

    /// Load the configured image, if any.
    pub fn load_firmware(&self) -> Result<Option<FirmwareImage>> {
        let Some(fw) = &self.firmware else {
            return Ok(None);
        };
        let image = FirmwareImage::load(&fw.path, fw.version, fw.sha256.as_deref())
            .with_context(|| format!("loading firmware {}", fw.path.display()))?;
        Ok(Some(image))
    }

    /// Build a device owner over `transport` from this configuration.
    pub fn build_device<T: BusTransport>(&self, transport: T) -> Result<XmosDevice<T>> {
        self.validate()?;
        let image = self.load_firmware()?;
        Ok(XmosDevice::new(transport, image, self.session_timing()).with_boot_delay(self.boot_delay()))
    }
}

/// Boot the device and tick it until it settles.
///
/// With `force`, an update is started even when the device already runs
/// the image's version. Returns the version the device reports at the end.
#[instrument(skip(device), fields(tick_ms = tick_interval.as_millis() as u64))]
pub fn run_update<T: BusTransport>(
    device: &mut XmosDevice<T>,
    tick_interval: Duration,
    force: bool,
) -> Result<FirmwareVersion> {
    device.boot(Instant::now());
    let mut updated = false;

    loop {
        match device.tick(Instant::now()) {
            DeviceHealth::Failed(fault) => bail!("device failed: {fault}"),
            DeviceHealth::Idle => bail!("device not initialized"),
            DeviceHealth::Updating => updated = true,
            DeviceHealth::Ready if force && !updated => {
                info!("Forcing update");
                device.start_update(Instant::now())?;
                updated = true;
            }
            DeviceHealth::Ready => {
                return device
                    .device_version()
                    .ok_or_else(|| anyhow!("device ready without a version"));
            }
            DeviceHealth::Booting { .. } => {}
        }
        thread::sleep(tick_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockBus;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("xdfu-{}-{}", std::process::id(), name))
    }

    fn fast_config(firmware: Option<FirmwareConfig>) -> SessionConfig {
        SessionConfig {
            firmware,
            timing: TimingConfig {
                verify_interval_ms: 5,
                boot_delay_ms: 0,
                tick_interval_ms: 1,
                ..TimingConfig::default()
            },
            ..SessionConfig::default()
        }
    }

    fn write_image(name: &str, len: usize) -> PathBuf {
        let path = temp_path(name);
        std::fs::write(&path, vec![0xA5; len]).unwrap();
        path
    }

    #[test]
    fn test_config_roundtrip() {
        let config = SessionConfig {
            address: 0x43,
            firmware: Some(FirmwareConfig {
                path: PathBuf::from("/lib/firmware/xmos.bin"),
                version: FirmwareVersion::new(1, 3, 1),
                sha256: Some("abcd".to_string()),
            }),
            ..SessionConfig::default()
        };
        let path = temp_path("roundtrip.toml");
        config.save_to_file(&path).unwrap();
        let loaded = SessionConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SessionConfig = toml::from_str(
            r#"
            bus = "/dev/i2c-3"

            [firmware]
            path = "fw.bin"
            version = "1.0.2"

            [timing]
            max_xfer = 64
            "#,
        )
        .unwrap();
        assert_eq!(config.bus, "/dev/i2c-3");
        assert_eq!(config.address, DEFAULT_BUS_ADDRESS);
        assert_eq!(config.timing.max_xfer, 64);
        assert_eq!(config.timing.boot_delay_ms, BOOT_DELAY_MS);
        assert_eq!(
            config.firmware.unwrap().version,
            FirmwareVersion::new(1, 0, 2)
        );
    }

    #[test]
    fn test_bad_version_string_rejected() {
        let result: Result<SessionConfig, _> = toml::from_str(
            r#"
            [firmware]
            path = "fw.bin"
            version = "1.0"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = SessionConfig::default();
        assert!(config.validate().is_ok());

        config.timing.max_xfer = MAX_XFER_LIMIT + 1;
        assert!(config.validate().is_err());
        config.timing.max_xfer = 0;
        assert!(config.validate().is_err());
        config.timing.max_xfer = MAX_XFER_LIMIT;
        assert!(config.validate().is_ok());

        config.timing.tick_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_timing_mapping() {
        let mut config = SessionConfig::default();
        assert_eq!(config.session_timing(), SessionTiming::default());

        assert_eq!(config.session_timing().stall_timeout, None);

        config.timing.stall_timeout_ms = 2000;
        assert_eq!(
            config.session_timing().stall_timeout,
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_digest_mismatch_fails_load() {
        let path = write_image("digest.bin", 16);
        let config = fast_config(Some(FirmwareConfig {
            path: path.clone(),
            version: FirmwareVersion::new(1, 0, 0),
            sha256: Some("00".repeat(32)),
        }));
        let result = config.load_firmware();
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }

    #[test]
    fn test_run_update_flashes_outdated_device() {
        let path = write_image("flash.bin", 1000);
        let config = fast_config(Some(FirmwareConfig {
            path: path.clone(),
            version: FirmwareVersion::new(2, 0, 0),
            sha256: None,
        }));
        let bus = MockBus::new().with_version(1, 0, 0).reboots_into(2, 0, 0);
        let mut device = config.build_device(bus).unwrap();
        std::fs::remove_file(&path).ok();

        let version = run_update(&mut device, config.tick_interval(), false).unwrap();
        assert_eq!(version, FirmwareVersion::new(2, 0, 0));
        assert_eq!(device.transport().received().len(), 1000);
        assert!(device.transport().rebooted());
    }

    #[test]
    fn test_run_update_current_device_untouched() {
        let path = write_image("current.bin", 100);
        let config = fast_config(Some(FirmwareConfig {
            path: path.clone(),
            version: FirmwareVersion::new(1, 0, 0),
            sha256: None,
        }));
        let mut device = config
            .build_device(MockBus::new().with_version(1, 0, 0))
            .unwrap();
        std::fs::remove_file(&path).ok();

        run_update(&mut device, config.tick_interval(), false).unwrap();
        assert!(device.transport().received().is_empty());
    }

    #[test]
    fn test_run_update_force() {
        let path = write_image("force.bin", 100);
        let config = fast_config(Some(FirmwareConfig {
            path: path.clone(),
            version: FirmwareVersion::new(1, 0, 0),
            sha256: None,
        }));
        let mut device = config
            .build_device(MockBus::new().with_version(1, 0, 0))
            .unwrap();
        std::fs::remove_file(&path).ok();

        run_update(&mut device, config.tick_interval(), true).unwrap();
        assert_eq!(device.transport().received().len(), 100);
    }

    #[test]
    fn test_run_update_reports_failure() {
        let path = write_image("fail.bin", 100);
        let config = fast_config(Some(FirmwareConfig {
            path: path.clone(),
            version: FirmwareVersion::new(2, 0, 0),
            sha256: None,
        }));
        // Device never takes the new image.
        let bus = MockBus::new().with_version(1, 0, 0);
        let mut device = config.build_device(bus).unwrap();
        std::fs::remove_file(&path).ok();

        let err = run_update(&mut device, config.tick_interval(), false).unwrap_err();
        assert!(err.to_string().contains("FAILED"));
    }
}
