//! xdfu-core: firmware update for an XMOS companion controller over I2C.
//!
//! The controller exposes a small register-addressed command protocol. This
//! crate streams a new image to it block by block, reboots it and checks the
//! version it comes back with, all from a non-blocking, tick-driven state
//! machine.
//!
//! # Architecture
//!
//! - **Protocol**: Wire constants, request frames, response parsing
//! - **Transport**: Bus abstraction (embedded-hal I2C, mock)
//! - **Payload**: Firmware image source and block loading
//! - **State**: Status poller, DFU state machine and phase handlers
//! - **Events**: Observer pattern for UI decoupling
//! - **Device**: Owner of the transport, image and session
//! - **Session**: Configuration and a blocking run-loop
//!
//! # Example
//!
//! ```no_run
//! use xdfu_core::session::{SessionConfig, run_update};
//! use xdfu_core::transport::MockBus;
//!
//! let config = SessionConfig::load_from_file("xdfu.toml")?;
//! let mut device = config.build_device(MockBus::new())?;
//! let version = run_update(&mut device, config.tick_interval(), false)?;
//! println!("device runs {version}");
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod device;
pub mod events;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;
pub mod version;

// Re-exports for convenience
pub use device::{DeviceHealth, Fault, StartError, XmosDevice};
pub use events::{DfuEvent, DfuObserver, NullObserver, ObserverList, TracingObserver};
pub use payload::{FirmwareError, FirmwareImage};
pub use protocol::{DeviceState, ProtocolError, StatusResponse};
pub use session::{SessionConfig, run_update};
pub use state::{DfuMachine, DfuStatus, SessionTiming};
pub use transport::{BusError, BusTransport, I2cTransport, MockBus};
pub use version::FirmwareVersion;
