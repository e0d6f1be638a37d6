//! embedded-hal I2C transport implementation.

use std::convert::Infallible;
use std::thread;
use std::time::Duration;

use embedded_hal::digital::{self, OutputPin};
use embedded_hal::i2c::{Error as _, ErrorKind, I2c, NoAcknowledgeSource};
use tracing::{debug, trace};

use super::traits::{BusError, BusTransport};

/// How long the reset line is held asserted.
const RESET_PULSE: Duration = Duration::from_millis(1);

/// Placeholder for boards without a wired reset line.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResetPin;

impl digital::ErrorType for NoResetPin {
    type Error = Infallible;
}

impl OutputPin for NoResetPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Transport over any `embedded_hal::i2c::I2c` bus at a fixed address.
pub struct I2cTransport<I, R = NoResetPin> {
    bus: I,
    address: u8,
    reset: Option<R>,
}

impl<I: I2c> I2cTransport<I, NoResetPin> {
    pub fn new(bus: I, address: u8) -> Self {
        Self {
            bus,
            address,
            reset: None,
        }
    }
}

impl<I: I2c, R: OutputPin> I2cTransport<I, R> {
    /// Transport with an active-high reset line.
    pub fn with_reset_pin(bus: I, address: u8, reset: R) -> Self {
        Self {
            bus,
            address,
            reset: Some(reset),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Give back the underlying bus.
    pub fn release(self) -> I {
        self.bus
    }

    fn map_error(&self, kind: ErrorKind, read: bool) -> BusError {
        match kind {
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address) => BusError::NoAcknowledge {
                address: self.address,
            },
            other if read => BusError::ReadFailed(format!("{:?}", other)),
            other => BusError::WriteFailed(format!("{:?}", other)),
        }
    }
}

impl<I: I2c, R: OutputPin> BusTransport for I2cTransport<I, R> {
    fn write(&mut self, data: &[u8]) -> Result<(), BusError> {
        trace!(address = self.address, len = data.len(), "I2C write");
        self.bus
            .write(self.address, data)
            .map_err(|e| self.map_error(e.kind(), false))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        let address = self.address;
        let result = self.bus.read(address, buf);
        trace!(address, len = buf.len(), "I2C read");
        result.map_err(|e| self.map_error(e.kind(), true))
    }

    fn pulse_reset(&mut self) -> Result<(), BusError> {
        let Some(pin) = self.reset.as_mut() else {
            return Ok(());
        };
        debug!("Pulsing reset line");
        pin.set_high()
            .map_err(|e| BusError::Reset(format!("{:?}", digital::Error::kind(&e))))?;
        thread::sleep(RESET_PULSE);
        pin.set_low()
            .map_err(|e| BusError::Reset(format!("{:?}", digital::Error::kind(&e))))
    }
}
