//! Register-addressed bus transport abstraction.
//!
//! Defines the `BusTransport` trait for bus communication,
//! allowing different implementations (embedded-hal I2C, mock, etc.).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("No acknowledge from address 0x{address:02X}")]
    NoAcknowledge { address: u8 },

    #[error("Reset line error: {0}")]
    Reset(String),
}

/// Synchronous bus primitives used by the DFU core.
///
/// Each call is one bounded bus transaction; implementations must not
/// retry internally.
pub trait BusTransport {
    /// Write one request frame.
    fn write(&mut self, data: &[u8]) -> Result<(), BusError>;

    /// Read exactly `buf.len()` bytes of response.
    fn read(&mut self, buf: &mut [u8]) -> Result<(), BusError>;

    /// Pulse the device reset line, if the transport has one.
    fn pulse_reset(&mut self) -> Result<(), BusError> {
        Ok(())
    }
}

impl<T: BusTransport + ?Sized> BusTransport for &mut T {
    fn write(&mut self, data: &[u8]) -> Result<(), BusError> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        (**self).read(buf)
    }

    fn pulse_reset(&mut self) -> Result<(), BusError> {
        (**self).pulse_reset()
    }
}
