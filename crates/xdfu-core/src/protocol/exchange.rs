//! Request/response exchanges over a [`BusTransport`].
//!
//! A read exchange is a request write followed by a fixed-size response
//! read. Any response whose leading ack byte is not [`CTRL_DONE`] is a
//! protocol error, even if the bus reported success.

use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;
use tracing::trace;

use super::constants::*;
use super::device_state::DeviceState;
use super::request;
use crate::transport::{BusError, BusTransport};
use crate::version::FirmwareVersion;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Unexpected ack 0x{ack:02X} in response to command 0x{command:02X}")]
    BadAck { command: u8, ack: u8 },

    #[error("Response too short: expected {expected}, got {actual}")]
    ShortResponse { expected: usize, actual: usize },

    #[error("Block of {len} bytes exceeds limit of {max}")]
    BlockTooLarge { len: usize, max: usize },
}

/// Decoded GetStatus response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusResponse {
    /// Raw DFU status code.
    pub status: u8,
    /// Minimum delay before the next status poll is meaningful.
    pub next_poll: Duration,
    pub state: DeviceState,
}

impl StatusResponse {
    pub fn parse(frame: &[u8]) -> Result<Self, ProtocolError> {
        check_ack(DFU_CMD_GETSTATUS, frame, STATUS_RESPONSE_LEN)?;
        // 24-bit delay, assembled from bytes 4, 3, 2 (high to low).
        let delay_ms = LittleEndian::read_u24(&frame[2..5]);
        Ok(Self {
            status: frame[1],
            next_poll: Duration::from_millis(delay_ms as u64),
            state: DeviceState::from_code(frame[5]),
        })
    }
}

pub fn parse_version(frame: &[u8]) -> Result<FirmwareVersion, ProtocolError> {
    check_ack(DFU_CMD_GETVERSION, frame, VERSION_RESPONSE_LEN)?;
    Ok(FirmwareVersion::new(frame[1], frame[2], frame[3]))
}

pub fn parse_mute_state(frame: &[u8]) -> Result<bool, ProtocolError> {
    check_ack(CONFIG_CMD_MIC_MUTE, frame, MUTE_RESPONSE_LEN)?;
    Ok(frame[1] == 0x01)
}

pub fn parse_vnr(frame: &[u8]) -> Result<u8, ProtocolError> {
    check_ack(CONFIG_CMD_VNR_VALUE, frame, VNR_RESPONSE_LEN)?;
    Ok(frame[1])
}

fn check_ack(command: u8, frame: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if frame.len() < expected {
        return Err(ProtocolError::ShortResponse {
            expected,
            actual: frame.len(),
        });
    }
    if frame[0] != CTRL_DONE {
        return Err(ProtocolError::BadAck {
            command,
            ack: frame[0],
        });
    }
    Ok(())
}

fn exchange<T: BusTransport + ?Sized, const N: usize>(
    bus: &mut T,
    req: &[u8],
) -> Result<[u8; N], ProtocolError> {
    bus.write(req)?;
    let mut resp = [0u8; N];
    bus.read(&mut resp)?;
    trace!(request = ?req, response = ?resp, "Exchange");
    Ok(resp)
}

pub fn get_version<T: BusTransport + ?Sized>(bus: &mut T) -> Result<FirmwareVersion, ProtocolError> {
    let resp: [u8; VERSION_RESPONSE_LEN] = exchange(bus, &request::get_version())?;
    parse_version(&resp)
}

pub fn get_status<T: BusTransport + ?Sized>(bus: &mut T) -> Result<StatusResponse, ProtocolError> {
    let resp: [u8; STATUS_RESPONSE_LEN] = exchange(bus, &request::get_status())?;
    StatusResponse::parse(&resp)
}

pub fn set_alternate<T: BusTransport + ?Sized>(bus: &mut T) -> Result<(), ProtocolError> {
    bus.write(&request::set_alternate(DFU_ALTERNATE_UPGRADE))?;
    Ok(())
}

pub fn reboot<T: BusTransport + ?Sized>(bus: &mut T) -> Result<(), ProtocolError> {
    bus.write(&request::reboot())?;
    Ok(())
}

/// Send one download block; `payload` is the full fixed-size buffer.
pub fn download_block<T: BusTransport + ?Sized>(
    bus: &mut T,
    payload: &[u8],
    chunk_len: usize,
) -> Result<(), ProtocolError> {
    let frame = request::download_block(payload, chunk_len)?;
    trace!(chunk_len, frame_len = frame.len(), "Download block");
    bus.write(&frame)?;
    Ok(())
}

pub fn download_end<T: BusTransport + ?Sized>(
    bus: &mut T,
    max_xfer: usize,
) -> Result<(), ProtocolError> {
    bus.write(&request::download_end(max_xfer)?)?;
    Ok(())
}

pub fn mic_mute_state<T: BusTransport + ?Sized>(bus: &mut T) -> Result<bool, ProtocolError> {
    let resp: [u8; MUTE_RESPONSE_LEN] = exchange(bus, &request::mic_mute_state())?;
    parse_mute_state(&resp)
}

pub fn read_vnr<T: BusTransport + ?Sized>(bus: &mut T) -> Result<u8, ProtocolError> {
    let resp: [u8; VNR_RESPONSE_LEN] = exchange(bus, &request::vnr_value())?;
    parse_vnr(&resp)
}

pub fn set_speaker_mute<T: BusTransport + ?Sized>(
    bus: &mut T,
    muted: bool,
) -> Result<(), ProtocolError> {
    bus.write(&request::speaker_mute(muted))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockBus;

    #[test]
    fn test_status_backoff_byte_order() {
        let frame = [CTRL_DONE, 0, 0x01, 0x02, 0x03, 5];
        let status = StatusResponse::parse(&frame).unwrap();
        // bytes[4] << 16 | bytes[3] << 8 | bytes[2]
        assert_eq!(status.next_poll, Duration::from_millis(0x030201));
        assert_eq!(status.state, DeviceState::DfuDnloadIdle);
        assert_eq!(status.status, 0);
    }

    #[test]
    fn test_bad_ack_rejected() {
        let frame = [1, 0, 0, 0, 0, 2];
        assert!(matches!(
            StatusResponse::parse(&frame),
            Err(ProtocolError::BadAck { ack: 1, .. })
        ));
        assert!(matches!(
            parse_version(&[0xFF, 1, 2, 3]),
            Err(ProtocolError::BadAck { ack: 0xFF, .. })
        ));
    }

    #[test]
    fn test_short_response_rejected() {
        assert!(matches!(
            parse_version(&[0, 1]),
            Err(ProtocolError::ShortResponse {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_bad_ack_despite_bus_success() {
        let mut bus = MockBus::new();
        bus.queue_response(&[3, 1, 2, 3]);
        assert!(matches!(
            get_version(&mut bus),
            Err(ProtocolError::BadAck { .. })
        ));
    }

    #[test]
    fn test_get_status_from_mock() {
        let mut bus = MockBus::new().with_backoff_ms(20);
        let status = get_status(&mut bus).unwrap();
        assert_eq!(status.next_poll, Duration::from_millis(20));
        assert!(status.state.is_ready());
    }

    #[test]
    fn test_bus_failure_maps_to_protocol_error() {
        let mut bus = MockBus::new();
        bus.fail_command(DFU_CONTROLLER_SERVICER_RESID, DFU_CMD_SETALTERNATE);
        assert!(matches!(
            set_alternate(&mut bus),
            Err(ProtocolError::Bus(_))
        ));
    }

    #[test]
    fn test_mute_exchange() {
        let mut bus = MockBus::new();
        bus.set_mic_muted(true);
        assert!(mic_mute_state(&mut bus).unwrap());
        set_speaker_mute(&mut bus, true).unwrap();
        assert!(bus.speaker_muted());
    }

    #[test]
    fn test_vnr_exchange() {
        let mut bus = MockBus::new();
        bus.set_vnr(42);
        assert_eq!(read_vnr(&mut bus).unwrap(), 42);
        assert_eq!(bus.writes().last().map(Vec::as_slice), Some(&[241, 0x80, 2][..]));

        assert!(matches!(
            parse_vnr(&[3, 42]),
            Err(ProtocolError::BadAck { ack: 3, .. })
        ));
    }
}
