//! Request frame builders.
//!
//! Every request starts with a three byte header:
//! `[resource_id, command_id | read_bit, payload_length]`.
//! Builders are pure; nothing here touches the bus.

use super::constants::*;
use super::exchange::ProtocolError;

const fn read_header(resid: u8, cmd: u8, response_len: usize) -> [u8; HEADER_LEN] {
    [resid, cmd | COMMAND_READ_BIT, response_len as u8]
}

/// GetVersion: read request answered by `(ack, major, minor, patch)`.
pub const fn get_version() -> [u8; HEADER_LEN] {
    read_header(
        DFU_CONTROLLER_SERVICER_RESID,
        DFU_CMD_GETVERSION,
        VERSION_RESPONSE_LEN,
    )
}

/// GetStatus: read request answered by
/// `(ack, status, backoff_b0, backoff_b1, backoff_b2, state)`.
pub const fn get_status() -> [u8; HEADER_LEN] {
    read_header(
        DFU_CONTROLLER_SERVICER_RESID,
        DFU_CMD_GETSTATUS,
        STATUS_RESPONSE_LEN,
    )
}

/// SetAlternate: selects the partition the following download targets.
pub const fn set_alternate(alternate: u8) -> [u8; HEADER_LEN + 1] {
    [
        DFU_CONTROLLER_SERVICER_RESID,
        DFU_CMD_SETALTERNATE,
        1,
        alternate,
    ]
}

/// Reboot: the header announces one payload byte, sent as zero.
pub const fn reboot() -> [u8; HEADER_LEN + 1] {
    [DFU_CONTROLLER_SERVICER_RESID, DFU_CMD_REBOOT, 1, 0]
}

/// DownloadBlock carrying the whole fixed-size `payload`, of which only the
/// first `chunk_len` bytes are meaningful to the device.
///
/// The caller owns the payload buffer and is responsible for zeroing the
/// unused tail (see [`crate::payload::FirmwareImage::load_chunk`]).
pub fn download_block(payload: &[u8], chunk_len: usize) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_XFER_LIMIT {
        return Err(ProtocolError::BlockTooLarge {
            len: payload.len(),
            max: MAX_XFER_LIMIT,
        });
    }
    if chunk_len > payload.len() {
        return Err(ProtocolError::BlockTooLarge {
            len: chunk_len,
            max: payload.len(),
        });
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + DNLOAD_LENGTH_FIELD_LEN + payload.len());
    frame.push(DFU_CONTROLLER_SERVICER_RESID);
    frame.push(DFU_CMD_DNLOAD);
    frame.push((payload.len() + DNLOAD_LENGTH_FIELD_LEN) as u8);
    frame.push(chunk_len as u8);
    frame.push(0);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Zero-length DownloadBlock that tells the device the image is complete.
pub fn download_end(max_xfer: usize) -> Result<Vec<u8>, ProtocolError> {
    download_block(&vec![0u8; max_xfer], 0)
}

/// Microphone mute state read: answered by `(ack, muted)`.
pub const fn mic_mute_state() -> [u8; HEADER_LEN] {
    read_header(
        CONFIGURATION_SERVICER_RESID,
        CONFIG_CMD_MIC_MUTE,
        MUTE_RESPONSE_LEN - 1,
    )
}

/// Voice-to-noise ratio read: answered by `(ack, vnr)`.
pub const fn vnr_value() -> [u8; HEADER_LEN] {
    read_header(
        CONFIGURATION_SERVICER_RESID,
        CONFIG_CMD_VNR_VALUE,
        VNR_RESPONSE_LEN,
    )
}

/// Speaker mute control. The device treats payload `1` as "sound on".
pub const fn speaker_mute(muted: bool) -> [u8; HEADER_LEN + 1] {
    [
        CONFIGURATION_SERVICER_RESID,
        CONFIG_CMD_SPEAKER_MUTE,
        1,
        if muted { 0 } else { 1 },
    ]
}
