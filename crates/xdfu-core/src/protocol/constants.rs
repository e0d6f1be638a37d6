// Control servicer resource ids
pub const DFU_CONTROLLER_SERVICER_RESID: u8 = 240;
pub const CONFIGURATION_SERVICER_RESID: u8 = 241;

// DFU controller command ids
pub const DFU_CMD_DNLOAD: u8 = 1;
pub const DFU_CMD_GETSTATUS: u8 = 3;
pub const DFU_CMD_SETALTERNATE: u8 = 64;
pub const DFU_CMD_GETVERSION: u8 = 88;
pub const DFU_CMD_REBOOT: u8 = 89;

// Configuration servicer command ids
pub const CONFIG_CMD_SPEAKER_MUTE: u8 = 0x10;
pub const CONFIG_CMD_VNR_VALUE: u8 = 0x00;
pub const CONFIG_CMD_MIC_MUTE: u8 = 0x01;

/// Set on the command id of every request that expects a response frame.
pub const COMMAND_READ_BIT: u8 = 0x80;

/// Leading byte of a response frame when the device completed the request.
pub const CTRL_DONE: u8 = 0;

/// Alternate setting holding the upgrade image.
pub const DFU_ALTERNATE_UPGRADE: u8 = 1;

// Response frame sizes
pub const VERSION_RESPONSE_LEN: usize = 4;
pub const STATUS_RESPONSE_LEN: usize = 6;
pub const MUTE_RESPONSE_LEN: usize = 2;
pub const VNR_RESPONSE_LEN: usize = 2;

/// Header: resource id, command id, payload length.
pub const HEADER_LEN: usize = 3;
/// Chunk length byte plus its zero companion byte.
pub const DNLOAD_LENGTH_FIELD_LEN: usize = 2;

/// Default number of firmware bytes carried by one download block.
pub const MAX_XFER: usize = 128;
/// Largest block that still fits the one-byte payload length in the header.
pub const MAX_XFER_LIMIT: usize = u8::MAX as usize - DNLOAD_LENGTH_FIELD_LEN;

/// Default 7-bit bus address of the companion controller.
pub const DEFAULT_BUS_ADDRESS: u8 = 0x42;

// Timing defaults (milliseconds)
pub const DFU_SESSION_TIMEOUT_MS: u64 = 5 * 60 * 1000;
pub const VERIFY_INTERVAL_MS: u64 = 500;
pub const PROGRESS_INTERVAL_MS: u64 = 1000;
pub const BOOT_DELAY_MS: u64 = 3000;
pub const TICK_INTERVAL_MS: u64 = 5;
