//! DFU state codes reported in the last byte of a status response.

use std::fmt;

/// Device-side DFU state, numbered as in the USB DFU class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    AppIdle,
    AppDetach,
    /// Waiting for requests.
    DfuIdle,
    DfuDnloadSync,
    /// Programming a block; not accepting another one yet.
    DfuDnBusy,
    /// Block processed, expecting the next download request.
    DfuDnloadIdle,
    DfuManifestSync,
    DfuManifest,
    /// Image accepted, waiting for a reset.
    DfuManifestWaitReset,
    DfuUploadIdle,
    DfuError,
    Unknown(u8),
}

impl DeviceState {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::AppIdle,
            1 => Self::AppDetach,
            2 => Self::DfuIdle,
            3 => Self::DfuDnloadSync,
            4 => Self::DfuDnBusy,
            5 => Self::DfuDnloadIdle,
            6 => Self::DfuManifestSync,
            7 => Self::DfuManifest,
            8 => Self::DfuManifestWaitReset,
            9 => Self::DfuUploadIdle,
            10 => Self::DfuError,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::AppIdle => 0,
            Self::AppDetach => 1,
            Self::DfuIdle => 2,
            Self::DfuDnloadSync => 3,
            Self::DfuDnBusy => 4,
            Self::DfuDnloadIdle => 5,
            Self::DfuManifestSync => 6,
            Self::DfuManifest => 7,
            Self::DfuManifestWaitReset => 8,
            Self::DfuUploadIdle => 9,
            Self::DfuError => 10,
            Self::Unknown(code) => *code,
        }
    }

    /// Whether the device will accept the next download, terminator or reboot request.
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            Self::DfuIdle | Self::DfuDnloadIdle | Self::DfuManifestWaitReset
        )
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AppIdle => write!(f, "appIDLE"),
            Self::AppDetach => write!(f, "appDETACH"),
            Self::DfuIdle => write!(f, "dfuIDLE"),
            Self::DfuDnloadSync => write!(f, "dfuDNLOAD-SYNC"),
            Self::DfuDnBusy => write!(f, "dfuDNBUSY"),
            Self::DfuDnloadIdle => write!(f, "dfuDNLOAD-IDLE"),
            Self::DfuManifestSync => write!(f, "dfuMANIFEST-SYNC"),
            Self::DfuManifest => write!(f, "dfuMANIFEST"),
            Self::DfuManifestWaitReset => write!(f, "dfuMANIFEST-WAIT-RESET"),
            Self::DfuUploadIdle => write!(f, "dfuUPLOAD-IDLE"),
            Self::DfuError => write!(f, "dfuERROR"),
            Self::Unknown(code) => write!(f, "unknown({})", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_states() {
        let ready: Vec<u8> = (0..=255u8)
            .filter(|&c| DeviceState::from_code(c).is_ready())
            .collect();
        assert_eq!(ready, vec![2, 5, 8]);
    }

    #[test]
    fn test_unknown_code_preserved() {
        let state = DeviceState::from_code(42);
        assert_eq!(state, DeviceState::Unknown(42));
        assert_eq!(state.code(), 42);
        assert!(!state.is_ready());
    }
}
