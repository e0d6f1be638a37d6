//! Firmware image source and block loading.

use std::path::Path;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info};

use crate::version::FirmwareVersion;

#[derive(Error, Debug)]
pub enum FirmwareError {
    #[error("Firmware image is empty")]
    Empty,
    #[error("SHA-256 mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Immutable update image plus the version it carries.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Vec<u8>,
    version: FirmwareVersion,
}

impl FirmwareImage {
    pub fn from_bytes(data: Vec<u8>, version: FirmwareVersion) -> Result<Self, FirmwareError> {
        if data.is_empty() {
            return Err(FirmwareError::Empty);
        }
        Ok(Self { data, version })
    }

    /// Read an image from disk, checking its digest when one is given.
    pub fn load<P: AsRef<Path>>(
        path: P,
        version: FirmwareVersion,
        expected_sha256: Option<&str>,
    ) -> Result<Self, FirmwareError> {
        let data = std::fs::read(path.as_ref())?;
        if let Some(expected) = expected_sha256 {
            let actual = sha256_hex(&data);
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                return Err(FirmwareError::DigestMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        info!(
            path = %path.as_ref().display(),
            size = data.len(),
            version = %version,
            "Loaded firmware image"
        );
        Self::from_bytes(data, version)
    }

    pub fn version(&self) -> FirmwareVersion {
        self.version
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }

    pub fn sha256(&self) -> String {
        sha256_hex(&self.data)
    }

    /// Copy the block starting at `offset` into `dest`.
    ///
    /// Copies `min(len - offset, dest.len())` bytes, zero-fills the rest of
    /// `dest` and returns the number of image bytes copied. An offset past
    /// the end of the image copies nothing and returns 0.
    pub fn load_chunk(&self, offset: usize, dest: &mut [u8]) -> usize {
        if offset > self.data.len() {
            error!(offset, len = self.data.len(), "Invalid firmware offset");
            dest.fill(0);
            return 0;
        }
        let n = (self.data.len() - offset).min(dest.len());
        dest[..n].copy_from_slice(&self.data[offset..offset + n]);
        dest[n..].fill(0);
        n
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}
