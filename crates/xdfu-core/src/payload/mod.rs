//! Payload handling module.
//!
//! Provides the firmware image source and block loading.

pub mod firmware;

pub use firmware::{FirmwareError, FirmwareImage, sha256_hex};
