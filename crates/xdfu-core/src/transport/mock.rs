//! Mock bus transport for testing.
//!
//! Behaves like a small companion controller: it answers status and
//! version reads, accumulates downloaded blocks and swaps in a new
//! firmware version when rebooted.

use std::collections::{HashSet, VecDeque};

use super::traits::{BusError, BusTransport};
use crate::protocol::constants::*;
use crate::protocol::DeviceState;

/// Mock transport simulating the device side of the protocol.
pub struct MockBus {
    /// Captured writes.
    writes: Vec<Vec<u8>>,
    /// Number of successful reads served.
    reads: usize,
    /// Response to the last read request, consumed by the next read.
    pending: Option<Vec<u8>>,
    /// Scripted responses served before the simulated ones.
    scripted: VecDeque<Vec<u8>>,
    /// DFU state codes reported on successive status reads; the last one sticks.
    states: VecDeque<u8>,
    status_code: u8,
    backoff_ms: u32,
    version: [u8; 3],
    version_after_reboot: Option<[u8; 3]>,
    /// Reads that fail after a reboot while the device restarts.
    reboot_offline_reads: usize,
    offline_reads: usize,
    /// Writes to these `(resource, command)` pairs fail.
    failing_commands: HashSet<(u8, u8)>,
    fail_reads: bool,
    /// Downloaded image bytes, as consumed by the device.
    received: Vec<u8>,
    end_of_download: bool,
    rebooted: bool,
    mic_muted: bool,
    speaker_muted: bool,
    vnr: u8,
    resets: usize,
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            writes: Vec::new(),
            reads: 0,
            pending: None,
            scripted: VecDeque::new(),
            states: VecDeque::new(),
            status_code: 0,
            backoff_ms: 0,
            version: [0, 0, 0],
            version_after_reboot: None,
            reboot_offline_reads: 0,
            offline_reads: 0,
            failing_commands: HashSet::new(),
            fail_reads: false,
            received: Vec::new(),
            end_of_download: false,
            rebooted: false,
            mic_muted: false,
            speaker_muted: false,
            vnr: 0,
            resets: 0,
        }
    }

    /// Device currently running `version`.
    pub fn with_version(mut self, major: u8, minor: u8, patch: u8) -> Self {
        self.version = [major, minor, patch];
        self
    }

    /// Version reported after the next reboot request.
    pub fn reboots_into(mut self, major: u8, minor: u8, patch: u8) -> Self {
        self.version_after_reboot = Some([major, minor, patch]);
        self
    }

    /// Backoff (ms) advertised in every status response.
    pub fn with_backoff_ms(mut self, backoff_ms: u32) -> Self {
        self.backoff_ms = backoff_ms & 0x00FF_FFFF;
        self
    }

    /// Fail this many reads after a reboot.
    pub fn offline_after_reboot(mut self, reads: usize) -> Self {
        self.reboot_offline_reads = reads;
        self
    }

    /// Report these DFU state codes on successive status reads.
    pub fn queue_states(&mut self, codes: &[u8]) {
        self.states.extend(codes.iter().copied());
    }

    /// Serve `frame` on the next read instead of a simulated response.
    pub fn queue_response(&mut self, frame: &[u8]) {
        self.scripted.push_back(frame.to_vec());
    }

    /// Make writes with this resource/command pair fail.
    pub fn fail_command(&mut self, resid: u8, cmd: u8) {
        self.failing_commands.insert((resid, cmd));
    }

    pub fn clear_failures(&mut self) {
        self.failing_commands.clear();
        self.fail_reads = false;
    }

    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    pub fn set_mic_muted(&mut self, muted: bool) {
        self.mic_muted = muted;
    }

    pub fn set_vnr(&mut self, vnr: u8) {
        self.vnr = vnr;
    }

    /// Get all captured writes.
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    /// Captured DFU controller writes with the given command id (read bit ignored).
    pub fn writes_for(&self, cmd: u8) -> usize {
        self.writes
            .iter()
            .filter(|w| {
                w.len() > 1 && w[0] == DFU_CONTROLLER_SERVICER_RESID && w[1] & !COMMAND_READ_BIT == cmd
            })
            .count()
    }

    /// Number of bus exchanges attempted (writes, successful or not).
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    pub fn read_count(&self) -> usize {
        self.reads
    }

    pub fn received(&self) -> &[u8] {
        &self.received
    }

    pub fn end_of_download(&self) -> bool {
        self.end_of_download
    }

    pub fn rebooted(&self) -> bool {
        self.rebooted
    }

    pub fn speaker_muted(&self) -> bool {
        self.speaker_muted
    }

    pub fn resets(&self) -> usize {
        self.resets
    }

    fn next_state(&mut self) -> u8 {
        if self.states.len() > 1 {
            self.states.pop_front().unwrap_or(DeviceState::DfuIdle.code())
        } else if let Some(&code) = self.states.front() {
            code
        } else if self.end_of_download {
            DeviceState::DfuManifestWaitReset.code()
        } else if self.received.is_empty() {
            DeviceState::DfuIdle.code()
        } else {
            DeviceState::DfuDnloadIdle.code()
        }
    }

    fn handle_frame(&mut self, data: &[u8]) {
        let resid = data[0];
        let cmd = data[1];
        match (resid, cmd & !COMMAND_READ_BIT, cmd & COMMAND_READ_BIT != 0) {
            (DFU_CONTROLLER_SERVICER_RESID, DFU_CMD_GETVERSION, true) => {
                self.pending = Some(vec![
                    CTRL_DONE,
                    self.version[0],
                    self.version[1],
                    self.version[2],
                ]);
            }
            (DFU_CONTROLLER_SERVICER_RESID, DFU_CMD_GETSTATUS, true) => {
                let state = self.next_state();
                let b = self.backoff_ms.to_le_bytes();
                self.pending = Some(vec![CTRL_DONE, self.status_code, b[0], b[1], b[2], state]);
            }
            (DFU_CONTROLLER_SERVICER_RESID, DFU_CMD_DNLOAD, false) => {
                let chunk_len = data.get(3).copied().unwrap_or(0) as usize;
                if chunk_len == 0 {
                    self.end_of_download = true;
                } else if let Some(chunk) = data.get(5..5 + chunk_len) {
                    self.received.extend_from_slice(chunk);
                }
            }
            (DFU_CONTROLLER_SERVICER_RESID, DFU_CMD_REBOOT, false) => {
                self.rebooted = true;
                if let Some(v) = self.version_after_reboot.take() {
                    self.version = v;
                }
                self.end_of_download = false;
                self.offline_reads = self.reboot_offline_reads;
            }
            (CONFIGURATION_SERVICER_RESID, CONFIG_CMD_MIC_MUTE, true) => {
                self.pending = Some(vec![CTRL_DONE, self.mic_muted as u8]);
            }
            (CONFIGURATION_SERVICER_RESID, CONFIG_CMD_VNR_VALUE, true) => {
                self.pending = Some(vec![CTRL_DONE, self.vnr]);
            }
            (CONFIGURATION_SERVICER_RESID, CONFIG_CMD_SPEAKER_MUTE, false) => {
                self.speaker_muted = data.get(3) == Some(&0);
            }
            _ => {}
        }
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BusTransport for MockBus {
    fn write(&mut self, data: &[u8]) -> Result<(), BusError> {
        self.writes.push(data.to_vec());
        if data.len() < HEADER_LEN {
            return Err(BusError::WriteFailed("short frame".into()));
        }
        if self.failing_commands.contains(&(data[0], data[1] & !COMMAND_READ_BIT)) {
            return Err(BusError::NoAcknowledge {
                address: DEFAULT_BUS_ADDRESS,
            });
        }
        if self.offline_reads > 0 {
            // Still restarting; the request never reaches the device.
            return Ok(());
        }
        self.handle_frame(data);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        if self.offline_reads > 0 {
            self.offline_reads -= 1;
            return Err(BusError::NoAcknowledge {
                address: DEFAULT_BUS_ADDRESS,
            });
        }
        if self.fail_reads {
            return Err(BusError::ReadFailed("injected".into()));
        }
        let frame = self
            .scripted
            .pop_front()
            .or_else(|| self.pending.take())
            .ok_or_else(|| BusError::ReadFailed("nothing to read".into()))?;
        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        buf[n..].fill(0);
        self.reads += 1;
        Ok(())
    }

    fn pulse_reset(&mut self) -> Result<(), BusError> {
        self.resets += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::request;

    #[test]
    fn test_mock_answers_version() {
        let mut bus = MockBus::new().with_version(1, 2, 3);
        bus.write(&request::get_version()).unwrap();
        let mut resp = [0u8; VERSION_RESPONSE_LEN];
        bus.read(&mut resp).unwrap();
        assert_eq!(resp, [CTRL_DONE, 1, 2, 3]);

        // Response is consumed
        assert!(bus.read(&mut resp).is_err());
    }

    #[test]
    fn test_mock_write_capture() {
        let mut bus = MockBus::new();
        bus.write(&request::set_alternate(DFU_ALTERNATE_UPGRADE))
            .unwrap();
        bus.write(&request::reboot()).unwrap();

        assert_eq!(bus.writes().len(), 2);
        assert_eq!(bus.writes_for(DFU_CMD_REBOOT), 1);
        assert!(bus.rebooted());
    }

    #[test]
    fn test_mock_injected_failure() {
        let mut bus = MockBus::new();
        bus.fail_command(DFU_CONTROLLER_SERVICER_RESID, DFU_CMD_REBOOT);
        assert!(bus.write(&request::reboot()).is_err());
        assert!(!bus.rebooted());
    }

    #[test]
    fn test_mock_offline_after_reboot() {
        let mut bus = MockBus::new().offline_after_reboot(2).reboots_into(2, 0, 0);
        bus.write(&request::reboot()).unwrap();

        let mut resp = [0u8; VERSION_RESPONSE_LEN];
        for _ in 0..2 {
            bus.write(&request::get_version()).unwrap();
            assert!(bus.read(&mut resp).is_err());
        }
        bus.write(&request::get_version()).unwrap();
        bus.read(&mut resp).unwrap();
        assert_eq!(&resp[1..], &[2, 0, 0]);
    }
}
