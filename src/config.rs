/*
    fluxemu
    A real-time MFM disk drive emulation core.

    Copyright 2025 fluxemu contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/config.rs

    Emulator configuration: per-drive geometry and process-wide buffering,
    retry and precompensation parameters. The configuration is a read-only
    snapshot after validation; every component receives it at construction.
*/

use std::time::Duration;

use thiserror::Error;

use crate::{seeker::SeekErrorPolicy, HW_CLOCK_HZ};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No drives are configured")]
    NoDrives,
    #[error("Drive {0} is configured more than once")]
    DuplicateDrive(usize),
    #[error("Drive {0} has invalid geometry (cylinders, heads and track length must be nonzero)")]
    BadGeometry(usize),
    #[error("Drive {0} has an invalid bit rate")]
    BadBitRate(usize),
    #[error("Emulated drives disagree on bit rate or track geometry")]
    DriveMismatch,
    #[error("Track buffer count must be at least 2 (one slot distinguishes full from empty)")]
    BadBufferCount,
    #[error("Precompensation start cylinder {0} is outside the drive's cylinder range")]
    BadPrecompCylinder(u16),
    #[error("Precompensation shift of {0} ticks meets or exceeds the shortest pulse window")]
    BadPrecompTicks(u16),
}

/// Geometry and timing parameters for one emulated drive. Read-only after
/// startup; shared by every component servicing the drive.
#[derive(Clone, Debug)]
pub struct DriveParams {
    /// Drive identifier, as selected on the control lines.
    pub drive: usize,
    /// Number of cylinders.
    pub cylinders: u16,
    /// Number of heads (tracks per cylinder).
    pub heads: u8,
    /// Raw track length in bytes.
    pub track_len: usize,
    /// Data bit rate in Hz. MFM bit cells run at twice this rate.
    pub bit_rate: u32,
}

impl DriveParams {
    /// Byte length of one full cylinder (all heads).
    pub fn cylinder_len(&self) -> usize {
        self.heads as usize * self.track_len
    }

    /// Duration of one MFM bit cell in hardware clock ticks. The clock+data
    /// bitstream runs at twice the data bit rate.
    pub fn bit_cell_ticks(&self) -> u32 {
        HW_CLOCK_HZ / (self.bit_rate * 2)
    }
}

impl Default for DriveParams {
    fn default() -> Self {
        // A generic 5 Mbit/s MFM hard drive.
        DriveParams {
            drive: 0,
            cylinders: 306,
            heads: 4,
            track_len: 13_824,
            bit_rate: 5_000_000,
        }
    }
}

/// Process-wide emulator configuration. Built by the embedding application,
/// validated once at startup, then treated as immutable.
#[derive(Clone, Debug)]
pub struct EmuConfig {
    /// The set of emulated drives.
    pub drives: Vec<DriveParams>,
    /// Capacity of the dirty-track ring. At most `buffer_count - 1` tracks
    /// can be pending write-back at once.
    pub buffer_count: usize,
    /// Write-back throttle applied per occupied ring slot.
    pub buffer_delay: Duration,
    /// Cap on the write-back throttle per servicing cycle.
    pub buffer_max_delay: Duration,
    /// Polling interval for the producer's ring-full wait and the delta
    /// reader's completion wait.
    pub poll_interval: Duration,
    /// Generous bound on any hardware response wait. Exceeding it is fatal.
    pub hw_timeout: Duration,
    /// Retry budget per track read. A track is abandoned after
    /// `retries + 1` attempts.
    pub retries: u32,
    /// Number of retry attempts between physical perturbation seeks.
    pub no_seek_retries: u32,
    /// How a failed seek primitive is handled.
    pub seek_error_policy: SeekErrorPolicy,
    /// Early write precompensation offset in hardware ticks.
    pub early_precomp_ticks: u16,
    /// Late write precompensation offset in hardware ticks.
    pub late_precomp_ticks: u16,
    /// Cylinder at which write precompensation turns on. Crossing this
    /// threshold regenerates the pulse table mid-run.
    pub precomp_start_cyl: u16,
}

impl Default for EmuConfig {
    fn default() -> Self {
        EmuConfig {
            drives: vec![DriveParams::default()],
            buffer_count: 32,
            buffer_delay: Duration::from_millis(2),
            buffer_max_delay: Duration::from_millis(100),
            poll_interval: Duration::from_millis(1),
            hw_timeout: Duration::from_secs(1),
            retries: 8,
            no_seek_retries: 2,
            seek_error_policy: SeekErrorPolicy::Fatal,
            early_precomp_ticks: 4,
            late_precomp_ticks: 4,
            precomp_start_cyl: 128,
        }
    }
}

impl EmuConfig {
    /// Validate the configuration. Called once at startup; any failure is
    /// fatal and the emulator refuses to proceed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.drives.is_empty() {
            return Err(ConfigError::NoDrives);
        }
        if self.buffer_count < 2 {
            return Err(ConfigError::BadBufferCount);
        }

        for params in &self.drives {
            if self.drives.iter().filter(|p| p.drive == params.drive).count() > 1 {
                return Err(ConfigError::DuplicateDrive(params.drive));
            }
            if params.cylinders == 0 || params.heads == 0 || params.track_len == 0 {
                return Err(ConfigError::BadGeometry(params.drive));
            }
            if params.bit_rate == 0 || params.bit_rate.checked_mul(2).map_or(true, |r| r > HW_CLOCK_HZ) {
                return Err(ConfigError::BadBitRate(params.drive));
            }
        }

        // The coprocessor runs a single pulse table and a single shared track
        // region, so all emulated drives must agree on data rate and track
        // geometry.
        let first = &self.drives[0];
        if self
            .drives
            .iter()
            .any(|p| p.bit_rate != first.bit_rate || p.track_len != first.track_len)
        {
            return Err(ConfigError::DriveMismatch);
        }

        // The shortest pulse window spans two bit cells; a shift that long
        // or longer would underflow the written word's duration.
        let shift_limit = self.bit_cell_ticks().saturating_mul(2);
        if u32::from(self.early_precomp_ticks) >= shift_limit || u32::from(self.late_precomp_ticks) >= shift_limit {
            return Err(ConfigError::BadPrecompTicks(
                self.early_precomp_ticks.max(self.late_precomp_ticks),
            ));
        }

        let max_cyls = self.drives.iter().map(|p| p.cylinders).max().unwrap_or(0);
        if self.precomp_start_cyl != 0 && self.precomp_start_cyl > max_cyls {
            return Err(ConfigError::BadPrecompCylinder(self.precomp_start_cyl));
        }

        Ok(())
    }

    /// Look up the parameters for a drive id.
    pub fn drive(&self, drive: usize) -> Option<&DriveParams> {
        self.drives.iter().find(|p| p.drive == drive)
    }

    /// The common bit cell duration shared by all configured drives.
    pub fn bit_cell_ticks(&self) -> u32 {
        self.drives.first().map(|p| p.bit_cell_ticks()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EmuConfig::default().validate().is_ok());
    }

    #[test]
    fn mismatched_drives_are_rejected() {
        let mut config = EmuConfig::default();
        let mut second = DriveParams {
            drive: 1,
            ..DriveParams::default()
        };
        second.bit_rate = 10_000_000;
        config.drives.push(second);
        assert!(matches!(config.validate(), Err(ConfigError::DriveMismatch)));
    }

    #[test]
    fn undersized_ring_is_rejected() {
        let config = EmuConfig {
            buffer_count: 1,
            ..EmuConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BadBufferCount)));
    }

    #[test]
    fn oversized_precomp_ticks_are_rejected() {
        // At 20 ticks per cell the shortest pulse window is 40 ticks.
        let config = EmuConfig {
            early_precomp_ticks: 40,
            ..EmuConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BadPrecompTicks(40))));
    }

    #[test]
    fn huge_bit_rate_is_rejected_without_overflow() {
        let mut config = EmuConfig::default();
        config.drives[0].bit_rate = u32::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::BadBitRate(0))));
    }

    #[test]
    fn bit_cell_ticks_for_5mbps() {
        // 200 MHz clock, 5 Mbit/s data rate: 20 ticks per MFM bit cell.
        assert_eq!(DriveParams::default().bit_cell_ticks(), 20);
    }
}
