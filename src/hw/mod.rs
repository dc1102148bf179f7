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

    src/hw/mod.rs

    Traits abstracting the hardware coprocessor pair and the drive control
    lines. The coprocessor is modeled as a set of flat addressable memory
    regions plus a synchronous command/status protocol: write an optional
    data word, write the command word, poll until the command/status location
    changes away from the command value, then decode the resulting status.
*/

pub mod status;

use std::{
    thread,
    time::Instant,
};

pub use status::{DriveStatus, HwStatus};

use crate::{
    wait::{CancelToken, PollWait},
    EmuError,
};

/// Word offset of the command/status location in the control region.
pub const CMD_ADDR: usize = 0;
/// Word offset of the optional command data word in the control region.
pub const CMD_DATA_ADDR: usize = 1;

/// Addressable memory regions exposed by the coprocessor pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display)]
pub enum MemRegion {
    /// Shared track data: one full cylinder, tracks laid out head-major.
    TrackData,
    /// The pulse lookup table consumed by the signal generator.
    PulseTable,
    /// Command, status and request words.
    Control,
}

/// Commands accepted by the coprocessor command protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
#[repr(u32)]
pub enum HwCommand {
    /// Begin servicing emulated controller requests.
    StartEmulation = 0x10,
    /// Stop servicing and quiesce the signal generator.
    StopEmulation = 0x11,
    /// Start streaming transition deltas for the currently selected track.
    ReadTrack = 0x20,
}

impl HwCommand {
    /// Pack a track address into the command data word for `ReadTrack`.
    pub fn track_word(cyl: u16, head: u8) -> u32 {
        (cyl as u32) << 8 | head as u32
    }
}

/// Events delivered by the coprocessor to the real-time servicing loop.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HwEvent {
    /// The emulated controller selected a new cylinder. A cylinder equal to
    /// `CYLINDER_SHUTDOWN` signals that no more requests will follow.
    CylinderRequest { drive: usize, cylinder: u16 },
    /// One or more tracks in shared memory were written by the emulated
    /// controller. `head_mask` has one bit per dirty head.
    TracksDirty { drive: usize, cylinder: u16, head_mask: u32 },
}

/// A recoverable or fatal condition reported while draining the transition
/// queue.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeltaFault {
    /// The hardware read queue lost samples. The track may be inaccurate but
    /// processing continues.
    Overrun,
    /// A delta exceeded the 16-bit range and was clamped. Recoverable.
    Overflow,
    /// Any other hardware status. Not locally recoverable: the coprocessor's
    /// internal state is no longer trustworthy.
    Protocol(HwStatus),
}

/// Result of one pass draining the transition queue.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DeltaDrain {
    /// The hardware has signalled the end of the track read. One more drain
    /// pass may still pick up trailing samples.
    pub complete: bool,
    pub fault: Option<DeltaFault>,
}

/// Transfer and command interface to the coprocessor pair, used by the
/// real-time servicing loop.
pub trait HardwareIo: Send {
    /// Copy `data` into a memory region at a byte offset.
    fn bulk_write(&mut self, region: MemRegion, data: &[u8], offset: usize) -> Result<(), EmuError>;

    /// Copy `len` bytes out of a memory region at a byte offset.
    fn bulk_read(&mut self, region: MemRegion, offset: usize, len: usize) -> Result<Vec<u8>, EmuError>;

    /// Read one word at a word offset within a region.
    fn read_word(&mut self, region: MemRegion, addr: usize) -> Result<u32, EmuError>;

    /// Write one word at a word offset within a region.
    fn write_word(&mut self, region: MemRegion, addr: usize, value: u32) -> Result<(), EmuError>;

    /// Block until the coprocessor raises an event or `token` cancels.
    /// Returns `None` on cancellation.
    fn wait_for_event(&mut self, token: &CancelToken) -> Result<Option<HwEvent>, EmuError>;

    /// Dump registers and memory windows for postmortem diagnosis. Called
    /// before the run aborts on a fatal protocol violation.
    fn dump_state(&mut self) -> String;

    /// Issue a command and wait for its status using the synchronous
    /// command/status protocol.
    fn issue_command(
        &mut self,
        cmd: HwCommand,
        data: Option<u32>,
        wait: &PollWait,
        token: &CancelToken,
    ) -> Result<HwStatus, EmuError> {
        if let Some(word) = data {
            self.write_word(MemRegion::Control, CMD_DATA_ADDR, word)?;
        }
        self.write_word(MemRegion::Control, CMD_ADDR, cmd as u32)?;

        let deadline = wait.timeout.map(|t| Instant::now() + t);
        loop {
            let word = self.read_word(MemRegion::Control, CMD_ADDR)?;
            if word != cmd as u32 {
                let status = HwStatus::from_bits_retain(word);
                log::trace!("issue_command(): {} completed with status {}", cmd, status);
                return Ok(status);
            }
            if token.is_cancelled() {
                return Err(EmuError::Cancelled);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    log::error!("issue_command(): {} timed out awaiting status", cmd);
                    return Err(EmuError::HardwareTimeout);
                }
            }
            thread::sleep(wait.interval);
        }
    }
}

/// Source of transition delta samples, drained by the delta stream loop.
/// Kept separate from `HardwareIo` so the drain loop can own its half of the
/// hardware while the servicing loop owns the other.
pub trait DeltaSource: Send {
    /// Append any newly available transition deltas to `out` and report
    /// whether the hardware has finished the track read.
    fn read_deltas(&mut self, out: &mut Vec<u16>) -> Result<DeltaDrain, EmuError>;
}

/// Head stepping rate on the control lines.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, strum::Display)]
pub enum StepSpeed {
    #[default]
    Slow,
    Fast,
}

/// Bit-banged drive control lines. Implementations live outside the core.
pub trait DriveControl: Send {
    /// Assert the select line for a drive.
    fn select(&mut self, drive: usize) -> Result<(), EmuError>;

    /// Select a head.
    fn set_head(&mut self, head: u8) -> Result<(), EmuError>;

    /// Sample the track-0 sensor.
    fn at_track0(&mut self) -> Result<bool, EmuError>;

    /// Step the heads `count` cylinders; negative counts step outward,
    /// toward cylinder 0.
    fn step(&mut self, speed: StepSpeed, count: i32) -> Result<(), EmuError>;

    /// Sample the drive status lines.
    fn get_status(&mut self) -> Result<DriveStatus, EmuError>;
}
