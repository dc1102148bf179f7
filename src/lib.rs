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
*/

//! fluxemu emulates a legacy MFM disk drive's raw magnetic bitstream in real
//! time, streaming track data between a host-side disk image file and a
//! hardware coprocessor pair that generates and reads the physical signal.
//!
//! The crate provides the real-time track buffering and bitstream pipeline:
//! the bounded ring of dirty tracks that decouples file I/O from hard
//! real-time hardware service deadlines, the seek/retry logic for unreliable
//! magnetic reads, and the bit-pattern lookup tables that convert raw MFM
//! clock+data bitstreams into timed pulse descriptors.
//!
//! Hardware register access, GPIO wiring, command-line parsing and rich disk
//! image formats are left to the embedding application, which reaches the
//! core through the traits in [hw], [image] and [archive].

pub mod archive;
pub mod chs;
pub mod config;
pub mod cylinder;
pub mod delta;
pub mod emulator;
pub mod encoder;
pub mod hw;
pub mod image;
pub mod seeker;
pub mod track_ring;
pub mod wait;

use thiserror::Error;

/// Tick rate of the coprocessor clock driving pulse generation, in Hz.
pub const HW_CLOCK_HZ: u32 = 200_000_000;

/// Upper bound on transition deltas a single track read can produce. The
/// delta buffer is allocated once at this size and overwritten per read.
pub const MAX_TRACK_DELTAS: usize = 131_072;

/// Sentinel cylinder value the hardware reports when no more cylinder
/// requests will follow.
pub const CYLINDER_SHUTDOWN: u16 = u16::MAX;

#[derive(Debug, Error)]
pub enum EmuError {
    #[error("An IO error occurred reading or writing the disk image: {0}")]
    IoError(#[from] std::io::Error),
    #[error("A binary serialization error occurred: {0}")]
    FormatError(#[from] binrw::Error),
    #[error("Invalid emulator configuration: {0}")]
    ConfigError(#[from] config::ConfigError),
    #[error("Hardware returned an unexpected status: {0}")]
    HardwareProtocol(hw::HwStatus),
    #[error("Timed out waiting for a hardware response")]
    HardwareTimeout,
    #[error("A seek did not complete")]
    SeekFailed,
    #[error("Disk image does not match the configured drive: {0}")]
    ImageGeometry(String),
    #[error("The operation was cancelled by shutdown")]
    Cancelled,
    #[error("Invalid parameters were specified to a library function")]
    ParameterError,
}

pub use crate::{
    chs::DiskCh,
    config::{DriveParams, EmuConfig},
    emulator::{DiskReadReport, Emulator, EmuStats},
    wait::CancelToken,
};
