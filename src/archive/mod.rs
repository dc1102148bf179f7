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

    src/archive/mod.rs

    Raw transition archiving. Each completed track read can be appended to an
    archive file as a chunk of big-endian delta samples, preserving the
    drive's analog timing for later offline decoding. Tracks appear in the
    order they were read, including repeated reads of the same track.
*/

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use binrw::{BinRead, BinWrite};

use crate::{DiskCh, EmuError, HW_CLOCK_HZ};

/// Sink for raw transition deltas of completed track reads.
pub trait TransitionArchive: Send {
    /// Append one track's delta samples. Called once per completed read,
    /// after draining finishes and before the sample buffer can be reused.
    fn write_track_deltas(&mut self, ch: DiskCh, samples: &[u16]) -> Result<(), EmuError>;

    /// Flush buffered chunks to stable storage and release the archive.
    fn close(&mut self) -> Result<(), EmuError>;
}

const ARCHIVE_VERSION: u16 = 1;

/// File header of a transition archive.
#[derive(Clone, Debug, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big, magic = b"FXTA")]
pub struct ArchiveHeader {
    pub version:  u16,
    /// Tick rate the delta samples are expressed in, in Hz.
    pub clock_hz: u32,
}

/// Per-track chunk header, followed by `sample_ct` big-endian u16 deltas.
#[derive(Clone, Debug, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct TrackChunkHeader {
    pub cylinder:  u16,
    pub head:      u8,
    #[brw(pad_before = 1)]
    pub sample_ct: u32,
}

/// A [TransitionArchive] appending chunks to a single file.
pub struct DeltaArchiveFile {
    writer: BufWriter<File>,
    tracks: u64,
}

impl DeltaArchiveFile {
    /// Create a new archive file, truncating any existing one.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, EmuError> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        ArchiveHeader {
            version:  ARCHIVE_VERSION,
            clock_hz: HW_CLOCK_HZ,
        }
        .write(&mut writer)?;
        log::info!("DeltaArchiveFile::create(): archiving transitions to {}", path.as_ref().display());
        Ok(DeltaArchiveFile { writer, tracks: 0 })
    }

    pub fn tracks_written(&self) -> u64 {
        self.tracks
    }
}

impl TransitionArchive for DeltaArchiveFile {
    fn write_track_deltas(&mut self, ch: DiskCh, samples: &[u16]) -> Result<(), EmuError> {
        TrackChunkHeader {
            cylinder:  ch.c(),
            head:      ch.h(),
            sample_ct: samples.len() as u32,
        }
        .write(&mut self.writer)?;

        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            bytes.extend_from_slice(&sample.to_be_bytes());
        }
        self.writer.write_all(&bytes)?;
        self.tracks += 1;
        log::trace!("DeltaArchiveFile: archived {} with {} samples", ch, samples.len());
        Ok(())
    }

    fn close(&mut self) -> Result<(), EmuError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// A [TransitionArchive] that discards everything. Used when archiving is
/// not requested, so call sites need no optional plumbing.
#[derive(Default)]
pub struct NullArchive;

impl TransitionArchive for NullArchive {
    fn write_track_deltas(&mut self, _ch: DiskCh, _samples: &[u16]) -> Result<(), EmuError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), EmuError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use binrw::io::Cursor;

    use super::*;

    #[test]
    fn chunk_header_is_big_endian() {
        let mut cursor = Cursor::new(Vec::new());
        TrackChunkHeader {
            cylinder:  0x0102,
            head:      3,
            sample_ct: 0x0000_0004,
        }
        .write(&mut cursor)
        .unwrap();
        assert_eq!(cursor.get_ref().as_slice(), &[0x01, 0x02, 0x03, 0x00, 0x00, 0x00, 0x00, 0x04]);
    }

    #[test]
    fn archive_header_round_trips() {
        let header = ArchiveHeader {
            version:  ARCHIVE_VERSION,
            clock_hz: HW_CLOCK_HZ,
        };
        let mut cursor = Cursor::new(Vec::new());
        header.write(&mut cursor).unwrap();
        cursor.set_position(0);
        assert_eq!(ArchiveHeader::read(&mut cursor).unwrap(), header);
    }
}
