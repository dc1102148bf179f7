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

    src/image/mod.rs

    Raw disk image storage. The on-disk format is a fixed 16-byte header
    followed by every track in cylinder-major, head-minor order at the
    drive's fixed track length, so any track or cylinder can be addressed by
    seek arithmetic alone.
*/

use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
};

use binrw::{BinRead, BinWrite};

use crate::{config::DriveParams, DiskCh, EmuError};

/// Backing storage for emulated drive contents. The emulator reads whole
/// cylinders on demand and writes back single dirty tracks.
pub trait DiskImageStore: Send {
    /// Read one full cylinder (all heads, head-minor) into `out`, which must
    /// be exactly `DriveParams::cylinder_len` bytes.
    fn read_cylinder(&mut self, drive: usize, cylinder: u16, out: &mut [u8]) -> Result<(), EmuError>;

    /// Overwrite one track with data written by the emulated controller.
    fn rewrite_track(&mut self, drive: usize, ch: DiskCh, data: &[u8]) -> Result<(), EmuError>;

    /// Flush pending writes to stable storage and release the store.
    fn close(&mut self) -> Result<(), EmuError>;
}

const IMAGE_HEADER_LEN: u64 = 16;
const IMAGE_VERSION: u16 = 1;

/// Header of a raw drive image file.
#[derive(Clone, Debug, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"FEMU")]
pub struct RawImageHeader {
    pub version:   u16,
    pub cylinders: u16,
    pub heads:     u8,
    #[brw(pad_before = 1)]
    pub track_len: u32,
    // Pads the header to its fixed 16-byte length.
    pub reserved:  [u8; 2],
}

impl RawImageHeader {
    fn for_drive(params: &DriveParams) -> Self {
        RawImageHeader {
            version:   IMAGE_VERSION,
            cylinders: params.cylinders,
            heads:     params.heads,
            track_len: params.track_len as u32,
            reserved:  [0; 2],
        }
    }

    fn matches(&self, params: &DriveParams) -> bool {
        self.cylinders == params.cylinders
            && self.heads == params.heads
            && self.track_len as usize == params.track_len
    }
}

/// One raw drive image, opened read-write for the lifetime of a run.
pub struct RawImageFile {
    file:   File,
    params: DriveParams,
}

impl RawImageFile {
    /// Create a zero-filled image for `params`, truncating any existing file.
    pub fn create(path: impl AsRef<Path>, params: &DriveParams) -> Result<Self, EmuError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        RawImageHeader::for_drive(params).write(&mut file)?;
        let data_len = params.cylinders as u64 * params.cylinder_len() as u64;
        file.set_len(IMAGE_HEADER_LEN + data_len)?;
        log::info!(
            "RawImageFile::create(): created {} ({} cylinders, {} heads, {} byte tracks)",
            path.as_ref().display(),
            params.cylinders,
            params.heads,
            params.track_len
        );
        Ok(RawImageFile {
            file,
            params: params.clone(),
        })
    }

    /// Open an existing image and verify its header against `params`.
    pub fn open(path: impl AsRef<Path>, params: &DriveParams) -> Result<Self, EmuError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let header = RawImageHeader::read(&mut file)?;
        if header.version != IMAGE_VERSION {
            return Err(EmuError::ImageGeometry(format!(
                "unsupported image version {}",
                header.version
            )));
        }
        if !header.matches(params) {
            return Err(EmuError::ImageGeometry(format!(
                "image is {}x{}x{}, drive {} expects {}x{}x{}",
                header.cylinders,
                header.heads,
                header.track_len,
                params.drive,
                params.cylinders,
                params.heads,
                params.track_len
            )));
        }
        Ok(RawImageFile {
            file,
            params: params.clone(),
        })
    }

    fn track_offset(&self, ch: DiskCh) -> u64 {
        IMAGE_HEADER_LEN + ch.track_index(self.params.heads) as u64 * self.params.track_len as u64
    }

    /// Read one full cylinder into `out`.
    pub fn read_cylinder(&mut self, cylinder: u16, out: &mut [u8]) -> Result<(), EmuError> {
        if cylinder >= self.params.cylinders || out.len() != self.params.cylinder_len() {
            return Err(EmuError::ParameterError);
        }
        self.file.seek(SeekFrom::Start(self.track_offset(DiskCh::new(cylinder, 0))))?;
        self.file.read_exact(out)?;
        Ok(())
    }

    /// Overwrite one track in place.
    pub fn rewrite_track(&mut self, ch: DiskCh, data: &[u8]) -> Result<(), EmuError> {
        if ch.c() >= self.params.cylinders || ch.h() >= self.params.heads || data.len() != self.params.track_len {
            return Err(EmuError::ParameterError);
        }
        self.file.seek(SeekFrom::Start(self.track_offset(ch)))?;
        self.file.write_all(data)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), EmuError> {
        self.file.sync_data()?;
        Ok(())
    }
}

/// A [DiskImageStore] over one raw image file per drive.
#[derive(Default)]
pub struct RawImageStore {
    drives: BTreeMap<usize, RawImageFile>,
}

impl RawImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an opened image as the backing store for its drive id.
    pub fn attach(&mut self, image: RawImageFile) {
        self.drives.insert(image.params.drive, image);
    }

    fn drive_mut(&mut self, drive: usize) -> Result<&mut RawImageFile, EmuError> {
        self.drives.get_mut(&drive).ok_or(EmuError::ParameterError)
    }
}

impl DiskImageStore for RawImageStore {
    fn read_cylinder(&mut self, drive: usize, cylinder: u16, out: &mut [u8]) -> Result<(), EmuError> {
        self.drive_mut(drive)?.read_cylinder(cylinder, out)
    }

    fn rewrite_track(&mut self, drive: usize, ch: DiskCh, data: &[u8]) -> Result<(), EmuError> {
        self.drive_mut(drive)?.rewrite_track(ch, data)
    }

    fn close(&mut self) -> Result<(), EmuError> {
        for image in self.drives.values_mut() {
            image.flush()?;
        }
        self.drives.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use binrw::io::Cursor;

    use super::*;

    #[test]
    fn header_round_trips_at_fixed_length() {
        let params = DriveParams::default();
        let header = RawImageHeader::for_drive(&params);

        let mut cursor = Cursor::new(Vec::new());
        header.write(&mut cursor).unwrap();
        assert_eq!(cursor.get_ref().len() as u64, IMAGE_HEADER_LEN);

        cursor.set_position(0);
        let parsed = RawImageHeader::read(&mut cursor).unwrap();
        assert!(parsed.matches(&params));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut cursor = Cursor::new(b"XXXX\0\0\0\0\0\0\0\0\0\0\0\0".to_vec());
        assert!(RawImageHeader::read(&mut cursor).is_err());
    }
}
