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

    src/cylinder/mod.rs

    Cylinder staging between the disk image and the coprocessor's shared
    track memory. Serving a cylinder request reads the whole cylinder from
    the image, overlays any dirty tracks still queued for write-back so the
    emulated controller always reads back its own writes, and pushes the
    result to the hardware. Dirty tracks flow the other way: read out of
    shared memory and enqueued on the ring.
*/

use std::{collections::BTreeMap, sync::Arc, thread};

use bit_vec::BitVec;

use crate::{
    config::EmuConfig,
    encoder,
    hw::{HardwareIo, MemRegion},
    image::DiskImageStore,
    track_ring::TrackRing,
    DiskCh,
    EmuError,
};

/// Result of collecting one cylinder's dirty tracks.
#[derive(Copy, Clone, Debug, Default)]
pub struct DirtySummary {
    /// Tracks enqueued for write-back.
    pub flushed: usize,
    /// Invalid MFM windows found in the written data. The generator plays
    /// them as silence, so they are reported rather than rejected.
    pub bad_patterns: usize,
}

/// Staging buffer holding one full cylinder, tracks laid out head-minor to
/// match both the image layout and the hardware's shared track region.
pub struct CylinderBuffer {
    heads:     u8,
    track_len: usize,
    data:      Vec<u8>,
}

impl CylinderBuffer {
    pub fn new(heads: u8, track_len: usize) -> Self {
        CylinderBuffer {
            heads,
            track_len,
            data: vec![0; heads as usize * track_len],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn track(&self, head: u8) -> &[u8] {
        let start = head as usize * self.track_len;
        &self.data[start..start + self.track_len]
    }

    fn track_mut(&mut self, head: u8) -> &mut [u8] {
        let start = head as usize * self.track_len;
        &mut self.data[start..start + self.track_len]
    }
}

/// Moves cylinders between the image store, the write-back ring and the
/// coprocessor's shared track memory. Owned by the real-time servicing loop.
pub struct CylinderOrchestrator {
    config:  EmuConfig,
    ring:    Arc<TrackRing>,
    staging: BTreeMap<usize, CylinderBuffer>,
}

impl CylinderOrchestrator {
    pub fn new(config: EmuConfig, ring: Arc<TrackRing>) -> Self {
        let staging = config
            .drives
            .iter()
            .map(|p| (p.drive, CylinderBuffer::new(p.heads, p.track_len)))
            .collect();
        CylinderOrchestrator { config, ring, staging }
    }

    /// Serve a cylinder request: stage the cylinder from the image, overlay
    /// pending writes and push it to the hardware track region.
    ///
    /// The ring cursor is snapshotted before the image read. Tracks the
    /// writer flushes during the read are already in the image data or get
    /// re-applied by the overlay; either way the emulated controller sees
    /// its latest write.
    pub fn transfer_cylinder(
        &mut self,
        store: &mut dyn DiskImageStore,
        hw: &mut dyn HardwareIo,
        drive: usize,
        cylinder: u16,
    ) -> Result<(), EmuError> {
        let buffer = self.staging.get_mut(&drive).ok_or(EmuError::ParameterError)?;

        let snapshot = self.ring.get_index();
        store.read_cylinder(drive, cylinder, &mut buffer.data)?;

        let mut overlaid = 0usize;
        self.ring.scan_pending(snapshot, |slot| {
            if slot.drive == drive && slot.ch.c() == cylinder && slot.ch.h() < buffer.heads {
                // Pending writes are visited in queue order, so the newest
                // write to a head lands last and wins.
                buffer.track_mut(slot.ch.h()).copy_from_slice(slot.bytes());
                overlaid += 1;
            }
        });
        if overlaid > 0 {
            log::debug!(
                "transfer_cylinder(): overlaid {} pending track write(s) onto drive {} cylinder {}",
                overlaid,
                drive,
                cylinder
            );
        }

        hw.bulk_write(MemRegion::TrackData, &buffer.data, 0)?;
        log::trace!("transfer_cylinder(): drive {} cylinder {} staged to hardware", drive, cylinder);
        Ok(())
    }

    /// Collect tracks the emulated controller has written and enqueue them
    /// for write-back, then apply the write-back throttle: a short sleep per
    /// occupied ring slot, capped, that lets the background writer catch up
    /// before hardware service resumes.
    pub fn handle_dirty_tracks(
        &mut self,
        hw: &mut dyn HardwareIo,
        drive: usize,
        cylinder: u16,
        head_mask: u32,
        token: &crate::wait::CancelToken,
    ) -> Result<DirtySummary, EmuError> {
        let params = self.config.drive(drive).ok_or(EmuError::ParameterError)?;

        let mut summary = DirtySummary::default();
        for head in 0..params.heads {
            if head_mask & (1 << head) == 0 {
                continue;
            }
            let offset = head as usize * params.track_len;
            let data = hw.bulk_read(MemRegion::TrackData, offset, params.track_len)?;

            let bad = encoder::count_bad_patterns(&BitVec::from_bytes(&data));
            if bad > 0 {
                log::warn!(
                    "handle_dirty_tracks(): drive {} {} has {} invalid MFM window(s)",
                    drive,
                    DiskCh::new(cylinder, head),
                    bad
                );
                summary.bad_patterns += bad;
            }

            self.ring.enqueue(drive, DiskCh::new(cylinder, head), &data, token)?;
            summary.flushed += 1;
        }

        if summary.flushed > 0 {
            log::debug!(
                "handle_dirty_tracks(): drive {} cylinder {} enqueued {} dirty track(s), {} slot(s) in use",
                drive,
                cylinder,
                summary.flushed,
                self.ring.buffers_used()
            );
            let throttle = (self.config.buffer_delay * self.ring.buffers_used() as u32).min(self.config.buffer_max_delay);
            if !throttle.is_zero() {
                thread::sleep(throttle);
            }
        }
        Ok(summary)
    }
}
