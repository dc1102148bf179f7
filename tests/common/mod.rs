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

    tests/common/mod.rs

    Common fakes for integration tests: scripted hardware, an in-memory
    image store, and simple drive/decoder/archive stand-ins.
*/
#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
};

use fluxemu::{
    archive::TransitionArchive,
    config::DriveParams,
    hw::{DeltaDrain, DeltaSource, DriveControl, DriveStatus, HardwareIo, HwEvent, HwStatus, MemRegion, StepSpeed},
    image::DiskImageStore,
    seeker::{DecodeStatus, SectorStatus, TrackDecodeResult, TrackDecoder},
    CancelToken,
    DiskCh,
    EmuError,
};

/// One scripted hardware event, with an optional patch applied to a memory
/// region just before the event is delivered. The patch stands in for the
/// emulated controller writing track data.
pub struct ScriptedEvent {
    pub event: HwEvent,
    pub patch: Option<(MemRegion, usize, Vec<u8>)>,
}

impl ScriptedEvent {
    pub fn plain(event: HwEvent) -> Self {
        ScriptedEvent { event, patch: None }
    }

    pub fn with_patch(event: HwEvent, region: MemRegion, offset: usize, data: Vec<u8>) -> Self {
        ScriptedEvent {
            event,
            patch: Some((region, offset, data)),
        }
    }
}

/// Hardware fake with flat byte-addressed regions and a scripted event
/// queue. Commands always complete with OK on the first status poll.
#[derive(Default)]
pub struct ScriptedHardware {
    pub regions:  HashMap<MemRegion, Vec<u8>>,
    pub events:   VecDeque<ScriptedEvent>,
    pub commands: Vec<u32>,
    last_data: u32,
}

impl ScriptedHardware {
    pub fn new(events: Vec<ScriptedEvent>) -> Self {
        ScriptedHardware {
            events: events.into(),
            ..ScriptedHardware::default()
        }
    }

    pub fn region(&self, region: MemRegion) -> &[u8] {
        self.regions.get(&region).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn region_mut(&mut self, region: MemRegion, min_len: usize) -> &mut Vec<u8> {
        let entry = self.regions.entry(region).or_default();
        if entry.len() < min_len {
            entry.resize(min_len, 0);
        }
        entry
    }
}

impl HardwareIo for ScriptedHardware {
    fn bulk_write(&mut self, region: MemRegion, data: &[u8], offset: usize) -> Result<(), EmuError> {
        let mem = self.region_mut(region, offset + data.len());
        mem[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn bulk_read(&mut self, region: MemRegion, offset: usize, len: usize) -> Result<Vec<u8>, EmuError> {
        let mem = self.region_mut(region, offset + len);
        Ok(mem[offset..offset + len].to_vec())
    }

    fn read_word(&mut self, _region: MemRegion, _addr: usize) -> Result<u32, EmuError> {
        Ok(HwStatus::OK.bits())
    }

    fn write_word(&mut self, _region: MemRegion, addr: usize, value: u32) -> Result<(), EmuError> {
        if addr == fluxemu::hw::CMD_ADDR {
            self.commands.push(value);
        }
        else {
            self.last_data = value;
        }
        Ok(())
    }

    fn wait_for_event(&mut self, token: &CancelToken) -> Result<Option<HwEvent>, EmuError> {
        if token.is_cancelled() {
            return Ok(None);
        }
        match self.events.pop_front() {
            Some(scripted) => {
                if let Some((region, offset, data)) = scripted.patch {
                    self.bulk_write(region, &data, offset)?;
                }
                Ok(Some(scripted.event))
            }
            // Script exhausted: behave as if shutdown was requested.
            None => Ok(None),
        }
    }

    fn dump_state(&mut self) -> String {
        format!("commands issued: {:?}", self.commands)
    }
}

/// In-memory [DiskImageStore]. Cloning shares the underlying track map so a
/// test can inspect what the emulator wrote.
#[derive(Clone)]
pub struct MemImageStore {
    params: DriveParams,
    pub tracks: Arc<Mutex<HashMap<(usize, usize), Vec<u8>>>>,
    pub closes: Arc<Mutex<usize>>,
}

impl MemImageStore {
    pub fn new(params: &DriveParams) -> Self {
        MemImageStore {
            params: params.clone(),
            tracks: Arc::new(Mutex::new(HashMap::new())),
            closes: Arc::new(Mutex::new(0)),
        }
    }

    /// Seed the image so every track carries its own index byte.
    pub fn fill_indexed(&self) {
        let mut tracks = self.tracks.lock().unwrap();
        for cylinder in 0..self.params.cylinders {
            for head in 0..self.params.heads {
                let index = DiskCh::new(cylinder, head).track_index(self.params.heads);
                tracks.insert((self.params.drive, index), vec![index as u8; self.params.track_len]);
            }
        }
    }

    pub fn track(&self, drive: usize, ch: DiskCh) -> Option<Vec<u8>> {
        self.tracks
            .lock()
            .unwrap()
            .get(&(drive, ch.track_index(self.params.heads)))
            .cloned()
    }
}

impl DiskImageStore for MemImageStore {
    fn read_cylinder(&mut self, drive: usize, cylinder: u16, out: &mut [u8]) -> Result<(), EmuError> {
        if out.len() != self.params.cylinder_len() {
            return Err(EmuError::ParameterError);
        }
        let tracks = self.tracks.lock().unwrap();
        for head in 0..self.params.heads {
            let index = DiskCh::new(cylinder, head).track_index(self.params.heads);
            let start = head as usize * self.params.track_len;
            let dest = &mut out[start..start + self.params.track_len];
            match tracks.get(&(drive, index)) {
                Some(data) => dest.copy_from_slice(data),
                None => dest.fill(0),
            }
        }
        Ok(())
    }

    fn rewrite_track(&mut self, drive: usize, ch: DiskCh, data: &[u8]) -> Result<(), EmuError> {
        self.tracks
            .lock()
            .unwrap()
            .insert((drive, ch.track_index(self.params.heads)), data.to_vec());
        Ok(())
    }

    fn close(&mut self) -> Result<(), EmuError> {
        *self.closes.lock().unwrap() += 1;
        Ok(())
    }
}

/// Drive fake tracking an absolute head position.
pub struct FakeDrive {
    pub cylinder:  i32,
    pub steps:     Vec<i32>,
    pub heads_set: Vec<u8>,
    pub selected:  Vec<usize>,
}

impl FakeDrive {
    pub fn at(cylinder: i32) -> Self {
        FakeDrive {
            cylinder,
            steps: Vec::new(),
            heads_set: Vec::new(),
            selected: Vec::new(),
        }
    }
}

impl DriveControl for FakeDrive {
    fn select(&mut self, drive: usize) -> Result<(), EmuError> {
        self.selected.push(drive);
        Ok(())
    }

    fn set_head(&mut self, head: u8) -> Result<(), EmuError> {
        self.heads_set.push(head);
        Ok(())
    }

    fn at_track0(&mut self) -> Result<bool, EmuError> {
        Ok(self.cylinder <= 0)
    }

    fn step(&mut self, _speed: StepSpeed, count: i32) -> Result<(), EmuError> {
        self.steps.push(count);
        self.cylinder += count;
        Ok(())
    }

    fn get_status(&mut self) -> Result<DriveStatus, EmuError> {
        Ok(DriveStatus::READY | DriveStatus::SEEK_COMPLETE)
    }
}

/// Delta source that delivers one fixed batch per read, completing
/// immediately.
pub struct InstantDeltaSource {
    pub batch: Vec<u16>,
}

impl DeltaSource for InstantDeltaSource {
    fn read_deltas(&mut self, out: &mut Vec<u16>) -> Result<DeltaDrain, EmuError> {
        if out.is_empty() {
            out.extend_from_slice(&self.batch);
        }
        Ok(DeltaDrain {
            complete: true,
            fault: None,
        })
    }
}

/// Archive recording chunk metadata instead of writing a file.
#[derive(Default)]
pub struct RecordingArchive {
    pub chunks: Vec<(DiskCh, usize)>,
    pub closed: bool,
}

impl TransitionArchive for RecordingArchive {
    fn write_track_deltas(&mut self, ch: DiskCh, samples: &[u16]) -> Result<(), EmuError> {
        self.chunks.push((ch, samples.len()));
        Ok(())
    }

    fn close(&mut self) -> Result<(), EmuError> {
        self.closed = true;
        Ok(())
    }
}

/// Decoder whose verdict depends on a per-track failure script: tracks in
/// `fail_once` report sector errors on their first attempt only, tracks in
/// `fail_always` never decode cleanly.
#[derive(Default)]
pub struct FlakyDecoder {
    pub fail_once:   HashSet<DiskCh>,
    pub fail_always: HashSet<DiskCh>,
    pub attempts:    HashMap<DiskCh, u32>,
}

impl TrackDecoder for FlakyDecoder {
    fn decode_track(&mut self, _params: &DriveParams, ch: DiskCh, _deltas: &[u16]) -> Result<TrackDecodeResult, EmuError> {
        let attempt = self.attempts.entry(ch).or_insert(0);
        *attempt += 1;
        let fail = self.fail_always.contains(&ch) || (self.fail_once.contains(&ch) && *attempt == 1);
        if fail {
            Ok(TrackDecodeResult {
                status:  DecodeStatus::SectorErrors,
                sectors: vec![SectorStatus::Good, SectorStatus::DataError],
            })
        }
        else {
            Ok(TrackDecodeResult {
                status:  DecodeStatus::Clean,
                sectors: vec![SectorStatus::Good, SectorStatus::Good],
            })
        }
    }
}
