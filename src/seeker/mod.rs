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

    src/seeker/mod.rs

    Head positioning and read-retry control for reading physical media.
    Magnetic reads from old drives fail often and unevenly: a track may
    decode cleanly on the third attempt, or different attempts may each
    recover different sectors. The retry loop merges the best result across
    attempts and, when plain re-reads stop helping, physically perturbs the
    head position to change the flying geometry before trying again.
*/

use std::{thread, time::Duration};

use crate::{
    config::{DriveParams, EmuConfig},
    delta::DeltaReader,
    hw::{DriveControl, DriveStatus, HardwareIo, HwCommand, StepSpeed},
    wait::{CancelToken, PollWait, WaitError},
    DiskCh,
    EmuError,
};

/// How a failed seek primitive is handled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SeekErrorPolicy {
    /// Abort the run. Appropriate when the drive is expected to be healthy.
    Fatal,
    /// Wait, recalibrate to track 0 and try the seek once more.
    Retry { wait: Duration },
}

/// Decode health of one sector slot within a track.
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
pub enum SectorStatus {
    /// Header and data both verified.
    Good,
    /// The sector header failed verification; its address is untrusted.
    HeaderError,
    /// The header verified but the data field did not.
    DataError,
    /// The sector was not found in this read at all.
    NotFound,
}

impl SectorStatus {
    /// How much a read attempt learned about the sector. Merging across
    /// attempts keeps the most informative status seen.
    fn rank(self) -> u8 {
        match self {
            SectorStatus::Good => 3,
            SectorStatus::DataError => 2,
            SectorStatus::HeaderError => 1,
            SectorStatus::NotFound => 0,
        }
    }
}

/// Overall result of decoding one track read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Every expected sector decoded cleanly.
    Clean,
    /// The track decoded but one or more sectors had errors.
    SectorErrors,
    /// Sector headers consistently identify a different cylinder. The value
    /// is `found - expected`: the signed correction the heads need.
    WrongCylinder(i32),
}

/// Per-track decode result as reported by a [TrackDecoder].
#[derive(Clone, Debug)]
pub struct TrackDecodeResult {
    pub status:  DecodeStatus,
    /// Per-sector health, in physical order. May be empty when the track
    /// could not be framed at all.
    pub sectors: Vec<SectorStatus>,
}

/// Decodes a buffer of transition deltas into sector health. Implementations
/// live with the embedding application, which knows the controller's sector
/// format; the retry loop only needs the health verdict.
pub trait TrackDecoder: Send {
    fn decode_track(&mut self, params: &DriveParams, ch: DiskCh, deltas: &[u16]) -> Result<TrackDecodeResult, EmuError>;
}

/// Outcome of a track read after retries.
#[derive(Clone, Debug)]
pub struct ReadOutcome {
    /// Whether the merged result is fully clean.
    pub recovered: bool,
    /// Attempts made, including the first read.
    pub attempts:  u32,
    /// Best per-sector health merged across all attempts.
    pub sectors:   Vec<SectorStatus>,
}

/// Head positioning and retry control for one drive. Tracks the physical
/// head position; all motion goes through this controller so the position
/// stays accurate.
pub struct SeekRetryController {
    params: DriveParams,
    retries: u32,
    no_seek_retries: u32,
    seek_error_policy: SeekErrorPolicy,
    command_wait: PollWait,
    settle_wait: PollWait,
    /// Current physical cylinder, `None` until the first recalibrate.
    position: Option<u16>,
    /// Next perturbation offset. Alternates sign and doubles in magnitude
    /// every other use: +1, -1, +2, -2, +4, ...
    seek_len: i32,
}

impl SeekRetryController {
    pub fn new(config: &EmuConfig, params: DriveParams) -> Self {
        SeekRetryController {
            params,
            retries: config.retries,
            no_seek_retries: config.no_seek_retries,
            seek_error_policy: config.seek_error_policy,
            command_wait: PollWait::new(config.poll_interval, config.hw_timeout),
            settle_wait: PollWait::new(config.poll_interval, config.hw_timeout),
            position: None,
            seek_len: 1,
        }
    }

    pub fn position(&self) -> Option<u16> {
        self.position
    }

    /// Step outward until the track-0 sensor asserts. Establishes the
    /// position reference every other movement depends on.
    pub fn recalibrate(&mut self, drive: &mut dyn DriveControl) -> Result<(), EmuError> {
        // Worst case the heads start at the innermost cylinder; the margin
        // covers a position reference lost mid-run.
        let max_steps = self.params.cylinders as u32 + 16;
        for _ in 0..max_steps {
            if drive.at_track0()? {
                self.position = Some(0);
                log::debug!("recalibrate(): drive {} at track 0", self.params.drive);
                return Ok(());
            }
            drive.step(StepSpeed::Slow, -1)?;
        }
        log::error!("recalibrate(): drive {} never reached track 0", self.params.drive);
        self.position = None;
        Err(EmuError::SeekFailed)
    }

    /// Wait for the drive to report seek completion.
    fn settle(&self, drive: &mut dyn DriveControl, token: &CancelToken) -> Result<(), EmuError> {
        let mut status_err = None;
        let result = self.settle_wait.wait_for(token, || match drive.get_status() {
            Ok(status) => status.contains(DriveStatus::SEEK_COMPLETE),
            Err(e) => {
                status_err = Some(e);
                true
            }
        });
        if let Some(e) = status_err {
            return Err(e);
        }
        match result {
            Ok(()) => Ok(()),
            Err(WaitError::Cancelled) => Err(EmuError::Cancelled),
            Err(WaitError::TimedOut) => Err(EmuError::SeekFailed),
        }
    }

    fn step_to(&mut self, drive: &mut dyn DriveControl, cylinder: u16, token: &CancelToken) -> Result<(), EmuError> {
        let from = self.position.ok_or(EmuError::SeekFailed)?;
        let delta = cylinder as i32 - from as i32;
        if delta != 0 {
            drive.step(StepSpeed::Fast, delta)?;
            self.settle(drive, token)?;
        }
        self.position = Some(cylinder);
        Ok(())
    }

    /// Seek to a cylinder, recalibrating first if the position reference was
    /// lost. Applies the configured seek error policy on failure.
    pub fn seek_to(&mut self, drive: &mut dyn DriveControl, cylinder: u16, token: &CancelToken) -> Result<(), EmuError> {
        if cylinder >= self.params.cylinders {
            return Err(EmuError::ParameterError);
        }
        if self.position.is_none() {
            self.recalibrate(drive)?;
        }

        match self.step_to(drive, cylinder, token) {
            Ok(()) => Ok(()),
            Err(EmuError::SeekFailed) => match self.seek_error_policy {
                SeekErrorPolicy::Fatal => {
                    log::error!("seek_to(): drive {} seek to cylinder {} failed", self.params.drive, cylinder);
                    Err(EmuError::SeekFailed)
                }
                SeekErrorPolicy::Retry { wait } => {
                    log::warn!(
                        "seek_to(): drive {} seek to cylinder {} failed, recalibrating and retrying",
                        self.params.drive,
                        cylinder
                    );
                    thread::sleep(wait);
                    self.recalibrate(drive)?;
                    self.step_to(drive, cylinder, token)
                }
            },
            Err(e) => Err(e),
        }
    }

    /// The next perturbation target: step away from `home` by the current
    /// offset, clipped to the drive's cylinder range, then advance the
    /// offset sequence.
    fn next_perturbation(&mut self, home: u16) -> u16 {
        let target = (home as i32 + self.seek_len).clamp(0, self.params.cylinders as i32 - 1) as u16;
        self.seek_len = if self.seek_len > 0 { -self.seek_len } else { -2 * self.seek_len };
        target
    }

    /// Merge a new attempt's sector health into the best-so-far, keeping
    /// the most informative status per sector. A sector once recovered
    /// stays recovered, and a sector seen with a data error is never
    /// demoted back to not-found by a worse attempt.
    fn merge_sectors(best: &mut Vec<SectorStatus>, new: &[SectorStatus]) {
        if best.len() < new.len() {
            best.resize(new.len(), SectorStatus::NotFound);
        }
        for (merged, fresh) in best.iter_mut().zip(new.iter()) {
            if fresh.rank() > merged.rank() {
                *merged = *fresh;
            }
        }
    }

    /// Read one track with retries. Physical recovery escalates in stages:
    /// plain re-reads first, then perturbation seeks that move the heads
    /// away and back to change the head/media geometry. A consistently
    /// wrong cylinder in the decoded headers triggers a corrective seek
    /// instead, without consuming the perturbation sequence.
    ///
    /// Exhausting the retry budget is not fatal: the merged best-so-far
    /// result is returned with `recovered` false and the caller decides.
    pub fn read_track(
        &mut self,
        hw: &mut dyn HardwareIo,
        drive: &mut dyn DriveControl,
        deltas: &DeltaReader,
        decoder: &mut dyn TrackDecoder,
        ch: DiskCh,
        token: &CancelToken,
    ) -> Result<ReadOutcome, EmuError> {
        self.seek_to(drive, ch.c(), token)?;
        drive.set_head(ch.h())?;

        // Each track read starts the perturbation sequence over.
        self.seek_len = 1;
        let mut no_seek_left = self.no_seek_retries;
        let mut best: Vec<SectorStatus> = Vec::new();
        let max_attempts = self.retries + 1;

        for attempt in 1..=max_attempts {
            deltas.start_read(ch);
            let status = hw.issue_command(
                HwCommand::ReadTrack,
                Some(HwCommand::track_word(ch.c(), ch.h())),
                &self.command_wait,
                token,
            )?;
            if status.is_fatal() {
                log::error!("read_track(): fatal hardware status on {}: {}", ch, status);
                log::error!("{}", hw.dump_state());
                return Err(EmuError::HardwareProtocol(status));
            }

            deltas.wait_until_finished(&self.command_wait, token).map_err(|e| match e {
                WaitError::Cancelled => EmuError::Cancelled,
                WaitError::TimedOut => EmuError::HardwareTimeout,
            })?;

            let samples = deltas.samples();
            let result = decoder.decode_track(&self.params, ch, &samples)?;

            match result.status {
                DecodeStatus::Clean => {
                    Self::merge_sectors(&mut best, &result.sectors);
                    if attempt > 1 {
                        log::info!("read_track(): {} recovered from multiple reads after {} attempts", ch, attempt);
                    }
                    return Ok(ReadOutcome {
                        recovered: true,
                        attempts: attempt,
                        sectors: best,
                    });
                }
                DecodeStatus::SectorErrors => {
                    Self::merge_sectors(&mut best, &result.sectors);
                    if !best.is_empty() && best.iter().all(|s| *s == SectorStatus::Good) {
                        log::info!("read_track(): {} recovered from multiple reads after {} attempts", ch, attempt);
                        return Ok(ReadOutcome {
                            recovered: true,
                            attempts: attempt,
                            sectors: best,
                        });
                    }
                    if attempt == max_attempts {
                        break;
                    }
                    if no_seek_left > 0 {
                        // Re-read without motion; cheap, and often enough.
                        no_seek_left -= 1;
                        log::debug!("read_track(): {} attempt {} had sector errors, re-reading", ch, attempt);
                    }
                    else {
                        let away = self.next_perturbation(ch.c());
                        log::debug!(
                            "read_track(): {} attempt {} still failing, perturbing heads via cylinder {}",
                            ch,
                            attempt,
                            away
                        );
                        self.seek_to(drive, away, token)?;
                        self.seek_to(drive, ch.c(), token)?;
                        no_seek_left = self.no_seek_retries;
                    }
                }
                DecodeStatus::WrongCylinder(offset) => {
                    // The heads are demonstrably elsewhere. Correct the
                    // position reference and seek back; this replaces the
                    // normal retry motion for this attempt.
                    log::warn!("read_track(): {} decoded headers from {} cylinder(s) away, correcting", ch, offset);
                    if attempt == max_attempts {
                        break;
                    }
                    if let Some(pos) = self.position {
                        let actual = (pos as i32 + offset).clamp(0, self.params.cylinders as i32 - 1) as u16;
                        self.position = Some(actual);
                    }
                    self.seek_to(drive, ch.c(), token)?;
                }
            }
        }

        log::warn!(
            "read_track(): {} not recovered after {} attempts ({} of {} sectors good)",
            ch,
            max_attempts,
            best.iter().filter(|s| **s == SectorStatus::Good).count(),
            best.len()
        );
        Ok(ReadOutcome {
            recovered: false,
            attempts: max_attempts,
            sectors: best,
        })
    }
}
