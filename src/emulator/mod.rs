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

    src/emulator/mod.rs

    Top-level orchestration. Two entry points share the emulator state:
    run_emulation services the emulated controller in real time, pairing the
    hardware event loop with a background write-back thread over the dirty
    track ring; run_disk_read images a physical drive track by track through
    the seek/retry controller, pairing the read loop with a background delta
    drain thread.
*/

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
        Mutex,
    },
    thread,
};

use crate::{
    archive::TransitionArchive,
    cylinder::CylinderOrchestrator,
    delta::DeltaReader,
    encoder::{PrecompParams, PulseTable},
    hw::{DeltaSource, DriveControl, HardwareIo, HwCommand, HwEvent, MemRegion},
    image::DiskImageStore,
    seeker::{SeekRetryController, TrackDecoder},
    track_ring::TrackRing,
    wait::{CancelToken, PollWait},
    DiskCh,
    EmuConfig,
    EmuError,
    CYLINDER_SHUTDOWN,
    MAX_TRACK_DELTAS,
};

/// Run counters, shared across the emulator's threads. Monotonic for the
/// lifetime of the [Emulator].
#[derive(Debug, Default)]
pub struct EmuStats {
    /// Invalid MFM windows seen in controller-written track data.
    pub bad_patterns: AtomicU64,
    /// Transition read queue overruns.
    pub overruns: AtomicU64,
    /// Transition deltas clamped to the representable range.
    pub overflows: AtomicU64,
    /// Track reads needing more than one attempt.
    pub tracks_retried: AtomicU64,
    /// Track reads abandoned with errors after exhausting retries.
    pub tracks_failed: AtomicU64,
    /// Cylinder requests served to the emulated controller.
    pub cylinders_served: AtomicU64,
    /// Dirty tracks written back to the disk image.
    pub tracks_flushed: AtomicU64,
}

impl EmuStats {
    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn log_summary(&self) {
        log::info!(
            "stats: {} cylinder(s) served, {} track(s) flushed, {} bad pattern(s), \
             {} overrun(s), {} overflow(s), {} track(s) retried, {} track(s) failed",
            self.cylinders_served.load(Ordering::Relaxed),
            self.tracks_flushed.load(Ordering::Relaxed),
            self.bad_patterns.load(Ordering::Relaxed),
            self.overruns.load(Ordering::Relaxed),
            self.overflows.load(Ordering::Relaxed),
            self.tracks_retried.load(Ordering::Relaxed),
            self.tracks_failed.load(Ordering::Relaxed),
        );
    }
}

/// Result of imaging one physical drive with [Emulator::run_disk_read].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DiskReadReport {
    pub tracks_total:   u32,
    /// Tracks that needed more than one attempt, recovered or not.
    pub tracks_retried: u32,
    /// Tracks still carrying errors after the retry budget.
    pub tracks_failed:  u32,
}

/// The emulator core. Construction validates the configuration and
/// allocates all real-time buffers; the run methods then borrow the
/// hardware and storage collaborators for the duration of a run.
pub struct Emulator {
    config: EmuConfig,
    ring:   Arc<TrackRing>,
    token:  CancelToken,
    stats:  Arc<EmuStats>,
}

impl Emulator {
    pub fn new(config: EmuConfig) -> Result<Self, EmuError> {
        config.validate()?;
        let track_len = config.drives[0].track_len;
        let ring = Arc::new(TrackRing::new(config.buffer_count, track_len, config.poll_interval));
        log::info!(
            "Emulator::new(): {} drive(s), {} track buffer(s) of {} bytes, bit cell {} ticks",
            config.drives.len(),
            config.buffer_count,
            track_len,
            config.bit_cell_ticks()
        );
        Ok(Emulator {
            config,
            ring,
            token: CancelToken::new(),
            stats: Arc::new(EmuStats::default()),
        })
    }

    /// The token that stops a running emulation. Clone it into a signal
    /// handler or supervisor thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    pub fn stats(&self) -> Arc<EmuStats> {
        Arc::clone(&self.stats)
    }

    fn command_wait(&self) -> PollWait {
        PollWait::new(self.config.poll_interval, self.config.hw_timeout)
    }

    /// Precompensation in effect for a cylinder, if any. Inner cylinders
    /// pack transitions closer together, so precompensation turns on from
    /// the configured threshold inward.
    fn precomp_for(&self, cylinder: u16) -> Option<PrecompParams> {
        if self.config.early_precomp_ticks == 0 && self.config.late_precomp_ticks == 0 {
            return None;
        }
        (cylinder >= self.config.precomp_start_cyl).then_some(PrecompParams {
            early_ticks: self.config.early_precomp_ticks,
            late_ticks:  self.config.late_precomp_ticks,
        })
    }

    fn push_pulse_table(&self, hw: &mut dyn HardwareIo, precomp: Option<PrecompParams>) -> Result<(), EmuError> {
        let table = PulseTable::build_write(self.config.bit_cell_ticks(), precomp);
        hw.bulk_write(MemRegion::PulseTable, &table.to_bytes(), 0)
    }

    fn issue_checked(
        &self,
        hw: &mut dyn HardwareIo,
        cmd: HwCommand,
        data: Option<u32>,
    ) -> Result<(), EmuError> {
        let status = hw.issue_command(cmd, data, &self.command_wait(), &self.token)?;
        if status.is_fatal() {
            log::error!("issue_checked(): {} failed: {}", cmd, status);
            log::error!("{}", hw.dump_state());
            return Err(EmuError::HardwareProtocol(status));
        }
        Ok(())
    }

    /// Serve the emulated controller until shutdown. The calling thread
    /// becomes the real-time servicing loop and should run at elevated
    /// scheduling priority, which is the embedding application's to
    /// arrange; a background thread writes dirty tracks back to the image.
    ///
    /// Returns when the hardware reports the shutdown sentinel cylinder,
    /// the cancel token fires, or a fatal error occurs. All dirty tracks
    /// enqueued before shutdown are flushed before this returns.
    pub fn run_emulation(&self, hw: &mut dyn HardwareIo, store: Arc<Mutex<dyn DiskImageStore>>) -> Result<(), EmuError> {
        let writer_error: Mutex<Option<EmuError>> = Mutex::new(None);

        let result = thread::scope(|s| {
            let writer = {
                let ring = Arc::clone(&self.ring);
                let store = Arc::clone(&store);
                let token = self.token.clone();
                let stats = Arc::clone(&self.stats);
                let writer_error = &writer_error;
                s.spawn(move || {
                    while let Some(track) = ring.dequeue(&token) {
                        // Lock order is store before slot, matching the
                        // servicing loop's cylinder transfer.
                        let mut store = store.lock().unwrap();
                        let slot = track.read();
                        if slot.shutdown {
                            break;
                        }
                        if let Err(e) = store.rewrite_track(slot.drive, slot.ch, slot.bytes()) {
                            log::error!("write-back of {} failed: {}", slot.ch, e);
                            *writer_error.lock().unwrap() = Some(e);
                            token.cancel();
                            break;
                        }
                        EmuStats::add(&stats.tracks_flushed, 1);
                    }
                    if let Err(e) = store.lock().unwrap().close() {
                        log::error!("final image flush failed: {}", e);
                        writer_error.lock().unwrap().get_or_insert(e);
                    }
                    log::debug!("write-back thread exiting");
                })
            };

            let service_result = self.service_loop(hw, &store);
            if service_result.is_err() {
                self.token.cancel();
            }
            // Joining is safe even on the error path: the writer observes
            // the cancelled token once the ring drains.
            writer.join().map_err(|_| {
                log::error!("write-back thread panicked");
                EmuError::Cancelled
            })?;
            service_result
        });

        self.stats.log_summary();
        match writer_error.into_inner().unwrap() {
            Some(e) if result.is_ok() => Err(e),
            _ => result,
        }
    }

    fn service_loop(&self, hw: &mut dyn HardwareIo, store: &Arc<Mutex<dyn DiskImageStore>>) -> Result<(), EmuError> {
        let mut orchestrator = CylinderOrchestrator::new(self.config.clone(), Arc::clone(&self.ring));

        let mut precomp = self.precomp_for(0);
        self.push_pulse_table(hw, precomp)?;
        self.issue_checked(hw, HwCommand::StartEmulation, None)?;
        log::info!("service_loop(): emulation started");

        let result = loop {
            let event = match hw.wait_for_event(&self.token) {
                Ok(Some(event)) => event,
                Ok(None) => {
                    log::info!("service_loop(): cancelled, shutting down");
                    let _ = self.ring.enqueue_shutdown(&self.token);
                    break Ok(());
                }
                Err(e) => break Err(e),
            };

            match event {
                HwEvent::CylinderRequest { drive, cylinder } => {
                    if cylinder == CYLINDER_SHUTDOWN {
                        log::info!("service_loop(): shutdown requested by hardware");
                        self.ring.enqueue_shutdown(&self.token)?;
                        break Ok(());
                    }

                    let needed = self.precomp_for(cylinder);
                    if needed != precomp {
                        log::info!(
                            "service_loop(): precompensation {} at cylinder {}",
                            if needed.is_some() { "enabled" } else { "disabled" },
                            cylinder
                        );
                        self.push_pulse_table(hw, needed)?;
                        precomp = needed;
                    }

                    {
                        let mut store = store.lock().unwrap();
                        orchestrator.transfer_cylinder(&mut *store, hw, drive, cylinder)?;
                    }
                    EmuStats::add(&self.stats.cylinders_served, 1);
                }
                HwEvent::TracksDirty { drive, cylinder, head_mask } => {
                    let summary = orchestrator.handle_dirty_tracks(hw, drive, cylinder, head_mask, &self.token)?;
                    EmuStats::add(&self.stats.bad_patterns, summary.bad_patterns as u64);
                }
            }
        };

        // Best effort: quiesce the signal generator even on the error path.
        if let Err(e) = self.issue_checked(hw, HwCommand::StopEmulation, None) {
            log::warn!("service_loop(): stop command failed during shutdown: {}", e);
        }
        result
    }

    /// Image one physical drive: read every track through the seek/retry
    /// controller, archiving raw transitions as reads complete. A background
    /// thread drains the hardware delta queue while this thread seeks,
    /// issues reads and decodes.
    ///
    /// Individual unrecoverable tracks do not abort the run; they are
    /// counted in the report and the read continues.
    pub fn run_disk_read(
        &self,
        hw: &mut dyn HardwareIo,
        drive_ctl: &mut dyn DriveControl,
        delta_src: &mut dyn DeltaSource,
        decoder: &mut dyn TrackDecoder,
        archive: &mut dyn TransitionArchive,
        drive: usize,
    ) -> Result<DiskReadReport, EmuError> {
        let params = self.config.drive(drive).ok_or(EmuError::ParameterError)?.clone();
        let deltas = DeltaReader::new(MAX_TRACK_DELTAS);
        let drain_token = CancelToken::new();
        let drain_error: Mutex<Option<EmuError>> = Mutex::new(None);

        let result = thread::scope(|s| {
            let drain = {
                let deltas = &deltas;
                let drain_token = drain_token.clone();
                let run_token = self.token.clone();
                let drain_error = &drain_error;
                let interval = self.config.poll_interval;
                s.spawn(move || {
                    while !drain_token.is_cancelled() && !run_token.is_cancelled() {
                        if let Err(e) = deltas.drain_pass(delta_src, Some(&mut *archive)) {
                            log::error!("delta drain failed: {}", e);
                            *drain_error.lock().unwrap() = Some(e);
                            break;
                        }
                        thread::sleep(interval);
                    }
                    if let Err(e) = archive.close() {
                        log::error!("archive close failed: {}", e);
                        drain_error.lock().unwrap().get_or_insert(e);
                    }
                    log::debug!("delta drain thread exiting");
                })
            };

            let read_result = (|| {
                let mut seeker = SeekRetryController::new(&self.config, params.clone());
                drive_ctl.select(drive)?;
                seeker.recalibrate(drive_ctl)?;

                let mut report = DiskReadReport {
                    tracks_total: params.cylinders as u32 * params.heads as u32,
                    ..DiskReadReport::default()
                };

                for cylinder in 0..params.cylinders {
                    for head in 0..params.heads {
                        if self.token.is_cancelled() {
                            return Err(EmuError::Cancelled);
                        }
                        if let Some(e) = drain_error.lock().unwrap().take() {
                            return Err(e);
                        }

                        let ch = DiskCh::new(cylinder, head);
                        let outcome = seeker.read_track(hw, drive_ctl, &deltas, decoder, ch, &self.token)?;
                        if outcome.attempts > 1 {
                            report.tracks_retried += 1;
                            EmuStats::add(&self.stats.tracks_retried, 1);
                        }
                        if !outcome.recovered {
                            report.tracks_failed += 1;
                            EmuStats::add(&self.stats.tracks_failed, 1);
                        }
                    }
                    log::info!(
                        "run_disk_read(): drive {} cylinder {}/{} done",
                        drive,
                        cylinder + 1,
                        params.cylinders
                    );
                }
                Ok(report)
            })();

            drain_token.cancel();
            drain.join().map_err(|_| {
                log::error!("delta drain thread panicked");
                EmuError::Cancelled
            })?;
            read_result
        });

        let faults = deltas.fault_counts();
        EmuStats::add(&self.stats.overruns, faults.overruns);
        EmuStats::add(&self.stats.overflows, faults.overflows);
        self.stats.log_summary();

        match drain_error.into_inner().unwrap() {
            Some(e) if result.is_ok() => Err(e),
            _ => result,
        }
    }
}
