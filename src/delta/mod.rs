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

    src/delta/mod.rs

    Drains transition delta samples from the hardware read queue into a
    per-track buffer while a read is in progress, and signals completion.
    The buffer is allocated once and overwritten by every track read.
*/

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};

use crate::{
    archive::TransitionArchive,
    hw::{DeltaFault, DeltaSource},
    wait::{CancelToken, PollWait, WaitError},
    DiskCh,
    EmuError,
};

/// States of the drain loop for one track read.
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
pub enum DeltaState {
    /// No read pending.
    Idle,
    /// A read command was issued; no samples have arrived yet.
    WaitingForStart,
    /// Samples are arriving.
    Streaming,
    /// The hardware signalled completion; one more pass catches trailing
    /// samples still in flight.
    DrainConfirm,
    /// The read is complete and the buffer is stable.
    Done,
}

/// Progress of a track read as seen by a polling consumer. Replaces the
/// traditional dual-meaning count-or-negative-one return with a tagged
/// result.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeltaProgress {
    /// Samples may still arrive; `0` samples are available so far.
    Streaming(usize),
    /// Streaming has ended with this final total, and the caller has not yet
    /// processed all of it.
    Finished(usize),
    /// Streaming has ended and the caller has processed the final total.
    /// No more samples will ever arrive for this read.
    Drained,
}

/// Counters for recoverable drain faults, reported once per occurrence.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DeltaFaultCounts {
    pub overruns: u64,
    pub overflows: u64,
}

struct DeltaInner {
    state: DeltaState,
    ch: DiskCh,
    samples: Vec<u16>,
    inaccurate: bool,
}

/// The delta stream reader. Shared between the drain loop, which calls
/// [DeltaReader::drain_pass], and consumers polling [DeltaReader::progress].
pub struct DeltaReader {
    inner: Mutex<DeltaInner>,
    max_deltas: usize,
    overruns: AtomicU64,
    overflows: AtomicU64,
}

impl DeltaReader {
    /// Allocate the reader and its sample buffer. The buffer is sized once,
    /// to the maximum possible transitions per track, and reused.
    pub fn new(max_deltas: usize) -> Self {
        DeltaReader {
            inner: Mutex::new(DeltaInner {
                state: DeltaState::Idle,
                ch: DiskCh::default(),
                samples: Vec::with_capacity(max_deltas),
                inaccurate: false,
            }),
            max_deltas,
            overruns: AtomicU64::new(0),
            overflows: AtomicU64::new(0),
        }
    }

    /// Begin a new track read. Call before issuing the hardware read
    /// command: the count resets synchronously here, before the first new
    /// sample can arrive, so a stale total can never be mistaken for fresh
    /// data.
    pub fn start_read(&self, ch: DiskCh) {
        let mut inner = self.inner.lock().unwrap();
        inner.samples.clear();
        inner.ch = ch;
        inner.inaccurate = false;
        inner.state = DeltaState::WaitingForStart;
        log::trace!("DeltaReader::start_read(): {} awaiting first sample", ch);
    }

    /// Report read progress to a consumer that has processed `processed`
    /// samples so far. `Drained` is returned exactly when streaming has
    /// ended and the consumer has caught up with the final total.
    pub fn progress(&self, processed: usize) -> DeltaProgress {
        let inner = self.inner.lock().unwrap();
        match inner.state {
            DeltaState::Idle => DeltaProgress::Drained,
            DeltaState::WaitingForStart | DeltaState::Streaming | DeltaState::DrainConfirm => {
                DeltaProgress::Streaming(inner.samples.len())
            }
            DeltaState::Done => {
                if processed >= inner.samples.len() {
                    DeltaProgress::Drained
                }
                else {
                    DeltaProgress::Finished(inner.samples.len())
                }
            }
        }
    }

    /// Block (by bounded-interval polling, racing the drain loop) until the
    /// read is fully drained. Returns the final sample total. Used by
    /// callers that only need completion notice, not incremental streaming.
    pub fn wait_until_finished(&self, wait: &PollWait, token: &CancelToken) -> Result<usize, WaitError> {
        let mut seen = 0;
        wait.wait_for(token, || match self.progress(seen) {
            DeltaProgress::Streaming(n) | DeltaProgress::Finished(n) => {
                seen = n;
                false
            }
            DeltaProgress::Drained => true,
        })?;
        Ok(seen)
    }

    /// Snapshot the sample buffer. Only stable once [DeltaReader::progress]
    /// has stopped reporting `Streaming`.
    pub fn samples(&self) -> Vec<u16> {
        self.inner.lock().unwrap().samples.clone()
    }

    /// Whether a recoverable fault made the current track's data suspect.
    pub fn was_inaccurate(&self) -> bool {
        self.inner.lock().unwrap().inaccurate
    }

    pub fn state(&self) -> DeltaState {
        self.inner.lock().unwrap().state
    }

    pub fn fault_counts(&self) -> DeltaFaultCounts {
        DeltaFaultCounts {
            overruns: self.overruns.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
        }
    }

    /// One pass of the drain loop: pull newly available samples from the
    /// hardware queue and advance the state machine. The transition archive
    /// is written after the drain confirms completion and strictly before
    /// the read is marked fully drained, so no new read can overwrite the
    /// buffer while the archive still reads from it.
    pub fn drain_pass(
        &self,
        src: &mut dyn DeltaSource,
        mut archive: Option<&mut dyn TransitionArchive>,
    ) -> Result<(), EmuError> {
        let mut inner = self.inner.lock().unwrap();
        if matches!(inner.state, DeltaState::Idle | DeltaState::Done) {
            return Ok(());
        }

        let drain = src.read_deltas(&mut inner.samples)?;

        if inner.samples.len() > self.max_deltas {
            log::warn!(
                "DeltaReader::drain_pass(): {} samples exceed track maximum {}, truncating",
                inner.samples.len(),
                self.max_deltas
            );
            let max = self.max_deltas;
            inner.samples.truncate(max);
            inner.inaccurate = true;
        }

        if let Some(fault) = drain.fault {
            match fault {
                DeltaFault::Overrun => {
                    self.overruns.fetch_add(1, Ordering::Relaxed);
                    inner.inaccurate = true;
                    log::warn!("DeltaReader::drain_pass(): read queue overrun on {}, track may be inaccurate", inner.ch);
                }
                DeltaFault::Overflow => {
                    self.overflows.fetch_add(1, Ordering::Relaxed);
                    inner.inaccurate = true;
                    log::warn!("DeltaReader::drain_pass(): delta overflow on {}, track may be inaccurate", inner.ch);
                }
                DeltaFault::Protocol(status) => {
                    log::error!("DeltaReader::drain_pass(): unexpected hardware status: {}", status);
                    return Err(EmuError::HardwareProtocol(status));
                }
            }
        }

        if !inner.samples.is_empty() && inner.state == DeltaState::WaitingForStart {
            inner.state = DeltaState::Streaming;
        }

        if drain.complete {
            match inner.state {
                DeltaState::WaitingForStart | DeltaState::Streaming => {
                    inner.state = DeltaState::DrainConfirm;
                }
                DeltaState::DrainConfirm => {
                    if let Some(archive) = archive.as_deref_mut() {
                        archive.write_track_deltas(inner.ch, &inner.samples)?;
                    }
                    log::debug!(
                        "DeltaReader::drain_pass(): {} complete with {} samples",
                        inner.ch,
                        inner.samples.len()
                    );
                    inner.state = DeltaState::Done;
                }
                _ => {}
            }
        }

        Ok(())
    }
}
