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

    tests/disk_read.rs

    End-to-end tests of imaging a physical drive through the seek/retry
    controller, with the delta drain running on its own thread.
*/
mod common;

use std::{collections::HashSet, sync::atomic::Ordering, time::Duration};

use common::{FakeDrive, FlakyDecoder, InstantDeltaSource, RecordingArchive, ScriptedHardware};
use fluxemu::{config::DriveParams, seeker::SeekErrorPolicy, DiskCh, EmuConfig, Emulator};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn read_config() -> EmuConfig {
    EmuConfig {
        drives: vec![DriveParams {
            drive: 0,
            cylinders: 2,
            heads: 2,
            track_len: 64,
            bit_rate: 5_000_000,
        }],
        poll_interval: Duration::from_micros(50),
        hw_timeout: Duration::from_millis(500),
        retries: 3,
        no_seek_retries: 1,
        seek_error_policy: SeekErrorPolicy::Fatal,
        precomp_start_cyl: 1,
        ..EmuConfig::default()
    }
}

#[test]
fn disk_read_retries_and_archives_every_read() {
    init();

    let emulator = Emulator::new(read_config()).unwrap();
    let mut hw = ScriptedHardware::default();
    let mut drive = FakeDrive::at(0);
    let mut source = InstantDeltaSource {
        batch: vec![40, 60, 80],
    };
    let mut decoder = FlakyDecoder {
        fail_once: HashSet::from([DiskCh::new(1, 0)]),
        ..FlakyDecoder::default()
    };
    let mut archive = RecordingArchive::default();

    let report = emulator
        .run_disk_read(&mut hw, &mut drive, &mut source, &mut decoder, &mut archive, 0)
        .unwrap();

    assert_eq!(report.tracks_total, 4);
    assert_eq!(report.tracks_retried, 1);
    assert_eq!(report.tracks_failed, 0);
    assert_eq!(drive.selected, vec![0]);

    // One archive chunk per completed read, repeats included, in read order.
    let expected = vec![
        (DiskCh::new(0, 0), 3),
        (DiskCh::new(0, 1), 3),
        (DiskCh::new(1, 0), 3),
        (DiskCh::new(1, 0), 3),
        (DiskCh::new(1, 1), 3),
    ];
    assert_eq!(archive.chunks, expected);
    assert!(archive.closed);

    let stats = emulator.stats();
    assert_eq!(stats.tracks_retried.load(Ordering::Relaxed), 1);
    assert_eq!(stats.tracks_failed.load(Ordering::Relaxed), 0);
}

#[test]
fn unrecoverable_track_is_counted_not_fatal() {
    init();

    let emulator = Emulator::new(read_config()).unwrap();
    let mut hw = ScriptedHardware::default();
    let mut drive = FakeDrive::at(1);
    let mut source = InstantDeltaSource {
        batch: vec![40, 40, 40],
    };
    let mut decoder = FlakyDecoder {
        fail_always: HashSet::from([DiskCh::new(1, 1)]),
        ..FlakyDecoder::default()
    };
    let mut archive = RecordingArchive::default();

    let report = emulator
        .run_disk_read(&mut hw, &mut drive, &mut source, &mut decoder, &mut archive, 0)
        .unwrap();

    assert_eq!(report.tracks_total, 4);
    assert_eq!(report.tracks_failed, 1);
    assert_eq!(report.tracks_retried, 1);

    // Three clean single reads plus retries + 1 attempts on the bad track.
    assert_eq!(archive.chunks.len(), 3 + 4);
    assert_eq!(*decoder.attempts.get(&DiskCh::new(1, 1)).unwrap(), 4);
}
