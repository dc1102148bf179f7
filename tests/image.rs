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

    tests/image.rs

    Raw image file round trips on real temporary files.
*/

use fluxemu::{
    config::DriveParams,
    image::{DiskImageStore, RawImageFile, RawImageStore},
    DiskCh,
    EmuError,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn small_drive() -> DriveParams {
    DriveParams {
        drive: 0,
        cylinders: 2,
        heads: 2,
        track_len: 64,
        bit_rate: 5_000_000,
    }
}

#[test]
fn created_image_survives_reopen() {
    init();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drive0.femu");
    let params = small_drive();

    {
        let mut image = RawImageFile::create(&path, &params).unwrap();
        image.rewrite_track(DiskCh::new(1, 1), &[0x5A; 64]).unwrap();
        image.flush().unwrap();
    }

    // Header plus 4 tracks of 64 bytes.
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 16 + 4 * 64);

    let mut image = RawImageFile::open(&path, &params).unwrap();
    let mut cylinder = vec![0u8; 128];
    image.read_cylinder(1, &mut cylinder).unwrap();
    assert_eq!(&cylinder[..64], &[0u8; 64][..]);
    assert_eq!(&cylinder[64..], &[0x5A; 64][..]);
}

#[test]
fn mismatched_geometry_is_rejected_on_open() {
    init();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drive0.femu");
    let params = small_drive();
    RawImageFile::create(&path, &params).unwrap();

    let wider = DriveParams { heads: 4, ..params };
    assert!(matches!(
        RawImageFile::open(&path, &wider),
        Err(EmuError::ImageGeometry(_))
    ));
}

#[test]
fn store_routes_by_drive_id() {
    init();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drive0.femu");
    let params = small_drive();

    let mut store = RawImageStore::new();
    store.attach(RawImageFile::create(&path, &params).unwrap());

    store.rewrite_track(0, DiskCh::new(0, 0), &[1; 64]).unwrap();

    let mut out = vec![0u8; 128];
    store.read_cylinder(0, 0, &mut out).unwrap();
    assert_eq!(&out[..64], &[1u8; 64][..]);

    // Unattached drive ids are parameter errors.
    assert!(matches!(
        store.read_cylinder(7, 0, &mut out),
        Err(EmuError::ParameterError)
    ));

    // Out-of-range cylinders are rejected before any file I/O.
    assert!(matches!(
        store.read_cylinder(0, 9, &mut out),
        Err(EmuError::ParameterError)
    ));

    // Closing releases the drives; further access is an error.
    store.close().unwrap();
    assert!(matches!(
        store.read_cylinder(0, 0, &mut out),
        Err(EmuError::ParameterError)
    ));
}
