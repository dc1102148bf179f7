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

    src/track_ring/mod.rs

    A fixed-capacity single-producer single-consumer ring of dirty track
    buffers. The real-time servicing loop enqueues tracks the emulated
    controller has written; the background writer dequeues them and flushes
    to the disk image. The producer must never be blocked by disk latency,
    so all slot storage is preallocated and the producer only waits when the
    ring is truly full.

    With capacity C, at most C-1 tracks are in flight: the slot at the put
    cursor is always left free so a full ring and an empty ring remain
    distinguishable from the cursors alone.
*/

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Condvar,
    Mutex,
    MutexGuard,
};

use crate::{
    wait::{CancelToken, PollWait},
    DiskCh,
    EmuError,
};

/// One slot of the ring. Slots are preallocated at the fixed track length
/// and reused; `len` is the valid prefix of `data`.
#[derive(Debug)]
pub struct TrackSlot {
    /// Shutdown sentinel: marks the end of the stream rather than a track.
    pub shutdown: bool,
    pub drive:    usize,
    pub ch:       DiskCh,
    pub len:      usize,
    pub data:     Vec<u8>,
}

impl TrackSlot {
    fn new(track_len: usize) -> Self {
        TrackSlot {
            shutdown: false,
            drive: 0,
            ch: DiskCh::default(),
            len: 0,
            data: vec![0; track_len],
        }
    }

    /// The valid track bytes in this slot.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// The dirty-track ring. Cursor discipline makes each slot single-writer:
/// the producer only touches the empty slot at `put`, the consumer only the
/// filled slots in `[get, put)` (mod capacity), so the per-slot mutexes are
/// never contended and exist to keep the sharing expressible in safe code.
#[derive(Debug)]
pub struct TrackRing {
    slots: Vec<Mutex<TrackSlot>>,
    put:   AtomicUsize,
    get:   AtomicUsize,
    /// Signals the consumer that the ring became non-empty.
    signal: Mutex<()>,
    avail:  Condvar,
    /// Backpressure wait used by the producer when the ring is full. Must
    /// not time out: a stalled writer is slow, not wrong.
    full_wait: PollWait,
}

impl TrackRing {
    /// Create a ring of `capacity` slots, each preallocated to `track_len`
    /// bytes. Usable depth is `capacity - 1`.
    pub fn new(capacity: usize, track_len: usize, poll_interval: std::time::Duration) -> Self {
        assert!(capacity >= 2, "ring requires at least two slots");
        TrackRing {
            slots: (0..capacity).map(|_| Mutex::new(TrackSlot::new(track_len))).collect(),
            put: AtomicUsize::new(0),
            get: AtomicUsize::new(0),
            signal: Mutex::new(()),
            avail: Condvar::new(),
            full_wait: PollWait::forever(poll_interval),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of tracks currently enqueued and not yet released.
    pub fn buffers_used(&self) -> usize {
        let put = self.put.load(Ordering::Acquire);
        let get = self.get.load(Ordering::Acquire);
        (put + self.capacity() - get) % self.capacity()
    }

    /// The consumer cursor, as a stable reference point for
    /// [TrackRing::scan_pending].
    pub fn get_index(&self) -> usize {
        self.get.load(Ordering::Acquire)
    }

    fn publish(&self, next_put: usize) {
        self.put.store(next_put, Ordering::Release);
        // The guard orders the store before the wakeup so the consumer
        // cannot miss it between its own check and its wait.
        let _guard = self.signal.lock().unwrap();
        self.avail.notify_one();
    }

    /// Wait until the slot at `put` is free, then fill it via `fill` and
    /// publish it. Blocks indefinitely on a full ring; fails only on
    /// cancellation.
    fn enqueue_with<F>(&self, token: &CancelToken, fill: F) -> Result<(), EmuError>
    where
        F: FnOnce(&mut TrackSlot),
    {
        let put = self.put.load(Ordering::Relaxed);
        let next_put = (put + 1) % self.capacity();

        if next_put == self.get.load(Ordering::Acquire) {
            log::debug!("TrackRing::enqueue_with(): ring full, waiting for writer");
            self.full_wait
                .wait_for(token, || next_put != self.get.load(Ordering::Acquire))
                .map_err(|_| EmuError::Cancelled)?;
        }

        {
            let mut slot = self.slots[put].lock().unwrap();
            fill(&mut slot);
        }
        self.publish(next_put);
        Ok(())
    }

    /// Enqueue one dirty track. `data` is copied into the preallocated slot.
    pub fn enqueue(&self, drive: usize, ch: DiskCh, data: &[u8], token: &CancelToken) -> Result<(), EmuError> {
        self.enqueue_with(token, |slot| {
            slot.shutdown = false;
            slot.drive = drive;
            slot.ch = ch;
            slot.len = data.len().min(slot.data.len());
            let len = slot.len;
            slot.data[..len].copy_from_slice(&data[..len]);
        })
    }

    /// Enqueue the shutdown sentinel. The consumer drains everything ahead
    /// of it in order, then stops.
    pub fn enqueue_shutdown(&self, token: &CancelToken) -> Result<(), EmuError> {
        self.enqueue_with(token, |slot| {
            slot.shutdown = true;
            slot.len = 0;
        })
    }

    /// Dequeue the next track, blocking until one is available. Returns
    /// `None` when `token` cancels with the ring empty; enqueued tracks are
    /// always delivered first so cancellation never drops data.
    pub fn dequeue(&self, token: &CancelToken) -> Option<DequeuedTrack<'_>> {
        loop {
            let get = self.get.load(Ordering::Relaxed);
            if get != self.put.load(Ordering::Acquire) {
                return Some(DequeuedTrack { ring: self, index: get });
            }
            if token.is_cancelled() {
                return None;
            }
            let guard = self.signal.lock().unwrap();
            if self.get.load(Ordering::Relaxed) != self.put.load(Ordering::Acquire) {
                continue;
            }
            // Bounded wait so cancellation is still observed if a wakeup is
            // lost to a race with the producer's publish.
            let _unused = self.avail.wait_timeout(guard, std::time::Duration::from_millis(50)).unwrap();
        }
    }

    /// Visit every pending slot from `from` up to the live put cursor, in
    /// queue order, skipping shutdown sentinels. Used by the cylinder
    /// transfer to overlay not-yet-flushed writes onto image data.
    pub fn scan_pending<F>(&self, from: usize, mut visit: F)
    where
        F: FnMut(&TrackSlot),
    {
        let put = self.put.load(Ordering::Acquire);
        let mut index = from;
        while index != put {
            let slot = self.slots[index].lock().unwrap();
            if !slot.shutdown {
                visit(&slot);
            }
            index = (index + 1) % self.capacity();
        }
    }

    fn release(&self, index: usize) {
        let next_get = (index + 1) % self.capacity();
        self.get.store(next_get, Ordering::Release);
    }
}

/// A dequeued track, borrowed in place from its ring slot. The slot is
/// released back to the producer when this guard drops.
pub struct DequeuedTrack<'a> {
    ring:  &'a TrackRing,
    index: usize,
}

impl DequeuedTrack<'_> {
    pub fn read(&self) -> MutexGuard<'_, TrackSlot> {
        self.ring.slots[self.index].lock().unwrap()
    }

    pub fn is_shutdown(&self) -> bool {
        self.read().shutdown
    }
}

impl Drop for DequeuedTrack<'_> {
    fn drop(&mut self) {
        self.ring.release(self.index);
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    fn ring(capacity: usize) -> TrackRing {
        TrackRing::new(capacity, 64, Duration::from_micros(50))
    }

    #[test]
    fn usable_depth_is_capacity_minus_one() {
        let ring = ring(4);
        let token = CancelToken::new();
        for c in 0..3 {
            ring.enqueue(0, DiskCh::new(c, 0), &[c as u8; 16], &token).unwrap();
        }
        assert_eq!(ring.buffers_used(), 3);

        // A fourth enqueue must block until the consumer releases a slot.
        token.cancel();
        assert!(matches!(
            ring.enqueue(0, DiskCh::new(3, 0), &[3; 16], &token),
            Err(EmuError::Cancelled)
        ));
    }

    #[test]
    fn tracks_are_delivered_in_order() {
        let ring = ring(4);
        let token = CancelToken::new();
        ring.enqueue(1, DiskCh::new(7, 1), &[0xAA; 16], &token).unwrap();
        ring.enqueue(1, DiskCh::new(8, 0), &[0xBB; 16], &token).unwrap();

        {
            let track = ring.dequeue(&token).unwrap();
            let slot = track.read();
            assert!(!slot.shutdown);
            assert_eq!(slot.drive, 1);
            assert_eq!(slot.ch, DiskCh::new(7, 1));
            assert_eq!(slot.bytes(), &[0xAA; 16]);
        }
        assert_eq!(ring.buffers_used(), 1);

        let track = ring.dequeue(&token).unwrap();
        assert_eq!(track.read().ch, DiskCh::new(8, 0));
        drop(track);
        assert_eq!(ring.buffers_used(), 0);
    }

    #[test]
    fn four_slot_fifo_scenario() {
        let ring = ring(4);
        let token = CancelToken::new();
        for c in 0..3u16 {
            ring.enqueue(0, DiskCh::new(c, 0), &[c as u8; 8], &token).unwrap();
        }

        // Release the oldest slot, refill it, then drain two more; exactly
        // one track remains and it is the newest.
        assert_eq!(ring.dequeue(&token).unwrap().read().ch, DiskCh::new(0, 0));
        ring.enqueue(0, DiskCh::new(3, 0), &[3; 8], &token).unwrap();
        assert_eq!(ring.dequeue(&token).unwrap().read().ch, DiskCh::new(1, 0));
        assert_eq!(ring.dequeue(&token).unwrap().read().ch, DiskCh::new(2, 0));

        assert_eq!(ring.buffers_used(), 1);
        assert_eq!(ring.dequeue(&token).unwrap().read().ch, DiskCh::new(3, 0));
        assert_eq!(ring.buffers_used(), 0);
    }

    #[test]
    fn full_producer_resumes_after_release() {
        let ring = Arc::new(ring(3));
        let token = CancelToken::new();
        ring.enqueue(0, DiskCh::new(0, 0), &[1; 8], &token).unwrap();
        ring.enqueue(0, DiskCh::new(1, 0), &[2; 8], &token).unwrap();

        let producer = {
            let ring = Arc::clone(&ring);
            let token = token.clone();
            std::thread::spawn(move || ring.enqueue(0, DiskCh::new(2, 0), &[3; 8], &token))
        };

        // Give the producer time to reach the full-ring wait, then free a
        // slot for it.
        std::thread::sleep(Duration::from_millis(5));
        drop(ring.dequeue(&token).unwrap());
        producer.join().unwrap().unwrap();
        assert_eq!(ring.buffers_used(), 2);
    }

    #[test]
    fn shutdown_sentinel_follows_pending_tracks() {
        let ring = ring(4);
        let token = CancelToken::new();
        ring.enqueue(0, DiskCh::new(5, 0), &[9; 8], &token).unwrap();
        ring.enqueue_shutdown(&token).unwrap();

        let first = ring.dequeue(&token).unwrap();
        assert!(!first.is_shutdown());
        drop(first);

        let second = ring.dequeue(&token).unwrap();
        assert!(second.is_shutdown());
    }

    #[test]
    fn cancelled_empty_ring_returns_none() {
        let ring = ring(3);
        let token = CancelToken::new();
        token.cancel();
        assert!(ring.dequeue(&token).is_none());
    }

    #[test]
    fn scan_pending_skips_sentinels_and_preserves_order() {
        let ring = ring(5);
        let token = CancelToken::new();
        ring.enqueue(0, DiskCh::new(1, 0), &[1; 8], &token).unwrap();
        ring.enqueue_shutdown(&token).unwrap();
        ring.enqueue(0, DiskCh::new(2, 1), &[2; 8], &token).unwrap();

        let mut seen = Vec::new();
        ring.scan_pending(ring.get_index(), |slot| seen.push(slot.ch));
        assert_eq!(seen, vec![DiskCh::new(1, 0), DiskCh::new(2, 1)]);
    }
}
