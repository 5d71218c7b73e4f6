//! The shared audio mix buffer.
//!
//! Every playing clip mixes its decoded audio into one byte ring read by the
//! audio device. Positions are logical byte offsets that only grow; the ring
//! index is the offset modulo capacity. Each writer keeps its own cursor and
//! may run at most half the capacity ahead of the read cursor, so a writer
//! never overwrites audio the device has not played yet.

use parking_lot::{Condvar, Mutex, MutexGuard};
use reel_core::audio_format::FRAME_BYTES;
use reel_core::{ReelError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::mix::mix_into;

/// How long a blocked writer sleeps before re-checking for cancellation.
const WAIT_SLICE: Duration = Duration::from_millis(20);

/// Result of one write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOutcome {
    /// Input bytes used up, including bytes dropped for being late.
    pub consumed: usize,
    /// Bytes actually mixed into the ring.
    pub written: usize,
}

struct MixState {
    data: Box<[u8]>,
    read: u64,
}

/// Fixed-capacity ring of s16le stereo audio shared by all clips.
pub struct MixBuffer {
    state: Mutex<MixState>,
    space: Condvar,
    capacity: usize,
    closed: AtomicBool,
}

impl MixBuffer {
    /// Create a buffer of `capacity` bytes, a multiple of the sample frame
    /// size and at least two frames.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < 2 * FRAME_BYTES || capacity % FRAME_BYTES != 0 {
            return Err(ReelError::Audio(format!(
                "mix buffer capacity {} must be a positive multiple of {} bytes",
                capacity, FRAME_BYTES
            )));
        }
        Ok(Self {
            state: Mutex::new(MixState {
                data: vec![0u8; capacity].into_boxed_slice(),
                read: 0,
            }),
            space: Condvar::new(),
            capacity,
            closed: AtomicBool::new(false),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn read_cursor(&self) -> u64 {
        self.state.lock().read
    }

    /// Furthest position a writer may currently reach.
    pub fn write_limit(&self) -> u64 {
        self.state.lock().read + self.half()
    }

    fn half(&self) -> u64 {
        ((self.capacity / 2) - (self.capacity / 2) % FRAME_BYTES) as u64
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mix as much of `bytes` at `cursor` as the backpressure limit and
    /// `limit_out` allow, advancing `cursor`.
    ///
    /// A cursor behind the read cursor is moved up to it and the input bytes
    /// for the skipped span are dropped, since that audio has already
    /// played.
    pub fn write(&self, cursor: &mut u64, bytes: &[u8], limit_out: Option<u64>) -> WriteOutcome {
        let mut state = self.state.lock();
        self.write_locked(&mut state, cursor, bytes, limit_out)
    }

    fn write_locked(&self, state: &mut MixState, cursor: &mut u64, bytes: &[u8], limit_out: Option<u64>) -> WriteOutcome {
        let usable = bytes.len() - bytes.len() % FRAME_BYTES;
        let mut outcome = WriteOutcome::default();

        if *cursor < state.read {
            let late = ((state.read - *cursor) as usize).min(usable);
            outcome.consumed = late;
            *cursor += late as u64;
            if *cursor < state.read {
                return outcome;
            }
        }

        let mut limit = state.read + self.half();
        if let Some(out) = limit_out {
            limit = limit.min(out);
        }
        let room = limit.saturating_sub(*cursor) as usize;
        let count = (usable - outcome.consumed).min(room - room % FRAME_BYTES);
        if count == 0 {
            return outcome;
        }

        let src = &bytes[outcome.consumed..outcome.consumed + count];
        let start = (*cursor % self.capacity as u64) as usize;
        let first = count.min(self.capacity - start);
        mix_into(&mut state.data[start..start + first], &src[..first]);
        if first < count {
            mix_into(&mut state.data[..count - first], &src[first..]);
        }

        *cursor += count as u64;
        outcome.consumed += count;
        outcome.written = count;
        outcome
    }

    /// Write all of `bytes`, waiting for the device to read whenever the
    /// backpressure limit is hit. Returns early when `limit_out` is reached,
    /// when `cancel` is raised, or when the buffer is closed.
    pub fn write_blocking(&self, cursor: &mut u64, bytes: &[u8], limit_out: Option<u64>, cancel: &AtomicBool) -> WriteOutcome {
        let usable = bytes.len() - bytes.len() % FRAME_BYTES;
        let mut total = WriteOutcome::default();
        let mut state = self.state.lock();

        loop {
            let step = self.write_locked(&mut state, cursor, &bytes[total.consumed..usable], limit_out);
            total.consumed += step.consumed;
            total.written += step.written;

            let at_limit_out = limit_out.is_some_and(|out| *cursor >= out);
            if total.consumed >= usable || at_limit_out || self.should_stop(cancel) {
                return total;
            }
            self.wait_for_space(&mut state);
        }
    }

    fn should_stop(&self, cancel: &AtomicBool) -> bool {
        self.is_closed() || cancel.load(Ordering::Acquire)
    }

    fn wait_for_space(&self, state: &mut MutexGuard<'_, MixState>) {
        let _ = self.space.wait_for(state, WAIT_SLICE);
    }

    /// Device side: copy the next `out.len()` bytes, silence them in the ring,
    /// and advance the read cursor. Returns the bytes read.
    pub fn consume(&self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.capacity);
        let count = count - count % FRAME_BYTES;
        if count == 0 {
            return 0;
        }

        let mut state = self.state.lock();
        let start = (state.read % self.capacity as u64) as usize;
        let first = count.min(self.capacity - start);
        out[..first].copy_from_slice(&state.data[start..start + first]);
        state.data[start..start + first].fill(0);
        if first < count {
            out[first..count].copy_from_slice(&state.data[..count - first]);
            state.data[..count - first].fill(0);
        }
        state.read += count as u64;
        drop(state);

        self.space.notify_all();
        count
    }

    /// Silence the ring and rewind the read cursor to zero.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.data.fill(0);
        state.read = 0;
        drop(state);
        debug!("Cleared {} byte mix buffer", self.capacity);
        self.space.notify_all();
    }

    /// Release every blocked writer for good.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.space.notify_all();
    }
}

impl std::fmt::Debug for MixBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixBuffer")
            .field("capacity", &self.capacity)
            .field("read", &self.read_cursor())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    fn block(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn samples(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn test_rejects_bad_capacity() {
        assert!(MixBuffer::new(0).is_err());
        assert!(MixBuffer::new(4).is_err());
        assert!(MixBuffer::new(10).is_err());
        assert!(MixBuffer::new(16).is_ok());
    }

    #[test]
    fn test_two_writers_mix() {
        let buffer = MixBuffer::new(64).unwrap();
        let (mut a, mut b) = (0u64, 0u64);
        buffer.write(&mut a, &block(&[100, 100, 200, 200]), None);
        buffer.write(&mut b, &block(&[30000, 1, 10000, 2]), None);
        assert_eq!((a, b), (8, 8));

        let mut out = vec![0u8; 8];
        assert_eq!(buffer.consume(&mut out), 8);
        assert_eq!(samples(&out), vec![30100, 101, 10200, 202]);

        // consumed audio is silenced
        let mut next = vec![0u8; 8];
        buffer.consume(&mut next);
        assert!(next.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_backpressure_limits_write() {
        let buffer = MixBuffer::new(32).unwrap();
        let mut cursor = 0u64;
        let outcome = buffer.write(&mut cursor, &[1u8; 40], None);
        assert_eq!(outcome, WriteOutcome { consumed: 16, written: 16 });
        assert_eq!(cursor, buffer.write_limit());

        let mut out = vec![0u8; 8];
        buffer.consume(&mut out);
        let outcome = buffer.write(&mut cursor, &[1u8; 24], None);
        assert_eq!(outcome.written, 8);
        assert_eq!(cursor, 24);
    }

    #[test]
    fn test_limit_out_stops_write() {
        let buffer = MixBuffer::new(64).unwrap();
        let mut cursor = 0u64;
        let outcome = buffer.write(&mut cursor, &[1u8; 24], Some(12));
        assert_eq!(outcome.written, 12);
        assert_eq!(cursor, 12);
    }

    #[test]
    fn test_late_cursor_drops_played_audio() {
        let buffer = MixBuffer::new(32).unwrap();
        let mut out = vec![0u8; 12];
        buffer.consume(&mut out);

        let mut cursor = 4u64;
        let data = block(&[1, 1, 2, 2, 3, 3, 4, 4]);
        let outcome = buffer.write(&mut cursor, &data, None);
        assert_eq!(outcome, WriteOutcome { consumed: 16, written: 8 });
        assert_eq!(cursor, 20);

        let mut out = vec![0u8; 8];
        buffer.consume(&mut out);
        assert_eq!(samples(&out), vec![3, 3, 4, 4]);
    }

    #[test]
    fn test_write_wraps_around() {
        let buffer = MixBuffer::new(16).unwrap();
        let mut out = vec![0u8; 12];
        buffer.consume(&mut out);

        let mut cursor = 12u64;
        buffer.write(&mut cursor, &block(&[5, 5, 6, 6]), None);
        let mut out = vec![0u8; 8];
        buffer.consume(&mut out);
        assert_eq!(samples(&out), vec![5, 5, 6, 6]);
    }

    #[test]
    fn test_write_blocking_waits_for_reader() {
        let buffer = Arc::new(MixBuffer::new(32).unwrap());
        let reader = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut out = vec![0u8; 8];
                let mut read = 0;
                while read < 48 {
                    read += buffer.consume(&mut out);
                    thread::sleep(Duration::from_millis(2));
                }
            })
        };

        let cancel = AtomicBool::new(false);
        let mut cursor = 0u64;
        let outcome = buffer.write_blocking(&mut cursor, &[1u8; 48], None, &cancel);
        assert_eq!(outcome.consumed, 48);
        assert_eq!(cursor, 48);
        reader.join().unwrap();
    }

    #[test]
    fn test_write_blocking_observes_cancel_and_close() {
        let buffer = MixBuffer::new(16).unwrap();
        let cancel = AtomicBool::new(true);
        let mut cursor = 0u64;
        let outcome = buffer.write_blocking(&mut cursor, &[1u8; 64], None, &cancel);
        assert_eq!(outcome.written, 8);

        buffer.close();
        let cancel = AtomicBool::new(false);
        let outcome = buffer.write_blocking(&mut cursor, &[1u8; 64], None, &cancel);
        assert_eq!(outcome.written, 0);
    }

    #[test]
    fn test_clear_rewinds() {
        let buffer = MixBuffer::new(16).unwrap();
        let mut cursor = 0u64;
        buffer.write(&mut cursor, &[9u8; 8], None);
        let mut out = vec![0u8; 4];
        buffer.consume(&mut out);
        buffer.clear();
        assert_eq!(buffer.read_cursor(), 0);
        let mut out = vec![0u8; 8];
        buffer.consume(&mut out);
        assert!(out.iter().all(|&b| b == 0));
    }

    proptest! {
        #[test]
        fn prop_writer_never_outruns_half_capacity(
            ops in proptest::collection::vec((any::<bool>(), 1usize..64), 1..60)
        ) {
            let buffer = MixBuffer::new(128).unwrap();
            let mut cursor = 0u64;
            for (is_write, frames) in ops {
                if is_write {
                    buffer.write(&mut cursor, &vec![1u8; frames * FRAME_BYTES], None);
                } else {
                    let mut out = vec![0u8; frames * FRAME_BYTES];
                    buffer.consume(&mut out);
                }
                prop_assert!(cursor <= buffer.write_limit());
            }
        }
    }

    #[test]
    fn test_concurrent_writers_respect_backpressure() {
        let buffer = Arc::new(MixBuffer::new(256).unwrap());
        let cancel = Arc::new(AtomicBool::new(false));
        let writers: Vec<_> = (0..3)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                let cancel = Arc::clone(&cancel);
                thread::spawn(move || {
                    let mut cursor = 0u64;
                    let mut max_lead = 0u64;
                    for _ in 0..20 {
                        buffer.write_blocking(&mut cursor, &[0u8; 64], None, &cancel);
                        max_lead = max_lead.max(cursor.saturating_sub(buffer.read_cursor()));
                    }
                    max_lead
                })
            })
            .collect();

        let mut out = vec![0u8; 32];
        let mut read = 0;
        while read < 20 * 64 + 256 {
            read += buffer.consume(&mut out);
            thread::sleep(Duration::from_micros(200));
        }
        cancel.store(true, Ordering::Release);
        for writer in writers {
            assert!(writer.join().unwrap() <= 128);
        }
    }
}
