//! Cache passes: decoding into a clip's frame queue or into the mix buffer.
//!
//! A [`ClipCacher`] owns the clip's decode session and runs one pass per
//! [`CacheRequest`]. It runs on the clip's worker thread, or inline on the
//! caller's thread for single-threaded clips. Every decode is preceded by a
//! check of the interrupt flag, so a reset request abandons a pass within
//! one frame.

use parking_lot::Mutex;
use reel_audio::{apply_gain_ramp, MixBuffer};
use reel_core::audio_format::FRAME_BYTES;
use reel_core::SharedFrame;
use reel_core::playhead::{
    buffer_offset_from_frame, bytes_to_seconds, clip_frame_to_seconds, refactor_frame_number,
    seconds_to_source_timestamp, timeline_to_clip_frame,
};
use reel_media::{AudioChunk, DecodeError, DecodeSession, RawFrame, StreamInfo};
use reel_timeline::ClipPlacement;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::queue::{FrameQueue, PlayDirection};

/// One enclosing clip when the cached clip sits in a nested sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NestLevel {
    pub timeline_in_wt: i64,
    pub timeline_out_wt: i64,
    pub clip_in_wt: i64,
    /// Frame rate of the sequence this level's clip sits in.
    pub frame_rate: f64,
}

/// Ancestor clips, outermost first.
pub type NestChain = SmallVec<[NestLevel; 2]>;

/// What the cache should prepare next.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheRequest {
    /// Sequence playhead.
    pub playhead: i64,
    /// Discontinuous seek: flush and re-seek before decoding.
    pub reset: bool,
    /// Interactive scrub: write one audio chunk and stop.
    pub scrubbing: bool,
    pub nests: NestChain,
}

impl CacheRequest {
    pub fn new(playhead: i64, reset: bool) -> Self {
        Self {
            playhead,
            reset,
            ..Self::default()
        }
    }
}

/// Timing snapshot of a clip, shared with its cacher.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipTiming {
    pub placement: ClipPlacement,
    pub sequence_rate: f64,
    pub speed: f64,
    pub media_speed: f64,
    pub reverse: bool,
    pub max_length: i64,
    pub max_queue_size: usize,
}

impl ClipTiming {
    pub fn direction(&self) -> PlayDirection {
        PlayDirection::from_reverse(self.reverse)
    }

    /// Combined clip and footage speed.
    pub fn playback_speed(&self) -> f64 {
        self.speed * self.media_speed
    }

    /// Source seconds shown at sequence `playhead`.
    pub fn playhead_to_seconds(&self, playhead: i64) -> f64 {
        let clip_frame = timeline_to_clip_frame(playhead, self.placement.clip_in, self.placement.timeline_in);
        clip_frame_to_seconds(
            clip_frame,
            self.sequence_rate,
            self.speed,
            self.media_speed,
            self.reverse,
            self.max_length,
        )
    }

    /// Source timestamp shown at sequence `playhead`.
    pub fn playhead_to_timestamp(&self, playhead: i64, stream: &StreamInfo) -> i64 {
        seconds_to_source_timestamp(self.playhead_to_seconds(playhead), stream.time_base, stream.start_time)
    }
}

/// Progress of a clip's decode session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenState {
    Closed,
    Opening,
    Open,
    Failed,
}

impl OpenState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Opening,
            2 => Self::Open,
            3 => Self::Failed,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Opening => 1,
            Self::Open => 2,
            Self::Failed => 3,
        }
    }
}

/// State a clip shares with whoever runs its cache passes.
#[derive(Debug)]
pub struct SharedCacheState {
    pub queue: Mutex<FrameQueue>,
    pub timing: Mutex<ClipTiming>,
    pub reached_end: AtomicBool,
    /// The consumer is waiting for one more frame: grow the limit by one
    /// and decode forward even in reverse.
    pub ignore_reverse: AtomicBool,
    pub interrupt: AtomicBool,
    /// The audio write cursor no longer matches the mix buffer.
    pub audio_cursor_reset: AtomicBool,
    open_state: AtomicU8,
}

impl SharedCacheState {
    pub fn new(timing: ClipTiming) -> Self {
        Self {
            queue: Mutex::new(FrameQueue::new()),
            timing: Mutex::new(timing),
            reached_end: AtomicBool::new(false),
            ignore_reverse: AtomicBool::new(false),
            interrupt: AtomicBool::new(false),
            audio_cursor_reset: AtomicBool::new(false),
            open_state: AtomicU8::new(OpenState::Closed.as_u8()),
        }
    }

    pub fn open_state(&self) -> OpenState {
        OpenState::from_u8(self.open_state.load(Ordering::Acquire))
    }

    pub fn set_open_state(&self, state: OpenState) {
        self.open_state.store(state.as_u8(), Ordering::Release);
    }

    pub fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }
}

/// Where audio clips mix their output.
#[derive(Debug, Clone)]
pub struct AudioSink {
    pub buffer: Arc<MixBuffer>,
    /// Sequence frame at mix buffer byte 0.
    pub origin: Arc<AtomicI64>,
    pub rate: u32,
}

/// Audio write position carried between passes.
#[derive(Debug, Default)]
struct AudioCursor {
    /// Playhead of the last reset.
    target_frame: i64,
    just_reset: bool,
    write: Option<u64>,
    /// Chunk being written and the byte index reached in it.
    pending: Option<(AudioChunk, usize)>,
}

/// Runs cache passes for one clip.
pub struct ClipCacher {
    session: DecodeSession,
    shared: Arc<SharedCacheState>,
    audio: Option<AudioSink>,
    /// Wait for the device when the mix buffer is full instead of ending
    /// the pass.
    blocking_audio: bool,
    cursor: AudioCursor,
}

impl ClipCacher {
    pub fn new(session: DecodeSession, shared: Arc<SharedCacheState>, audio: Option<AudioSink>, blocking_audio: bool) -> Self {
        Self {
            session,
            shared,
            audio,
            blocking_audio,
            cursor: AudioCursor::default(),
        }
    }

    pub fn session(&self) -> &DecodeSession {
        &self.session
    }

    /// Run one pass for `request`.
    pub fn run(&mut self, request: &CacheRequest) {
        let timing = self.shared.timing.lock().clone();
        if self.shared.audio_cursor_reset.swap(false, Ordering::AcqRel) {
            self.cursor.write = None;
            self.cursor.pending = None;
        }
        if request.reset {
            self.reset_cache(request.playhead, &timing);
        }
        if self.session.stream().is_video() {
            self.cache_video(request.playhead, &timing);
        } else {
            self.cache_audio(request, &timing);
        }
    }

    /// Flush and re-seek for a discontinuous jump to `playhead`.
    fn reset_cache(&mut self, playhead: i64, timing: &ClipTiming) {
        let stream = self.session.stream();
        let target = timing.playhead_to_timestamp(playhead, stream);
        let infinite = stream.infinite_length;
        let is_video = stream.is_video();
        self.shared.reached_end.store(false, Ordering::Release);

        let result = if is_video {
            if infinite {
                return;
            }
            self.shared.queue.lock().clear();
            self.session.seek_video(target, timing.reverse)
        } else {
            self.cursor.target_frame = playhead;
            self.cursor.just_reset = true;
            self.cursor.pending = None;
            self.session.seek_audio(target, timing.reverse)
        };
        match result {
            Ok(()) => debug!("Reset {} to {}", self.session.path().display(), target),
            Err(e) => warn!("Seeking {} to {} failed: {}", self.session.path().display(), target, e),
        }
    }

    fn report_decode_failure(&self, e: &DecodeError) {
        error!("Decoding {} failed: {}", self.session.path().display(), e);
    }

    /// Fill the frame queue around `playhead`.
    pub fn cache_video(&mut self, playhead: i64, timing: &ClipTiming) {
        let stream = self.session.stream();
        let target = timing.playhead_to_timestamp(playhead, stream);
        let quarter = stream.time_base.quarter_second();
        let infinite = stream.infinite_length;

        let ignore_reverse = self.shared.ignore_reverse.swap(false, Ordering::AcqRel);
        let (queued, smallest) = {
            let queue = self.shared.queue.lock();
            (queue.len(), queue.min_pts())
        };
        let limit = if ignore_reverse {
            queued + 1
        } else if timing.reverse {
            timing.max_queue_size * 2
        } else {
            timing.max_queue_size
        };
        if queued >= limit {
            return;
        }

        let reverse = timing.reverse && !ignore_reverse;
        let refill_before = if reverse { smallest } else { None };
        if let Some(smallest) = refill_before {
            self.shared.reached_end.store(false, Ordering::Release);
            if let Err(e) = self.session.seek((smallest - quarter).max(0)) {
                self.report_decode_failure(&e);
                return;
            }
        }

        // reverse passes publish in one step so the consumer never sees a
        // gap below the frames already queued
        let mut batch: Vec<SharedFrame> = Vec::new();
        loop {
            if self.shared.interrupted() {
                return;
            }
            let frame = match self.session.decode_next() {
                Ok(RawFrame::Video(frame)) => frame,
                Ok(RawFrame::Audio(_)) => {
                    error!("Audio data on video stream of {}", self.session.path().display());
                    break;
                }
                Err(DecodeError::EndOfStream) => {
                    self.shared.reached_end.store(true, Ordering::Release);
                    break;
                }
                Err(e) => {
                    self.report_decode_failure(&e);
                    break;
                }
            };

            if reverse {
                let done = match refill_before {
                    Some(smallest) => frame.pts >= smallest,
                    None => frame.pts > target,
                };
                if done {
                    break;
                }
                batch.push(Arc::new(frame));
                continue;
            }

            let mut queue = self.shared.queue.lock();
            queue.append(Arc::new(frame));
            if queue.len() >= limit {
                if infinite || queue.has_frame_at_or_after(target) {
                    return;
                }
                queue.evict_earliest();
            }
        }

        if !batch.is_empty() {
            let mut queue = self.shared.queue.lock();
            for frame in batch {
                queue.append(frame);
            }
            while queue.len() > limit {
                queue.evict_furthest_past(target, PlayDirection::Reverse);
            }
        }
    }

    /// Mix decoded audio into the mix buffer from the clip's write cursor.
    pub fn cache_audio(&mut self, request: &CacheRequest, timing: &ClipTiming) {
        let Some(sink) = self.audio.clone() else {
            return;
        };
        let placement = timing.placement;
        let mut timeline_in = placement.timeline_in;
        let mut timeline_out = placement.timeline_out;
        let mut target_frame = self.cursor.target_frame;
        let mut frame_skip = 0;
        let mut last_rate = timing.sequence_rate;

        for level in request.nests.iter().rev() {
            let lift = |frame: i64| refactor_frame_number(frame, last_rate, level.frame_rate) + level.timeline_in_wt - level.clip_in_wt;
            timeline_in = lift(timeline_in);
            timeline_out = lift(timeline_out).min(level.timeline_out_wt);
            target_frame = lift(target_frame);
            frame_skip = refactor_frame_number(frame_skip, last_rate, level.frame_rate);
            let uncovered = level.timeline_in_wt - timeline_in;
            if uncovered > 0 {
                frame_skip += uncovered;
            }
            last_rate = level.frame_rate;
        }

        let origin = sink.origin.load(Ordering::Acquire);
        let limit_out = buffer_offset_from_frame(last_rate, timeline_out, origin, sink.rate);
        let speed = timing.playback_speed();

        loop {
            if self.shared.interrupted() || sink.buffer.is_closed() {
                return;
            }

            if self.cursor.pending.is_none() {
                let Some(mut chunk) = self.next_audio_chunk(timing.reverse) else {
                    return;
                };
                let len = chunk.data.len();
                let mut index = 0usize;

                if self.cursor.just_reset {
                    let stream = self.session.stream();
                    let target_secs = timing.playhead_to_seconds(self.cursor.target_frame);
                    let chunk_secs = stream.time_base.to_seconds(chunk.pts - stream.start_time.max(0));
                    let samples = ((target_secs - chunk_secs) * sink.rate as f64 / speed).round().max(0.0) as usize;
                    let forward = (samples * FRAME_BYTES).min(len);
                    index = if timing.reverse { len - forward } else { forward };
                    self.cursor.just_reset = false;
                }

                let write = match self.cursor.write {
                    Some(write) => write,
                    None => {
                        let mut write = buffer_offset_from_frame(last_rate, timeline_in.max(target_frame), origin, sink.rate);
                        if frame_skip > 0 {
                            let skipped = buffer_offset_from_frame(last_rate, (timeline_in + frame_skip).max(target_frame), origin, sink.rate);
                            index += skipped.saturating_sub(write) as usize;
                            write = skipped;
                        }
                        self.cursor.write = Some(write);
                        write
                    }
                };

                if index < len {
                    let clip_secs = bytes_to_seconds(write, sink.rate) + origin as f64 / last_rate
                        - timeline_in as f64 / last_rate
                        + placement.clip_in as f64 / timing.sequence_rate;
                    apply_transition_gain(&placement, &mut chunk.data[index..], clip_secs, sink.rate);
                }
                self.cursor.pending = Some((chunk, index));
            }

            let Some((chunk, index)) = self.cursor.pending.as_mut() else {
                return;
            };
            let mut write = self.cursor.write.unwrap_or(0);
            let remaining = chunk.data.get(*index..).unwrap_or(&[]);
            let outcome = if self.blocking_audio {
                sink.buffer.write_blocking(&mut write, remaining, Some(limit_out), &self.shared.interrupt)
            } else {
                sink.buffer.write(&mut write, remaining, Some(limit_out))
            };
            *index += outcome.consumed;
            let finished = *index >= chunk.data.len();
            self.cursor.write = Some(write);

            if finished {
                self.cursor.pending = None;
            } else {
                // out of room, past the clip end, or interrupted
                return;
            }
            if request.scrubbing || write >= limit_out {
                return;
            }
        }
    }

    fn next_audio_chunk(&mut self, reverse: bool) -> Option<AudioChunk> {
        let result = if reverse {
            self.session.decode_reverse_chunk()
        } else {
            match self.session.decode_next() {
                Ok(RawFrame::Audio(chunk)) => Ok(chunk),
                Ok(RawFrame::Video(_)) => Err(DecodeError::DecodeFailed("video frame on an audio stream".into())),
                Err(e) => Err(e),
            }
        };
        match result {
            Ok(chunk) => Some(chunk),
            Err(DecodeError::EndOfStream) => {
                self.shared.reached_end.store(true, Ordering::Release);
                None
            }
            Err(e) => {
                self.report_decode_failure(&e);
                None
            }
        }
    }

    /// Release the decode session.
    pub fn close(&mut self) {
        self.session.close();
        self.cursor = AudioCursor::default();
    }
}

/// Fade a block starting at clip time `start_secs` by the clip's opening
/// and closing transitions.
fn apply_transition_gain(placement: &ClipPlacement, data: &mut [u8], start_secs: f64, rate: u32) {
    let end_secs = start_secs + bytes_to_seconds(data.len() as u64, rate);
    for span in placement.opening.iter().chain(placement.closing.iter()) {
        if span.overlaps(start_secs, end_secs) {
            apply_gain_ramp(data, span.gain_at(start_secs), span.gain_at(end_secs));
        }
    }
}
