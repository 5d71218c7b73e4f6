//! Runtime clip: the consumer side of a clip's frame cache.
//!
//! A [`Clip`] pairs the editing-side [`ClipConfig`] with the decode
//! machinery. Opening starts a cache worker (or an inline cacher), the
//! render path asks [`Clip::frame`] for the frame at a playhead, and every
//! lookup pokes the cache so decoding stays ahead of playback.

use crossbeam_channel::Sender;
use reel_core::playhead::{refactor_frame_number, timecode};
use reel_core::{FrameRate, PlaybackConfig, SharedFrame};
use reel_media::{DecodeSession, SessionOptions, SourceOpener, StreamInfo};
use reel_timeline::{ClipConfig, ClipId, ClipPlacement, MediaRef, TrackKind};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::cache::{AudioSink, CacheRequest, ClipCacher, ClipTiming, NestChain, OpenState, SharedCacheState};
use crate::queue::PlayDirection;
use crate::worker::{CacheWorker, ClipEvent, WorkerSetup};

/// Why [`Clip::frame`] had nothing to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMiss {
    /// The clip is closed or still opening.
    NotOpen,
    /// Frames are queued but none matches the playhead.
    NotFound,
    /// The queue is empty.
    QueueExhausted,
}

/// Result of a frame lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameLookup {
    Ready(SharedFrame),
    /// A nearby frame, shown while the cache resets for an inexact seek.
    Stale(SharedFrame),
    Missing(FrameMiss),
}

impl FrameLookup {
    /// Whether the caller should retry for the exact frame.
    pub fn texture_failed(&self) -> bool {
        !matches!(self, Self::Ready(_))
    }

    pub fn frame(&self) -> Option<&SharedFrame> {
        match self {
            Self::Ready(frame) | Self::Stale(frame) => Some(frame),
            Self::Missing(_) => None,
        }
    }
}

/// Services a clip needs to open.
#[derive(Clone)]
pub struct ClipContext {
    pub opener: Arc<dyn SourceOpener>,
    pub audio: AudioSink,
    pub events: Sender<ClipEvent>,
}

enum Driver {
    Idle,
    Worker(CacheWorker),
    Inline(Box<ClipCacher>),
}

/// A clip being played.
pub struct Clip {
    id: ClipId,
    config: ClipConfig,
    placement: ClipPlacement,
    sequence_rate: f64,
    playback: PlaybackConfig,
    max_length: i64,
    max_queue_size: usize,
    shared: Arc<SharedCacheState>,
    driver: Driver,
    open: bool,
    events: Option<Sender<ClipEvent>>,
    last_invalid_ts: Option<i64>,
    needs_audio_reset: bool,
    /// Decode options changed since the session opened.
    needs_reopen: bool,
}

impl Clip {
    pub fn new(id: ClipId, config: ClipConfig, placement: ClipPlacement, sequence_rate: f64, playback: PlaybackConfig) -> Self {
        let mut clip = Self {
            id,
            config,
            placement,
            sequence_rate,
            playback,
            max_length: 0,
            max_queue_size: 1,
            shared: Arc::new(SharedCacheState::new(ClipTiming {
                placement,
                sequence_rate,
                speed: 1.0,
                media_speed: 1.0,
                reverse: false,
                max_length: 0,
                max_queue_size: 1,
            })),
            driver: Driver::Idle,
            open: false,
            events: None,
            last_invalid_ts: None,
            needs_audio_reset: false,
            needs_reopen: false,
        };
        clip.refresh_timing();
        clip
    }

    pub fn id(&self) -> ClipId {
        self.id
    }

    pub fn config(&self) -> &ClipConfig {
        &self.config
    }

    pub fn placement(&self) -> &ClipPlacement {
        &self.placement
    }

    pub fn max_length(&self) -> i64 {
        self.max_length
    }

    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Apply edited settings. Timing takes effect on the next cache pass.
    /// Changes baked into the open decode session (media, speed, direction,
    /// pitch) mark the clip for reopening.
    pub fn update(&mut self, config: ClipConfig, placement: ClipPlacement) {
        if self.open
            && (config.media != self.config.media
                || config.speed != self.config.speed
                || config.reverse != self.config.reverse
                || config.maintain_audio_pitch != self.config.maintain_audio_pitch)
        {
            debug!("{} needs reopening after an edit", self.id);
            self.needs_reopen = true;
        }
        self.config = config;
        self.placement = placement;
        self.refresh_timing();
    }

    fn refresh_timing(&mut self) {
        self.recalculate_max_length();
        self.max_queue_size = self.compute_max_queue_size();
        *self.shared.timing.lock() = self.timing();
    }

    fn timing(&self) -> ClipTiming {
        ClipTiming {
            placement: self.placement,
            sequence_rate: self.sequence_rate,
            speed: self.config.speed,
            media_speed: self.config.media_speed(),
            reverse: self.config.reverse,
            max_length: self.max_length,
            max_queue_size: self.max_queue_size,
        }
    }

    fn compute_max_queue_size(&self) -> usize {
        match self.stream() {
            Some(stream) if stream.is_video() => {
                let rate = stream.frame_rate().map_or(self.sequence_rate, FrameRate::to_fps_f64);
                self.playback
                    .max_queue_size(rate, self.config.media_speed(), stream.interlaced(), stream.infinite_length)
            }
            _ => 1,
        }
    }

    /// Length of the clip's media in sequence frames at the clip's speed.
    pub fn recalculate_max_length(&mut self) -> i64 {
        let fr = self.sequence_rate / self.config.speed;
        self.max_length = match &self.config.media {
            Some(MediaRef::Footage {
                footage,
                stream_index,
            }) => match footage.info.stream(*stream_index) {
                Some(stream) if stream.infinite_length => i64::MAX,
                stream => {
                    let seconds = stream
                        .and_then(StreamInfo::duration_seconds)
                        .or(footage.info.duration_seconds)
                        .unwrap_or(0.0);
                    (seconds * fr).floor() as i64
                }
            },
            Some(MediaRef::Sequence(nested)) => refactor_frame_number(nested.end_frame, nested.frame_rate.to_fps_f64(), fr),
            None => 0,
        };
        self.max_length
    }

    /// Whether the clip should be open at `playhead`. Clips open up to two
    /// seconds before they start.
    pub fn is_active(&self, playhead: i64) -> bool {
        let p = &self.placement;
        self.config.enabled
            && p.timeline_in < playhead + (self.sequence_rate * 2.0).ceil() as i64
            && p.timeline_out > playhead
            && playhead - p.timeline_in + p.clip_in < self.max_length
    }

    /// Clip-relative time in seconds at `playhead`.
    pub fn timecode(&self, playhead: i64) -> f64 {
        timecode(playhead, self.placement.clip_in, self.placement.timeline_in, self.sequence_rate)
    }

    pub fn uses_cacher(&self) -> bool {
        self.config.uses_cacher()
    }

    pub fn track_kind(&self) -> TrackKind {
        self.config.track_kind()
    }

    fn stream(&self) -> Option<&StreamInfo> {
        self.config.media.as_ref()?.stream()
    }

    fn is_audio(&self) -> bool {
        self.stream().is_some_and(StreamInfo::is_audio)
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Whether the open session was built for settings that have since
    /// changed. The owner should close and open the clip again.
    pub fn needs_reopen(&self) -> bool {
        self.needs_reopen
    }

    /// Whether the decode session is ready.
    pub fn finished_opening(&self) -> bool {
        self.open && self.shared.open_state() == OpenState::Open
    }

    pub fn open_state(&self) -> OpenState {
        self.shared.open_state()
    }

    /// Start decoding. With `multithreaded` a worker thread opens the
    /// session in the background; otherwise it opens here and cache passes
    /// run on the caller's thread. Returns false if already open or if the
    /// clip could not start.
    pub fn open(&mut self, multithreaded: bool, context: &ClipContext) -> bool {
        if self.open {
            return false;
        }
        self.last_invalid_ts = None;
        self.events = Some(context.events.clone());

        let Some(MediaRef::Footage {
            footage,
            stream_index,
        }) = self.config.media.clone()
        else {
            self.shared.set_open_state(OpenState::Open);
            self.open = true;
            return true;
        };
        let Some(stream) = footage.info.stream(stream_index).cloned() else {
            error!("{} has no stream {} in {}", self.id, stream_index, footage.path.display());
            return false;
        };

        self.refresh_timing();
        self.shared = Arc::new(SharedCacheState::new(self.timing()));
        self.needs_audio_reset = stream.is_audio();
        let audio = stream.is_audio().then(|| context.audio.clone());
        let options = SessionOptions {
            speed: self.config.speed * self.config.media_speed(),
            maintain_pitch: self.config.maintain_audio_pitch,
            audio_rate: self.playback.audio_rate,
            disable_multithreading_for_images: self.playback.disable_multithreading_for_images,
        };

        if multithreaded {
            let setup = WorkerSetup {
                clip: self.id,
                opener: Arc::clone(&context.opener),
                path: footage.path.clone(),
                stream,
                options,
                audio,
                events: context.events.clone(),
            };
            match CacheWorker::spawn(setup, Arc::clone(&self.shared)) {
                Ok(worker) => self.driver = Driver::Worker(worker),
                Err(e) => {
                    error!("Failed to start cache worker for {}: {}", self.id, e);
                    self.shared.set_open_state(OpenState::Failed);
                    return false;
                }
            }
        } else {
            match DecodeSession::open(context.opener.as_ref(), &footage.path, &stream, options) {
                Ok(session) => {
                    let cacher = ClipCacher::new(session, Arc::clone(&self.shared), audio, false);
                    self.driver = Driver::Inline(Box::new(cacher));
                    self.shared.set_open_state(OpenState::Open);
                    let _ = context.events.send(ClipEvent::Opened { clip: self.id });
                }
                Err(error) => {
                    self.shared.set_open_state(OpenState::Failed);
                    let _ = context.events.send(ClipEvent::OpenFailed { clip: self.id, error });
                    return false;
                }
            }
        }

        self.open = true;
        debug!("Opened {} ({})", self.id, if multithreaded { "worker" } else { "inline" });
        true
    }

    /// Ask the cache to prepare `playhead`. Returns false when the clip is
    /// not open or has nothing to decode.
    pub fn cache(&mut self, playhead: i64, reset: bool, scrubbing: bool, nests: NestChain) -> bool {
        if !self.open || !self.uses_cacher() {
            return false;
        }
        let is_audio = self.is_audio();
        let reset = reset || (is_audio && std::mem::take(&mut self.needs_audio_reset));
        let request = CacheRequest {
            playhead,
            reset,
            scrubbing,
            nests,
        };
        match &mut self.driver {
            Driver::Worker(worker) => {
                let interrupt = reset && (is_audio || !self.shared.queue.lock().is_empty());
                worker.request(request, interrupt);
            }
            Driver::Inline(cacher) => cacher.run(&request),
            Driver::Idle => return false,
        }
        true
    }

    /// Frame to show at `playhead`, poking the cache as a side effect.
    pub fn frame(&mut self, playhead: i64) -> FrameLookup {
        if !self.finished_opening() {
            return FrameLookup::Missing(FrameMiss::NotOpen);
        }
        let Some(stream) = self.stream() else {
            return FrameLookup::Missing(FrameMiss::NotOpen);
        };
        let timing = self.timing();
        let target = timing.playhead_to_timestamp(playhead, stream).max(0);
        let second = stream.time_base.ticks_per_second();
        let infinite = stream.infinite_length;

        let mut reset = false;
        let mut poke = true;
        let lookup = {
            let mut queue = self.shared.queue.lock();
            let found = if infinite {
                queue.iter().next().cloned()
            } else {
                queue
                    .nearest(target, PlayDirection::Forward)
                    .or_else(|| queue.iter().min_by_key(|f| f.pts).cloned())
            };

            match found {
                None => {
                    reset = true;
                    FrameLookup::Missing(FrameMiss::QueueExhausted)
                }
                Some(frame) if infinite => FrameLookup::Ready(frame),
                Some(frame) => {
                    queue.prune_behind(frame.pts, timing.direction(), self.playback.previous_queue, second);
                    let next_pts = queue.next_pts_after(frame.pts).unwrap_or(frame.pts + frame.duration);

                    if frame.pts == target || (target > frame.pts && target < next_pts) {
                        FrameLookup::Ready(frame)
                    } else if target > frame.pts && self.shared.reached_end.load(Ordering::Acquire) {
                        self.shared.reached_end.store(false, Ordering::Release);
                        poke = false;
                        FrameLookup::Ready(frame)
                    } else if self.last_invalid_ts != Some(target)
                        && (target < frame.pts || target - frame.pts > second)
                    {
                        info!("Resetting {} for {} (nearest frame {})", self.id, target, frame.pts);
                        reset = true;
                        self.last_invalid_ts = Some(target);
                        if self.playback.fast_seeking {
                            FrameLookup::Stale(frame)
                        } else {
                            FrameLookup::Missing(FrameMiss::NotFound)
                        }
                    } else {
                        if queue.len() >= self.max_queue_size {
                            queue.evict_earliest();
                        }
                        self.shared.ignore_reverse.store(true, Ordering::Release);
                        FrameLookup::Missing(FrameMiss::NotFound)
                    }
                }
            }
        };

        if poke {
            self.cache(playhead, reset, false, NestChain::new());
        }
        lookup
    }

    /// Forget queued frames and the consumer's seek memory.
    pub fn reset(&mut self) {
        self.shared.queue.lock().clear();
        self.shared.reached_end.store(false, Ordering::Release);
        self.last_invalid_ts = None;
    }

    /// Mark the audio write position stale; the next audio poke resets.
    pub fn reset_audio(&mut self) {
        self.shared.audio_cursor_reset.store(true, Ordering::Release);
        self.needs_audio_reset = true;
    }

    /// Stop decoding and drop the queue. Without `wait` a worker thread
    /// finishes closing in the background.
    pub fn close(&mut self, wait: bool) {
        if !self.open {
            return;
        }
        self.shared.interrupt.store(true, Ordering::Release);
        match std::mem::replace(&mut self.driver, Driver::Idle) {
            Driver::Worker(mut worker) => worker.close(wait),
            Driver::Inline(mut cacher) => {
                cacher.close();
                self.shared.set_open_state(OpenState::Closed);
                if let Some(events) = &self.events {
                    let _ = events.send(ClipEvent::Closed { clip: self.id });
                }
            }
            Driver::Idle => self.shared.set_open_state(OpenState::Closed),
        }
        self.reset();
        self.needs_audio_reset = false;
        self.needs_reopen = false;
        self.open = false;
        debug!("Closed {}", self.id);
    }
}

impl Drop for Clip {
    fn drop(&mut self) {
        self.close(true);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};
    use reel_audio::MixBuffer;
    use reel_media::{synthetic_media, SyntheticOpener};
    use reel_timeline::{Footage, NestedSequence};
    use std::sync::atomic::AtomicI64;
    use std::time::Duration;

    pub(crate) fn footage(seconds: u32) -> Arc<Footage> {
        Arc::new(Footage::new(synthetic_media("clip.mov", seconds)))
    }

    pub(crate) fn context(opener: SyntheticOpener) -> (ClipContext, Receiver<ClipEvent>) {
        let (events, rx) = unbounded();
        let context = ClipContext {
            opener: Arc::new(opener),
            audio: AudioSink {
                buffer: Arc::new(MixBuffer::new(48_000 * 4 * 2).unwrap()),
                origin: Arc::new(AtomicI64::new(0)),
                rate: 48_000,
            },
            events,
        };
        (context, rx)
    }

    fn video_clip(seconds: u32, timeline_in: i64, timeline_out: i64) -> Clip {
        let config = ClipConfig::new("v", Some(MediaRef::footage(footage(seconds), 0)), timeline_in, timeline_out, -1);
        let placement = ClipPlacement::plain(&config);
        Clip::new(ClipId(1), config, placement, 30.0, PlaybackConfig::default())
    }

    fn keyframe_every_frame() -> SyntheticOpener {
        SyntheticOpener::new().with_keyframe_interval(1)
    }

    #[test]
    fn test_max_length() {
        let mut clip = video_clip(10, 0, 300);
        assert_eq!(clip.max_length(), 300);

        let mut config = clip.config().clone();
        config.speed = 2.0;
        clip.update(config.clone(), ClipPlacement::plain(&config));
        assert_eq!(clip.max_length(), 150);

        config.media = Some(MediaRef::Sequence(NestedSequence {
            frame_rate: FrameRate::FPS_24,
            end_frame: 48,
        }));
        clip.update(config.clone(), ClipPlacement::plain(&config));
        assert_eq!(clip.max_length(), 30);

        config.media = None;
        clip.update(config.clone(), ClipPlacement::plain(&config));
        assert_eq!(clip.recalculate_max_length(), 0);
    }

    #[test]
    fn test_is_active_window() {
        let clip = video_clip(10, 100, 200);
        assert!(!clip.is_active(39));
        assert!(clip.is_active(41));
        assert!(clip.is_active(199));
        assert!(!clip.is_active(200));

        let mut config = clip.config().clone();
        config.enabled = false;
        let disabled = Clip::new(ClipId(2), config.clone(), ClipPlacement::plain(&config), 30.0, PlaybackConfig::default());
        assert!(!disabled.is_active(150));
    }

    #[test]
    fn test_is_active_past_media_end() {
        // 1 s of media stretched over a 3 s clip
        let clip = video_clip(1, 0, 90);
        assert!(clip.is_active(29));
        assert!(!clip.is_active(30));
    }

    #[test]
    fn test_queue_size_from_config() {
        let clip = video_clip(10, 0, 300);
        // 3 behind plus 0.5 s ahead at 30 fps
        assert_eq!(clip.max_queue_size(), 18);
    }

    #[test]
    fn test_cache_needs_open_clip() {
        let mut clip = video_clip(10, 0, 300);
        assert!(!clip.cache(0, true, false, NestChain::new()));
        assert_eq!(clip.frame(0), FrameLookup::Missing(FrameMiss::NotOpen));
    }

    #[test]
    fn test_inline_open_and_lookup() {
        let (context, events) = context(keyframe_every_frame());
        let mut clip = video_clip(10, 0, 300);
        assert!(clip.open(false, &context));
        assert!(!clip.open(false, &context));
        assert_eq!(events.try_recv(), Ok(ClipEvent::Opened { clip: ClipId(1) }));
        assert!(clip.finished_opening());

        let first = clip.frame(10);
        assert_eq!(first, FrameLookup::Missing(FrameMiss::QueueExhausted));
        assert!(first.texture_failed());

        let lookup = clip.frame(10);
        assert!(!lookup.texture_failed());
        assert_eq!(lookup.frame().map(|f| f.pts), Some(10));
        assert_eq!(clip.frame(11).frame().map(|f| f.pts), Some(11));
    }

    #[test]
    fn test_far_seek_resets() {
        let (context, _events) = context(keyframe_every_frame());
        let mut clip = video_clip(10, 0, 300);
        clip.open(false, &context);
        clip.frame(0);
        assert!(!clip.frame(0).texture_failed());

        assert_eq!(clip.frame(200), FrameLookup::Missing(FrameMiss::NotFound));
        assert_eq!(clip.frame(200).frame().map(|f| f.pts), Some(200));
    }

    #[test]
    fn test_fast_seeking_keeps_stale_frame() {
        let (context, _events) = context(keyframe_every_frame());
        let config = ClipConfig::new("v", Some(MediaRef::footage(footage(10), 0)), 0, 300, -1);
        let playback = PlaybackConfig {
            fast_seeking: true,
            ..PlaybackConfig::default()
        };
        let mut clip = Clip::new(ClipId(1), config.clone(), ClipPlacement::plain(&config), 30.0, playback);
        clip.open(false, &context);
        clip.frame(0);
        assert!(!clip.frame(0).texture_failed());

        let lookup = clip.frame(200);
        assert!(lookup.texture_failed());
        assert!(matches!(lookup, FrameLookup::Stale(_)));
    }

    #[test]
    fn test_reached_end_holds_last_frame() {
        let (context, _events) = context(keyframe_every_frame());
        // 1 s of media on a 2 s clip
        let mut clip = video_clip(1, 0, 60);
        clip.open(false, &context);
        clip.frame(20);
        assert_eq!(clip.frame(29).frame().map(|f| f.pts), Some(29));
        assert!(clip.shared.reached_end.load(Ordering::Acquire));
        let lookup = clip.frame(31);
        assert!(!lookup.texture_failed());
        assert_eq!(lookup.frame().map(|f| f.pts), Some(29));
        assert!(!clip.shared.reached_end.load(Ordering::Acquire));
    }

    #[test]
    fn test_open_failure_reports_event() {
        let (context, events) = context(SyntheticOpener::failing());
        let mut clip = video_clip(10, 0, 300);
        assert!(!clip.open(false, &context));
        assert!(!clip.is_open());
        assert_eq!(clip.open_state(), OpenState::Failed);
        assert!(matches!(events.try_recv(), Ok(ClipEvent::OpenFailed { .. })));
    }

    #[test]
    fn test_worker_open_and_close() {
        let (context, events) = context(keyframe_every_frame());
        let mut clip = video_clip(10, 0, 300);
        assert!(clip.open(true, &context));
        assert_eq!(
            events.recv_timeout(Duration::from_secs(5)),
            Ok(ClipEvent::Opened { clip: ClipId(1) })
        );

        let mut found = None;
        for _ in 0..200 {
            if let FrameLookup::Ready(frame) = clip.frame(45) {
                found = Some(frame.pts);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(found, Some(45));

        clip.close(true);
        assert!(!clip.is_open());
        assert_eq!(clip.queue_len(), 0);
        assert_eq!(
            events.recv_timeout(Duration::from_secs(5)),
            Ok(ClipEvent::Closed { clip: ClipId(1) })
        );
    }

    #[test]
    fn test_worker_recovers_from_backward_seek() {
        let (context, events) = context(keyframe_every_frame());
        let mut clip = video_clip(10, 0, 300);
        assert!(clip.open(true, &context));
        assert_eq!(
            events.recv_timeout(Duration::from_secs(5)),
            Ok(ClipEvent::Opened { clip: ClipId(1) })
        );
        let wait_ready = |clip: &mut Clip, playhead: i64| {
            for _ in 0..200 {
                if let FrameLookup::Ready(frame) = clip.frame(playhead) {
                    return Some(frame.pts);
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            None
        };
        assert_eq!(wait_ready(&mut clip, 200), Some(200));

        // the retry lands before the worker has taken the reset
        clip.frame(10);
        clip.frame(10);
        assert_eq!(wait_ready(&mut clip, 10), Some(10));
    }

    #[test]
    fn test_speed_edit_marks_open_clip_for_reopen() {
        let (context, _events) = context(keyframe_every_frame());
        let mut clip = video_clip(10, 0, 300);

        let mut config = clip.config().clone();
        config.speed = 2.0;
        clip.update(config.clone(), ClipPlacement::plain(&config));
        assert!(!clip.needs_reopen());

        clip.open(false, &context);
        let mut moved = config.clone();
        moved.timeline_in = 10;
        moved.timeline_out = 160;
        clip.update(moved.clone(), ClipPlacement::plain(&moved));
        assert!(!clip.needs_reopen());

        let mut reversed = moved.clone();
        reversed.reverse = true;
        clip.update(reversed.clone(), ClipPlacement::plain(&reversed));
        assert!(clip.needs_reopen());

        clip.close(false);
        assert!(!clip.needs_reopen());
    }

    #[test]
    fn test_timecode() {
        let clip = video_clip(10, 100, 200);
        assert!((clip.timecode(130) - 1.0).abs() < 1e-9);
        assert_eq!(clip.track_kind(), TrackKind::Video);
        assert!(clip.uses_cacher());
    }
}
