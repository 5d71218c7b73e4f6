//! Playback session: every runtime clip of one sequence plus the mix buffer
//! they share.

use crossbeam_channel::{unbounded, Receiver, Sender};
use reel_audio::MixBuffer;
use reel_core::{FrameRate, PlaybackConfig, Result};
use reel_media::SourceOpener;
use reel_timeline::{ClipId, ClipPlacement, Sequence};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{AudioSink, NestChain};
use crate::clip::{Clip, ClipContext, FrameLookup, FrameMiss};
use crate::worker::ClipEvent;

/// Drives the clips of one sequence during playback.
pub struct PlaybackSession {
    sequence_rate: f64,
    config: PlaybackConfig,
    context: ClipContext,
    events: Receiver<ClipEvent>,
    clips: BTreeMap<ClipId, Clip>,
    closed: bool,
}

impl PlaybackSession {
    pub fn new(sequence_rate: FrameRate, config: PlaybackConfig, opener: Arc<dyn SourceOpener>) -> Result<Self> {
        let buffer = Arc::new(MixBuffer::new(config.audio_buffer_bytes)?);
        let (sender, events): (Sender<ClipEvent>, Receiver<ClipEvent>) = unbounded();
        let context = ClipContext {
            opener,
            audio: AudioSink {
                buffer,
                origin: Arc::new(AtomicI64::new(0)),
                rate: config.audio_rate,
            },
            events: sender,
        };
        Ok(Self {
            sequence_rate: sequence_rate.to_fps_f64(),
            config,
            context,
            events,
            clips: BTreeMap::new(),
            closed: false,
        })
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn clip(&self, id: ClipId) -> Option<&Clip> {
        self.clips.get(&id)
    }

    pub fn clip_count(&self) -> usize {
        self.clips.len()
    }

    pub fn mix_buffer(&self) -> &Arc<MixBuffer> {
        &self.context.audio.buffer
    }

    /// Bring the runtime clips in line with `sequence`: create new ones,
    /// update edited ones, and drop removed ones.
    pub fn sync_clips(&mut self, sequence: &Sequence) {
        let live: Vec<ClipId> = sequence.clips().map(|(id, _)| id).collect();
        self.clips.retain(|id, clip| {
            let keep = live.contains(id);
            if !keep {
                clip.close(false);
                debug!("Dropped runtime clip {}", id);
            }
            keep
        });

        for (id, config) in sequence.clips() {
            let placement = sequence.placement(id).unwrap_or_else(|| ClipPlacement::plain(config));
            match self.clips.get_mut(&id) {
                Some(clip) => {
                    if clip.config() != config || *clip.placement() != placement {
                        clip.update(config.clone(), placement);
                    }
                }
                None => {
                    let clip = Clip::new(id, config.clone(), placement, self.sequence_rate, self.config.clone());
                    self.clips.insert(id, clip);
                }
            }
        }
    }

    /// Open clips that became active at `playhead`, close the ones that
    /// stopped being active, and keep audio clips fed. Clips whose decode
    /// settings were edited are reopened.
    pub fn handle_media(&mut self, sequence: &Sequence, playhead: i64, multithreaded: bool) {
        self.sync_clips(sequence);
        for clip in self.clips.values_mut() {
            if clip.is_open() && clip.needs_reopen() {
                clip.close(false);
            }
            if clip.is_active(playhead) {
                if !clip.is_open() {
                    clip.open(multithreaded, &self.context);
                }
                if clip.is_open() && clip.track_kind() == reel_timeline::TrackKind::Audio {
                    clip.cache(playhead, false, false, NestChain::new());
                }
            } else if clip.is_open() {
                clip.close(false);
            }
        }
    }

    /// Start audio from `origin_frame`: silence the mix buffer and make every
    /// clip re-seek its audio.
    pub fn start_playback(&mut self, origin_frame: i64) {
        self.context.audio.buffer.clear();
        self.context.audio.origin.store(origin_frame, Ordering::Release);
        for clip in self.clips.values_mut() {
            clip.reset_audio();
        }
        info!("Playback started at frame {}", origin_frame);
    }

    pub fn origin_frame(&self) -> i64 {
        self.context.audio.origin.load(Ordering::Acquire)
    }

    pub fn frame(&mut self, clip: ClipId, playhead: i64) -> FrameLookup {
        match self.clips.get_mut(&clip) {
            Some(clip) => clip.frame(playhead),
            None => FrameLookup::Missing(FrameMiss::NotOpen),
        }
    }

    /// Device side of the mix buffer.
    pub fn read_audio(&self, out: &mut [u8]) -> usize {
        self.context.audio.buffer.consume(out)
    }

    pub fn events(&self) -> Receiver<ClipEvent> {
        self.events.clone()
    }

    /// Close every clip, waiting for workers, then release the mix buffer.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        for clip in self.clips.values_mut() {
            clip.close(true);
        }
        self.context.audio.buffer.close();
        self.closed = true;
        debug!("Playback session closed");
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.close();
    }
}
