//! Decode session: one clip's exclusive handle on its source stream.
//!
//! The session owns the frame source and the filter graph choice, and adds
//! the seek behaviour the cache relies on:
//!
//! - video resets back off a second at a time until the first decoded frame
//!   is at or before the target, compensating for keyframe-granular seeks
//! - reverse audio decodes forward over a one-second look-back window and
//!   hands back the block reversed

use crate::error::{DecodeError, DecodeResult};
use crate::filter::{decode_threads, FilterGraph};
use crate::probe::StreamInfo;
use crate::source::{AudioChunk, FrameSource, RawFrame, SourceOpener, SourceOptions};
use reel_core::audio_format::FRAME_BYTES;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Per-clip decode parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOptions {
    /// Combined clip and footage speed.
    pub speed: f64,
    pub maintain_pitch: bool,
    /// Mix buffer rate.
    pub audio_rate: u32,
    pub disable_multithreading_for_images: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            maintain_pitch: false,
            audio_rate: 48_000,
            disable_multithreading_for_images: false,
        }
    }
}

/// An open decoder for one stream of one clip.
pub struct DecodeSession {
    path: PathBuf,
    stream: StreamInfo,
    graph: FilterGraph,
    options: SessionOptions,
    source: Option<Box<dyn FrameSource>>,
    /// Frame decoded while locating a seek target, returned by the next
    /// `decode_next`.
    held: Option<RawFrame>,
    reached_end: bool,
    /// Source timestamp the next reverse audio block ends at.
    reverse_target: Option<i64>,
}

impl DecodeSession {
    /// Open `stream` of the file at `path` through `opener`.
    pub fn open(
        opener: &dyn SourceOpener,
        path: &Path,
        stream: &StreamInfo,
        options: SessionOptions,
    ) -> DecodeResult<Self> {
        let graph = FilterGraph::for_stream(stream, options.speed, options.maintain_pitch, options.audio_rate);
        let source_options = SourceOptions {
            stream: stream.clone(),
            graph: graph.clone(),
            threads: decode_threads(&stream.codec, options.disable_multithreading_for_images),
            speed: options.speed,
        };

        let source = opener.open(path, &source_options).map_err(|e| {
            error!("Failed to open stream {} of {}: {}", stream.index, path.display(), e);
            e
        })?;

        info!(
            "Opened stream {} of {} ({}, filters: {})",
            stream.index,
            path.display(),
            stream.codec,
            graph.to_filter_string()
        );

        Ok(Self {
            path: path.to_path_buf(),
            stream: stream.clone(),
            graph,
            options,
            source: Some(source),
            held: None,
            reached_end: false,
            reverse_target: None,
        })
    }

    pub fn stream(&self) -> &StreamInfo {
        &self.stream
    }

    pub fn graph(&self) -> &FilterGraph {
        &self.graph
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }

    /// Whether the last decode hit the end of the stream.
    pub fn reached_end(&self) -> bool {
        self.reached_end
    }

    pub fn clear_reached_end(&mut self) {
        self.reached_end = false;
    }

    pub fn reverse_target(&self) -> Option<i64> {
        self.reverse_target
    }

    fn source_mut(&mut self) -> DecodeResult<&mut Box<dyn FrameSource>> {
        self.source
            .as_mut()
            .ok_or_else(|| DecodeError::DecodeFailed("decode session is closed".into()))
    }

    /// Pull the next frame, returning a frame held back by a seek first.
    pub fn decode_next(&mut self) -> DecodeResult<RawFrame> {
        if let Some(frame) = self.held.take() {
            return Ok(frame);
        }
        match self.source_mut()?.next_frame() {
            Err(DecodeError::EndOfStream) => {
                self.reached_end = true;
                Err(DecodeError::EndOfStream)
            }
            other => other,
        }
    }

    /// Flush and seek to the seek point at or before `ts`.
    pub fn seek(&mut self, ts: i64) -> DecodeResult<()> {
        self.held = None;
        self.reached_end = false;
        self.source_mut()?.seek(ts.max(0))
    }

    /// Position the session so the next decoded frame is at or before
    /// `target`. In reverse the search starts a second early so frames
    /// leading up to the target are decoded too.
    pub fn seek_video(&mut self, target: i64, reverse: bool) -> DecodeResult<()> {
        let second = self.stream.time_base.ticks_per_second().max(1);
        let mut seek_ts = if reverse { target - second } else { target };

        loop {
            if seek_ts <= 0 {
                debug!("Seek for {} in {} fell back to the stream start", target, self.path.display());
                return self.seek(0);
            }
            self.seek(seek_ts)?;
            match self.source_mut()?.next_frame() {
                Ok(frame) if frame.pts() <= target => {
                    self.held = Some(frame);
                    return Ok(());
                }
                Ok(_) | Err(DecodeError::EndOfStream) => seek_ts -= second,
                Err(e) => return Err(e),
            }
        }
    }

    /// Position the audio decode for `target`. In reverse the target becomes
    /// the end of the first reversed block.
    pub fn seek_audio(&mut self, target: i64, reverse: bool) -> DecodeResult<()> {
        if reverse {
            self.reverse_target = Some(target);
            self.held = None;
            self.reached_end = false;
            return Ok(());
        }
        self.reverse_target = None;
        self.seek(target)
    }

    /// Decode the block of audio that plays next in reverse.
    ///
    /// Decodes forward from one second before the reverse target, keeping
    /// chunks that start before the target, then cuts the accumulated block
    /// to exactly the source span `[first chunk pts, target)` and reverses it
    /// sample frame by sample frame. The block's start becomes the next
    /// reverse target.
    pub fn decode_reverse_chunk(&mut self) -> DecodeResult<AudioChunk> {
        let target = match self.reverse_target {
            Some(t) if t > self.stream.start_time.max(0) => t,
            _ => {
                self.reached_end = true;
                return Err(DecodeError::EndOfStream);
            }
        };
        let tb = self.stream.time_base;
        let look_back = (target - tb.ticks_per_second()).max(self.stream.start_time.max(0));
        self.seek(look_back)?;

        let mut block: Vec<u8> = Vec::new();
        let mut block_pts: Option<i64> = None;
        loop {
            match self.source_mut()?.next_frame() {
                Ok(RawFrame::Audio(chunk)) => {
                    if chunk.pts >= target {
                        break;
                    }
                    block_pts.get_or_insert(chunk.pts);
                    block.extend_from_slice(&chunk.data);
                }
                Ok(RawFrame::Video(_)) => {
                    return Err(DecodeError::DecodeFailed("video frame on an audio stream".into()))
                }
                Err(DecodeError::EndOfStream) => break,
                Err(e) => return Err(e),
            }
        }

        let Some(start) = block_pts else {
            self.reached_end = true;
            self.reverse_target = None;
            return Err(DecodeError::EndOfStream);
        };

        let span = tb.to_seconds(target - start);
        let samples = (span * self.options.audio_rate as f64 / self.options.speed).round().max(0.0) as usize;
        let cutoff = (samples * FRAME_BYTES).min(block.len() - block.len() % FRAME_BYTES);
        block.truncate(cutoff);
        reverse_sample_frames(&mut block);

        self.reverse_target = Some(start);
        Ok(AudioChunk::new(start, block))
    }

    /// Release the source. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
            debug!("Closed stream {} of {}", self.stream.index, self.path.display());
        }
        self.held = None;
        self.reverse_target = None;
        self.reached_end = false;
    }
}

impl Drop for DecodeSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reverse interleaved stereo s16 sample frames in place.
fn reverse_sample_frames(data: &mut [u8]) {
    let frames = data.len() / FRAME_BYTES;
    for i in 0..frames / 2 {
        let j = frames - 1 - i;
        for b in 0..FRAME_BYTES {
            data.swap(i * FRAME_BYTES + b, j * FRAME_BYTES + b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{AudioStream, FieldOrder, StreamKind, VideoStream};
    use crate::synthetic::SyntheticOpener;
    use reel_core::{FrameRate, TimeBase};

    fn video_stream() -> StreamInfo {
        StreamInfo {
            index: 0,
            codec: "h264".into(),
            time_base: TimeBase::new(1, 30),
            start_time: 0,
            duration: Some(300),
            infinite_length: false,
            kind: StreamKind::Video(VideoStream {
                width: 8,
                height: 4,
                frame_rate: FrameRate::FPS_30,
                pixel_format: "yuv420p".into(),
                field_order: FieldOrder::Progressive,
            }),
        }
    }

    fn audio_stream() -> StreamInfo {
        StreamInfo {
            index: 1,
            codec: "pcm_s16le".into(),
            time_base: TimeBase::new(1, 48_000),
            start_time: 0,
            duration: Some(48_000 * 3),
            infinite_length: false,
            kind: StreamKind::Audio(AudioStream {
                sample_rate: 48_000,
                channels: 2,
            }),
        }
    }

    fn sample_at(data: &[u8], frame: usize) -> i16 {
        i16::from_le_bytes([data[frame * FRAME_BYTES], data[frame * FRAME_BYTES + 1]])
    }

    #[test]
    fn test_seek_video_holds_frame_at_or_before_target() {
        let opener = SyntheticOpener::new().with_keyframe_interval(50);
        let mut session = DecodeSession::open(&opener, Path::new("a.mov"), &video_stream(), SessionOptions::default()).unwrap();
        session.seek_video(75, false).unwrap();
        let first = session.decode_next().unwrap();
        assert_eq!(first.pts(), 50);
        assert_eq!(session.decode_next().unwrap().pts(), 51);
    }

    #[test]
    fn test_seek_video_reverse_starts_a_second_early() {
        let opener = SyntheticOpener::new().with_keyframe_interval(1);
        let mut session = DecodeSession::open(&opener, Path::new("a.mov"), &video_stream(), SessionOptions::default()).unwrap();
        session.seek_video(100, true).unwrap();
        assert_eq!(session.decode_next().unwrap().pts(), 70);
    }

    #[test]
    fn test_seek_video_near_start_seeks_to_zero() {
        let opener = SyntheticOpener::new();
        let mut session = DecodeSession::open(&opener, Path::new("a.mov"), &video_stream(), SessionOptions::default()).unwrap();
        session.seek_video(10, true).unwrap();
        assert_eq!(session.decode_next().unwrap().pts(), 0);
    }

    #[test]
    fn test_end_of_stream_sets_reached_end() {
        let opener = SyntheticOpener::new().with_keyframe_interval(1);
        let mut session = DecodeSession::open(&opener, Path::new("a.mov"), &video_stream(), SessionOptions::default()).unwrap();
        session.seek(299).unwrap();
        session.decode_next().unwrap();
        assert_eq!(session.decode_next(), Err(DecodeError::EndOfStream));
        assert!(session.reached_end());
        session.seek(0).unwrap();
        assert!(!session.reached_end());
    }

    #[test]
    fn test_reverse_chunk_is_reversed_and_walks_back() {
        let opener = SyntheticOpener::new();
        let mut session = DecodeSession::open(&opener, Path::new("a.wav"), &audio_stream(), SessionOptions::default()).unwrap();
        session.seek_audio(72_000, true).unwrap();

        let chunk = session.decode_reverse_chunk().unwrap();
        // look-back of 24000 lands on the chunk boundary at 22528
        assert_eq!(chunk.pts, 22_528);
        assert_eq!(chunk.sample_frames(), 72_000 - 22_528);
        // first sample played is the one just before the target
        assert_eq!(sample_at(&chunk.data, 0), ((72_000 - 1) % 32_768) as i16);
        assert_eq!(sample_at(&chunk.data, chunk.sample_frames() - 1), 22_528);
        assert_eq!(session.reverse_target(), Some(22_528));

        let next = session.decode_reverse_chunk().unwrap();
        assert_eq!(next.pts, 0);
        assert_eq!(next.sample_frames(), 22_528);
        assert_eq!(sample_at(&next.data, 0), 22_527);

        assert_eq!(session.decode_reverse_chunk(), Err(DecodeError::EndOfStream));
        assert!(session.reached_end());
    }

    #[test]
    fn test_close_is_idempotent() {
        let opener = SyntheticOpener::new();
        let mut session = DecodeSession::open(&opener, Path::new("a.mov"), &video_stream(), SessionOptions::default()).unwrap();
        session.close();
        session.close();
        assert!(!session.is_open());
        assert!(matches!(session.decode_next(), Err(DecodeError::DecodeFailed(_))));
    }

    #[test]
    fn test_open_failure_propagates() {
        let opener = SyntheticOpener::failing();
        let result = DecodeSession::open(&opener, Path::new("a.mov"), &video_stream(), SessionOptions::default());
        assert!(matches!(result, Err(DecodeError::OpenFailed { .. })));
    }

    #[test]
    fn test_reverse_sample_frames() {
        let mut data: Vec<u8> = [1i16, -1, 2, -2, 3, -3]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        reverse_sample_frames(&mut data);
        let samples: Vec<i16> = data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![3, -3, 2, -2, 1, -1]);
    }
}
