//! Decoding through an `ffmpeg` sidecar process.
//!
//! Each seek restarts the process with an input-side `-ss`, which makes
//! ffmpeg decode from the preceding keyframe and drop everything before the
//! requested time. Output is raw frames on stdout; timestamps are assigned
//! from the seek point and the output cadence.

use crate::error::{DecodeError, DecodeResult};
use crate::filter::FilterGraph;
use crate::source::{AudioChunk, FrameSource, RawFrame, SourceOpener, SourceOptions};
use ffmpeg_sidecar::child::FfmpegChild;
use ffmpeg_sidecar::command::FfmpegCommand;
use reel_core::audio_format::{CHUNK_SAMPLES, FRAME_BYTES};
use reel_core::{DecodedFrame, FrameBuffer, PixelFormat};
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::ChildStdout;
use tracing::{debug, error};

/// Opens [`FfmpegSource`]s using a located `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegOpener {
    binary: PathBuf,
}

impl FfmpegOpener {
    /// Find `ffmpeg` on the `PATH`.
    pub fn locate() -> DecodeResult<Self> {
        let binary = which::which("ffmpeg")
            .map_err(|e| DecodeError::open_failed("ffmpeg", format!("ffmpeg not found: {}", e)))?;
        debug!("Using ffmpeg at {}", binary.display());
        Ok(Self { binary })
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl SourceOpener for FfmpegOpener {
    fn open(&self, path: &Path, options: &SourceOptions) -> DecodeResult<Box<dyn FrameSource>> {
        if !path.exists() {
            return Err(DecodeError::open_failed(path, "file not found"));
        }
        let mut source = FfmpegSource::new(self.binary.clone(), path, options.clone())?;
        // Start the process now so a broken file fails the open, not the first decode.
        source.seek(options.stream.start_time)?;
        Ok(Box::new(source))
    }
}

/// Geometry of raw video frames on the pipe.
#[derive(Debug, Clone, Copy)]
struct VideoLayout {
    width: u32,
    height: u32,
    format: PixelFormat,
    frame_duration: i64,
}

/// A [`FrameSource`] backed by an `ffmpeg` child process.
pub struct FfmpegSource {
    binary: PathBuf,
    path: PathBuf,
    options: SourceOptions,
    video: Option<VideoLayout>,
    child: Option<FfmpegChild>,
    stdout: Option<ChildStdout>,
    /// Timestamp of the first output unit since the last seek.
    origin: i64,
    /// Frames (video) or sample frames (audio) read since the last seek.
    emitted: u64,
    started: bool,
}

impl FfmpegSource {
    pub fn new(binary: PathBuf, path: &Path, options: SourceOptions) -> DecodeResult<Self> {
        let video = match &options.graph {
            FilterGraph::Video(graph) => {
                let stream = options.stream.video().ok_or_else(|| {
                    DecodeError::stream_info_failed(path, "video graph on a non-video stream")
                })?;
                let frame_duration = (options.stream.time_base.frame_duration(stream.frame_rate)
                    / graph.fields_per_frame())
                .max(1);
                Some(VideoLayout {
                    width: stream.width,
                    height: stream.height,
                    format: graph.output,
                    frame_duration,
                })
            }
            FilterGraph::Audio(_) => None,
        };

        Ok(Self {
            binary,
            path: path.to_path_buf(),
            origin: options.stream.start_time,
            options,
            video,
            child: None,
            stdout: None,
            emitted: 0,
            started: false,
        })
    }

    /// Command line for a decode starting `seek_secs` into the file.
    pub fn command_args(&self, seek_secs: Option<f64>) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-nostdin".into(),
            "-threads".into(),
            self.options.threads.to_string(),
        ];
        if let Some(secs) = seek_secs {
            args.push("-ss".into());
            args.push(format!("{:.6}", secs));
        }
        args.push("-i".into());
        args.push(self.path.to_string_lossy().into_owned());
        args.push("-map".into());
        args.push(format!("0:{}", self.options.stream.index));

        match &self.options.graph {
            FilterGraph::Video(graph) => {
                args.extend([
                    "-vf".to_string(),
                    graph.to_filter_string(),
                    "-f".to_string(),
                    "rawvideo".to_string(),
                    "-pix_fmt".to_string(),
                    graph.output.ffmpeg_name().to_string(),
                ]);
            }
            FilterGraph::Audio(graph) => {
                args.extend([
                    "-af".to_string(),
                    graph.to_filter_string(),
                    "-f".to_string(),
                    "s16le".to_string(),
                    "-ac".to_string(),
                    "2".to_string(),
                    "-ar".to_string(),
                    graph.pipe_rate().to_string(),
                ]);
            }
        }
        args.push("-".into());
        args
    }

    /// Timestamp of the first unit ffmpeg emits after seeking to `ts`.
    ///
    /// An accurate seek starts video at the first frame at or after `ts`,
    /// so the origin is rounded up onto the stream's frame grid.
    fn first_output_pts(&self, ts: i64) -> i64 {
        let start = self.options.stream.start_time;
        let offset = ts - start;
        if offset <= 0 {
            return start;
        }
        match self.video {
            Some(layout) => {
                let duration = layout.frame_duration;
                start + (offset + duration - 1) / duration * duration
            }
            None => ts,
        }
    }

    fn spawn(&mut self, ts: i64) -> DecodeResult<()> {
        self.kill();

        let stream = &self.options.stream;
        let offset = ts - stream.start_time;
        let seek_secs = (offset > 0).then(|| stream.time_base.to_seconds(offset));
        let args = self.command_args(seek_secs);
        debug!("Starting ffmpeg for {}: {}", self.path.display(), args.join(" "));

        let mut child = FfmpegCommand::new_with_path(&self.binary)
            .args(&args)
            .spawn()
            .map_err(|e| DecodeError::open_failed(&self.path, format!("failed to start ffmpeg: {}", e)))?;

        let stdout = child
            .take_stdout()
            .ok_or_else(|| DecodeError::open_failed(&self.path, "ffmpeg stdout unavailable"))?;

        if let Some(stderr) = child.take_stderr() {
            let name = self.path.display().to_string();
            let drained = std::thread::Builder::new()
                .name("ffmpeg-stderr".into())
                .spawn(move || {
                    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                        debug!(source = %name, "ffmpeg: {}", line);
                    }
                });
            if let Err(e) = drained {
                error!("Failed to spawn ffmpeg stderr reader: {}", e);
            }
        }

        self.origin = self.first_output_pts(ts);
        self.emitted = 0;
        self.started = true;
        self.child = Some(child);
        self.stdout = Some(stdout);
        Ok(())
    }

    fn read_video(&mut self, layout: VideoLayout) -> DecodeResult<RawFrame> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Err(DecodeError::EndOfStream);
        };
        let mut data = vec![0u8; layout.format.frame_size(layout.width, layout.height)];
        match stdout.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(self.finish()),
            Err(e) => {
                self.kill();
                return Err(DecodeError::DecodeFailed(format!(
                    "reading frame from {}: {}",
                    self.path.display(),
                    e
                )));
            }
        }

        let pts = self.origin + self.emitted as i64 * layout.frame_duration;
        self.emitted += 1;
        let buffer = FrameBuffer::from_packed(layout.width, layout.height, layout.format, data)
            .map_err(|e| DecodeError::DecodeFailed(e.to_string()))?;
        Ok(RawFrame::Video(DecodedFrame::new(buffer, pts, layout.frame_duration)))
    }

    fn read_audio(&mut self, output_rate: u32) -> DecodeResult<RawFrame> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Err(DecodeError::EndOfStream);
        };
        let mut data = vec![0u8; CHUNK_SAMPLES * FRAME_BYTES];
        let mut filled = 0;
        while filled < data.len() {
            match stdout.read(&mut data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.kill();
                    return Err(DecodeError::DecodeFailed(format!(
                        "reading samples from {}: {}",
                        self.path.display(),
                        e
                    )));
                }
            }
        }
        filled -= filled % FRAME_BYTES;
        if filled == 0 {
            return Err(self.finish());
        }
        data.truncate(filled);

        let source_secs = self.emitted as f64 * self.options.speed / output_rate as f64;
        let pts = self.origin + self.options.stream.time_base.from_seconds(source_secs);
        self.emitted += (filled / FRAME_BYTES) as u64;
        Ok(RawFrame::Audio(AudioChunk::new(pts, data)))
    }

    /// Reap a process whose output ran dry and classify how it ended.
    fn finish(&mut self) -> DecodeError {
        self.stdout = None;
        let Some(mut child) = self.child.take() else {
            return DecodeError::EndOfStream;
        };
        match child.wait() {
            Ok(status) if status.success() => DecodeError::EndOfStream,
            Ok(status) => DecodeError::DecodeFailed(format!(
                "ffmpeg exited with {} while decoding {}",
                status,
                self.path.display()
            )),
            Err(e) => DecodeError::DecodeFailed(format!("waiting for ffmpeg: {}", e)),
        }
    }

    fn kill(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            // already exited is fine
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl FrameSource for FfmpegSource {
    fn seek(&mut self, ts: i64) -> DecodeResult<()> {
        self.spawn(ts)
    }

    fn next_frame(&mut self) -> DecodeResult<RawFrame> {
        if !self.started {
            self.spawn(self.origin)?;
        }
        match (&self.options.graph, self.video) {
            (FilterGraph::Video(_), Some(layout)) => self.read_video(layout),
            (FilterGraph::Audio(graph), _) => {
                let rate = graph.output_rate;
                self.read_audio(rate)
            }
            (FilterGraph::Video(_), None) => Err(DecodeError::DecodeFailed("missing video layout".into())),
        }
    }

    fn close(&mut self) {
        self.kill();
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.kill();
    }
}
