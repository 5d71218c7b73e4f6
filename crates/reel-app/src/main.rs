//! Reel - command-line playback through the clip cache
//!
//! Places one media file on a sequence and steps the playhead through it,
//! reporting which frames the cache had ready.

use anyhow::{bail, Context, Result};
use reel_core::audio_format::FRAME_BYTES;
use reel_core::{FrameRate, PlaybackConfig};
use reel_media::{synthetic_media, FfmpegOpener, MediaInfo, SourceOpener, SyntheticOpener};
use reel_playback::{ClipEvent, PlaybackSession};
use reel_timeline::{ClipConfig, Footage, MediaRef, Sequence};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Lookups per frame before it counts as a miss.
const MAX_ATTEMPTS: u32 = 50;
const RETRY_DELAY: Duration = Duration::from_millis(10);

const USAGE: &str =
    "usage: reel <media-file> [--frames N] [--reverse] [--speed X] [--audio] [--synthetic] [--config path]";

#[derive(Debug, Clone, PartialEq)]
struct Options {
    path: Option<PathBuf>,
    frames: i64,
    reverse: bool,
    speed: f64,
    audio: bool,
    synthetic: bool,
    config: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            path: None,
            frames: 90,
            reverse: false,
            speed: 1.0,
            audio: false,
            synthetic: false,
            config: None,
        }
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Options> {
    let mut options = Options::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--frames" => {
                let value = args.next().context("--frames needs a value")?;
                options.frames = value.parse().with_context(|| format!("invalid frame count '{}'", value))?;
            }
            "--speed" => {
                let value = args.next().context("--speed needs a value")?;
                options.speed = value.parse().with_context(|| format!("invalid speed '{}'", value))?;
            }
            "--config" => options.config = Some(PathBuf::from(args.next().context("--config needs a path")?)),
            "--reverse" => options.reverse = true,
            "--audio" => options.audio = true,
            "--synthetic" => options.synthetic = true,
            "-h" | "--help" => bail!(USAGE),
            flag if flag.starts_with("--") => bail!("unknown option {}\n{}", flag, USAGE),
            path => options.path = Some(PathBuf::from(path)),
        }
    }
    if options.frames <= 0 {
        bail!("--frames must be positive");
    }
    if options.speed <= 0.0 {
        bail!("--speed must be positive");
    }
    if options.path.is_none() && !options.synthetic {
        bail!(USAGE);
    }
    Ok(options)
}

fn load_config(path: Option<&PathBuf>) -> Result<PlaybackConfig> {
    match path.cloned().or_else(PlaybackConfig::default_path) {
        Some(path) => PlaybackConfig::load(&path).with_context(|| format!("loading {}", path.display())),
        None => Ok(PlaybackConfig::default()),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = parse_args(std::env::args().skip(1))?;
    let config = load_config(options.config.as_ref())?;

    let (info, opener): (MediaInfo, Arc<dyn SourceOpener>) = if options.synthetic {
        let path = options.path.clone().unwrap_or_else(|| PathBuf::from("synthetic.mov"));
        (synthetic_media(path, 10), Arc::new(SyntheticOpener::new()))
    } else {
        let path = options.path.clone().context(USAGE)?;
        let info = MediaInfo::probe(&path)?;
        (info, Arc::new(FfmpegOpener::locate()?))
    };

    let stream = if options.audio {
        info.primary_audio()
    } else {
        info.primary_video()
    }
    .with_context(|| format!("{} has no {} stream", info.path.display(), if options.audio { "audio" } else { "video" }))?;
    let stream_index = stream.index;
    let rate = stream.frame_rate().unwrap_or(FrameRate::FPS_30);
    info!("Playing stream {} of {} at {}", stream_index, info.path.display(), rate);

    let mut sequence = Sequence::new("reel", rate);
    let name = info.path.display().to_string();
    let mut clip = ClipConfig::new(
        name,
        Some(MediaRef::footage(Arc::new(Footage::new(info)), stream_index)),
        0,
        options.frames,
        if options.audio { 0 } else { -1 },
    );
    clip.speed = options.speed;
    clip.reverse = options.reverse;
    let id = sequence.add_clip(clip)?;

    let audio_rate = config.audio_rate;
    let mut session = PlaybackSession::new(rate, config, opener)?;
    let events = session.events();
    session.start_playback(0);

    let fps = rate.to_fps_f64();
    let block = ((audio_rate as f64 / fps).round() as usize) * FRAME_BYTES;
    let mut audio_out = vec![0u8; block];
    let (mut hits, mut misses, mut silent) = (0u32, 0u32, 0u32);

    for playhead in 0..options.frames {
        session.handle_media(&sequence, playhead, true);
        for event in events.try_iter() {
            match event {
                ClipEvent::OpenFailed { clip, error } => warn!("{} failed to open: {}", clip, error),
                other => debug!("{:?}", other),
            }
        }

        if options.audio {
            std::thread::sleep(Duration::from_secs_f64(1.0 / fps));
            session.read_audio(&mut audio_out);
            if audio_out.iter().all(|&b| b == 0) {
                silent += 1;
            }
            continue;
        }

        let mut attempts = 0;
        loop {
            let lookup = session.frame(id, playhead);
            if let (false, Some(frame)) = (lookup.texture_failed(), lookup.frame()) {
                debug!("Frame {} -> pts {}", playhead, frame.pts);
                hits += 1;
                break;
            }
            attempts += 1;
            if attempts >= MAX_ATTEMPTS {
                warn!("No frame for playhead {} after {} lookups", playhead, attempts);
                misses += 1;
                break;
            }
            std::thread::sleep(RETRY_DELAY);
        }
    }

    session.close();
    if options.audio {
        info!("Played {} frames of audio, {} silent", options.frames, silent);
    } else {
        info!("Played {} frames: {} ready, {} missed", options.frames, hits, misses);
    }
    Ok(())
}
