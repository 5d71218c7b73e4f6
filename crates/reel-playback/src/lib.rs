//! Reel Playback - Per-clip frame cache and playback session
//!
//! Architecture:
//! - `FrameQueue`: a clip's bounded set of decoded frames
//! - `ClipCacher`: decode passes that fill the queue or the mix buffer
//! - `CacheWorker`: one thread per open clip, latest-wins requests
//! - `Clip`: the consumer side, frame lookup and lifecycle
//! - `PlaybackSession`: the clips of one sequence and their shared mix buffer

pub mod cache;
pub mod clip;
pub mod queue;
pub mod session;
pub mod worker;

pub use cache::{AudioSink, CacheRequest, ClipCacher, ClipTiming, NestChain, NestLevel, OpenState, SharedCacheState};
pub use clip::{Clip, ClipContext, FrameLookup, FrameMiss};
pub use queue::{FrameQueue, PlayDirection};
pub use session::PlaybackSession;
pub use worker::{CacheWorker, ClipEvent, WorkerSetup};
