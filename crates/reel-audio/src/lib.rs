//! Reel Audio - Mixing decoded clip audio for the output device
//!
//! Architecture:
//! - `mix`: sample-level helpers on interleaved s16le stereo blocks
//! - `MixBuffer`: the ring buffer every playing clip mixes into, read by
//!   the audio device, with half-capacity backpressure on writers

pub mod mix;
pub mod mix_buffer;

pub use mix::{apply_gain_ramp, bytes_to_samples, mix_into, mix_sample, samples_to_bytes};
pub use mix_buffer::{MixBuffer, WriteOutcome};
