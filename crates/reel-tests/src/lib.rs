//! Integration test crate for Reel.
//!
//! Holds scenarios that run the timeline, decode, audio and cache crates
//! together against the synthetic frame source.

#[cfg(test)]
mod audio;

#[cfg(test)]
mod playback;

#[cfg(test)]
mod timeline;
