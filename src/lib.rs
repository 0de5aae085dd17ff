//! Live voice/video call client.
//!
//! Streams microphone audio (and optionally camera frames) to a hosted
//! bidirectional streaming endpoint and plays the spoken replies gaplessly,
//! cutting playback off when the user barges in.

pub mod audio;
pub mod config;
pub mod live;
pub mod playback;
pub mod session;
pub mod video;
