//! Playback of the remote voice.
//!
//! * [`PlaybackScheduler`]: gapless scheduling against the output clock,
//!   active-set tracking and barge-in handling.
//! * [`PlaybackRunner`]: the task that feeds server events and
//!   voice-ended notifications into the scheduler and keeps the call
//!   status up to date.

pub mod runner;
pub mod scheduler;

pub use runner::{spawn_playback, CallSignal, PlaybackRunner};
pub use scheduler::{rate_from_mime, PlaybackQueueEntry, PlaybackScheduler};
