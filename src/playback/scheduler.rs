//! Gapless scheduling of inbound audio chunks against the output clock.
//!
//! Every chunk starts at `max(clock, next_start_time)` and pushes
//! `next_start_time` forward by its duration (divided by the playback
//! rate), so consecutive chunks butt up against each other with no gap and
//! no overlap.  A chunk that arrives late simply starts at the current
//! clock; accumulated silence collapses rather than being padded.
//!
//! ```text
//! clock  0.0        0.2        1.0        1.2   1.5
//!        |A─────────────────────|B──────────|
//!        ▲ A arrives            ▲ B starts  ▲ interrupt: stop A and B, next = 0
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::audio::{decode_frame, AudioBuffer, AudioOutput, CodecError, VoiceId};

/// One buffer handed to the output and not yet finished.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackQueueEntry {
    pub id: VoiceId,
    /// Output clock time the buffer starts at, in seconds.
    pub start_time: f64,
    /// Wall-clock length after the playback rate is applied.
    pub duration: f64,
}

impl PlaybackQueueEntry {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Sample rate carried in an `audio/pcm;rate=NNNN` MIME type, if any.
///
/// ```
/// use live_call::playback::rate_from_mime;
///
/// assert_eq!(rate_from_mime("audio/pcm;rate=24000"), Some(24_000));
/// assert_eq!(rate_from_mime("audio/pcm"), None);
/// ```
pub fn rate_from_mime(mime: &str) -> Option<u32> {
    mime.split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}

/// Owns `next_start_time` and the active set.  Single writer: only the
/// playback task touches it.
pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    playback_rate: f32,
    sample_rate: u32,
    channels: u16,
    next_start_time: f64,
    next_id: VoiceId,
    active: BTreeMap<VoiceId, PlaybackQueueEntry>,
}

impl PlaybackScheduler {
    /// `sample_rate` and `channels` describe inbound chunks that do not
    /// carry their own rate.  A non-positive `playback_rate` falls back
    /// to `1.0`.
    pub fn new(
        output: Arc<dyn AudioOutput>,
        playback_rate: f32,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        let playback_rate = if playback_rate.is_finite() && playback_rate > 0.0 {
            playback_rate
        } else {
            log::warn!("playback: invalid voice rate {playback_rate}, using 1.0");
            1.0
        };
        Self {
            output,
            playback_rate,
            sample_rate,
            channels,
            next_start_time: 0.0,
            next_id: 1,
            active: BTreeMap::new(),
        }
    }

    /// Schedule a decoded buffer right after everything already queued.
    pub fn schedule(&mut self, buffer: AudioBuffer) -> PlaybackQueueEntry {
        let now = self.output.current_time();
        let start_time = now.max(self.next_start_time);
        let duration = buffer.duration() / self.playback_rate as f64;

        let id = self.next_id;
        self.next_id += 1;

        let entry = PlaybackQueueEntry {
            id,
            start_time,
            duration,
        };
        self.active.insert(id, entry);
        self.output.start(id, &buffer, start_time, self.playback_rate);
        self.next_start_time = entry.end_time();

        log::trace!(
            "playback: voice {id} at {start_time:.3}s for {duration:.3}s (clock {now:.3}s)"
        );
        entry
    }

    /// Decode a base64 PCM chunk and schedule it.  The rate in `mime_type`
    /// wins over the configured one.
    pub fn schedule_chunk(
        &mut self,
        data: &str,
        mime_type: Option<&str>,
    ) -> Result<PlaybackQueueEntry, CodecError> {
        let rate = mime_type.and_then(rate_from_mime).unwrap_or(self.sample_rate);
        let buffer = decode_frame(data, rate, self.channels)?;
        Ok(self.schedule(buffer))
    }

    /// A voice finished naturally.  Returns `true` when this emptied the
    /// active set.
    pub fn on_ended(&mut self, id: VoiceId) -> bool {
        self.active.remove(&id).is_some() && self.active.is_empty()
    }

    /// Barge-in: stop and forget every active voice and reset the schedule
    /// so the next chunk starts at the current clock.  Returns how many
    /// voices were cut off.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.stop_all();
        self.next_start_time = 0.0;
        stopped
    }

    /// Teardown: drop everything scheduled without waiting for it to play.
    pub fn discard(&mut self) {
        let stopped = self.stop_all();
        self.next_start_time = 0.0;
        if stopped > 0 {
            log::debug!("playback: discarded {stopped} scheduled voices");
        }
    }

    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn active(&self) -> impl Iterator<Item = &PlaybackQueueEntry> {
        self.active.values()
    }

    pub fn output_level(&self) -> f32 {
        self.output.level()
    }

    fn stop_all(&mut self) -> usize {
        let count = self.active.len();
        for id in self.active.keys() {
            self.output.stop(*id);
        }
        self.active.clear();
        count
    }
}
