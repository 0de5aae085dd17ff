//! Output device, audio clock and voice mixer.
//!
//! [`OutputTimeline`] is the playback side's equivalent of an audio
//! context: it owns a monotonic clock measured in rendered frames and a set
//! of *voices*, each a mono buffer that starts at a fixed frame on that
//! clock.  The output device callback calls [`OutputTimeline::render`],
//! which mixes every voice inside the block, advances the clock and
//! reports voices that finished on the `ended` channel.
//!
//! The [`AudioOutput`] trait is the narrow view the playback scheduler
//! needs (clock, start, stop).
//!
//! ```text
//! scheduler ──start(id, buffer, at)──▶ OutputTimeline ◀──render()── cpal callback
//!     ▲                                      │
//!     └──────────── ended(id) ◀──────────────┘
//! ```

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tokio::sync::mpsc;

use super::capture::{MediaTrack, StreamHandle};
use super::codec::AudioBuffer;
use super::level::LevelMeter;
use super::resample::stretch_for_output;

/// Identifier of one scheduled voice.
pub type VoiceId = u64;

// ---------------------------------------------------------------------------
// AudioOutput
// ---------------------------------------------------------------------------

/// Clock and voice control used by the playback scheduler.
pub trait AudioOutput: Send + Sync {
    /// Current position of the output clock in seconds.
    fn current_time(&self) -> f64;

    /// Schedule `buffer` to begin at clock time `at`, played at `rate`×.
    fn start(&self, id: VoiceId, buffer: &AudioBuffer, at: f64, rate: f32);

    /// Silence a voice immediately.  Unknown ids are ignored.
    fn stop(&self, id: VoiceId);

    /// Smoothed output level in `[0.0, 1.0]`.
    fn level(&self) -> f32 {
        0.0
    }
}

// ---------------------------------------------------------------------------
// OutputTimeline
// ---------------------------------------------------------------------------

struct Voice {
    id: VoiceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

struct Mixer {
    frames_rendered: u64,
    voices: Vec<Voice>,
    meter: LevelMeter,
    // per-render buffers, reused across callbacks
    scratch: Vec<f32>,
    ended: Vec<VoiceId>,
}

/// Frame-accurate mixer shared between the scheduler and the device
/// callback.  Cheap to clone.
#[derive(Clone)]
pub struct OutputTimeline {
    sample_rate: u32,
    channels: u16,
    inner: Arc<Mutex<Mixer>>,
    ended_tx: mpsc::UnboundedSender<VoiceId>,
}

impl OutputTimeline {
    /// Create a timeline rendering `channels` interleaved channels at
    /// `sample_rate` Hz.  Finished voices are reported on `ended_tx`.
    pub fn new(sample_rate: u32, channels: u16, ended_tx: mpsc::UnboundedSender<VoiceId>) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            inner: Arc::new(Mutex::new(Mixer {
                frames_rendered: 0,
                voices: Vec::new(),
                meter: LevelMeter::default(),
                scratch: Vec::new(),
                ended: Vec::new(),
            })),
            ended_tx,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of voices scheduled or playing.
    pub fn voice_count(&self) -> usize {
        self.lock().voices.len()
    }

    /// Fill `out` (interleaved) with the next block and advance the clock.
    pub fn render(&self, out: &mut [f32]) {
        let channels = self.channels as usize;
        let frames = out.len() / channels;

        let mut mixer = self.lock();
        let Mixer {
            frames_rendered,
            voices,
            meter,
            scratch,
            ended,
        } = &mut *mixer;

        let block_start = *frames_rendered;
        let block_end = block_start + frames as u64;
        scratch.clear();
        scratch.resize(frames, 0.0);

        for voice in voices.iter() {
            if voice.start_frame >= block_end || voice.end_frame() <= block_start {
                continue;
            }
            let from = voice.start_frame.max(block_start);
            let to = voice.end_frame().min(block_end);
            for t in from..to {
                scratch[(t - block_start) as usize] += voice.samples[(t - voice.start_frame) as usize];
            }
        }

        *frames_rendered = block_end;
        meter.update(scratch);

        for (frame, &sample) in out.chunks_exact_mut(channels).zip(scratch.iter()) {
            frame.fill(sample);
        }

        voices.retain(|v| {
            let done = v.end_frame() <= block_end;
            if done {
                ended.push(v.id);
            }
            !done
        });
        for id in ended.drain(..) {
            let _ = self.ended_tx.send(id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Mixer> {
        // A poisoned mixer only means a render panicked mid-block; the voice
        // list is still structurally valid.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AudioOutput for OutputTimeline {
    fn current_time(&self) -> f64 {
        self.lock().frames_rendered as f64 / self.sample_rate as f64
    }

    /// A voice never starts before the frame about to be rendered, nor
    /// before the end of a voice already queued: back-to-back chunks whose
    /// rounded boundaries disagree by a frame are butted together instead
    /// of overlapping.
    fn start(&self, id: VoiceId, buffer: &AudioBuffer, at: f64, rate: f32) {
        let samples = stretch_for_output(&buffer.to_mono(), buffer.sample_rate(), rate, self.sample_rate);
        if samples.is_empty() {
            let _ = self.ended_tx.send(id);
            return;
        }

        let requested = (at.max(0.0) * self.sample_rate as f64).round() as u64;
        let mut mixer = self.lock();
        let tail = mixer.voices.iter().map(Voice::end_frame).max().unwrap_or(0);
        let start_frame = requested.max(tail).max(mixer.frames_rendered);
        if start_frame != requested {
            log::trace!("output: voice {id} moved from frame {requested} to {start_frame}");
        }
        mixer.voices.push(Voice {
            id,
            start_frame,
            samples,
        });
    }

    /// Stopping the last voice also silences the level meter.
    fn stop(&self, id: VoiceId) {
        let mut mixer = self.lock();
        mixer.voices.retain(|v| v.id != id);
        if mixer.voices.is_empty() {
            mixer.meter.reset();
        }
    }

    fn level(&self) -> f32 {
        self.lock().meter.level()
    }
}

// ---------------------------------------------------------------------------
// Output device
// ---------------------------------------------------------------------------

/// Errors opening or starting the output device.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("output device {0:?} not found")]
    DeviceNotFound(String),

    #[error("failed to enumerate output devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

/// Opens a speaker for a call and returns the timeline driving it.
pub trait SpeakerSource: Send + Sync {
    fn open(
        &self,
        ended_tx: mpsc::UnboundedSender<VoiceId>,
    ) -> Result<(OutputTimeline, Box<dyn MediaTrack>), OutputError>;
}

/// The system speaker, optionally selected by device name.
#[derive(Debug, Clone, Default)]
pub struct DefaultSpeaker {
    pub device_name: Option<String>,
}

impl SpeakerSource for DefaultSpeaker {
    fn open(
        &self,
        ended_tx: mpsc::UnboundedSender<VoiceId>,
    ) -> Result<(OutputTimeline, Box<dyn MediaTrack>), OutputError> {
        let host = cpal::default_host();
        let device = match self.device_name.as_deref() {
            None => host.default_output_device().ok_or(OutputError::NoDevice)?,
            Some(name) => host
                .output_devices()?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| OutputError::DeviceNotFound(name.to_string()))?,
        };

        let supported = device.default_output_config()?;
        let config: cpal::StreamConfig = supported.into();
        let timeline = OutputTimeline::new(config.sample_rate.0, config.channels, ended_tx);
        log::info!(
            "speaker: {} Hz, {} ch",
            timeline.sample_rate(),
            timeline.channels()
        );

        let render = timeline.clone();
        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| render.render(data),
            |err: cpal::StreamError| {
                log::error!("cpal output stream error: {err}");
            },
            None,
        )?;
        stream.play()?;

        Ok((timeline, Box::new(StreamHandle::new("speaker", stream))))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
