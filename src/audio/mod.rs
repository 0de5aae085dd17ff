//! Audio plumbing for a live call: microphone capture, PCM codec, rate
//! conversion and the output device.
//!
//! # Capture path
//!
//! ```text
//! Microphone → cpal callback → AudioChunk (mpsc) → downmix → StreamResampler(16 kHz)
//!           → FrameAssembler(4096) → encode_frame → outbound queue
//! ```
//!
//! # Playback path
//!
//! ```text
//! base64 chunk → decode_frame → AudioBuffer → PlaybackScheduler
//!             → OutputTimeline::start → cpal output callback (render)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use live_call::audio::{AudioCapture, AudioChunk};
//! use tokio::sync::mpsc;
//!
//! let (tx, mut rx) = mpsc::unbounded_channel::<AudioChunk>();
//! let capture = AudioCapture::new(None).unwrap();
//! let _handle = capture.start(tx).unwrap(); // drop handle → stops stream
//!
//! while let Some(chunk) = rx.blocking_recv() {
//!     println!("received {} samples @ {}Hz", chunk.samples.len(), chunk.sample_rate);
//! }
//! ```

pub mod capture;
pub mod codec;
pub mod frame;
pub mod level;
pub mod output;
pub mod pipeline;
pub mod resample;

pub use capture::{
    AudioCapture, AudioChunk, CaptureError, DefaultMicrophone, MediaTrack, MicrophoneSource,
    StreamHandle,
};
pub use codec::{
    decode_frame, encode_frame, pcm_to_buffer, samples_to_pcm, AudioBuffer, CodecError,
    SampleConversion,
};
pub use frame::{AudioFrame, FrameAssembler};
pub use level::{rms, LevelMeter};
pub use output::{
    AudioOutput, DefaultSpeaker, OutputError, OutputTimeline, SpeakerSource, VoiceId,
};
pub use pipeline::{spawn_capture_pump, CapturePipeline};
pub use resample::{downmix, resample, stretch_for_output, ResamplerError, StreamResampler};
