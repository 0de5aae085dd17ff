//! Capture pipeline: device chunks to outbound PCM frames.
//!
//! ```text
//! cpal callback ─AudioChunk─▶ downmix ─▶ StreamResampler(→16 kHz) ─▶ FrameAssembler(4096)
//!                                                   ─▶ encode_frame ─▶ OutboundFrame
//! ```
//!
//! The pump never waits on the transport: frames are offered with
//! `try_send`, and a full queue drops the frame with a warning so capture
//! keeps pace with the device.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use super::capture::AudioChunk;
use super::codec::{encode_frame, SampleConversion};
use super::frame::FrameAssembler;
use super::resample::{downmix, ResamplerError, StreamResampler};
use crate::config::AudioConfig;
use crate::live::{MediaBlob, OutboundFrame};
use crate::session::{lock_status, SharedStatus};

/// Converts raw device chunks into encoded media blobs.
pub struct CapturePipeline {
    target_rate: u32,
    conversion: SampleConversion,
    resampler: Option<StreamResampler>,
    assembler: FrameAssembler,
}

impl CapturePipeline {
    pub fn new(target_rate: u32, frame_samples: usize, conversion: SampleConversion) -> Self {
        Self {
            target_rate,
            conversion,
            resampler: None,
            assembler: FrameAssembler::new(frame_samples.max(1), target_rate),
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(
            config.capture_sample_rate,
            config.frame_samples,
            config.sample_conversion,
        )
    }

    /// Feed one device chunk; returns the blobs for every completed window.
    ///
    /// The resampler lives across calls and is rebuilt only if the device
    /// rate changes.  A chunk that cannot be resampled is dropped.
    pub fn push(&mut self, chunk: &AudioChunk) -> Vec<MediaBlob> {
        let mono = downmix(&chunk.samples, chunk.channels);
        let resampled = self
            .resampler_for(chunk.sample_rate)
            .and_then(|resampler| resampler.process(&mono));
        let samples = match resampled {
            Ok(samples) => samples,
            Err(e) => {
                log::warn!("capture: dropping {} Hz chunk: {e}", chunk.sample_rate);
                return Vec::new();
            }
        };

        self.assembler
            .push(&samples)
            .into_iter()
            .map(|frame| MediaBlob::audio(encode_frame(&frame.samples, self.conversion), frame.sample_rate))
            .collect()
    }

    fn resampler_for(&mut self, source_rate: u32) -> Result<&mut StreamResampler, ResamplerError> {
        let resampler = match self.resampler.take() {
            Some(r) if r.source_rate() == source_rate => r,
            _ => {
                log::debug!("capture: resampling {source_rate} Hz -> {} Hz", self.target_rate);
                StreamResampler::new(source_rate, self.target_rate)?
            }
        };
        Ok(self.resampler.insert(resampler))
    }
}

/// Spawn the task draining device chunks into the outbound queue.
///
/// Ends when the chunk channel closes (microphone stopped), when the
/// outbound channel closes, or when aborted.
pub fn spawn_capture_pump(
    mut pipeline: CapturePipeline,
    mut chunks: mpsc::UnboundedReceiver<AudioChunk>,
    outbound: mpsc::Sender<OutboundFrame>,
    status: SharedStatus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(chunk) = chunks.recv().await {
            for blob in pipeline.push(&chunk) {
                match outbound.try_send(OutboundFrame::Media(blob)) {
                    Ok(()) => lock_status(&status).frames_sent += 1,
                    Err(TrySendError::Full(_)) => {
                        log::warn!("capture: outbound queue full, audio frame dropped");
                        lock_status(&status).frames_dropped += 1;
                    }
                    Err(TrySendError::Closed(_)) => {
                        log::debug!("capture: outbound closed, pump stopping");
                        return;
                    }
                }
            }
        }
        log::debug!("capture: chunk channel closed, pump stopping");
    })
}
