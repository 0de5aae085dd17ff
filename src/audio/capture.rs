//! Microphone capture via `cpal`.
//!
//! [`AudioCapture`] wraps the cpal host/device/stream lifecycle.  Call
//! [`AudioCapture::start`] to begin streaming [`AudioChunk`]s over an
//! unbounded channel.  The returned [`StreamHandle`] is a [`MediaTrack`]:
//! stopping or dropping it stops the underlying cpal stream.
//!
//! The [`MicrophoneSource`] trait is the seam the call controller acquires
//! the microphone through, so the controller can be driven without audio
//! hardware.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// A single buffer of raw audio as delivered by the cpal callback.
///
/// Samples are interleaved `f32` at the device's native rate.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Interleaved PCM samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate of this chunk in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
}

// ---------------------------------------------------------------------------
// MediaTrack
// ---------------------------------------------------------------------------

/// A live device stream owned by a call.
///
/// Not `Send`: cpal streams are pinned to the thread that created them on
/// some platforms.
pub trait MediaTrack {
    /// Short label for logs (`"microphone"`, `"speaker"`, …).
    fn kind(&self) -> &'static str;

    /// Stop the stream.  Calling `stop` twice is a no-op.
    fn stop(&mut self);

    /// `true` until [`stop`](Self::stop) has been called.
    fn is_live(&self) -> bool;
}

// ---------------------------------------------------------------------------
// StreamHandle
// ---------------------------------------------------------------------------

/// Keeps a cpal stream alive until stopped or dropped.
pub struct StreamHandle {
    kind: &'static str,
    stream: Option<cpal::Stream>,
}

impl StreamHandle {
    pub(crate) fn new(kind: &'static str, stream: cpal::Stream) -> Self {
        Self {
            kind,
            stream: Some(stream),
        }
    }
}

impl MediaTrack for StreamHandle {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::debug!("{}: pause before drop failed: {e}", self.kind);
            }
            log::debug!("{}: stream stopped", self.kind);
        }
    }

    fn is_live(&self) -> bool {
        self.stream.is_some()
    }
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while acquiring or running the microphone.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("input device {0:?} not found")]
    DeviceNotFound(String),

    #[error("failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

// ---------------------------------------------------------------------------
// MicrophoneSource
// ---------------------------------------------------------------------------

/// Acquires a microphone stream for a call.
///
/// A failure here is the "permission denied" path: the call never opens.
pub trait MicrophoneSource: Send + Sync {
    fn acquire(
        &self,
        tx: mpsc::UnboundedSender<AudioChunk>,
    ) -> Result<Box<dyn MediaTrack>, CaptureError>;
}

/// The system microphone, optionally selected by device name.
#[derive(Debug, Clone, Default)]
pub struct DefaultMicrophone {
    pub device_name: Option<String>,
}

impl MicrophoneSource for DefaultMicrophone {
    fn acquire(
        &self,
        tx: mpsc::UnboundedSender<AudioChunk>,
    ) -> Result<Box<dyn MediaTrack>, CaptureError> {
        let capture = AudioCapture::new(self.device_name.as_deref())?;
        log::info!(
            "microphone: {} Hz, {} ch",
            capture.sample_rate(),
            capture.channels()
        );
        Ok(Box::new(capture.start(tx)?))
    }
}

// ---------------------------------------------------------------------------
// AudioCapture
// ---------------------------------------------------------------------------

/// Microphone capture device wrapper built on top of `cpal`.
pub struct AudioCapture {
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_rate: u32,
    channels: u16,
}

impl AudioCapture {
    /// Open `device_name`, or the default input device when `None`, using the
    /// device's preferred stream configuration.
    pub fn new(device_name: Option<&str>) -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = match device_name {
            None => host.default_input_device().ok_or(CaptureError::NoDevice)?,
            Some(name) => host
                .input_devices()?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| CaptureError::DeviceNotFound(name.to_string()))?,
        };

        let supported = device.default_input_config()?;
        let channels = supported.channels();
        let sample_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        Ok(Self {
            device,
            config,
            sample_rate,
            channels,
        })
    }

    /// Start recording and send [`AudioChunk`]s to `tx`.
    ///
    /// Sending never blocks the audio thread; chunks sent after the receiver
    /// is dropped are discarded.
    pub fn start(&self, tx: mpsc::UnboundedSender<AudioChunk>) -> Result<StreamHandle, CaptureError> {
        let sample_rate = self.sample_rate;
        let channels = self.channels;

        let stream = self.device.build_input_stream(
            &self.config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = tx.send(AudioChunk {
                    samples: data.to_vec(),
                    sample_rate,
                    channels,
                });
            },
            |err: cpal::StreamError| {
                log::error!("cpal input stream error: {err}");
            },
            None,
        )?;

        stream.play()?;
        Ok(StreamHandle::new("microphone", stream))
    }

    /// Native sample rate of the capture stream in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of interleaved channels in each [`AudioChunk`].
    pub fn channels(&self) -> u16 {
        self.channels
    }
}
