//! Channel mixing and sample-rate conversion.
//!
//! Capture devices rarely run at the 16 kHz the live service expects, and
//! output devices rarely run at the 24 kHz it replies with.
//!
//! 1. [`downmix`]: average interleaved channels down to mono.
//! 2. [`StreamResampler`]: continuous conversion of the capture stream.
//!    Keeps one `rubato` FFT resampler and the not-yet-consumed input
//!    between calls, so the output rate is exact however the device slices
//!    its buffers.
//! 3. [`resample`]: one-shot linear interpolation of a complete buffer.
//!    Used on the playback side, where every chunk is an independent voice,
//!    and to apply the playback-rate multiplier: playing a 24 kHz chunk at
//!    `1.25×` is `resample(s, 30_000, device_rate)`.

use rubato::{FftFixedInOut, Resampler};
use thiserror::Error;

/// Requested input block for the FFT resampler; rubato rounds it up to a
/// multiple the rate pair allows.
const STREAM_CHUNK: usize = 1024;

// ---------------------------------------------------------------------------
// downmix
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio to mono by averaging each frame.
///
/// Returns an owned copy for mono input and an empty vector for
/// `channels == 0`.  A trailing partial frame is dropped.
///
/// ```rust
/// use live_call::audio::downmix;
///
/// let stereo = vec![0.5_f32, -0.5, 0.25, 0.75];
/// assert_eq!(downmix(&stereo, 2), vec![0.0, 0.5]);
/// ```
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// StreamResampler
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ResamplerError {
    #[error("sample rates must be non-zero ({source_rate} -> {target_rate})")]
    ZeroRate { source_rate: u32, target_rate: u32 },

    #[error("failed to build resampler: {0}")]
    Build(#[from] rubato::ResamplerConstructionError),

    #[error("resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),
}

/// Stateful mono rate converter for a continuous stream.
///
/// Input is buffered until a whole resampler block is available, so the
/// total output only depends on the total input, not on how it was split
/// across [`process`](Self::process) calls.  Equal rates pass through.
///
/// ```rust
/// use live_call::audio::StreamResampler;
///
/// let mut rs = StreamResampler::new(16_000, 16_000).unwrap();
/// assert_eq!(rs.process(&[0.1, 0.2]).unwrap(), vec![0.1, 0.2]);
/// ```
pub struct StreamResampler {
    source_rate: u32,
    inner: Option<FftFixedInOut<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Result<Self, ResamplerError> {
        if source_rate == 0 || target_rate == 0 {
            return Err(ResamplerError::ZeroRate {
                source_rate,
                target_rate,
            });
        }
        let inner = if source_rate == target_rate {
            None
        } else {
            Some(FftFixedInOut::<f32>::new(
                source_rate as usize,
                target_rate as usize,
                STREAM_CHUNK,
                1,
            )?)
        };
        Ok(Self {
            source_rate,
            inner,
            pending: Vec::new(),
        })
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    /// Feed mono samples at the source rate; returns every output sample
    /// that became available.  Leftover input waits for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>, ResamplerError> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(samples.to_vec());
        };
        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        let mut consumed = 0;
        loop {
            let need = inner.input_frames_next();
            if self.pending.len() - consumed < need {
                break;
            }
            let block = [&self.pending[consumed..consumed + need]];
            let mut resampled = inner.process(&block[..], None)?;
            out.append(&mut resampled[0]);
            consumed += need;
        }
        self.pending.drain(..consumed);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// resample
// ---------------------------------------------------------------------------

/// Convert mono `samples` from `source_rate` Hz to `target_rate` Hz.
///
/// Equal rates return a copy unchanged; empty input or a zero rate returns
/// an empty vector.  Output length is `ceil(len * target / source)`.
///
/// ```rust
/// use live_call::audio::resample;
///
/// assert_eq!(resample(&vec![0.5_f32; 480], 48_000, 16_000).len(), 160);
/// assert_eq!(resample(&vec![0.5_f32; 240], 24_000, 48_000).len(), 480);
/// ```
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }
    if samples.is_empty() || source_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let last = samples.len() - 1;

    (0..output_len)
        .map(|i| {
            let pos = i as f64 / ratio;
            let idx = pos as usize;
            if idx >= last {
                return samples[last];
            }
            let frac = (pos - idx as f64) as f32;
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        })
        .collect()
}

/// Prepare a mono chunk for an output device: apply the playback-rate
/// multiplier and convert to the device rate in a single pass.
///
/// A `rate` of `2.0` halves the number of output samples.
pub fn stretch_for_output(samples: &[f32], source_rate: u32, rate: f32, device_rate: u32) -> Vec<f32> {
    let effective = (source_rate as f64 * rate.max(f32::EPSILON) as f64).round() as u32;
    resample(samples, effective, device_rate)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
