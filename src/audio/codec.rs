//! PCM wire codec.
//!
//! The live service exchanges audio as base64 strings of little-endian
//! 16-bit signed PCM.  [`encode_frame`] turns captured `f32` samples into
//! that form; [`decode_frame`] turns a received chunk back into an
//! [`AudioBuffer`] of per-channel `f32` samples ready for playback.
//!
//! # Sample conversion
//!
//! Each sample is multiplied by `32768` and truncated toward zero.  With
//! [`SampleConversion::Wrap`] (the default) no clamping is done, so a sample
//! at or beyond `±1.0` wraps around the 16-bit range (`1.0` becomes
//! `-32768`).  [`SampleConversion::Saturate`] clamps to `[-32768, 32767]`
//! instead.
//!
//! ```rust
//! use live_call::audio::{decode_frame, encode_frame, SampleConversion};
//!
//! let wire = encode_frame(&[0.0, 0.5, -0.5], SampleConversion::Wrap);
//! let buffer = decode_frame(&wire, 24_000, 1).unwrap();
//! assert_eq!(buffer.frames(), 3);
//! assert!((buffer.channel(0)[1] - 0.5).abs() < 1.0 / 32768.0);
//! ```

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scale factor between `f32` samples and 16-bit integers.
const PCM_SCALE: f32 = 32768.0;

// ---------------------------------------------------------------------------
// SampleConversion
// ---------------------------------------------------------------------------

/// How out-of-range `f32` samples are mapped to 16-bit integers on encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SampleConversion {
    /// Truncate and wrap around on overflow (no clamping).
    #[default]
    Wrap,
    /// Truncate and clamp to the 16-bit range.
    Saturate,
}

impl SampleConversion {
    /// Convert a single sample.
    ///
    /// ```rust
    /// use live_call::audio::SampleConversion;
    ///
    /// assert_eq!(SampleConversion::Wrap.to_i16(1.0), i16::MIN);
    /// assert_eq!(SampleConversion::Saturate.to_i16(1.0), i16::MAX);
    /// assert_eq!(SampleConversion::Wrap.to_i16(-1.0), i16::MIN);
    /// ```
    pub fn to_i16(self, sample: f32) -> i16 {
        let scaled = sample * PCM_SCALE;
        match self {
            // `as i32` truncates toward zero; the narrowing cast keeps the low
            // 16 bits, which is the wraparound.
            SampleConversion::Wrap => scaled as i32 as i16,
            SampleConversion::Saturate => scaled as i16,
        }
    }
}

// ---------------------------------------------------------------------------
// CodecError
// ---------------------------------------------------------------------------

/// Reasons a received audio chunk cannot be decoded.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("invalid base64 payload: {0}")]
    Base64(String),

    #[error("odd PCM byte length {0}; 16-bit samples need an even count")]
    OddByteLength(usize),

    #[error("{samples} samples cannot be split across {channels} channels")]
    ChannelMismatch { samples: usize, channels: u16 },

    #[error("channel count must be at least 1")]
    NoChannels,

    #[error("sample rate must be non-zero")]
    ZeroSampleRate,
}

// ---------------------------------------------------------------------------
// AudioBuffer
// ---------------------------------------------------------------------------

/// De-interleaved `f32` audio, one `Vec` per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Build a buffer from per-channel sample vectors.
    ///
    /// All channels are expected to have equal length; `frames()` reports
    /// the length of the first channel.
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Convenience constructor for mono audio.
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self::new(sample_rate, vec![samples])
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    /// Samples of channel `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= channel_count()`.
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Playback length in seconds at the buffer's own sample rate.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Average all channels into a single mono signal.
    pub fn to_mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => (0..self.frames())
                .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / n as f32)
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

/// Convert `samples` to little-endian 16-bit PCM bytes.
pub fn samples_to_pcm(samples: &[f32], conversion: SampleConversion) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&conversion.to_i16(s).to_le_bytes());
    }
    bytes
}

/// Encode `samples` as base64 little-endian 16-bit PCM.
pub fn encode_frame(samples: &[f32], conversion: SampleConversion) -> String {
    base64::engine::general_purpose::STANDARD.encode(samples_to_pcm(samples, conversion))
}

/// Decode interleaved little-endian 16-bit PCM bytes into an [`AudioBuffer`].
pub fn pcm_to_buffer(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<AudioBuffer, CodecError> {
    if channels == 0 {
        return Err(CodecError::NoChannels);
    }
    if sample_rate == 0 {
        return Err(CodecError::ZeroSampleRate);
    }
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddByteLength(bytes.len()));
    }

    let total = bytes.len() / 2;
    let n = channels as usize;
    if total % n != 0 {
        return Err(CodecError::ChannelMismatch {
            samples: total,
            channels,
        });
    }

    let frames = total / n;
    let mut out = vec![Vec::with_capacity(frames); n];
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        out[i % n].push(value as f32 / PCM_SCALE);
    }

    Ok(AudioBuffer::new(sample_rate, out))
}

/// Decode a base64 chunk into an [`AudioBuffer`].
pub fn decode_frame(
    data: &str,
    sample_rate: u32,
    channels: u16,
) -> Result<AudioBuffer, CodecError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| CodecError::Base64(e.to_string()))?;
    pcm_to_buffer(&bytes, sample_rate, channels)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn decode_restores_samples_within_quantisation_error() {
        let input: Vec<f32> = (0..2_000)
            .map(|i| ((i as f32) * 0.013).sin() * 0.999)
            .chain([-1.0, 0.0, 0.999_969])
            .collect();

        let wire = encode_frame(&input, SampleConversion::Wrap);
        let buffer = decode_frame(&wire, 16_000, 1).unwrap();

        assert_eq!(buffer.frames(), input.len());
        for (a, b) in input.iter().zip(buffer.channel(0)) {
            assert!((a - b).abs() <= 1.0 / 32768.0, "{a} vs {b}");
        }
    }

    #[test]
    fn encode_is_little_endian_and_truncates() {
        // 0.5 * 32768 = 16384 = 0x4000; -0.25 * 32768 = -8192 = 0xE000
        let bytes = samples_to_pcm(&[0.5, -0.25], SampleConversion::Wrap);
        assert_eq!(bytes, vec![0x00, 0x40, 0x00, 0xE0]);

        // 0.00005 * 32768 = 1.6384 -> truncated to 1
        let bytes = samples_to_pcm(&[0.00005], SampleConversion::Wrap);
        assert_eq!(bytes, vec![0x01, 0x00]);
    }

    #[test]
    fn wrap_overflows_at_full_scale() {
        assert_eq!(SampleConversion::Wrap.to_i16(1.0), -32768);
        // 1.5 * 32768 = 49152 -> 49152 - 65536
        assert_eq!(SampleConversion::Wrap.to_i16(1.5), -16384);
        assert_eq!(SampleConversion::Wrap.to_i16(-1.5), 16384);
    }

    #[test]
    fn saturate_clamps_out_of_range() {
        assert_eq!(SampleConversion::Saturate.to_i16(1.0), 32767);
        assert_eq!(SampleConversion::Saturate.to_i16(-2.0), -32768);
        assert_eq!(SampleConversion::Saturate.to_i16(0.5), 16384);
    }

    #[test]
    fn decode_deinterleaves_stereo() {
        // L R L R = 16384, -16384, 8192, -8192
        let mut bytes = Vec::new();
        for v in [16384i16, -16384, 8192, -8192] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }

        let buffer = decode_frame(&b64(&bytes), 24_000, 2).unwrap();
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frames(), 2);
        assert_eq!(buffer.channel(0), &[0.5, 0.25]);
        assert_eq!(buffer.channel(1), &[-0.5, -0.25]);
        assert_eq!(buffer.to_mono(), vec![0.0, 0.0]);
    }

    #[test]
    fn duration_follows_sample_rate() {
        let buffer = pcm_to_buffer(&vec![0u8; 48_000], 24_000, 1).unwrap();
        assert_eq!(buffer.frames(), 24_000);
        assert!((buffer.duration() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn odd_byte_length_is_rejected() {
        let err = pcm_to_buffer(&[0, 0, 0], 24_000, 1).unwrap_err();
        assert_eq!(err, CodecError::OddByteLength(3));
    }

    #[test]
    fn channel_mismatch_is_rejected() {
        // three 16-bit samples cannot form stereo frames
        let err = pcm_to_buffer(&[0; 6], 24_000, 2).unwrap_err();
        assert_eq!(
            err,
            CodecError::ChannelMismatch {
                samples: 3,
                channels: 2
            }
        );
    }

    #[test]
    fn invalid_base64_is_rejected() {
        assert!(matches!(
            decode_frame("not base64!!", 24_000, 1),
            Err(CodecError::Base64(_))
        ));
    }

    #[test]
    fn zero_channels_or_rate_is_rejected() {
        assert_eq!(pcm_to_buffer(&[], 24_000, 0), Err(CodecError::NoChannels));
        assert_eq!(pcm_to_buffer(&[], 0, 1), Err(CodecError::ZeroSampleRate));
    }

    #[test]
    fn empty_chunk_decodes_to_empty_buffer() {
        let buffer = decode_frame("", 24_000, 1).unwrap();
        assert_eq!(buffer.frames(), 0);
        assert_eq!(buffer.duration(), 0.0);
    }
}
