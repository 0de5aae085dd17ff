//! Fixed-size capture windows.
//!
//! The capture device delivers buffers of whatever size the platform picks.
//! [`FrameAssembler`] re-slices the (already mono, already 16 kHz) stream
//! into windows of exactly `window` samples so that every outbound
//! [`AudioFrame`] has the same length, mirroring a script-processor style
//! tick of 4096 samples.
//!
//! ```rust
//! use live_call::audio::FrameAssembler;
//!
//! let mut asm = FrameAssembler::new(4, 16_000);
//! assert!(asm.push(&[0.1, 0.2, 0.3]).is_empty());
//! let frames = asm.push(&[0.4, 0.5]);
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].samples, vec![0.1, 0.2, 0.3, 0.4]);
//! assert_eq!(asm.pending(), 1);
//! ```

/// A window of mono capture samples at a known rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Mono `f32` samples, nominally in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

/// Accumulates samples and emits full [`AudioFrame`]s.
pub struct FrameAssembler {
    window: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl FrameAssembler {
    /// Create an assembler producing windows of `window` samples.
    ///
    /// # Panics
    ///
    /// Panics if `window == 0`.
    pub fn new(window: usize, sample_rate: u32) -> Self {
        assert!(window > 0, "frame window must be > 0");
        Self {
            window,
            sample_rate,
            pending: Vec::with_capacity(window),
        }
    }

    /// Append `samples`, returning every window completed by this call in
    /// capture order.  Leftover samples stay pending for the next call.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);

        let complete = self.pending.len() / self.window;
        if complete == 0 {
            return Vec::new();
        }

        let rest = self.pending.split_off(complete * self.window);
        let full = std::mem::replace(&mut self.pending, rest);

        full.chunks_exact(self.window)
            .map(|w| AudioFrame {
                samples: w.to_vec(),
                sample_rate: self.sample_rate,
            })
            .collect()
    }

    /// Number of samples waiting for the next full window.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
