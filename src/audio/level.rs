//! Output level metering for the speaking indicator.
//!
//! The output mixer feeds every rendered block through a [`LevelMeter`];
//! the status view reads the smoothed level to animate a "voice ring".
//!
//! ```rust
//! use live_call::audio::{rms, LevelMeter};
//!
//! assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
//!
//! let mut meter = LevelMeter::new(0.5);
//! meter.update(&[0.8; 256]);
//! assert!(meter.level() > 0.1);
//! ```

/// Root-mean-square amplitude of `block`, clamped to `[0.0, 1.0]`.
///
/// An empty block has level `0.0`.
pub fn rms(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let mean_sq = block.iter().map(|s| s * s).sum::<f32>() / block.len() as f32;
    mean_sq.sqrt().min(1.0)
}

/// Fast-attack, exponential-release level follower.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    level: f32,
    /// Fraction of the previous level kept per block when the signal falls.
    release: f32,
}

impl LevelMeter {
    /// `release` is clamped to `[0.0, 1.0)`; `0.0` means no smoothing.
    pub fn new(release: f32) -> Self {
        Self {
            level: 0.0,
            release: release.clamp(0.0, 0.999),
        }
    }

    /// Feed one rendered block and return the new level.
    pub fn update(&mut self, block: &[f32]) -> f32 {
        let current = rms(block);
        self.level = if current >= self.level {
            current
        } else {
            self.level * self.release + current * (1.0 - self.release)
        };
        self.level
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn reset(&mut self) {
        self.level = 0.0;
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(0.8)
    }
}
