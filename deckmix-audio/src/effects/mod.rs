//! Master-bus send effects
//!
//! Each effect is a parallel wet path recombined with the dry path. When an
//! effect is disabled its wet gain is exactly zero and its dry gain exactly
//! one; the stored mix is kept for when it is switched back on.

mod delay;
mod reverb;

pub use delay::FeedbackDelay;
pub use reverb::{ConvolutionReverb, Convolver, PARTITION_SIZE};

/// Largest feedback coefficient the delay loop accepts
pub const MAX_FEEDBACK: f32 = 0.95;

/// Trait for audio effects
pub trait Effect: Send {
    /// Process audio samples in place (stereo interleaved)
    fn process(&mut self, samples: &mut [f32]);

    /// Reset effect state
    fn reset(&mut self);

    /// Check if effect is enabled
    fn is_enabled(&self) -> bool;

    /// Enable/disable the effect
    fn set_enabled(&mut self, enabled: bool);

    /// Get effect name
    fn name(&self) -> &'static str;
}

/// Dry and wet path gains of a send effect
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WetDry {
    pub dry: f32,
    pub wet: f32,
}

impl WetDry {
    /// Bypass: dry only
    pub const BYPASS: Self = Self { dry: 1.0, wet: 0.0 };
}

/// Dry/wet gains for an effect switch and a 0-100 mix percentage
pub fn wet_dry(enabled: bool, percent: f32) -> WetDry {
    if !enabled {
        return WetDry::BYPASS;
    }
    let wet = if percent.is_finite() {
        (percent / 100.0).clamp(0.0, 1.0)
    } else {
        0.0
    };
    WetDry { dry: 1.0 - wet, wet }
}

/// Per-frame glide of the dry/wet pair toward its target
#[derive(Debug, Clone)]
pub(crate) struct WetEnvelope {
    coeff: f32,
    target: WetDry,
    current: WetDry,
}

impl WetEnvelope {
    /// Glide time constant in seconds
    const TIME_CONSTANT: f32 = 0.01;

    pub(crate) fn new(sample_rate: f32) -> Self {
        Self {
            coeff: (-1.0 / (sample_rate.max(1.0) * Self::TIME_CONSTANT)).exp(),
            target: WetDry::BYPASS,
            current: WetDry::BYPASS,
        }
    }

    pub(crate) fn set_target(&mut self, target: WetDry) {
        self.target = target;
    }

    pub(crate) fn target(&self) -> WetDry {
        self.target
    }

    /// True once the envelope has landed on bypass
    pub(crate) fn is_bypassed(&self) -> bool {
        self.current == WetDry::BYPASS && self.target == WetDry::BYPASS
    }

    pub(crate) fn jump_to_target(&mut self) {
        self.current = self.target;
    }

    #[inline]
    pub(crate) fn advance(&mut self) -> WetDry {
        self.current.dry = glide(self.current.dry, self.target.dry, self.coeff);
        self.current.wet = glide(self.current.wet, self.target.wet, self.coeff);
        self.current
    }
}

#[inline]
fn glide(current: f32, target: f32, coeff: f32) -> f32 {
    if (current - target).abs() < 1e-4 {
        target
    } else {
        coeff * current + (1.0 - coeff) * target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_is_exact_bypass() {
        for percent in [0.0, 30.0, 100.0, f32::NAN] {
            assert_eq!(wet_dry(false, percent), WetDry { dry: 1.0, wet: 0.0 });
        }
    }

    #[test]
    fn test_enabled_splits_mix() {
        let gains = wet_dry(true, 30.0);
        assert!((gains.wet - 0.3).abs() < 1e-6);
        assert!((gains.dry - 0.7).abs() < 1e-6);
        assert_eq!(wet_dry(true, 250.0), WetDry { dry: 0.0, wet: 1.0 });
    }

    #[test]
    fn test_envelope_lands_exactly() {
        let mut env = WetEnvelope::new(48000.0);
        env.set_target(wet_dry(true, 50.0));
        for _ in 0..48000 {
            env.advance();
        }
        assert_eq!(env.advance(), WetDry { dry: 0.5, wet: 0.5 });

        env.set_target(WetDry::BYPASS);
        for _ in 0..48000 {
            env.advance();
        }
        assert!(env.is_bypassed());
    }
}
