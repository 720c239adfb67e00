//! Feedback delay send
//!
//! A stereo delay line of at most two seconds. The line is fed with the dry
//! input plus `feedback x` its own output; the wet path is the line output.

use super::{wet_dry, Effect, WetDry, WetEnvelope, MAX_FEEDBACK};
use crate::params::{MAX_DELAY_MS, MIN_DELAY_MS};

/// Maximum delay time in seconds
const MAX_DELAY_SECS: f32 = MAX_DELAY_MS / 1000.0;

/// Stereo feedback delay with smoothed delay time
#[derive(Debug, Clone)]
pub struct FeedbackDelay {
    sample_rate: f32,
    /// Delay buffer (stereo interleaved: L,R,L,R,...)
    buffer: Vec<f32>,
    /// Buffer length in stereo frames
    buffer_frames: usize,
    /// Write position in frames
    write_pos: usize,
    /// Delay time in fractional frames
    delay_frames: f32,
    target_delay: f32,
    delay_smooth: f32,
    /// Loop-back coefficient (0.0 - MAX_FEEDBACK)
    feedback: f32,
    /// Wet mix percentage, kept while disabled
    mix: f32,
    enabled: bool,
    envelope: WetEnvelope,
    /// Set once the line has been cleared after the wet path closed
    silent: bool,
}

impl FeedbackDelay {
    /// Delay-time glide constant in seconds
    const DELAY_TIME_CONSTANT: f32 = 0.05;

    pub fn new(sample_rate: u32) -> Self {
        let sr = sample_rate.max(1) as f32;
        // Two spare frames so the full two seconds stay addressable
        let buffer_frames = (sr * MAX_DELAY_SECS) as usize + 2;
        let default_delay = 0.3 * sr;

        Self {
            sample_rate: sr,
            buffer: vec![0.0; buffer_frames * 2],
            buffer_frames,
            write_pos: 0,
            delay_frames: default_delay,
            target_delay: default_delay,
            delay_smooth: (-1.0 / (sr * Self::DELAY_TIME_CONSTANT)).exp(),
            feedback: 0.4,
            mix: 30.0,
            enabled: false,
            envelope: WetEnvelope::new(sr),
            silent: true,
        }
    }

    /// Set delay time in milliseconds (clamped to 1-2000)
    pub fn set_delay_ms(&mut self, ms: f32) {
        if !ms.is_finite() {
            return;
        }
        let ms = ms.clamp(MIN_DELAY_MS, MAX_DELAY_MS);
        self.target_delay = ms * self.sample_rate / 1000.0;
    }

    /// Target delay time in milliseconds
    pub fn delay_ms(&self) -> f32 {
        self.target_delay * 1000.0 / self.sample_rate
    }

    /// Set the loop-back coefficient, clamped below unity
    pub fn set_feedback(&mut self, feedback: f32) {
        if feedback.is_finite() {
            self.feedback = feedback.clamp(0.0, MAX_FEEDBACK);
        }
    }

    pub fn feedback(&self) -> f32 {
        self.feedback
    }

    /// Set wet mix percentage (0-100)
    pub fn set_mix(&mut self, percent: f32) {
        if percent.is_finite() {
            self.mix = percent.clamp(0.0, 100.0);
        }
        self.envelope.set_target(wet_dry(self.enabled, self.mix));
    }

    pub fn mix(&self) -> f32 {
        self.mix
    }

    /// Dry/wet pair the delay is gliding toward
    pub fn gains(&self) -> WetDry {
        self.envelope.target()
    }

    /// Read the line `delay` frames behind the write head (linear interpolation)
    #[inline]
    fn read(&self, delay: f32) -> (f32, f32) {
        let int_delay = delay as usize;
        let frac = delay - int_delay as f32;

        let pos0 = (self.write_pos + self.buffer_frames - int_delay) % self.buffer_frames;
        let pos1 = if pos0 == 0 {
            self.buffer_frames - 1
        } else {
            pos0 - 1
        };

        let (i0, i1) = (pos0 * 2, pos1 * 2);
        (
            self.buffer[i0] * (1.0 - frac) + self.buffer[i1] * frac,
            self.buffer[i0 + 1] * (1.0 - frac) + self.buffer[i1 + 1] * frac,
        )
    }
}

impl Effect for FeedbackDelay {
    fn process(&mut self, samples: &mut [f32]) {
        if !self.enabled && self.envelope.is_bypassed() {
            // Wet path closed: drop what is left in the line, once
            if !self.silent {
                self.buffer.fill(0.0);
                self.silent = true;
            }
            return;
        }
        self.silent = false;

        let max_delay = (self.buffer_frames - 1) as f32;

        for frame in samples.chunks_exact_mut(2) {
            let gains = self.envelope.advance();

            if (self.delay_frames - self.target_delay).abs() < 1e-3 {
                self.delay_frames = self.target_delay;
            } else {
                self.delay_frames = self.delay_smooth * self.delay_frames
                    + (1.0 - self.delay_smooth) * self.target_delay;
            }

            let (delayed_l, delayed_r) = self.read(self.delay_frames.clamp(1.0, max_delay));

            // Only tails recirculate while the wet path is closing
            let (in_l, in_r) = if self.enabled {
                (frame[0], frame[1])
            } else {
                (0.0, 0.0)
            };
            let idx = self.write_pos * 2;
            self.buffer[idx] = in_l + self.feedback * delayed_l;
            self.buffer[idx + 1] = in_r + self.feedback * delayed_r;

            frame[0] = frame[0] * gains.dry + delayed_l * gains.wet;
            frame[1] = frame[1] * gains.dry + delayed_r * gains.wet;

            self.write_pos = (self.write_pos + 1) % self.buffer_frames;
        }
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
        self.delay_frames = self.target_delay;
        self.envelope.jump_to_target();
        self.silent = true;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.envelope.set_target(wet_dry(enabled, self.mix));
    }

    fn name(&self) -> &'static str {
        "Delay"
    }
}
