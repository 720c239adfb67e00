//! Crossfade and master bus
//!
//! Both deck chains are summed, then run through the master gain stage, the
//! reverb and delay sends, and finally copied into the meter tap.

use crate::chain::GainStage;
use crate::effects::{ConvolutionReverb, Effect, FeedbackDelay};
use crate::meter::MeterTap;

/// Linear crossfade law: (deck A gain, deck B gain) for a 0-100 position
pub fn crossfade_gains(position: f32) -> (f32, f32) {
    let p = if position.is_finite() {
        position.clamp(0.0, 100.0)
    } else {
        50.0
    };
    ((100.0 - p) / 100.0, p / 100.0)
}

/// Master gain for a 0-100 volume
pub fn volume_to_gain(volume: f32) -> f32 {
    if volume.is_finite() {
        volume.clamp(0.0, 100.0) / 100.0
    } else {
        1.0
    }
}

/// Kind of a master bus stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterStageKind {
    Sum,
    MasterGain,
    Reverb,
    Delay,
    MeterTap,
}

/// Master bus stage order
pub const MASTER_TOPOLOGY: [MasterStageKind; 5] = [
    MasterStageKind::Sum,
    MasterStageKind::MasterGain,
    MasterStageKind::Reverb,
    MasterStageKind::Delay,
    MasterStageKind::MeterTap,
];

/// Master bus shared by both decks
#[derive(Debug)]
pub struct MasterBus {
    gain: GainStage,
    reverb: ConvolutionReverb,
    delay: FeedbackDelay,
    tap: Option<MeterTap>,
}

impl MasterBus {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            gain: GainStage::new(1.0),
            reverb: ConvolutionReverb::new(sample_rate),
            delay: FeedbackDelay::new(sample_rate),
            tap: None,
        }
    }

    /// Attach the meter tap at the end of the bus
    pub fn set_tap(&mut self, tap: MeterTap) {
        self.tap = Some(tap);
    }

    pub fn topology(&self) -> &'static [MasterStageKind] {
        &MASTER_TOPOLOGY
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain.set_target(gain);
    }

    /// Master gain target
    pub fn gain(&self) -> f32 {
        self.gain.target()
    }

    pub fn reverb(&self) -> &ConvolutionReverb {
        &self.reverb
    }

    pub fn reverb_mut(&mut self) -> &mut ConvolutionReverb {
        &mut self.reverb
    }

    pub fn delay(&self) -> &FeedbackDelay {
        &self.delay
    }

    pub fn delay_mut(&mut self) -> &mut FeedbackDelay {
        &mut self.delay
    }

    /// Sum two deck outputs into `output` and run the master stages.
    ///
    /// All three buffers are interleaved stereo of the same length.
    pub fn process(&mut self, deck_a: &[f32], deck_b: &[f32], output: &mut [f32]) {
        for ((out, a), b) in output.iter_mut().zip(deck_a).zip(deck_b) {
            *out = a + b;
        }

        self.gain.process(output);
        self.reverb.process(output);
        self.delay.process(output);

        if let Some(tap) = self.tap.as_mut() {
            tap.push(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::meter_tap;

    #[test]
    fn test_crossfade_law() {
        assert_eq!(crossfade_gains(0.0), (1.0, 0.0));
        assert_eq!(crossfade_gains(100.0), (0.0, 1.0));
        assert_eq!(crossfade_gains(50.0), (0.5, 0.5));
        for p in [0.0, 12.5, 33.0, 50.0, 71.0, 100.0] {
            let (a, b) = crossfade_gains(p);
            assert!((a + b - 1.0).abs() < 1e-6);
        }
        assert_eq!(crossfade_gains(140.0), (0.0, 1.0));
    }

    #[test]
    fn test_volume_to_gain() {
        assert_eq!(volume_to_gain(100.0), 1.0);
        assert_eq!(volume_to_gain(25.0), 0.25);
        assert_eq!(volume_to_gain(-5.0), 0.0);
    }

    #[test]
    fn test_bus_sums_decks() {
        let mut bus = MasterBus::new(48000);
        let a = vec![0.25; 8];
        let b = vec![0.5; 8];
        let mut out = vec![0.0; 8];
        bus.process(&a, &b, &mut out);
        assert!(out.iter().all(|&s| (s - 0.75).abs() < 1e-6));
    }

    #[test]
    fn test_tap_sees_post_gain_signal() {
        let mut bus = MasterBus::new(48000);
        let (tap, mut meter) = meter_tap(96_000);
        bus.set_tap(tap);
        bus.set_gain(0.5);

        let a = vec![1.0; 48000];
        let b = vec![0.0; 48000];
        let mut out = vec![0.0; 48000];
        bus.process(&a, &b, &mut out);

        let reading = meter.sample(true);
        assert!((reading.db() - (-6.0206)).abs() < 0.01);
    }

    #[test]
    fn test_topology() {
        let bus = MasterBus::new(44100);
        assert_eq!(bus.topology().first(), Some(&MasterStageKind::Sum));
        assert_eq!(bus.topology().last(), Some(&MasterStageKind::MeterTap));
    }
}
