//! Deck processing chain
//!
//! Each deck owns one chain for its whole lifetime. The stage order is
//! fixed when the chain is built: low shelf -> mid peak -> high shelf ->
//! deck gain. Playback units render into the head of the chain, so the EQ
//! is always in the signal path, even when flat.

use crate::eq::EqFilter;
use crate::params::EqBand;

/// Kind of a stage in a deck chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    LowShelf,
    MidPeak,
    HighShelf,
    DeckGain,
}

/// Stage order of every deck chain, head first
pub const DECK_TOPOLOGY: [StageKind; 4] = [
    StageKind::LowShelf,
    StageKind::MidPeak,
    StageKind::HighShelf,
    StageKind::DeckGain,
];

/// Gain stage with per-frame smoothing toward its target
#[derive(Debug, Clone)]
pub struct GainStage {
    target: f32,
    current: f32,
}

impl GainStage {
    /// Smoothing coefficient (~5ms at 48kHz)
    const SMOOTH_COEFF: f32 = 0.995;

    pub fn new(gain: f32) -> Self {
        Self {
            target: gain,
            current: gain,
        }
    }

    /// Set target gain; the stage glides there over a few milliseconds
    pub fn set_target(&mut self, gain: f32) {
        if gain.is_finite() {
            self.target = gain.max(0.0);
        }
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// Gain currently applied
    pub fn current(&self) -> f32 {
        self.current
    }

    #[inline]
    fn advance(&mut self) -> f32 {
        if (self.current - self.target).abs() < 1e-6 {
            self.current = self.target;
        } else {
            self.current =
                Self::SMOOTH_COEFF * self.current + (1.0 - Self::SMOOTH_COEFF) * self.target;
        }
        self.current
    }

    /// Apply gain to one stereo frame
    #[inline]
    pub fn process_frame(&mut self, left: f32, right: f32) -> (f32, f32) {
        let gain = self.advance();
        (left * gain, right * gain)
    }

    /// Apply gain to an interleaved stereo buffer
    pub fn process(&mut self, samples: &mut [f32]) {
        for frame in samples.chunks_exact_mut(2) {
            let (l, r) = self.process_frame(frame[0], frame[1]);
            frame[0] = l;
            frame[1] = r;
        }
    }
}

/// A single stage of a deck chain
#[derive(Debug, Clone)]
enum Stage {
    Filter(EqFilter),
    Gain(GainStage),
}

impl Stage {
    fn build(kind: StageKind, sample_rate: f32) -> Self {
        match kind {
            StageKind::LowShelf => Stage::Filter(EqFilter::new(EqBand::Low, sample_rate)),
            StageKind::MidPeak => Stage::Filter(EqFilter::new(EqBand::Mid, sample_rate)),
            StageKind::HighShelf => Stage::Filter(EqFilter::new(EqBand::High, sample_rate)),
            StageKind::DeckGain => Stage::Gain(GainStage::new(1.0)),
        }
    }

    fn kind(&self) -> StageKind {
        match self {
            Stage::Filter(filter) => match filter.band() {
                EqBand::Low => StageKind::LowShelf,
                EqBand::Mid => StageKind::MidPeak,
                EqBand::High => StageKind::HighShelf,
            },
            Stage::Gain(_) => StageKind::DeckGain,
        }
    }
}

/// Persistent per-deck chain of EQ filters and the deck gain stage
#[derive(Debug, Clone)]
pub struct DeckChain {
    stages: Vec<Stage>,
}

impl DeckChain {
    /// Wire the chain once, in [`DECK_TOPOLOGY`] order
    pub fn new(sample_rate: f32) -> Self {
        Self {
            stages: DECK_TOPOLOGY
                .iter()
                .map(|&kind| Stage::build(kind, sample_rate))
                .collect(),
        }
    }

    /// Stage kinds in signal order
    pub fn topology(&self) -> Vec<StageKind> {
        self.stages.iter().map(Stage::kind).collect()
    }

    fn filter(&self, band: EqBand) -> Option<&EqFilter> {
        self.stages.iter().find_map(|stage| match stage {
            Stage::Filter(filter) if filter.band() == band => Some(filter),
            _ => None,
        })
    }

    fn filter_mut(&mut self, band: EqBand) -> Option<&mut EqFilter> {
        self.stages.iter_mut().find_map(|stage| match stage {
            Stage::Filter(filter) if filter.band() == band => Some(filter),
            _ => None,
        })
    }

    fn gain_stage(&self) -> Option<&GainStage> {
        self.stages.iter().find_map(|stage| match stage {
            Stage::Gain(gain) => Some(gain),
            _ => None,
        })
    }

    fn gain_stage_mut(&mut self) -> Option<&mut GainStage> {
        self.stages.iter_mut().find_map(|stage| match stage {
            Stage::Gain(gain) => Some(gain),
            _ => None,
        })
    }

    /// Set an EQ band gain in dB
    pub fn set_eq_gain(&mut self, band: EqBand, gain_db: f32) {
        if let Some(filter) = self.filter_mut(band) {
            filter.set_gain_db(gain_db);
        }
    }

    pub fn eq_gain(&self, band: EqBand) -> f32 {
        self.filter(band).map_or(0.0, EqFilter::gain_db)
    }

    /// Set the deck gain stage target (the crossfader contribution)
    pub fn set_gain(&mut self, gain: f32) {
        if let Some(stage) = self.gain_stage_mut() {
            stage.set_target(gain);
        }
    }

    /// Deck gain target
    pub fn gain(&self) -> f32 {
        self.gain_stage().map_or(1.0, GainStage::target)
    }

    /// Run an interleaved stereo buffer through every stage in order
    pub fn process(&mut self, samples: &mut [f32]) {
        for frame in samples.chunks_exact_mut(2) {
            let (mut l, mut r) = (frame[0], frame[1]);
            for stage in &mut self.stages {
                (l, r) = match stage {
                    Stage::Filter(filter) => filter.process_frame(l, r),
                    Stage::Gain(gain) => gain.process_frame(l, r),
                };
            }
            frame[0] = l;
            frame[1] = r;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_order() {
        let chain = DeckChain::new(48000.0);
        assert_eq!(chain.topology(), DECK_TOPOLOGY.to_vec());
    }

    #[test]
    fn test_flat_chain_at_unity_is_transparent() {
        let mut chain = DeckChain::new(48000.0);
        let mut samples = vec![0.5, -0.25, 0.1, 0.2];
        let original = samples.clone();
        chain.process(&mut samples);
        assert_eq!(samples, original);
    }

    #[test]
    fn test_low_shelf_boosts_dc() {
        let mut chain = DeckChain::new(48000.0);
        chain.set_eq_gain(EqBand::Low, 6.0);

        let mut samples = vec![0.25f32; 48000 * 2];
        chain.process(&mut samples);

        let expected = 0.25 * 10.0f32.powf(6.0 / 20.0);
        let last = samples[samples.len() - 1];
        assert!((last - expected).abs() < 1e-3, "got {}", last);
    }

    #[test]
    fn test_gain_stage_settles_on_target() {
        let mut chain = DeckChain::new(48000.0);
        chain.set_gain(0.25);
        assert_eq!(chain.gain(), 0.25);

        let mut samples = vec![1.0f32; 48000];
        chain.process(&mut samples);
        assert!((samples[samples.len() - 1] - 0.25).abs() < 1e-4);
    }

    #[test]
    fn test_extreme_eq_never_poisons_the_chain() {
        for db in [800.0, -1600.0] {
            let mut chain = DeckChain::new(48000.0);
            chain.set_eq_gain(EqBand::Low, db);
            chain.set_eq_gain(EqBand::Mid, db);

            let mut samples: Vec<f32> = (0..9600).map(|i| (i as f32 * 0.03).sin()).collect();
            chain.process(&mut samples);
            assert!(samples.iter().all(|s| s.is_finite()), "{db} dB");

            chain.set_eq_gain(EqBand::Low, 0.0);
            chain.set_eq_gain(EqBand::Mid, 0.0);
            let mut samples = vec![0.5f32; 64];
            chain.process(&mut samples);
            assert!(samples.iter().all(|&s| s == 0.5), "{db} dB left residue");
        }
    }

    #[test]
    fn test_eq_gain_reads_back() {
        let mut chain = DeckChain::new(44100.0);
        chain.set_eq_gain(EqBand::High, -4.5);
        assert_eq!(chain.eq_gain(EqBand::High), -4.5);
        assert_eq!(chain.eq_gain(EqBand::Low), 0.0);
    }
}
