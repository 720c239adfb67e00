//! Decks - control-side deck state, playback units and the render-side deck
//!
//! A [`Deck`] is what the control thread knows: the loaded block, the
//! pitch ratio and the id of the active playback unit. A [`DeckRenderer`]
//! lives on the render side: the persistent [`DeckChain`] plus the unit
//! currently feeding it.

use std::sync::Arc;

use crate::block::AudioBlock;
use crate::chain::DeckChain;
use crate::params::DeckId;

/// Identifier of a playback unit. Never reused.
pub type UnitId = u64;

/// Control-side view of a deck
#[derive(Debug, Clone)]
pub struct Deck {
    /// Decoded track, replaced wholesale on load
    buffer: Option<Arc<AudioBlock>>,
    /// Playback rate ratio (1.0 = original pitch)
    pitch: f64,
    /// Currently active playback unit, if any
    active_unit: Option<UnitId>,
}

impl Deck {
    /// Create an empty deck at original pitch
    pub fn new() -> Self {
        Self {
            buffer: None,
            pitch: 1.0,
            active_unit: None,
        }
    }

    /// Replace the loaded buffer, returning the previous one
    pub fn load(&mut self, block: Arc<AudioBlock>) -> Option<Arc<AudioBlock>> {
        self.buffer.replace(block)
    }

    pub fn buffer(&self) -> Option<&Arc<AudioBlock>> {
        self.buffer.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn pitch(&self) -> f64 {
        self.pitch
    }

    pub(crate) fn set_pitch(&mut self, rate: f64) {
        self.pitch = rate;
    }

    pub fn active_unit(&self) -> Option<UnitId> {
        self.active_unit
    }

    pub fn is_playing(&self) -> bool {
        self.active_unit.is_some()
    }

    pub(crate) fn set_active_unit(&mut self, unit: Option<UnitId>) -> Option<UnitId> {
        std::mem::replace(&mut self.active_unit, unit)
    }
}

impl Default for Deck {
    fn default() -> Self {
        Self::new()
    }
}

/// One play-through of a deck's buffer
#[derive(Debug, Clone)]
pub struct PlaybackUnit {
    id: UnitId,
    buffer: Arc<AudioBlock>,
    /// Read position in source frames
    position: f64,
    /// Playback rate ratio from the deck pitch
    rate: f64,
    /// Source-to-output sample rate ratio
    resample_ratio: f64,
    ended: bool,
}

impl PlaybackUnit {
    /// Create a unit positioned at the start of `buffer`
    pub fn new(id: UnitId, buffer: Arc<AudioBlock>, rate: f64, output_rate: u32) -> Self {
        let resample_ratio = buffer.sample_rate() as f64 / output_rate.max(1) as f64;
        Self {
            id,
            ended: buffer.is_empty(),
            buffer,
            position: 0.0,
            rate: sanitize_rate(rate),
            resample_ratio,
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Change the playback rate in place
    pub fn set_rate(&mut self, rate: f64) {
        self.rate = sanitize_rate(rate);
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Render into an interleaved stereo buffer, overwriting it.
    ///
    /// Returns true on the block where the unit runs out of audio.
    pub fn render(&mut self, output: &mut [f32]) -> bool {
        if self.ended {
            output.fill(0.0);
            return false;
        }

        let frames = self.buffer.frames();
        let step = self.rate * self.resample_ratio;
        let mut just_ended = false;

        for frame in output.chunks_exact_mut(2) {
            let pos = self.position as usize;

            if self.ended || pos >= frames {
                if !self.ended {
                    self.ended = true;
                    just_ended = true;
                }
                frame[0] = 0.0;
                frame[1] = 0.0;
                continue;
            }

            // Linear interpolation for smoother playback at non-integer positions
            let frac = self.position.fract() as f32;
            let (l0, r0) = self.buffer.stereo_frame(pos);
            if pos + 1 < frames {
                let (l1, r1) = self.buffer.stereo_frame(pos + 1);
                frame[0] = l0 + frac * (l1 - l0);
                frame[1] = r0 + frac * (r1 - r0);
            } else {
                frame[0] = l0;
                frame[1] = r0;
            }

            self.position += step;
        }

        just_ended
    }
}

/// Rates must be positive and finite
fn sanitize_rate(rate: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        1.0
    }
}

/// Render-side deck: persistent chain plus the unit attached to its head
#[derive(Debug, Clone)]
pub struct DeckRenderer {
    id: DeckId,
    chain: DeckChain,
    unit: Option<PlaybackUnit>,
}

impl DeckRenderer {
    pub fn new(id: DeckId, sample_rate: u32) -> Self {
        Self {
            id,
            chain: DeckChain::new(sample_rate as f32),
            unit: None,
        }
    }

    pub fn id(&self) -> DeckId {
        self.id
    }

    pub fn chain(&self) -> &DeckChain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut DeckChain {
        &mut self.chain
    }

    /// Attach a new unit, discarding any previous one. Returns the discarded id.
    pub fn start(&mut self, unit: PlaybackUnit) -> Option<UnitId> {
        self.unit.replace(unit).map(|old| old.id())
    }

    /// Halt and discard the active unit, if any
    pub fn stop(&mut self) -> Option<UnitId> {
        self.unit.take().map(|unit| unit.id())
    }

    /// Update the active unit's rate in place
    pub fn set_rate(&mut self, rate: f64) {
        if let Some(unit) = self.unit.as_mut() {
            unit.set_rate(rate);
        }
    }

    pub fn unit(&self) -> Option<&PlaybackUnit> {
        self.unit.as_ref()
    }

    pub fn active_unit(&self) -> Option<UnitId> {
        self.unit.as_ref().map(PlaybackUnit::id)
    }

    /// Render the unit through the chain into `output` (interleaved stereo).
    ///
    /// Returns the unit id when it ran out of audio during this block.
    pub fn process(&mut self, output: &mut [f32]) -> Option<UnitId> {
        let ended = match self.unit.as_mut() {
            Some(unit) => {
                if unit.render(output) {
                    Some(unit.id())
                } else {
                    None
                }
            }
            None => {
                output.fill(0.0);
                None
            }
        };

        // The chain always runs so filter tails and gain glides keep moving
        self.chain.process(output);
        ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::EqBand;

    fn ramp_block(frames: usize, sample_rate: u32) -> Arc<AudioBlock> {
        let samples: Vec<f32> = (0..frames)
            .flat_map(|i| {
                let v = i as f32 / frames as f32;
                [v, -v]
            })
            .collect();
        Arc::new(AudioBlock::new(samples, 2, sample_rate))
    }

    #[test]
    fn test_new_deck_is_empty() {
        let deck = Deck::new();
        assert!(!deck.is_loaded());
        assert_eq!(deck.pitch(), 1.0);
        assert!(deck.active_unit().is_none());
    }

    #[test]
    fn test_unit_plays_at_unit_rate() {
        let block = ramp_block(100, 48000);
        let mut unit = PlaybackUnit::new(1, block.clone(), 1.0, 48000);
        let mut out = vec![0.0; 20];
        assert!(!unit.render(&mut out));
        for i in 0..10 {
            assert_eq!(out[i * 2], block.stereo_frame(i).0);
            assert_eq!(out[i * 2 + 1], block.stereo_frame(i).1);
        }
    }

    #[test]
    fn test_double_rate_skips_frames() {
        let block = ramp_block(100, 48000);
        let mut unit = PlaybackUnit::new(1, block.clone(), 2.0, 48000);
        let mut out = vec![0.0; 8];
        unit.render(&mut out);
        assert_eq!(out[6], block.stereo_frame(6).0);
    }

    #[test]
    fn test_unit_reports_end_once() {
        let block = ramp_block(4, 48000);
        let mut unit = PlaybackUnit::new(7, block, 1.0, 48000);
        let mut out = vec![1.0; 16];
        assert!(unit.render(&mut out));
        assert!(unit.is_ended());
        assert!(out[8..].iter().all(|&s| s == 0.0));
        assert!(!unit.render(&mut out));
    }

    #[test]
    fn test_invalid_rate_falls_back_to_unity() {
        let mut unit = PlaybackUnit::new(1, ramp_block(10, 48000), -2.0, 48000);
        assert_eq!(unit.rate(), 1.0);
        unit.set_rate(f64::NAN);
        assert_eq!(unit.rate(), 1.0);
    }

    #[test]
    fn test_renderer_replaces_unit() {
        let mut deck = DeckRenderer::new(DeckId::A, 48000);
        let block = ramp_block(10, 48000);
        assert_eq!(deck.start(PlaybackUnit::new(1, block.clone(), 1.0, 48000)), None);
        assert_eq!(deck.start(PlaybackUnit::new(2, block, 1.0, 48000)), Some(1));
        assert_eq!(deck.active_unit(), Some(2));
        assert_eq!(deck.stop(), Some(2));
        assert_eq!(deck.stop(), None);
    }

    #[test]
    fn test_idle_renderer_outputs_silence() {
        let mut deck = DeckRenderer::new(DeckId::A, 48000);
        deck.chain_mut().set_eq_gain(EqBand::Low, 12.0);
        let mut out = vec![0.7; 64];
        assert_eq!(deck.process(&mut out), None);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
