//! Parameter store - current value of every mixer control
//!
//! All values are clamped on the way in. Non-finite input is rejected and
//! the previous value is kept, so the render side never sees NaN.

use tracing::warn;

use crate::effects::MAX_FEEDBACK;

/// Deck identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeckId {
    A,
    B,
}

impl DeckId {
    pub const ALL: [DeckId; 2] = [DeckId::A, DeckId::B];

    /// Index into per-deck arrays
    #[inline]
    pub fn index(self) -> usize {
        match self {
            DeckId::A => 0,
            DeckId::B => 1,
        }
    }

    pub fn label(self) -> char {
        match self {
            DeckId::A => 'A',
            DeckId::B => 'B',
        }
    }
}

/// EQ band of a deck chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EqBand {
    /// Low shelf at 250 Hz
    Low,
    /// Peaking bell at 1250 Hz, Q 0.7
    Mid,
    /// High shelf at 4 kHz
    High,
}

impl EqBand {
    pub const ALL: [EqBand; 3] = [EqBand::Low, EqBand::Mid, EqBand::High];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            EqBand::Low => 0,
            EqBand::Mid => 1,
            EqBand::High => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EqBand::Low => "low",
            EqBand::Mid => "mid",
            EqBand::High => "high",
        }
    }
}

/// Convert a semitone offset to a playback-rate ratio (equal temperament)
#[inline]
pub fn semitones_to_rate(semitones: f64) -> f64 {
    2.0f64.powf(semitones / 12.0)
}

/// Per-deck control values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeckParams {
    /// EQ gains in dB, indexed by [`EqBand::index`]
    pub eq_db: [f32; 3],
    /// Pitch offset in semitones
    pub pitch_semitones: f64,
}

impl Default for DeckParams {
    fn default() -> Self {
        Self {
            eq_db: [0.0; 3],
            pitch_semitones: 0.0,
        }
    }
}

impl DeckParams {
    /// Playback rate derived from the pitch offset
    pub fn rate(&self) -> f64 {
        semitones_to_rate(self.pitch_semitones)
    }
}

/// Reverb send settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbParams {
    pub enabled: bool,
    /// Wet mix percentage (0-100)
    pub mix: f32,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            enabled: false,
            mix: 30.0,
        }
    }
}

/// Delay send settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayParams {
    pub enabled: bool,
    /// Delay time in milliseconds (1-2000)
    pub time_ms: f32,
    /// Feedback percentage (0-100)
    pub feedback: f32,
    /// Wet mix percentage (0-100)
    pub mix: f32,
}

impl Default for DelayParams {
    fn default() -> Self {
        Self {
            enabled: false,
            time_ms: 300.0,
            feedback: 40.0,
            mix: 30.0,
        }
    }
}

impl DelayParams {
    /// Loop-back coefficient, always strictly below 1.0
    pub fn feedback_coefficient(&self) -> f32 {
        (self.feedback / 100.0).clamp(0.0, MAX_FEEDBACK)
    }
}

/// Minimum delay time in milliseconds
pub const MIN_DELAY_MS: f32 = 1.0;
/// Maximum delay time in milliseconds
pub const MAX_DELAY_MS: f32 = 2000.0;

/// Current value of every mixer control
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterStore {
    /// Crossfader position (0 = full A, 100 = full B)
    crossfade: f32,
    /// Master volume (0-100)
    master_volume: f32,
    decks: [DeckParams; 2],
    reverb: ReverbParams,
    delay: DelayParams,
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self {
            crossfade: 50.0,
            master_volume: 100.0,
            decks: [DeckParams::default(); 2],
            reverb: ReverbParams::default(),
            delay: DelayParams::default(),
        }
    }
}

/// Keep `previous` when `value` is NaN or infinite
fn finite_or(name: &str, value: f32, previous: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        warn!(control = name, value = %value, "rejecting non-finite control value");
        previous
    }
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set crossfader position, returns the stored (clamped) value
    pub fn set_crossfade(&mut self, position: f32) -> f32 {
        self.crossfade = finite_or("crossfade", position, self.crossfade).clamp(0.0, 100.0);
        self.crossfade
    }

    pub fn crossfade(&self) -> f32 {
        self.crossfade
    }

    /// Set master volume, returns the stored (clamped) value
    pub fn set_master_volume(&mut self, level: f32) -> f32 {
        self.master_volume =
            finite_or("master_volume", level, self.master_volume).clamp(0.0, 100.0);
        self.master_volume
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    /// Set an EQ band gain in dB. Any finite value is accepted.
    pub fn set_eq_gain(&mut self, deck: DeckId, band: EqBand, gain_db: f32) -> f32 {
        let slot = &mut self.decks[deck.index()].eq_db[band.index()];
        *slot = finite_or("eq_gain", gain_db, *slot);
        *slot
    }

    pub fn eq_gain(&self, deck: DeckId, band: EqBand) -> f32 {
        self.decks[deck.index()].eq_db[band.index()]
    }

    /// Set pitch offset in semitones, returns the resulting playback rate
    pub fn set_pitch(&mut self, deck: DeckId, semitones: f64) -> f64 {
        let params = &mut self.decks[deck.index()];
        if semitones.is_finite() {
            params.pitch_semitones = semitones;
        } else {
            warn!(deck = %deck.label(), "rejecting non-finite pitch offset");
        }
        params.rate()
    }

    pub fn deck(&self, deck: DeckId) -> &DeckParams {
        &self.decks[deck.index()]
    }

    pub fn set_reverb(&mut self, enabled: bool, mix: f32) -> ReverbParams {
        self.reverb.enabled = enabled;
        self.reverb.mix = finite_or("reverb_mix", mix, self.reverb.mix).clamp(0.0, 100.0);
        self.reverb
    }

    pub fn reverb(&self) -> ReverbParams {
        self.reverb
    }

    pub fn set_delay(
        &mut self,
        enabled: bool,
        time_ms: f32,
        feedback: f32,
        mix: f32,
    ) -> DelayParams {
        let delay = &mut self.delay;
        delay.enabled = enabled;
        delay.time_ms =
            finite_or("delay_time", time_ms, delay.time_ms).clamp(MIN_DELAY_MS, MAX_DELAY_MS);
        delay.feedback = finite_or("delay_feedback", feedback, delay.feedback).clamp(0.0, 100.0);
        delay.mix = finite_or("delay_mix", mix, delay.mix).clamp(0.0, 100.0);
        *delay
    }

    pub fn delay(&self) -> DelayParams {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_law() {
        assert!((semitones_to_rate(0.0) - 1.0).abs() < 1e-12);
        assert!((semitones_to_rate(12.0) - 2.0).abs() < 1e-12);
        assert!((semitones_to_rate(-12.0) - 0.5).abs() < 1e-12);
        for s in [-7.0, -1.5, 3.0, 5.25, 19.0] {
            assert!((semitones_to_rate(s) - 2.0f64.powf(s / 12.0)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_crossfade_clamping() {
        let mut store = ParameterStore::new();
        assert_eq!(store.set_crossfade(150.0), 100.0);
        assert_eq!(store.set_crossfade(-3.0), 0.0);
        assert_eq!(store.set_crossfade(f32::NAN), 0.0);
    }

    #[test]
    fn test_master_volume_leaves_crossfade_alone() {
        let mut store = ParameterStore::new();
        store.set_crossfade(20.0);
        store.set_master_volume(35.0);
        assert_eq!(store.crossfade(), 20.0);
        assert_eq!(store.master_volume(), 35.0);
    }

    #[test]
    fn test_eq_gain_accepts_any_finite_value() {
        let mut store = ParameterStore::new();
        assert_eq!(store.set_eq_gain(DeckId::A, EqBand::Mid, -40.0), -40.0);
        assert_eq!(store.set_eq_gain(DeckId::A, EqBand::Mid, f32::INFINITY), -40.0);
        assert_eq!(store.eq_gain(DeckId::B, EqBand::Mid), 0.0);
    }

    #[test]
    fn test_non_finite_pitch_keeps_previous() {
        let mut store = ParameterStore::new();
        store.set_pitch(DeckId::B, 12.0);
        let rate = store.set_pitch(DeckId::B, f64::NAN);
        assert!((rate - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_delay_feedback_stays_below_unity() {
        let mut store = ParameterStore::new();
        let delay = store.set_delay(true, 5000.0, 100.0, 120.0);
        assert_eq!(delay.time_ms, MAX_DELAY_MS);
        assert_eq!(delay.mix, 100.0);
        assert!(delay.feedback_coefficient() < 1.0);
    }
}
