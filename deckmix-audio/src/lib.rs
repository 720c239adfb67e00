//! Audio core for DeckMix - decks, chains, master bus and metering
//!
//! This crate provides the real-time signal graph:
//! - Params: current value of every control, clamped on the way in
//! - Chain: per-deck low shelf, mid peak, high shelf and gain stages
//! - Deck: control-side deck state and render-side playback units
//! - Master: crossfade law, master gain, reverb and delay sends
//! - Meter: peak metering loop fed by a lock-free tap
//! - Mixer: control-side aggregate that owns all of the above

mod block;
mod chain;
mod deck;
pub mod effects;
mod engine;
mod eq;
mod master;
mod meter;
mod mixer;
mod params;

pub use block::AudioBlock;
pub use chain::{DeckChain, GainStage, StageKind, DECK_TOPOLOGY};
pub use deck::{Deck, DeckRenderer, PlaybackUnit, UnitId};
pub use effects::{wet_dry, ConvolutionReverb, Convolver, Effect, FeedbackDelay, WetDry};
pub use engine::{
    create_channels, AudioCommand, AudioEvent, EngineState, EngineStatus, Topology,
    DEFAULT_CHANNEL_CAPACITY,
};
pub use eq::{
    BiquadCoeffs, EqFilter, HIGH_SHELF_HZ, LOW_SHELF_HZ, MAX_FILTER_GAIN_DB, MID_PEAK_HZ,
    MID_PEAK_Q,
};
pub use master::{crossfade_gains, volume_to_gain, MasterBus, MasterStageKind, MASTER_TOPOLOGY};
pub use meter::{
    meter_tap, peak, peak_to_dbfs, MeterLoop, MeterReading, MeterTap, MeterTier, PeakMeter,
    DEFAULT_METER_INTERVAL, METER_FLOOR_DB, METER_WINDOW_FRAMES,
};
pub use mixer::{Mixer, MixerError, MixerOptions, MixerParts};
pub use params::{
    semitones_to_rate, DeckId, DeckParams, DelayParams, EqBand, ParameterStore, ReverbParams,
    MAX_DELAY_MS, MIN_DELAY_MS,
};
