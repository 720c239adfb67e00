//! Track loading for DeckMix - decoding, impulse responses and previews

mod config;
mod decode;
mod impulse;
mod loader;
mod waveform;

pub use config::{Config, ConfigError};
pub use decode::{DecodeOutcome, DecodeService, DecodedTrack, TrackSource};
pub use impulse::ImpulseLoader;
pub use loader::{resample, LoadError, TrackLoader};
pub use waveform::WaveformEnvelope;
