//! Control-side mixer - the one owner of decks, parameters and the meter loop
//!
//! Every control operation updates the [`ParameterStore`] first, then sends
//! the resulting stage values to the render side. Operations never block: a
//! full command channel drops the command with a warning.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::block::AudioBlock;
use crate::deck::{Deck, UnitId};
use crate::effects::Convolver;
use crate::engine::{
    create_channels, AudioCommand, AudioEvent, EngineState, EngineStatus,
    DEFAULT_CHANNEL_CAPACITY,
};
use crate::master::{crossfade_gains, volume_to_gain};
use crate::meter::{meter_tap, MeterLoop, MeterReading, DEFAULT_METER_INTERVAL};
use crate::params::{DeckId, DelayParams, EqBand, ParameterStore, ReverbParams};

/// Enough room for the default-parameter burst sent at construction
const MIN_CHANNEL_CAPACITY: usize = 32;
/// Published readings kept for a slow consumer
const READING_BACKLOG: usize = 64;

/// Errors raised while building the mixer
#[derive(Debug, Error)]
pub enum MixerError {
    #[error("failed to start meter loop: {0}")]
    MeterLoop(#[from] io::Error),
}

/// Construction options
#[derive(Debug, Clone)]
pub struct MixerOptions {
    /// Output sample rate of the render side
    pub sample_rate: u32,
    pub meter_interval: Duration,
    pub channel_capacity: usize,
}

impl Default for MixerOptions {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            meter_interval: DEFAULT_METER_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Everything [`Mixer::build`] produces.
///
/// `engine` and `commands` go to the audio thread; `readings` to whoever
/// displays the meter.
pub struct MixerParts {
    pub mixer: Mixer,
    pub engine: EngineState,
    pub commands: Receiver<AudioCommand>,
    pub readings: Receiver<MeterReading>,
}

/// Control-side aggregate
pub struct Mixer {
    params: ParameterStore,
    decks: [Deck; 2],
    next_unit: UnitId,
    commands: Sender<AudioCommand>,
    events: Receiver<AudioEvent>,
    status: EngineStatus,
    meter: MeterLoop,
}

impl Mixer {
    /// Build the engine, wire its stages, start metering and apply defaults
    pub fn build(options: MixerOptions) -> Result<MixerParts, MixerError> {
        let sample_rate = options.sample_rate.max(1);
        let capacity = options.channel_capacity.max(MIN_CHANNEL_CAPACITY);
        let (cmd_tx, cmd_rx, evt_tx, evt_rx) = create_channels(capacity);

        let mut engine = EngineState::new(sample_rate).with_events(evt_tx);

        // Room for two intervals of stereo audio, and never less than a second
        let span = (options.meter_interval * 2).max(Duration::from_secs(1));
        let tap_capacity = (sample_rate as f64 * 2.0 * span.as_secs_f64()) as usize;
        let (tap, peak_meter) = meter_tap(tap_capacity);
        engine.set_meter_tap(tap);

        let status = EngineStatus::new();
        let (reading_tx, reading_rx) = bounded(READING_BACKLOG);
        let meter = MeterLoop::spawn(
            peak_meter,
            status.clone(),
            options.meter_interval,
            reading_tx,
        )?;

        let mut mixer = Self {
            params: ParameterStore::new(),
            decks: [Deck::new(), Deck::new()],
            next_unit: 1,
            commands: cmd_tx,
            events: evt_rx,
            status,
            meter,
        };
        mixer.apply_defaults();

        info!(sample_rate, capacity, "mixer ready");

        Ok(MixerParts {
            mixer,
            engine,
            commands: cmd_rx,
            readings: reading_rx,
        })
    }

    /// Push every stored parameter to the render side
    fn apply_defaults(&mut self) {
        self.set_crossfade(self.params.crossfade());
        self.set_master_volume(self.params.master_volume());
        for deck in DeckId::ALL {
            for band in EqBand::ALL {
                self.set_eq_gain(deck, band, self.params.eq_gain(deck, band));
            }
        }
        let reverb = self.params.reverb();
        self.set_reverb(reverb.enabled, reverb.mix);
        let delay = self.params.delay();
        self.set_delay(delay.enabled, delay.time_ms, delay.feedback, delay.mix);
    }

    fn send(&self, cmd: AudioCommand) {
        match self.commands.try_send(cmd) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("command channel full, dropping command");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("render side gone, command ignored");
            }
        }
    }

    /// Replace a deck's buffer. An active unit keeps its old buffer.
    pub fn load(&mut self, deck: DeckId, block: impl Into<Arc<AudioBlock>>) {
        let block = block.into();
        info!(
            deck = %deck.label(),
            name = block.name().unwrap_or("<unnamed>"),
            secs = block.duration_secs(),
            "track loaded"
        );
        self.decks[deck.index()].load(block);
    }

    /// Start a fresh playback unit, replacing any active one.
    ///
    /// Returns the new unit id, or `None` when the deck has nothing loaded.
    pub fn play(&mut self, deck: DeckId) -> Option<UnitId> {
        let state = &mut self.decks[deck.index()];
        let Some(buffer) = state.buffer().cloned() else {
            debug!(deck = %deck.label(), "play ignored, no track loaded");
            return None;
        };

        let unit = self.next_unit;
        self.next_unit += 1;
        let rate = state.pitch();
        if let Some(previous) = state.set_active_unit(Some(unit)) {
            debug!(deck = %deck.label(), previous, unit, "replacing playback unit");
        }

        self.send(AudioCommand::Start {
            deck,
            unit,
            buffer,
            rate,
        });
        Some(unit)
    }

    /// Halt the active unit. Returns false when nothing was playing.
    pub fn stop(&mut self, deck: DeckId) -> bool {
        if self.decks[deck.index()].set_active_unit(None).is_none() {
            return false;
        }
        self.send(AudioCommand::Stop { deck });
        true
    }

    /// Set pitch in semitones; returns the playback rate now in effect
    pub fn set_pitch(&mut self, deck: DeckId, semitones: f64) -> f64 {
        let rate = self.params.set_pitch(deck, semitones);
        let state = &mut self.decks[deck.index()];
        state.set_pitch(rate);
        if state.is_playing() {
            self.send(AudioCommand::SetRate { deck, rate });
        }
        rate
    }

    /// Set an EQ band gain in dB; returns the stored value
    pub fn set_eq_gain(&mut self, deck: DeckId, band: EqBand, gain_db: f32) -> f32 {
        let gain_db = self.params.set_eq_gain(deck, band, gain_db);
        self.send(AudioCommand::SetEqGain {
            deck,
            band,
            gain_db,
        });
        gain_db
    }

    /// Set crossfader position (0-100); returns the stored value
    pub fn set_crossfade(&mut self, position: f32) -> f32 {
        let position = self.params.set_crossfade(position);
        let (gain_a, gain_b) = crossfade_gains(position);
        self.send(AudioCommand::SetDeckGain {
            deck: DeckId::A,
            gain: gain_a,
        });
        self.send(AudioCommand::SetDeckGain {
            deck: DeckId::B,
            gain: gain_b,
        });
        position
    }

    /// Set master volume (0-100); returns the stored value
    pub fn set_master_volume(&mut self, volume: f32) -> f32 {
        let volume = self.params.set_master_volume(volume);
        self.send(AudioCommand::SetMasterGain(volume_to_gain(volume)));
        volume
    }

    pub fn set_reverb(&mut self, enabled: bool, mix: f32) -> ReverbParams {
        let reverb = self.params.set_reverb(enabled, mix);
        self.send(AudioCommand::SetReverb {
            enabled: reverb.enabled,
            mix: reverb.mix,
        });
        reverb
    }

    pub fn set_delay(
        &mut self,
        enabled: bool,
        time_ms: f32,
        feedback: f32,
        mix: f32,
    ) -> DelayParams {
        let delay = self.params.set_delay(enabled, time_ms, feedback, mix);
        self.send(AudioCommand::SetDelay {
            enabled: delay.enabled,
            time_ms: delay.time_ms,
            feedback: delay.feedback_coefficient(),
            mix: delay.mix,
        });
        delay
    }

    /// Prepare a convolver from `impulse` and hand it to the reverb.
    ///
    /// Returns false when the response is empty or silent.
    pub fn set_impulse_response(&mut self, impulse: &AudioBlock) -> bool {
        match Convolver::new(impulse) {
            Some(convolver) => {
                info!(
                    partitions = convolver.partition_count(),
                    "impulse response installed"
                );
                self.send(AudioCommand::SetImpulseResponse(Box::new(convolver)));
                true
            }
            None => {
                warn!("impulse response is empty or silent, reverb stays dry");
                false
            }
        }
    }

    /// Resume the output engine (first user gesture)
    pub fn resume(&self) {
        if !self.status.is_running() {
            info!("engine resumed");
        }
        self.status.resume();
    }

    pub fn suspend(&self) {
        if self.status.is_running() {
            info!("engine suspended");
        }
        self.status.suspend();
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    /// Apply pending render-side events. Returns how many were handled.
    pub fn poll_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            handled += 1;
            match event {
                AudioEvent::UnitEnded { deck, unit } => {
                    let state = &mut self.decks[deck.index()];
                    if state.active_unit() == Some(unit) {
                        state.set_active_unit(None);
                        debug!(deck = %deck.label(), unit, "playback finished");
                    }
                }
            }
        }
        handled
    }

    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    pub fn deck(&self, deck: DeckId) -> &Deck {
        &self.decks[deck.index()]
    }

    /// Stop the meter loop and tell the render side to go quiet
    pub fn shutdown(&mut self) {
        self.send(AudioCommand::Shutdown);
        self.meter.cancel();
        info!("mixer shut down");
    }
}
