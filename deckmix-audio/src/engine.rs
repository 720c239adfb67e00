//! Audio engine - render-side state fed by control commands
//!
//! The control side never touches render state directly. It sends
//! [`AudioCommand`]s over a bounded channel; [`EngineState`] applies them
//! between blocks and reports [`AudioEvent`]s back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};

use crate::block::AudioBlock;
use crate::chain::StageKind;
use crate::deck::{DeckRenderer, PlaybackUnit, UnitId};
use crate::effects::{Convolver, Effect};
use crate::master::{MasterBus, MasterStageKind};
use crate::meter::MeterTap;
use crate::params::{DeckId, EqBand};

/// Commands sent to the render side
#[derive(Debug)]
pub enum AudioCommand {
    /// Replace the deck's unit with a fresh one and start it
    Start {
        deck: DeckId,
        unit: UnitId,
        buffer: Arc<AudioBlock>,
        rate: f64,
    },
    Stop {
        deck: DeckId,
    },
    /// Update the active unit's playback rate in place
    SetRate {
        deck: DeckId,
        rate: f64,
    },
    SetEqGain {
        deck: DeckId,
        band: EqBand,
        gain_db: f32,
    },
    /// Deck gain stage target (crossfader contribution)
    SetDeckGain {
        deck: DeckId,
        gain: f32,
    },
    SetMasterGain(f32),
    SetReverb {
        enabled: bool,
        mix: f32,
    },
    SetImpulseResponse(Box<Convolver>),
    SetDelay {
        enabled: bool,
        time_ms: f32,
        /// Loop-back coefficient, already clamped
        feedback: f32,
        mix: f32,
    },
    Shutdown,
}

/// Events sent from the render side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEvent {
    /// A playback unit ran out of audio
    UnitEnded { deck: DeckId, unit: UnitId },
}

/// Default command/event channel capacity
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Create the command and event channels
pub fn create_channels(
    capacity: usize,
) -> (
    Sender<AudioCommand>,
    Receiver<AudioCommand>,
    Sender<AudioEvent>,
    Receiver<AudioEvent>,
) {
    let capacity = capacity.max(1);
    let (cmd_tx, cmd_rx) = bounded(capacity);
    let (evt_tx, evt_rx) = bounded(capacity);
    (cmd_tx, cmd_rx, evt_tx, evt_rx)
}

/// Shared suspended/running flag of the output engine.
///
/// Starts suspended; the first user gesture resumes it.
#[derive(Debug, Clone, Default)]
pub struct EngineStatus(Arc<AtomicBool>);

impl EngineStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resume(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn suspend(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Stage layout of the whole graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub decks: [Vec<StageKind>; 2],
    pub master: Vec<MasterStageKind>,
}

/// Maximum buffer size for pre-allocated processing buffers
/// Sized for 2048 stereo frames (typical maximum)
const MAX_BUFFER_SIZE: usize = 4096;

/// Deferred events kept without reallocating
const PENDING_EVENTS_CAPACITY: usize = 8;

/// Audio engine state (held by the audio thread)
pub struct EngineState {
    sample_rate: u32,
    decks: [DeckRenderer; 2],
    master: MasterBus,
    events: Option<Sender<AudioEvent>>,
    /// Events the event channel had no room for, oldest first
    pending_events: Vec<AudioEvent>,
    shutdown: bool,
    // Pre-allocated processing buffers (avoids allocation in audio callback)
    buffer_a: Vec<f32>,
    buffer_b: Vec<f32>,
}

impl EngineState {
    pub fn new(sample_rate: u32) -> Self {
        let (decks, master) = Self::wire_topology(sample_rate);
        Self {
            sample_rate,
            decks,
            master,
            events: None,
            pending_events: Vec::with_capacity(PENDING_EVENTS_CAPACITY),
            shutdown: false,
            buffer_a: vec![0.0f32; MAX_BUFFER_SIZE],
            buffer_b: vec![0.0f32; MAX_BUFFER_SIZE],
        }
    }

    /// Build both deck chains and the master bus, once
    fn wire_topology(sample_rate: u32) -> ([DeckRenderer; 2], MasterBus) {
        (
            DeckId::ALL.map(|id| DeckRenderer::new(id, sample_rate)),
            MasterBus::new(sample_rate),
        )
    }

    /// Report transport events on `events`
    pub fn with_events(mut self, events: Sender<AudioEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Attach the meter tap at the end of the master bus
    pub fn set_meter_tap(&mut self, tap: MeterTap) {
        self.master.set_tap(tap);
    }

    pub fn topology(&self) -> Topology {
        Topology {
            decks: [self.decks[0].chain().topology(), self.decks[1].chain().topology()],
            master: self.master.topology().to_vec(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn deck(&self, id: DeckId) -> &DeckRenderer {
        &self.decks[id.index()]
    }

    pub fn master(&self) -> &MasterBus {
        &self.master
    }

    /// Process a command
    pub fn handle_command(&mut self, cmd: AudioCommand) {
        match cmd {
            AudioCommand::Start {
                deck,
                unit,
                buffer,
                rate,
            } => {
                let unit = PlaybackUnit::new(unit, buffer, rate, self.sample_rate);
                self.decks[deck.index()].start(unit);
            }
            AudioCommand::Stop { deck } => {
                self.decks[deck.index()].stop();
            }
            AudioCommand::SetRate { deck, rate } => self.decks[deck.index()].set_rate(rate),
            AudioCommand::SetEqGain {
                deck,
                band,
                gain_db,
            } => self.decks[deck.index()]
                .chain_mut()
                .set_eq_gain(band, gain_db),
            AudioCommand::SetDeckGain { deck, gain } => {
                self.decks[deck.index()].chain_mut().set_gain(gain)
            }
            AudioCommand::SetMasterGain(gain) => self.master.set_gain(gain),
            AudioCommand::SetReverb { enabled, mix } => {
                let reverb = self.master.reverb_mut();
                reverb.set_mix(mix);
                reverb.set_enabled(enabled);
            }
            AudioCommand::SetImpulseResponse(convolver) => {
                self.master.reverb_mut().set_impulse_response(convolver);
            }
            AudioCommand::SetDelay {
                enabled,
                time_ms,
                feedback,
                mix,
            } => {
                let delay = self.master.delay_mut();
                delay.set_delay_ms(time_ms);
                delay.set_feedback(feedback);
                delay.set_mix(mix);
                delay.set_enabled(enabled);
            }
            AudioCommand::Shutdown => self.shutdown = true,
        }
    }

    /// Apply every pending command. Returns false once shut down or disconnected.
    pub fn drain(&mut self, commands: &Receiver<AudioCommand>) -> bool {
        loop {
            match commands.try_recv() {
                Ok(cmd) => self.handle_command(cmd),
                Err(TryRecvError::Empty) => return !self.shutdown,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    /// Process audio for output buffer (interleaved stereo)
    pub fn process(&mut self, output: &mut [f32]) {
        let len = output.len();

        if self.shutdown {
            output.fill(0.0);
            return;
        }

        // Ensure pre-allocated buffers are large enough
        // This should rarely happen after the first call
        if len > self.buffer_a.len() {
            self.buffer_a.resize(len, 0.0);
            self.buffer_b.resize(len, 0.0);
        }

        let buf_a = &mut self.buffer_a[..len];
        let buf_b = &mut self.buffer_b[..len];

        let ended = [
            self.decks[0].process(buf_a),
            self.decks[1].process(buf_b),
        ];

        self.master.process(buf_a, buf_b, output);

        for (renderer, unit) in self.decks.iter_mut().zip(ended) {
            let Some(unit) = unit else { continue };
            renderer.stop();
            if self.events.is_some() {
                self.pending_events.push(AudioEvent::UnitEnded {
                    deck: renderer.id(),
                    unit,
                });
            }
        }
        self.flush_events();
    }

    /// Send deferred events in order; whatever does not fit waits for the
    /// next block
    fn flush_events(&mut self) {
        let Some(events) = &self.events else { return };
        let mut sent = 0;
        for event in &self.pending_events {
            match events.try_send(event.clone()) {
                Ok(()) => sent += 1,
                Err(TrySendError::Full(_)) => break,
                Err(TrySendError::Disconnected(_)) => {
                    sent = self.pending_events.len();
                    break;
                }
            }
        }
        self.pending_events.drain(..sent);
    }

    /// Events still waiting for room on the event channel
    pub fn pending_events(&self) -> usize {
        self.pending_events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::DECK_TOPOLOGY;
    use crate::master::MASTER_TOPOLOGY;

    fn block(frames: usize, value: f32) -> Arc<AudioBlock> {
        Arc::new(AudioBlock::new(vec![value; frames * 2], 2, 48000))
    }

    #[test]
    fn test_topology_wired_once() {
        let engine = EngineState::new(48000);
        let topology = engine.topology();
        assert_eq!(topology.decks[0], DECK_TOPOLOGY.to_vec());
        assert_eq!(topology.decks[1], DECK_TOPOLOGY.to_vec());
        assert_eq!(topology.master, MASTER_TOPOLOGY.to_vec());
    }

    #[test]
    fn test_start_replaces_unit() {
        let mut engine = EngineState::new(48000);
        for unit in [1, 2] {
            engine.handle_command(AudioCommand::Start {
                deck: DeckId::A,
                unit,
                buffer: block(256, 0.5),
                rate: 1.0,
            });
        }
        assert_eq!(engine.deck(DeckId::A).active_unit(), Some(2));
        assert_eq!(engine.deck(DeckId::B).active_unit(), None);
    }

    #[test]
    fn test_decks_sum_to_output() {
        let mut engine = EngineState::new(48000);
        engine.handle_command(AudioCommand::Start {
            deck: DeckId::A,
            unit: 1,
            buffer: block(4096, 0.25),
            rate: 1.0,
        });
        engine.handle_command(AudioCommand::Start {
            deck: DeckId::B,
            unit: 2,
            buffer: block(4096, 0.5),
            rate: 1.0,
        });

        let mut out = vec![0.0; 512];
        engine.process(&mut out);
        assert!(out.iter().all(|&s| (s - 0.75).abs() < 1e-6));
    }

    #[test]
    fn test_unit_end_is_reported() {
        let (_cmd_tx, _cmd_rx, evt_tx, evt_rx) = create_channels(8);
        let mut engine = EngineState::new(48000).with_events(evt_tx);
        engine.handle_command(AudioCommand::Start {
            deck: DeckId::B,
            unit: 9,
            buffer: block(16, 0.5),
            rate: 1.0,
        });

        let mut out = vec![0.0; 128];
        engine.process(&mut out);
        assert_eq!(
            evt_rx.try_recv(),
            Ok(AudioEvent::UnitEnded {
                deck: DeckId::B,
                unit: 9
            })
        );
        assert_eq!(engine.deck(DeckId::B).active_unit(), None);
    }

    #[test]
    fn test_unit_end_waits_for_room_on_full_channel() {
        let (evt_tx, evt_rx) = bounded(1);
        let mut engine = EngineState::new(48000).with_events(evt_tx);
        for (deck, unit) in [(DeckId::A, 1), (DeckId::B, 2)] {
            engine.handle_command(AudioCommand::Start {
                deck,
                unit,
                buffer: block(16, 0.5),
                rate: 1.0,
            });
        }

        let mut out = vec![0.0; 128];
        engine.process(&mut out);
        assert_eq!(engine.pending_events(), 1);
        assert_eq!(
            evt_rx.try_recv(),
            Ok(AudioEvent::UnitEnded {
                deck: DeckId::A,
                unit: 1
            })
        );
        assert!(evt_rx.try_recv().is_err());

        engine.process(&mut out);
        assert_eq!(
            evt_rx.try_recv(),
            Ok(AudioEvent::UnitEnded {
                deck: DeckId::B,
                unit: 2
            })
        );
        assert_eq!(engine.pending_events(), 0);
    }

    #[test]
    fn test_drain_applies_commands_and_stops_on_shutdown() {
        let (cmd_tx, cmd_rx, _evt_tx, _evt_rx) = create_channels(8);
        let mut engine = EngineState::new(48000);

        cmd_tx.send(AudioCommand::SetMasterGain(0.3)).unwrap();
        assert!(engine.drain(&cmd_rx));
        assert_eq!(engine.master().gain(), 0.3);

        cmd_tx.send(AudioCommand::Shutdown).unwrap();
        assert!(!engine.drain(&cmd_rx));
        let mut out = vec![1.0; 16];
        engine.process(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_oversized_block_is_handled() {
        let mut engine = EngineState::new(48000);
        let mut out = vec![1.0; MAX_BUFFER_SIZE * 2];
        engine.process(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_engine_status_starts_suspended() {
        let status = EngineStatus::new();
        assert!(!status.is_running());
        let shared = status.clone();
        shared.resume();
        assert!(status.is_running());
        status.suspend();
        assert!(!shared.is_running());
    }
}
