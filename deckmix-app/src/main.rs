//! DeckMix - dual-deck live mixer
//!
//! Reads control lines from stdin (see `control`), plays through the default
//! audio device and prints meter readings and waveform previews to stdout.

mod control;
mod output;

use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{never, select, tick, unbounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use deckmix_audio::{
    AudioBlock, AudioCommand, EngineState, MeterReading, MeterTier, Mixer, MixerOptions,
    MixerParts,
};
use deckmix_library::{
    Config, DecodeOutcome, DecodeService, ImpulseLoader, LoadError, TrackLoader, TrackSource,
    WaveformEnvelope,
};

use control::Control;
use output::OutputDevice;

/// Columns of the printed waveform preview
const WAVEFORM_WIDTH: usize = 64;
/// How often finished playback units are reaped
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let config = Config::load();
    let device = OutputDevice::open_default()?;
    let sample_rate = device.sample_rate();

    let MixerParts {
        mut mixer,
        engine,
        commands,
        readings,
    } = Mixer::build(MixerOptions {
        sample_rate,
        meter_interval: config.meter_interval(),
        channel_capacity: config.channel_capacity,
    })?;

    let engine = Arc::new(Mutex::new(engine));
    let stream = device.start(engine.clone(), mixer.status().clone())?;

    let command_thread = thread::Builder::new()
        .name("deckmix-commands".into())
        .spawn(move || run_command_thread(&engine, &commands))?;

    let decoder = DecodeService::spawn(TrackLoader::with_sample_rate(sample_rate), WAVEFORM_WIDTH)?;
    let impulse = ImpulseLoader::new(config.impulse_path.clone(), sample_rate).spawn()?;
    let lines = spawn_stdin_reader()?;

    info!("ready - type commands, 'resume' or any command starts audio");
    run_control_loop(&mut mixer, &decoder, &lines, &readings, impulse);

    mixer.shutdown();
    drop(stream);
    let _ = command_thread.join();
    Ok(())
}

/// Apply render commands as they arrive
fn run_command_thread(engine: &Mutex<EngineState>, commands: &Receiver<AudioCommand>) {
    loop {
        match commands.recv_timeout(Duration::from_millis(10)) {
            Ok(cmd) => {
                let mut state = engine.lock();
                state.handle_command(cmd);
                // Apply the rest of a burst under the same lock
                if !state.drain(commands) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("command thread stopped");
}

fn spawn_stdin_reader() -> io::Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("deckmix-stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

fn run_control_loop(
    mixer: &mut Mixer,
    decoder: &DecodeService,
    lines: &Receiver<String>,
    readings: &Receiver<MeterReading>,
    impulse: Receiver<Result<AudioBlock, LoadError>>,
) {
    let events = tick(EVENT_POLL_INTERVAL);
    let mut impulse = Some(impulse);
    let mut last_meter = String::new();
    let mut started = false;

    loop {
        let impulse_rx = impulse.clone().unwrap_or_else(never);
        select! {
            recv(lines) -> line => {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match control::parse(&line) {
                    Ok(Control::Quit) => break,
                    Ok(cmd) => {
                        // First gesture starts audio output
                        if !started {
                            started = true;
                            mixer.resume();
                        }
                        apply(mixer, decoder, cmd);
                    }
                    Err(e) => println!("error: {e}"),
                }
            }
            recv(decoder.outcomes()) -> outcome => {
                if let Ok(outcome) = outcome {
                    install_track(mixer, outcome);
                }
            }
            recv(readings) -> reading => {
                if let Ok(reading) = reading {
                    let text = format_reading(&reading);
                    if text != last_meter {
                        println!("{text}");
                        last_meter = text;
                    }
                }
            }
            recv(impulse_rx) -> result => {
                impulse = None;
                if let Ok(Ok(block)) = result {
                    mixer.set_impulse_response(&block);
                }
            }
            recv(events) -> _ => {
                mixer.poll_events();
            }
        }
    }
}

fn apply(mixer: &mut Mixer, decoder: &DecodeService, cmd: Control) {
    match cmd {
        Control::Load { deck, path } => {
            println!("deck {}: loading {}", deck.label(), path.display());
            if !decoder.request(deck, TrackSource::File(path)) {
                warn!("decode worker unavailable");
            }
        }
        Control::Play(deck) => {
            if mixer.play(deck).is_none() {
                println!("deck {}: nothing loaded", deck.label());
            }
        }
        Control::Stop(deck) => {
            mixer.stop(deck);
        }
        Control::Pitch { deck, semitones } => {
            let rate = mixer.set_pitch(deck, semitones);
            println!("deck {}: rate {:.3}", deck.label(), rate);
        }
        Control::Master(volume) => {
            mixer.set_master_volume(volume);
        }
        Control::Crossfade(position) => {
            mixer.set_crossfade(position);
        }
        Control::Eq {
            deck,
            band,
            gain_db,
        } => {
            let gain = mixer.set_eq_gain(deck, band, gain_db);
            println!("deck {} {}: {} dB", deck.label(), band.name(), gain);
        }
        Control::Reverb { enabled, mix } => {
            let mix = mix.unwrap_or(mixer.params().reverb().mix);
            mixer.set_reverb(enabled, mix);
        }
        Control::Delay { enabled, settings } => {
            let stored = mixer.params().delay();
            let (time_ms, feedback, mix) =
                settings.unwrap_or((stored.time_ms, stored.feedback, stored.mix));
            mixer.set_delay(enabled, time_ms, feedback, mix);
        }
        Control::Resume => mixer.resume(),
        Control::Suspend => mixer.suspend(),
        Control::Quit => {}
    }
}

fn install_track(mixer: &mut Mixer, outcome: DecodeOutcome) {
    let deck = outcome.deck;
    match outcome.result {
        Ok(track) => {
            println!(
                "deck {}: {} ({:.1}s)",
                deck.label(),
                track.block.name().unwrap_or("track"),
                track.block.duration_secs()
            );
            println!("deck {}: {}", deck.label(), sparkline(&track.waveform));
            mixer.load(deck, track.block);
        }
        // Keep whatever was loaded before
        Err(e) => println!("deck {}: load failed: {e}", deck.label()),
    }
}

fn format_reading(reading: &MeterReading) -> String {
    let tier = match reading.tier() {
        MeterTier::Normal => "",
        MeterTier::Elevated => " [elevated]",
        MeterTier::Hot => " [hot]",
    };
    format!("master: {reading}{tier}")
}

fn sparkline(envelope: &WaveformEnvelope) -> String {
    const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    envelope
        .peaks()
        .map(|peak| {
            let level = (peak.clamp(0.0, 1.0) * (LEVELS.len() - 1) as f32).round() as usize;
            LEVELS[level]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckmix_audio::DeckId;

    #[test]
    fn test_sparkline_scales_peaks() {
        let block = AudioBlock::new(vec![0.0, 1.0, -0.5, 0.0], 1, 48000);
        let envelope = WaveformEnvelope::from_block(&block, 4);
        assert_eq!(sparkline(&envelope), "▁█▅▁");
    }

    #[test]
    fn test_format_reading_marks_tiers() {
        assert_eq!(format_reading(&MeterReading::from_db(-3.04)), "master: -3.0 dB [hot]");
        assert_eq!(format_reading(&MeterReading::floor()), "master: -100.0 dB");
    }

    #[test]
    fn test_failed_decode_keeps_previous_track() {
        let MixerParts { mut mixer, .. } = Mixer::build(MixerOptions::default()).unwrap();
        mixer.load(DeckId::B, AudioBlock::new(vec![0.2; 480], 2, 48000));
        let before = mixer.deck(DeckId::B).buffer().cloned().unwrap();

        install_track(
            &mut mixer,
            DecodeOutcome {
                deck: DeckId::B,
                result: Err(LoadError::Empty),
            },
        );

        let after = mixer.deck(DeckId::B).buffer().unwrap();
        assert!(Arc::ptr_eq(&before, after));
        assert!(!mixer.deck(DeckId::A).is_loaded());
    }

    #[test]
    fn test_apply_routes_controls_to_mixer() {
        let MixerParts { mut mixer, .. } = Mixer::build(MixerOptions::default()).unwrap();
        let decoder = DecodeService::spawn(TrackLoader::new(), 8).unwrap();

        // Nothing loaded yet
        apply(&mut mixer, &decoder, Control::Play(DeckId::A));
        assert!(mixer.deck(DeckId::A).active_unit().is_none());

        mixer.load(DeckId::A, AudioBlock::new(vec![0.1; 960], 2, 48000));
        apply(&mut mixer, &decoder, Control::Play(DeckId::A));
        assert!(mixer.deck(DeckId::A).is_playing());

        apply(&mut mixer, &decoder, Control::Crossfade(25.0));
        assert_eq!(mixer.params().crossfade(), 25.0);

        apply(
            &mut mixer,
            &decoder,
            Control::Delay {
                enabled: true,
                settings: None,
            },
        );
        assert!(mixer.params().delay().enabled);

        apply(&mut mixer, &decoder, Control::Suspend);
        assert!(!mixer.status().is_running());
        apply(&mut mixer, &decoder, Control::Resume);
        assert!(mixer.status().is_running());
    }
}
