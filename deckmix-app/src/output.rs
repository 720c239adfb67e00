//! Audio device output
//!
//! The device callback shares [`EngineState`] with the command thread. It
//! never blocks: on lock contention, or while the engine is suspended, it
//! writes silence.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use deckmix_audio::{EngineState, EngineStatus};
use parking_lot::Mutex;
use tracing::{error, info};

/// The default output device and its preferred configuration
pub struct OutputDevice {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
}

impl OutputDevice {
    pub fn open_default() -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no audio output device found"))?;
        let config = device
            .default_output_config()
            .context("failed to get audio output config")?;

        info!(
            device = %device.name().unwrap_or_else(|_| "<unknown>".into()),
            sample_rate = config.sample_rate().0,
            channels = config.channels(),
            "audio output opened"
        );
        Ok(Self { device, config })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    /// Build and start the output stream
    pub fn start(
        self,
        engine: Arc<Mutex<EngineState>>,
        status: EngineStatus,
    ) -> anyhow::Result<cpal::Stream> {
        let channels = self.config.channels() as usize;

        // Stereo render buffer for devices that are not plain stereo
        let mut stereo = vec![0.0f32; 16384];

        let stream = self
            .device
            .build_output_stream(
                &self.config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !status.is_running() {
                        data.fill(0.0);
                        return;
                    }
                    // Use try_lock to avoid blocking the real-time audio thread
                    let Some(mut state) = engine.try_lock() else {
                        data.fill(0.0);
                        return;
                    };

                    if channels == 2 {
                        state.process(data);
                        return;
                    }

                    let frames = data.len() / channels.max(1);
                    if stereo.len() < frames * 2 {
                        stereo.resize(frames * 2, 0.0);
                    }
                    let stereo = &mut stereo[..frames * 2];
                    state.process(stereo);

                    for (out, frame) in data.chunks_exact_mut(channels).zip(stereo.chunks_exact(2)) {
                        if channels == 1 {
                            out[0] = (frame[0] + frame[1]) * 0.5;
                        } else {
                            out[0] = frame[0];
                            out[1] = frame[1];
                            out[2..].fill(0.0);
                        }
                    }
                },
                |err| {
                    error!(error = %err, "audio stream error");
                },
                None,
            )
            .context("failed to create audio stream")?;

        stream.play().context("failed to start audio")?;
        Ok(stream)
    }
}
