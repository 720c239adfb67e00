//! Convolution reverb send
//!
//! Uniformly partitioned FFT convolution (overlap-add). The impulse response
//! is cut into blocks of [`PARTITION_SIZE`] frames whose spectra are
//! precomputed when the [`Convolver`] is built, off the render thread. At
//! render time every completed input block costs one forward FFT, one
//! multiply-accumulate pass over the frequency-domain delay line and one
//! inverse FFT. Latency is one partition.

use std::fmt;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tracing::debug;

use super::{wet_dry, Effect, WetDry, WetEnvelope};
use crate::block::AudioBlock;

/// Partition length in frames (also the added latency)
pub const PARTITION_SIZE: usize = 128;
const FFT_SIZE: usize = PARTITION_SIZE * 2;

/// Longest impulse response kept, in seconds
const MAX_IMPULSE_SECS: f32 = 6.0;

/// Convolution state for one output channel
#[derive(Clone)]
struct ChannelState {
    /// Spectra of the impulse response partitions
    partitions: Vec<Vec<Complex<f32>>>,
    /// Frequency-domain delay line of past input blocks
    history: Vec<Vec<Complex<f32>>>,
    input: Vec<f32>,
    output: Vec<f32>,
    overlap: Vec<f32>,
}

impl ChannelState {
    fn new(partitions: Vec<Vec<Complex<f32>>>) -> Self {
        let count = partitions.len();
        Self {
            partitions,
            history: vec![vec![Complex::default(); FFT_SIZE]; count],
            input: vec![0.0; PARTITION_SIZE],
            output: vec![0.0; PARTITION_SIZE],
            overlap: vec![0.0; PARTITION_SIZE],
        }
    }

    fn reset(&mut self) {
        for spectrum in &mut self.history {
            spectrum.fill(Complex::default());
        }
        self.input.fill(0.0);
        self.output.fill(0.0);
        self.overlap.fill(0.0);
    }
}

/// Stereo partitioned convolver, ready to run on the render thread
#[derive(Clone)]
pub struct Convolver {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    channels: [ChannelState; 2],
    /// Slot of the newest block in each channel's history
    head: usize,
    /// Frames written into the current input block
    fill: usize,
    spectrum: Vec<Complex<f32>>,
    accum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl fmt::Debug for Convolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Convolver")
            .field("partitions", &self.partition_count())
            .field("fill", &self.fill)
            .finish()
    }
}

impl Convolver {
    /// Prepare a convolver from an impulse response.
    ///
    /// The response is assumed to already be at the engine sample rate. It
    /// is normalized to unit energy per channel; mono responses feed both
    /// sides. Returns `None` for an empty or silent response.
    pub fn new(impulse: &AudioBlock) -> Option<Self> {
        if impulse.is_empty() {
            return None;
        }

        let max_frames = (impulse.sample_rate() as f32 * MAX_IMPULSE_SECS) as usize;
        let frames = impulse.frames().min(max_frames);
        if frames < impulse.frames() {
            debug!(
                frames = impulse.frames(),
                kept = frames,
                "truncating impulse response"
            );
        }

        let left: Vec<f32> = impulse.channel(0).take(frames).collect();
        let right: Vec<f32> = impulse.channel(1).take(frames).collect();

        let energy = left.iter().chain(right.iter()).map(|s| s * s).sum::<f32>() / 2.0;
        if energy <= f32::EPSILON {
            return None;
        }
        let scale = 1.0 / energy.sqrt();

        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(FFT_SIZE);
        let inverse = planner.plan_fft_inverse(FFT_SIZE);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        let mut scratch = vec![Complex::default(); scratch_len];

        let mut partition = |samples: &[f32]| -> Vec<Vec<Complex<f32>>> {
            samples
                .chunks(PARTITION_SIZE)
                .map(|chunk| {
                    let mut spectrum = vec![Complex::default(); FFT_SIZE];
                    for (bin, &s) in spectrum.iter_mut().zip(chunk) {
                        bin.re = s * scale;
                    }
                    forward.process_with_scratch(&mut spectrum, &mut scratch);
                    spectrum
                })
                .collect()
        };

        let channels = [
            ChannelState::new(partition(&left)),
            ChannelState::new(partition(&right)),
        ];

        debug!(
            frames,
            partitions = channels[0].partitions.len(),
            "prepared impulse response"
        );

        Some(Self {
            forward,
            inverse,
            channels,
            head: 0,
            fill: 0,
            spectrum: vec![Complex::default(); FFT_SIZE],
            accum: vec![Complex::default(); FFT_SIZE],
            scratch,
        })
    }

    /// Number of impulse response partitions
    pub fn partition_count(&self) -> usize {
        self.channels[0].partitions.len()
    }

    /// Push one stereo frame and pull the matching (delayed) wet frame
    #[inline]
    pub fn process_frame(&mut self, left: f32, right: f32) -> (f32, f32) {
        let pos = self.fill;
        self.channels[0].input[pos] = left;
        self.channels[1].input[pos] = right;
        let out = (self.channels[0].output[pos], self.channels[1].output[pos]);

        self.fill += 1;
        if self.fill == PARTITION_SIZE {
            self.fill = 0;
            self.convolve_block();
        }
        out
    }

    fn convolve_block(&mut self) {
        let count = self.partition_count();
        if count == 0 {
            return;
        }
        let scale = 1.0 / FFT_SIZE as f32;

        for channel in &mut self.channels {
            // Zero-padded spectrum of the block just completed
            for (bin, &s) in self.spectrum.iter_mut().zip(channel.input.iter()) {
                *bin = Complex::new(s, 0.0);
            }
            self.spectrum[PARTITION_SIZE..].fill(Complex::default());
            self.forward
                .process_with_scratch(&mut self.spectrum, &mut self.scratch);
            channel.history[self.head].copy_from_slice(&self.spectrum);

            self.accum.fill(Complex::default());
            for (k, partition) in channel.partitions.iter().enumerate() {
                let past = &channel.history[(self.head + count - k) % count];
                for ((acc, x), h) in self.accum.iter_mut().zip(past).zip(partition) {
                    *acc += x * h;
                }
            }
            self.inverse
                .process_with_scratch(&mut self.accum, &mut self.scratch);

            for i in 0..PARTITION_SIZE {
                channel.output[i] = self.accum[i].re * scale + channel.overlap[i];
                channel.overlap[i] = self.accum[i + PARTITION_SIZE].re * scale;
            }
        }

        self.head = (self.head + 1) % count;
    }

    /// Clear all convolution history
    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.reset();
        }
        self.head = 0;
        self.fill = 0;
    }
}

/// Reverb send: dry path plus a convolved wet path
#[derive(Debug)]
pub struct ConvolutionReverb {
    convolver: Option<Box<Convolver>>,
    /// Wet mix percentage, kept while disabled
    mix: f32,
    enabled: bool,
    envelope: WetEnvelope,
    /// Set once the convolver history has been cleared after closing
    silent: bool,
}

impl ConvolutionReverb {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            convolver: None,
            mix: 30.0,
            enabled: false,
            envelope: WetEnvelope::new(sample_rate as f32),
            silent: true,
        }
    }

    /// Install a prepared convolver, returning the previous one
    pub fn set_impulse_response(&mut self, convolver: Box<Convolver>) -> Option<Box<Convolver>> {
        self.convolver.replace(convolver)
    }

    pub fn has_impulse_response(&self) -> bool {
        self.convolver.is_some()
    }

    /// Set wet mix percentage (0-100)
    pub fn set_mix(&mut self, percent: f32) {
        if percent.is_finite() {
            self.mix = percent.clamp(0.0, 100.0);
        }
        self.envelope.set_target(wet_dry(self.enabled, self.mix));
    }

    pub fn mix(&self) -> f32 {
        self.mix
    }

    /// Dry/wet pair the reverb is gliding toward
    pub fn gains(&self) -> WetDry {
        self.envelope.target()
    }
}

impl Effect for ConvolutionReverb {
    fn process(&mut self, samples: &mut [f32]) {
        if !self.enabled && self.envelope.is_bypassed() {
            if !self.silent {
                if let Some(convolver) = self.convolver.as_mut() {
                    convolver.reset();
                }
                self.silent = true;
            }
            return;
        }
        self.silent = false;

        for frame in samples.chunks_exact_mut(2) {
            let gains = self.envelope.advance();
            // Silent wet path until an impulse response arrives
            let (wet_l, wet_r) = match self.convolver.as_mut() {
                Some(convolver) => convolver.process_frame(frame[0], frame[1]),
                None => (0.0, 0.0),
            };
            frame[0] = frame[0] * gains.dry + wet_l * gains.wet;
            frame[1] = frame[1] * gains.dry + wet_r * gains.wet;
        }
    }

    fn reset(&mut self) {
        if let Some(convolver) = self.convolver.as_mut() {
            convolver.reset();
        }
        self.envelope.jump_to_target();
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.envelope.set_target(wet_dry(enabled, self.mix));
    }

    fn name(&self) -> &'static str {
        "Reverb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(frames: usize, at: usize) -> AudioBlock {
        let mut samples = vec![0.0; frames];
        samples[at] = 1.0;
        AudioBlock::new(samples, 1, 48000)
    }

    #[test]
    fn test_delta_response_delays_by_one_partition() {
        let mut convolver = Convolver::new(&delta(64, 0)).unwrap();
        let mut left = Vec::new();
        for i in 0..PARTITION_SIZE * 3 {
            let x = if i == 0 { 1.0 } else { 0.0 };
            left.push(convolver.process_frame(x, x).0);
        }
        assert!((left[PARTITION_SIZE] - 1.0).abs() < 1e-4);
        let rest: f32 = left
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != PARTITION_SIZE)
            .map(|(_, s)| s.abs())
            .sum();
        assert!(rest < 1e-3);
    }

    #[test]
    fn test_long_response_spans_partitions() {
        // Echo 300 frames in: lands in the third partition
        let mut convolver = Convolver::new(&delta(400, 300)).unwrap();
        assert_eq!(convolver.partition_count(), 4);

        let mut left = Vec::new();
        for i in 0..PARTITION_SIZE * 5 {
            let x = if i == 0 { 1.0 } else { 0.0 };
            left.push(convolver.process_frame(x, 0.0).0);
        }
        assert!((left[PARTITION_SIZE + 300] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_response_normalized_to_unit_energy() {
        let mut samples = vec![0.0; 8];
        samples[0] = 4.0;
        let mut convolver = Convolver::new(&AudioBlock::new(samples, 1, 48000)).unwrap();
        let mut peak = 0.0f32;
        for i in 0..PARTITION_SIZE * 2 {
            let x = if i == 0 { 1.0 } else { 0.0 };
            peak = peak.max(convolver.process_frame(x, x).1.abs());
        }
        assert!((peak - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_silent_response_rejected() {
        assert!(Convolver::new(&AudioBlock::new(vec![0.0; 32], 2, 48000)).is_none());
        assert!(Convolver::new(&AudioBlock::new(Vec::new(), 2, 48000)).is_none());
    }

    #[test]
    fn test_disabled_reverb_is_bypass_whatever_the_mix() {
        let mut reverb = ConvolutionReverb::new(48000);
        reverb.set_mix(90.0);
        assert_eq!(reverb.gains(), WetDry::BYPASS);

        reverb.set_enabled(true);
        assert!((reverb.gains().wet - 0.9).abs() < 1e-6);
        reverb.set_enabled(false);
        assert_eq!(reverb.gains(), WetDry::BYPASS);
        reverb.set_enabled(true);
        assert!((reverb.gains().wet - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_wet_path_silent_without_response() {
        let mut reverb = ConvolutionReverb::new(48000);
        reverb.set_mix(100.0);
        reverb.set_enabled(true);
        reverb.reset();

        let mut samples = vec![0.5; 512];
        reverb.process(&mut samples);
        assert!(samples.iter().all(|&s| s == 0.0));
    }
}
