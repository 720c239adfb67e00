//! Decoded audio blocks shared between the control side and playback units

/// An immutable block of decoded audio.
///
/// Samples are interleaved `f32` normalized to -1.0..1.0. A deck holds its
/// block behind an `Arc` and replaces it wholesale on every load, so the
/// render side can keep reading an old block while a new one is installed.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
    name: Option<String>,
}

impl AudioBlock {
    /// Create a block from interleaved samples
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let mut samples = samples;
        // Drop a trailing partial frame so every frame is complete
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);

        Self {
            samples,
            channels,
            sample_rate: sample_rate.max(1),
            name: None,
        }
    }

    /// Attach a display name (usually the file name)
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Iterate over one channel. Out-of-range channels fall back to the last one.
    pub fn channel(&self, channel: usize) -> impl Iterator<Item = f32> + '_ {
        let channels = self.channels as usize;
        let channel = channel.min(channels - 1);
        self.samples.iter().skip(channel).step_by(channels).copied()
    }

    /// Read one frame as a stereo pair.
    ///
    /// Mono is duplicated to both sides; channels beyond the second are ignored.
    #[inline]
    pub fn stereo_frame(&self, frame: usize) -> (f32, f32) {
        let channels = self.channels as usize;
        let base = frame * channels;
        if base + channels > self.samples.len() {
            return (0.0, 0.0);
        }
        if channels == 1 {
            let s = self.samples[base];
            (s, s)
        } else {
            (self.samples[base], self.samples[base + 1])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_frame_is_dropped() {
        let block = AudioBlock::new(vec![0.1, 0.2, 0.3, 0.4, 0.5], 2, 48000);
        assert_eq!(block.frames(), 2);
        assert_eq!(block.samples().len(), 4);
    }

    #[test]
    fn test_mono_frame_is_duplicated() {
        let block = AudioBlock::new(vec![0.25, -0.5], 1, 44100);
        assert_eq!(block.stereo_frame(1), (-0.5, -0.5));
        assert_eq!(block.stereo_frame(2), (0.0, 0.0));
    }

    #[test]
    fn test_channel_iterator() {
        let block = AudioBlock::new(vec![1.0, -1.0, 2.0, -2.0], 2, 48000);
        let right: Vec<f32> = block.channel(1).collect();
        assert_eq!(right, vec![-1.0, -2.0]);
        assert!((block.duration_secs() - 2.0 / 48000.0).abs() < 1e-12);
    }
}
