//! Waveform preview envelopes

use deckmix_audio::AudioBlock;

/// Min/max envelope of a block's first channel, one pair per display column
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformEnvelope {
    columns: Vec<(f32, f32)>,
}

impl WaveformEnvelope {
    /// Build an envelope `width` columns wide.
    ///
    /// Each column covers `ceil(frames / width)` frames. Columns past the
    /// end of the audio are flat at zero.
    pub fn from_block(block: &AudioBlock, width: usize) -> Self {
        let width = width.max(1);
        let frames = block.frames();
        if frames == 0 {
            return Self {
                columns: vec![(0.0, 0.0); width],
            };
        }

        let step = frames.div_ceil(width);
        let data: Vec<f32> = block.channel(0).collect();

        let columns = (0..width)
            .map(|column| {
                let start = (column * step).min(frames);
                let end = (start + step).min(frames);
                let chunk = &data[start..end];
                if chunk.is_empty() {
                    return (0.0, 0.0);
                }
                chunk
                    .iter()
                    .fold((f32::MAX, f32::MIN), |(lo, hi), &s| (lo.min(s), hi.max(s)))
            })
            .collect();

        Self { columns }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// (min, max) per column
    pub fn columns(&self) -> &[(f32, f32)] {
        &self.columns
    }

    /// Largest excursion per column
    pub fn peaks(&self) -> impl Iterator<Item = f32> + '_ {
        self.columns.iter().map(|&(lo, hi)| lo.abs().max(hi.abs()))
    }
}
