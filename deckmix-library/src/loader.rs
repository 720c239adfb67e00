//! Audio file loading and decoding

use std::io::Cursor;
use std::path::Path;

use deckmix_audio::AudioBlock;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during track loading
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No audio track found in file")]
    NoAudioTrack,
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("File contains no audio")]
    Empty,
}

/// Decodes encoded audio into blocks at the engine sample rate
#[derive(Debug, Clone, Copy)]
pub struct TrackLoader {
    target_sample_rate: u32,
}

impl Default for TrackLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackLoader {
    /// Create a new track loader with default 48kHz sample rate
    pub fn new() -> Self {
        Self::with_sample_rate(48000)
    }

    /// Create a new track loader with specific sample rate
    pub fn with_sample_rate(target_sample_rate: u32) -> Self {
        Self {
            target_sample_rate: target_sample_rate.max(1),
        }
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Read and decode a file. The block is named after the file.
    pub fn load(&self, path: &Path) -> Result<AudioBlock, LoadError> {
        let bytes = std::fs::read(path)?;
        let hint = path.extension().and_then(|e| e.to_str());
        let block = self.decode(bytes, hint)?;

        Ok(match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => block.with_name(name),
            None => block,
        })
    }

    /// Decode an in-memory encoded file.
    ///
    /// `hint` is a file extension used to speed up format probing.
    pub fn decode(&self, bytes: Vec<u8>, hint: Option<&str>) -> Result<AudioBlock, LoadError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut probe_hint = Hint::new();
        if let Some(ext) = hint {
            probe_hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &probe_hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| match e {
                SymphoniaError::Unsupported(what) => LoadError::UnsupportedFormat(what.to_string()),
                other => LoadError::Decode(other.to_string()),
            })?;

        let mut format = probed.format;

        // Find first audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(LoadError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let source_sample_rate = codec_params.sample_rate.unwrap_or(44100);
        let mut channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(2);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| LoadError::UnsupportedFormat(e.to_string()))?;

        let mut samples: Vec<f32> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    debug!(error = %e, "stopping decode early");
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!(error = e, "skipping corrupt packet");
                    continue;
                }
                Err(e) => return Err(LoadError::Decode(e.to_string())),
            };

            // Convert to f32 interleaved
            let spec = *decoded.spec();
            channels = spec.channels.count() as u16;
            let duration = decoded.capacity() as u64;

            let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
            sample_buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(sample_buf.samples());
        }

        if samples.is_empty() {
            return Err(LoadError::Empty);
        }

        let (samples, sample_rate) = if source_sample_rate != self.target_sample_rate {
            (
                resample(
                    &samples,
                    channels,
                    source_sample_rate,
                    self.target_sample_rate,
                )?,
                self.target_sample_rate,
            )
        } else {
            (samples, source_sample_rate)
        };

        let block = AudioBlock::new(samples, channels, sample_rate);
        debug!(
            frames = block.frames(),
            channels,
            source_sample_rate,
            sample_rate,
            "decoded audio"
        );
        Ok(block)
    }
}

/// Resample interleaved audio from `source_rate` to `target_rate`.
///
/// The final partial chunk is zero padded; output is cut to
/// `frames * target / source` frames.
pub fn resample(
    samples: &[f32],
    channels: u16,
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<f32>, LoadError> {
    use rubato::{FftFixedInOut, Resampler};

    let stride = channels.max(1) as usize;
    let frames = samples.len() / stride;
    if frames == 0 || source_rate == target_rate {
        return Ok(samples[..frames * stride].to_vec());
    }

    let mut resampler =
        FftFixedInOut::<f32>::new(source_rate as usize, target_rate as usize, 1024, stride)
            .map_err(|e| LoadError::Decode(e.to_string()))?;
    let chunk = resampler.input_frames_next();

    let planar: Vec<Vec<f32>> = (0..stride)
        .map(|ch| samples.iter().skip(ch).step_by(stride).copied().collect())
        .collect();

    let expected = (frames as u64 * target_rate as u64 / source_rate as u64) as usize;
    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(expected); stride];
    let mut input = vec![vec![0.0f32; chunk]; stride];

    for start in (0..frames).step_by(chunk) {
        let end = (start + chunk).min(frames);
        for (buf, channel) in input.iter_mut().zip(&planar) {
            buf[..end - start].copy_from_slice(&channel[start..end]);
            buf[end - start..].fill(0.0);
        }

        let chunk_out = resampler
            .process(&input, None)
            .map_err(|e| LoadError::Decode(e.to_string()))?;
        for (dst, src) in out.iter_mut().zip(chunk_out) {
            let room = expected.saturating_sub(dst.len()).min(src.len());
            dst.extend_from_slice(&src[..room]);
        }
    }

    let produced = out.first().map_or(0, Vec::len);
    Ok((0..produced)
        .flat_map(|frame| out.iter().map(move |channel| channel[frame]))
        .collect())
}
