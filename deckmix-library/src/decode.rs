//! Background decode service
//!
//! Load requests return immediately. A worker thread decodes them in order
//! and posts a [`DecodeOutcome`] per request; the caller picks outcomes up
//! whenever it polls.

use std::io;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use deckmix_audio::{AudioBlock, DeckId};
use tracing::{debug, warn};

use crate::loader::{LoadError, TrackLoader};
use crate::waveform::WaveformEnvelope;

/// Where the encoded audio comes from
#[derive(Debug)]
pub enum TrackSource {
    File(PathBuf),
    Bytes {
        bytes: Vec<u8>,
        /// File extension hint for the prober
        hint: Option<String>,
        name: Option<String>,
    },
}

/// A successfully decoded track with its preview
#[derive(Debug)]
pub struct DecodedTrack {
    pub block: AudioBlock,
    pub waveform: WaveformEnvelope,
}

/// Result of one load request
#[derive(Debug)]
pub struct DecodeOutcome {
    pub deck: DeckId,
    pub result: Result<DecodedTrack, LoadError>,
}

struct DecodeJob {
    deck: DeckId,
    source: TrackSource,
}

/// Handle to the decode worker. The worker exits when this is dropped.
pub struct DecodeService {
    requests: Option<Sender<DecodeJob>>,
    outcomes: Receiver<DecodeOutcome>,
    handle: Option<JoinHandle<()>>,
}

impl DecodeService {
    /// Start the worker. Envelopes are `waveform_width` columns wide.
    pub fn spawn(loader: TrackLoader, waveform_width: usize) -> io::Result<Self> {
        let (job_tx, job_rx) = unbounded::<DecodeJob>();
        let (outcome_tx, outcome_rx) = unbounded();

        let handle = thread::Builder::new()
            .name("deckmix-decode".into())
            .spawn(move || {
                for job in job_rx {
                    let result = decode_job(&loader, job.source, waveform_width);
                    if let Err(e) = &result {
                        warn!(deck = %job.deck.label(), error = %e, "decode failed");
                    }
                    let outcome = DecodeOutcome {
                        deck: job.deck,
                        result,
                    };
                    if outcome_tx.send(outcome).is_err() {
                        break;
                    }
                }
                debug!("decode worker stopped");
            })?;

        Ok(Self {
            requests: Some(job_tx),
            outcomes: outcome_rx,
            handle: Some(handle),
        })
    }

    /// Queue a load for `deck`. Returns false if the worker is gone.
    pub fn request(&self, deck: DeckId, source: TrackSource) -> bool {
        let Some(requests) = &self.requests else {
            return false;
        };
        debug!(deck = %deck.label(), source = source.kind(), "decode requested");
        requests.send(DecodeJob { deck, source }).is_ok()
    }

    /// Outcome channel, for use in `select!`
    pub fn outcomes(&self) -> &Receiver<DecodeOutcome> {
        &self.outcomes
    }
}

impl Drop for DecodeService {
    fn drop(&mut self) {
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl TrackSource {
    fn kind(&self) -> &'static str {
        match self {
            TrackSource::File(_) => "file",
            TrackSource::Bytes { .. } => "bytes",
        }
    }
}

fn decode_job(
    loader: &TrackLoader,
    source: TrackSource,
    waveform_width: usize,
) -> Result<DecodedTrack, LoadError> {
    let block = match source {
        TrackSource::File(path) => loader.load(&path)?,
        TrackSource::Bytes { bytes, hint, name } => {
            let block = loader.decode(bytes, hint.as_deref())?;
            match name {
                Some(name) => block.with_name(name),
                None => block,
            }
        }
    };
    let waveform = WaveformEnvelope::from_block(&block, waveform_width);
    Ok(DecodedTrack { block, waveform })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::wav_bytes;
    use std::time::Duration;

    #[test]
    fn test_outcome_arrives_later() {
        let service = DecodeService::spawn(TrackLoader::with_sample_rate(48000), 16).unwrap();
        let accepted = service.request(
            DeckId::B,
            TrackSource::Bytes {
                bytes: wav_bytes(&[1000; 960], 1, 48000),
                hint: Some("wav".into()),
                name: Some("tone.wav".into()),
            },
        );
        assert!(accepted);

        let outcome = service
            .outcomes()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(outcome.deck, DeckId::B);
        let track = outcome.result.unwrap();
        assert_eq!(track.block.name(), Some("tone.wav"));
        assert_eq!(track.block.frames(), 960);
        assert_eq!(track.waveform.width(), 16);
    }

    #[test]
    fn test_failure_is_an_outcome() {
        let service = DecodeService::spawn(TrackLoader::new(), 8).unwrap();
        service.request(
            DeckId::A,
            TrackSource::File(PathBuf::from("/nonexistent/deckmix.flac")),
        );
        let outcome = service
            .outcomes()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(outcome.deck, DeckId::A);
        assert!(outcome.result.is_err());
    }
}
