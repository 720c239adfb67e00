//! Impulse response loading for the reverb send
//!
//! The response is read once at startup from a fixed path. Loading is best
//! effort: until it arrives (or if it never does) the reverb stays dry.

use std::io;
use std::path::PathBuf;
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use deckmix_audio::AudioBlock;
use tracing::{info, warn};

use crate::loader::{LoadError, TrackLoader};

/// Loads the reverb impulse response at the engine sample rate
#[derive(Debug, Clone)]
pub struct ImpulseLoader {
    path: PathBuf,
    loader: TrackLoader,
}

impl ImpulseLoader {
    pub fn new(path: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            path: path.into(),
            loader: TrackLoader::with_sample_rate(sample_rate),
        }
    }

    /// Load synchronously
    pub fn load(&self) -> Result<AudioBlock, LoadError> {
        self.loader.load(&self.path)
    }

    /// Load on a background thread; the single result arrives on the receiver
    pub fn spawn(self) -> io::Result<Receiver<Result<AudioBlock, LoadError>>> {
        let (tx, rx) = bounded(1);
        thread::Builder::new()
            .name("deckmix-impulse".into())
            .spawn(move || {
                let result = self.load();
                match &result {
                    Ok(block) => info!(
                        path = %self.path.display(),
                        secs = block.duration_secs(),
                        "impulse response loaded"
                    ),
                    Err(e) => warn!(
                        path = %self.path.display(),
                        error = %e,
                        "impulse response unavailable, reverb stays dry"
                    ),
                }
                let _ = tx.send(result);
            })?;
        Ok(rx)
    }
}
