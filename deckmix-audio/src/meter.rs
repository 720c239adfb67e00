//! Peak metering
//!
//! The master bus copies its output into a [`MeterTap`]. A [`MeterLoop`]
//! thread wakes every interval, drains the tap into a sliding window and
//! publishes a [`MeterReading`] for the most recent frames.

use std::fmt;
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender, TrySendError};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::debug;

use crate::engine::EngineStatus;

/// Reading reported for silence or a suspended engine (dBFS)
pub const METER_FLOOR_DB: f32 = -100.0;
/// Readings at or above this are [`MeterTier::Hot`]
pub const HOT_THRESHOLD_DB: f32 = -6.0;
/// Readings at or above this are at least [`MeterTier::Elevated`]
pub const ELEVATED_THRESHOLD_DB: f32 = -12.0;
/// Default sampling interval
pub const DEFAULT_METER_INTERVAL: Duration = Duration::from_millis(500);
/// Frames considered per reading
pub const METER_WINDOW_FRAMES: usize = 2048;

const MIN_METER_INTERVAL: Duration = Duration::from_millis(10);

/// Largest absolute sample value
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

/// Convert a linear peak to dBFS, floored at [`METER_FLOOR_DB`]
pub fn peak_to_dbfs(peak: f32) -> f32 {
    if peak.is_nan() || peak <= 0.0 {
        return METER_FLOOR_DB;
    }
    (20.0 * peak.log10()).max(METER_FLOOR_DB)
}

/// Display tier of a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterTier {
    Normal,
    Elevated,
    Hot,
}

impl MeterTier {
    pub fn classify(db: f32) -> Self {
        if db >= HOT_THRESHOLD_DB {
            MeterTier::Hot
        } else if db >= ELEVATED_THRESHOLD_DB {
            MeterTier::Elevated
        } else {
            MeterTier::Normal
        }
    }
}

/// One published meter value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterReading {
    db: f32,
    tier: MeterTier,
}

impl MeterReading {
    pub fn floor() -> Self {
        Self::from_db(METER_FLOOR_DB)
    }

    pub fn from_db(db: f32) -> Self {
        Self {
            db,
            tier: MeterTier::classify(db),
        }
    }

    pub fn from_peak(peak: f32) -> Self {
        Self::from_db(peak_to_dbfs(peak))
    }

    pub fn db(&self) -> f32 {
        self.db
    }

    pub fn tier(&self) -> MeterTier {
        self.tier
    }
}

impl fmt::Display for MeterReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} dB", self.db)
    }
}

/// Render-side end of the meter tap
pub struct MeterTap {
    producer: HeapProd<f32>,
}

impl fmt::Debug for MeterTap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterTap")
            .field("capacity", &self.producer.capacity())
            .finish()
    }
}

impl MeterTap {
    /// Copy interleaved samples into the tap. Samples that do not fit are dropped.
    #[inline]
    pub fn push(&mut self, samples: &[f32]) {
        self.producer.push_slice(samples);
    }
}

/// Reading end of the meter tap with its sliding window
pub struct PeakMeter {
    consumer: HeapCons<f32>,
    window: Vec<f32>,
    write: usize,
    filled: usize,
    drain: Vec<f32>,
}

impl PeakMeter {
    fn new(consumer: HeapCons<f32>) -> Self {
        Self {
            consumer,
            window: vec![0.0; METER_WINDOW_FRAMES * 2],
            write: 0,
            filled: 0,
            drain: vec![0.0; 4096],
        }
    }

    /// Drain the tap and take a reading.
    ///
    /// While the engine is not running the drained audio is discarded and
    /// the reading is the floor.
    pub fn sample(&mut self, running: bool) -> MeterReading {
        while self.consumer.occupied_len() > 0 {
            let read = self.consumer.pop_slice(&mut self.drain);
            if read == 0 {
                break;
            }
            if running {
                for &s in &self.drain[..read] {
                    self.window[self.write] = s;
                    self.write = (self.write + 1) % self.window.len();
                }
                self.filled = (self.filled + read).min(self.window.len());
            }
        }

        if !running {
            self.filled = 0;
            self.write = 0;
            return MeterReading::floor();
        }

        MeterReading::from_peak(peak(&self.window[..self.filled]))
    }
}

/// Create a connected tap/meter pair holding up to `capacity` samples
pub fn meter_tap(capacity: usize) -> (MeterTap, PeakMeter) {
    let (producer, consumer) = HeapRb::<f32>::new(capacity.max(2)).split();
    (MeterTap { producer }, PeakMeter::new(consumer))
}

/// Periodic metering task. Cancelled and joined when dropped.
pub struct MeterLoop {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MeterLoop {
    /// Start sampling `meter` every `interval`, publishing on `readings`
    pub fn spawn(
        mut meter: PeakMeter,
        status: EngineStatus,
        interval: Duration,
        readings: Sender<MeterReading>,
    ) -> io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let interval = interval.max(MIN_METER_INTERVAL);

        let handle = thread::Builder::new()
            .name("deckmix-meter".into())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let reading = meter.sample(status.is_running());
                            match readings.try_send(reading) {
                                Ok(()) | Err(TrySendError::Full(_)) => {}
                                Err(TrySendError::Disconnected(_)) => break,
                            }
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                debug!("meter loop stopped");
            })?;

        debug!(interval_ms = interval.as_millis() as u64, "meter loop started");

        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stop the loop and wait for the thread to exit
    pub fn cancel(&mut self) {
        // Dropping the sender wakes the loop
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for MeterLoop {
    fn drop(&mut self) {
        self.cancel();
    }
}
