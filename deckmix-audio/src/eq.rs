//! Deck EQ filters
//!
//! Biquad shelving and peaking filters using the RBJ Audio EQ Cookbook
//! formulas. Corner frequencies are fixed; only the gain moves. Any finite
//! gain is stored, but the response saturates at +/-120 dB.
//!
//! Bands:
//! - Low shelf: 250 Hz
//! - Mid bell: 1250 Hz, Q 0.7
//! - High shelf: 4 kHz

use std::f64::consts::PI;

use crate::params::EqBand;

/// Low shelf corner frequency (Hz)
pub const LOW_SHELF_HZ: f32 = 250.0;
/// Mid bell center frequency (Hz)
pub const MID_PEAK_HZ: f32 = 1250.0;
/// Mid bell Q
pub const MID_PEAK_Q: f32 = 0.7;
/// High shelf corner frequency (Hz)
pub const HIGH_SHELF_HZ: f32 = 4000.0;
/// Largest boost or cut the filters realize; stored gains may exceed it
pub const MAX_FILTER_GAIN_DB: f32 = 120.0;

/// sqrt of the linear gain, the `A` of the cookbook formulas
fn shelf_amplitude(gain_db: f32) -> f64 {
    let db = gain_db.clamp(-MAX_FILTER_GAIN_DB, MAX_FILTER_GAIN_DB) as f64;
    10.0f64.powf(db / 40.0)
}

fn omega(sample_rate: f32, freq: f32) -> f64 {
    2.0 * PI * freq as f64 / sample_rate as f64
}

/// Biquad filter coefficients (a = feed-forward, b = feedback)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    a0: f32,
    a1: f32,
    a2: f32,
    b1: f32,
    b2: f32,
}

impl BiquadCoeffs {
    /// Unity-gain passthrough
    pub const IDENTITY: Self = Self {
        a0: 1.0,
        a1: 0.0,
        a2: 0.0,
        b1: 0.0,
        b2: 0.0,
    };

    /// Low shelf coefficients (slope = 1)
    pub fn low_shelf(sample_rate: f32, freq: f32, gain_db: f32) -> Self {
        if gain_db.abs() < 0.01 {
            return Self::IDENTITY;
        }

        let a = shelf_amplitude(gain_db);
        let (sin_omega, cos_omega) = omega(sample_rate, freq).sin_cos();
        let alpha = sin_omega / 2.0 * 2.0f64.sqrt();
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha;

        Self::normalized(
            a * ((a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega),
            a * ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha),
            a0,
            -2.0 * ((a - 1.0) + (a + 1.0) * cos_omega),
            (a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha,
        )
    }

    /// High shelf coefficients (slope = 1)
    pub fn high_shelf(sample_rate: f32, freq: f32, gain_db: f32) -> Self {
        if gain_db.abs() < 0.01 {
            return Self::IDENTITY;
        }

        let a = shelf_amplitude(gain_db);
        let (sin_omega, cos_omega) = omega(sample_rate, freq).sin_cos();
        let alpha = sin_omega / 2.0 * 2.0f64.sqrt();
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha;

        Self::normalized(
            a * ((a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega),
            a * ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha),
            a0,
            2.0 * ((a - 1.0) - (a + 1.0) * cos_omega),
            (a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha,
        )
    }

    /// Peaking (bell) coefficients
    pub fn peaking(sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> Self {
        if gain_db.abs() < 0.01 {
            return Self::IDENTITY;
        }

        let a = shelf_amplitude(gain_db);
        let (sin_omega, cos_omega) = omega(sample_rate, freq).sin_cos();
        let alpha = sin_omega / (2.0 * q as f64);

        Self::normalized(
            1.0 + alpha * a,
            -2.0 * cos_omega,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos_omega,
            1.0 - alpha / a,
        )
    }

    /// Divide through by the leading feedback term and narrow to f32
    fn normalized(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            a0: (b0 / a0) as f32,
            a1: (b1 / a0) as f32,
            a2: (b2 / a0) as f32,
            b1: (a1 / a0) as f32,
            b2: (a2 / a0) as f32,
        }
    }

    /// Magnitude response at DC
    pub fn dc_gain(&self) -> f32 {
        (self.a0 + self.a1 + self.a2) / (1.0 + self.b1 + self.b2)
    }

    /// Magnitude response at Nyquist
    pub fn nyquist_gain(&self) -> f32 {
        (self.a0 - self.a1 + self.a2) / (1.0 - self.b1 + self.b2)
    }
}

/// Biquad filter state for a single channel
#[derive(Debug, Default, Clone)]
struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input: f32, coeffs: &BiquadCoeffs) -> f32 {
        let output = coeffs.a0 * input + coeffs.a1 * self.x1 + coeffs.a2 * self.x2
            - coeffs.b1 * self.y1
            - coeffs.b2 * self.y2;

        if !output.is_finite() {
            self.reset();
            return 0.0;
        }

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }

    fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

/// One persistent EQ band of a deck chain (stereo)
#[derive(Debug, Clone)]
pub struct EqFilter {
    band: EqBand,
    sample_rate: f32,
    gain_db: f32,
    coeffs: BiquadCoeffs,
    state_l: BiquadState,
    state_r: BiquadState,
}

impl EqFilter {
    /// Create a flat (0 dB) filter for the given band
    pub fn new(band: EqBand, sample_rate: f32) -> Self {
        Self {
            band,
            sample_rate,
            gain_db: 0.0,
            coeffs: BiquadCoeffs::IDENTITY,
            state_l: BiquadState::default(),
            state_r: BiquadState::default(),
        }
    }

    pub fn band(&self) -> EqBand {
        self.band
    }

    /// Set gain in dB; coefficients are recomputed immediately
    pub fn set_gain_db(&mut self, gain_db: f32) {
        if !gain_db.is_finite() {
            return;
        }
        self.gain_db = gain_db;
        self.coeffs = match self.band {
            EqBand::Low => BiquadCoeffs::low_shelf(self.sample_rate, LOW_SHELF_HZ, gain_db),
            EqBand::Mid => {
                BiquadCoeffs::peaking(self.sample_rate, MID_PEAK_HZ, gain_db, MID_PEAK_Q)
            }
            EqBand::High => BiquadCoeffs::high_shelf(self.sample_rate, HIGH_SHELF_HZ, gain_db),
        };
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    pub fn coefficients(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    /// Filter one stereo frame
    #[inline]
    pub fn process_frame(&mut self, left: f32, right: f32) -> (f32, f32) {
        (
            self.state_l.process(left, &self.coeffs),
            self.state_r.process(right, &self.coeffs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_to_linear(db: f32) -> f32 {
        10.0f32.powf(db / 20.0)
    }

    #[test]
    fn test_flat_filter_is_identity() {
        let mut filter = EqFilter::new(EqBand::Mid, 48000.0);
        filter.set_gain_db(0.0);
        assert_eq!(*filter.coefficients(), BiquadCoeffs::IDENTITY);
        assert_eq!(filter.process_frame(0.3, -0.2), (0.3, -0.2));
    }

    #[test]
    fn test_low_shelf_dc_gain() {
        let coeffs = BiquadCoeffs::low_shelf(48000.0, LOW_SHELF_HZ, 6.0);
        assert!((coeffs.dc_gain() - db_to_linear(6.0)).abs() < 1e-3);
        // High frequencies pass untouched
        assert!((coeffs.nyquist_gain() - 1.0).abs() < 1e-2);
    }

    #[test]
    fn test_high_shelf_nyquist_gain() {
        let coeffs = BiquadCoeffs::high_shelf(48000.0, HIGH_SHELF_HZ, -9.0);
        assert!((coeffs.nyquist_gain() - db_to_linear(-9.0)).abs() < 1e-2);
        assert!((coeffs.dc_gain() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_peaking_leaves_extremes_alone() {
        let coeffs = BiquadCoeffs::peaking(48000.0, MID_PEAK_HZ, 12.0, MID_PEAK_Q);
        assert!((coeffs.dc_gain() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_extreme_gain_stays_finite() {
        let mut filter = EqFilter::new(EqBand::Low, 48000.0);
        filter.set_gain_db(-60.0);
        for i in 0..4800 {
            let x = (i as f32 * 0.05).sin();
            let (l, r) = filter.process_frame(x, x);
            assert!(l.is_finite() && r.is_finite());
        }
    }

    #[test]
    fn test_huge_gains_recover_after_return_to_flat() {
        for db in [800.0, -1600.0, 1e30, -1e30] {
            let mut low = EqFilter::new(EqBand::Low, 48000.0);
            let mut mid = EqFilter::new(EqBand::Mid, 48000.0);
            low.set_gain_db(db);
            mid.set_gain_db(db);
            assert_eq!(low.gain_db(), db);

            for i in 0..4800 {
                let x = (i as f32 * 0.05).sin();
                let (l, _) = low.process_frame(x, x);
                let (m, _) = mid.process_frame(l, l);
                assert!(l.is_finite() && m.is_finite(), "{db} dB went non-finite");
            }

            low.set_gain_db(0.0);
            mid.set_gain_db(0.0);
            let (l, _) = low.process_frame(0.25, 0.25);
            let (m, _) = mid.process_frame(l, l);
            assert_eq!(m, 0.25);
        }
    }

    #[test]
    fn test_filter_gain_saturates() {
        let capped = BiquadCoeffs::low_shelf(48000.0, LOW_SHELF_HZ, MAX_FILTER_GAIN_DB);
        assert_eq!(BiquadCoeffs::low_shelf(48000.0, LOW_SHELF_HZ, 900.0), capped);
        assert!(capped.dc_gain().is_finite());
        let cut = BiquadCoeffs::peaking(48000.0, MID_PEAK_HZ, -1e9, MID_PEAK_Q);
        assert!(cut.dc_gain().is_finite() && cut.nyquist_gain().is_finite());
    }

    #[test]
    fn test_non_finite_gain_ignored() {
        let mut filter = EqFilter::new(EqBand::High, 48000.0);
        filter.set_gain_db(3.0);
        filter.set_gain_db(f32::NAN);
        assert_eq!(filter.gain_db(), 3.0);
    }
}
