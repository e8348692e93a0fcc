//! Frequency-domain snapshots for visualization.
//!
//! Each snapshot follows the usual host analyser recipe:
//! - Blackman window over the most recent `window` mono samples
//! - FFT magnitudes normalized by the window size
//! - temporal smoothing between successive snapshots
//! - decibels mapped linearly from `[MIN_DECIBELS, MAX_DECIBELS]` onto `0..=255`

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::ring_buffer::RingBuffer;
use crate::models::error::SessionError;

pub const MIN_WINDOW: usize = 32;
pub const MAX_WINDOW: usize = 32768;
pub const DEFAULT_WINDOW: usize = 64;

pub const SMOOTHING_TIME_CONSTANT: f32 = 0.8;
pub const MIN_DECIBELS: f32 = -100.0;
pub const MAX_DECIBELS: f32 = -30.0;

struct AnalyserState {
    samples: RingBuffer,
    fft: Arc<dyn Fft<f32>>,
    blackman: Vec<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

/// A frequency-domain snapshot source.
///
/// Cloning yields another handle to the same analyser node. The audio thread
/// feeds it through `push_samples`; readers call `byte_frequency_data`.
#[derive(Clone)]
pub struct Analyser {
    window: usize,
    state: Arc<Mutex<AnalyserState>>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for Analyser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyser")
            .field("window", &self.window)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Analyser {
    /// Create an analyser with the given transform window (a power of two in `32..=32768`).
    pub fn new(window: usize) -> Result<Self, SessionError> {
        if !window.is_power_of_two() || !(MIN_WINDOW..=MAX_WINDOW).contains(&window) {
            return Err(SessionError::ConfigurationFailed(format!(
                "analyser window must be a power of two in {}..={}, got {}",
                MIN_WINDOW, MAX_WINDOW, window
            )));
        }

        let blackman = (0..window)
            .map(|i| {
                let x = i as f32 / window as f32;
                0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
            })
            .collect();

        let state = AnalyserState {
            samples: RingBuffer::new(window),
            fft: FftPlanner::new().plan_fft_forward(window),
            blackman,
            smoothed: vec![0.0; window / 2],
            scratch: vec![Complex::new(0.0, 0.0); window],
        };

        Ok(Self {
            window,
            state: Arc::new(Mutex::new(state)),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn window_size(&self) -> usize {
        self.window
    }

    /// Number of bins in every snapshot.
    pub fn frequency_bin_count(&self) -> usize {
        self.window / 2
    }

    /// Append mono samples from the source node.
    pub fn push_samples(&self, samples: &[f32]) {
        if self.is_closed() {
            return;
        }
        self.state.lock().samples.write(samples);
    }

    /// Current byte magnitudes, one per frequency bin.
    pub fn byte_frequency_data(&self) -> Vec<u8> {
        let mut state = self.state.lock();
        let state = &mut *state;

        let latest = state.samples.latest(self.window);
        let pad = self.window - latest.len();
        for (i, slot) in state.scratch.iter_mut().enumerate() {
            let sample = if i < pad { 0.0 } else { latest[i - pad] };
            *slot = Complex::new(sample * state.blackman[i], 0.0);
        }
        state.fft.process(&mut state.scratch);

        let scale = 1.0 / self.window as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;
        state
            .smoothed
            .iter_mut()
            .zip(state.scratch.iter())
            .map(|(smoothed, bin)| {
                let magnitude = bin.norm() * scale;
                *smoothed = SMOOTHING_TIME_CONSTANT * *smoothed + (1.0 - SMOOTHING_TIME_CONSTANT) * magnitude;
                let db = if *smoothed > 0.0 {
                    20.0 * smoothed.log10()
                } else {
                    MIN_DECIBELS
                };
                let scaled = 255.0 * (db - MIN_DECIBELS) / range;
                scaled.clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    /// Tear the node down; feeds reading from it stop producing.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.state.lock().samples.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_count_is_half_the_window() {
        let analyser = Analyser::new(64).unwrap();
        assert_eq!(analyser.frequency_bin_count(), 32);
        assert_eq!(analyser.byte_frequency_data().len(), 32);
    }

    #[test]
    fn rejects_bad_windows() {
        assert!(Analyser::new(48).is_err());
        assert!(Analyser::new(16).is_err());
        assert!(Analyser::new(65536).is_err());
    }

    #[test]
    fn silence_is_all_zero() {
        let analyser = Analyser::new(32).unwrap();
        analyser.push_samples(&[0.0; 32]);
        assert!(analyser.byte_frequency_data().iter().all(|&b| b == 0));
    }

    fn quiet_tone(bin: f32) -> Vec<f32> {
        (0..64).map(|i| 0.01 * (2.0 * PI * bin * i as f32 / 64.0).sin()).collect()
    }

    #[test]
    fn tone_peaks_at_its_bin() {
        let analyser = Analyser::new(64).unwrap();
        let tone = quiet_tone(8.0);
        let mut snapshot = Vec::new();
        for _ in 0..20 {
            analyser.push_samples(&tone);
            snapshot = analyser.byte_frequency_data();
        }
        assert!(snapshot[8] > snapshot[7]);
        assert!(snapshot[8] > snapshot[9]);
        assert!(snapshot[7] > snapshot[11]);
        assert_eq!(snapshot[24], 0);
    }

    #[test]
    fn smoothing_ramps_up() {
        let analyser = Analyser::new(64).unwrap();
        analyser.push_samples(&quiet_tone(4.0));
        let first = analyser.byte_frequency_data()[4];
        let second = analyser.byte_frequency_data()[4];
        assert!(first > 0);
        assert!(second > first);
    }

    #[test]
    fn closed_analyser_ignores_input() {
        let analyser = Analyser::new(32).unwrap();
        analyser.close();
        analyser.push_samples(&[1.0; 32]);
        assert!(analyser.is_closed());
        assert!(analyser.byte_frequency_data().iter().all(|&b| b == 0));
    }
}
