//! # Fast Fourier Transform (FFT) Module
//!
//! Turns one time-domain audio frame into a magnitude spectrum for the
//! spectral pitch estimator.
//!
//! ## Features
//! - FFT planned once per frame size using RustFFT
//! - Hann windowing for reduced spectral leakage
//! - DC offset removal
//! - Magnitudes normalized so a full-scale sine peaks near its amplitude

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Removes the DC offset from a signal by making its average value zero.
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 { return; }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Builds a Hann window of length `n`.
fn hann_window(n: usize) -> Vec<f32> {
    if n < 2 {
        return vec![1.0; n];
    }
    let n_minus_1 = (n - 1) as f32;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos()))
        .collect()
}

/// A forward FFT of fixed size with its window, reused across frames.
///
/// Planning an FFT is far more expensive than running it, so the analyzer is
/// created once per capture session and fed every frame of that session.
pub struct SpectrumAnalyzer {
    size: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer").field("size", &self.size).finish()
    }
}

impl SpectrumAnalyzer {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        Self {
            size,
            window: hann_window(size),
            fft,
            scratch,
        }
    }

    /// Number of magnitude bins returned by [`Self::magnitudes`] (DC up to, excluding, Nyquist).
    pub fn bin_count(&self) -> usize {
        self.size / 2
    }

    /// Computes the magnitude spectrum of `signal`.
    ///
    /// The signal is DC-corrected and Hann-windowed first. Frames shorter than
    /// the planned size are zero-padded, longer ones truncated. Magnitudes are
    /// scaled by `4 / size`, which maps a windowed sine of amplitude `a` to a
    /// peak of roughly `a`.
    ///
    /// # Returns
    /// * `Vec<f32>` - `size / 2` magnitudes, index 0 being DC
    pub fn magnitudes(&mut self, signal: &[f32]) -> Vec<f32> {
        let mut processed: Vec<f32> = signal.iter().copied().take(self.size).collect();
        remove_dc_offset(&mut processed);
        processed.resize(self.size, 0.0);

        let mut buffer: Vec<Complex<f32>> = processed
            .into_iter()
            .zip(self.window.iter())
            .map(|(sample, w)| Complex { re: sample * w, im: 0.0 })
            .collect();

        self.fft.process_with_scratch(&mut buffer, &mut self.scratch);

        let scale = 4.0 / self.size as f32;
        buffer
            .iter()
            .take(self.bin_count())
            .map(|c| c.norm() * scale) // .norm() is sqrt(re^2 + im^2)
            .collect()
    }
}
