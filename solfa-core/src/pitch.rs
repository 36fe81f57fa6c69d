//! # Pitch Detection Module
//!
//! Reduces one audio frame to a single dominant frequency, or to nothing.
//!
//! ## Features
//! - Spectral peak picking over a Hann-windowed FFT, gated by a noise floor
//! - Parabolic interpolation on log magnitudes for sub-bin accuracy
//! - YIN time-domain fallback, consulted only when the spectrum yields nothing
//! - Every result is clamped to the configured band; absence is a normal value

use std::time::Instant;

use crate::audio::AudioFrame;
use crate::config::EstimatorConfig;
use crate::fft::SpectrumAnalyzer;

/// Which estimator produced a frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PitchSource {
    Spectrum,
    Yin,
}

/// Result of estimating one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PitchEstimate {
    /// Dominant frequency in Hz, always inside the configured band when present.
    pub frequency: Option<f32>,
    pub source: Option<PitchSource>,
    /// Capture time of the frame this estimate came from.
    pub timestamp: Instant,
}

impl PitchEstimate {
    pub fn absent(timestamp: Instant) -> Self {
        Self { frequency: None, source: None, timestamp }
    }

    pub fn is_pitched(&self) -> bool {
        self.frequency.is_some()
    }
}

/// Dominant-frequency estimator for a stream of equally sized frames.
#[derive(Debug)]
pub struct FrequencyEstimator {
    config: EstimatorConfig,
    analyzer: SpectrumAnalyzer,
}

impl FrequencyEstimator {
    pub fn new(config: EstimatorConfig, frame_size: usize) -> Self {
        Self {
            config,
            analyzer: SpectrumAnalyzer::new(frame_size),
        }
    }

    fn in_band(&self, freq: f32) -> bool {
        freq.is_finite() && freq >= self.config.min_frequency && freq <= self.config.max_frequency
    }

    /// Estimates the dominant frequency of `frame`.
    ///
    /// The spectral estimate is authoritative. YIN is only asked when the
    /// spectrum has no peak above the noise floor or its peak lies outside the
    /// band, and its answer is kept only if it is inside the band too.
    pub fn estimate(&mut self, frame: &AudioFrame) -> PitchEstimate {
        if frame.samples.is_empty() || frame.sample_rate == 0 {
            return PitchEstimate::absent(frame.captured_at);
        }

        let magnitudes = self.analyzer.magnitudes(&frame.samples);
        if let Some(freq) = self.spectral_peak(&magnitudes, frame.sample_rate) {
            return PitchEstimate {
                frequency: Some(freq),
                source: Some(PitchSource::Spectrum),
                timestamp: frame.captured_at,
            };
        }

        if self.config.yin_fallback {
            let yin = detect_pitch_yin(
                &frame.samples,
                frame.sample_rate,
                self.config.yin_amplitude_threshold,
                self.config.yin_clarity_threshold,
            );
            if let Some(freq) = yin.filter(|f| self.in_band(*f)) {
                log::trace!("[PITCH] spectrum silent, YIN fallback gave {:.2} Hz", freq);
                return PitchEstimate {
                    frequency: Some(freq),
                    source: Some(PitchSource::Yin),
                    timestamp: frame.captured_at,
                };
            }
        }

        PitchEstimate::absent(frame.captured_at)
    }

    /// Picks the strongest non-DC bin and converts it to Hz.
    fn spectral_peak(&self, magnitudes: &[f32], sample_rate: u32) -> Option<f32> {
        let (peak_bin, peak) = magnitudes
            .iter()
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;

        if !(*peak > self.config.noise_floor) {
            return None;
        }

        let bin = if self.config.refine_peak {
            interpolate_peak(magnitudes, peak_bin)
        } else {
            peak_bin as f32
        };

        let nyquist = sample_rate as f32 / 2.0;
        let freq = bin / magnitudes.len() as f32 * nyquist;
        self.in_band(freq).then_some(freq)
    }
}

/// Offset of a parabola's vertex from the middle of three equally spaced points.
fn vertex_offset(y1: f32, y2: f32, y3: f32) -> Option<f32> {
    let curvature = y1 - 2.0 * y2 + y3;
    (curvature != 0.0).then(|| (y1 - y3) / (2.0 * curvature))
}

/// Refines a spectral peak using parabolic interpolation on log magnitudes.
///
/// # Returns
/// * Fractional bin index; `peak_bin` itself when the neighbours don't allow interpolation
pub fn interpolate_peak(spectrum_magnitudes: &[f32], peak_bin: usize) -> f32 {
    if peak_bin == 0 || peak_bin + 1 >= spectrum_magnitudes.len() {
        return peak_bin as f32;
    }

    let [y1, y2, y3] = [peak_bin - 1, peak_bin, peak_bin + 1].map(|i| spectrum_magnitudes[i].ln());
    if !(y1.is_finite() && y2.is_finite() && y3.is_finite()) {
        return peak_bin as f32;
    }

    match vertex_offset(y1, y2, y3) {
        Some(shift) if shift.abs() <= 0.5 => peak_bin as f32 + shift,
        _ => peak_bin as f32,
    }
}

/// YIN pitch detection, used when the spectrum finds nothing.
///
/// # Arguments
/// * `signal` - Input audio signal
/// * `sample_rate` - Sample rate in Hz
/// * `amplitude_threshold` - Minimum RMS for pitch detection
/// * `clarity_threshold` - Maximum normalized difference at the chosen period
///
/// # Returns
/// * `Some(frequency)` - Detected frequency in Hz
/// * `None` - No pitch detected (silence, noise, or invalid signal)
pub fn detect_pitch_yin(
    signal: &[f32],
    sample_rate: u32,
    amplitude_threshold: f32,
    clarity_threshold: f32,
) -> Option<f32> {
    let half = signal.len() / 2;
    if half < 3 || rms(signal) < amplitude_threshold {
        return None;
    }

    let cmnd = normalized_difference(signal, half);
    let period = dip_bottom(&cmnd, first_dip(&cmnd)?);
    if cmnd[period] > clarity_threshold || period + 1 >= half {
        return None;
    }

    let shift = vertex_offset(cmnd[period - 1], cmnd[period], cmnd[period + 1]).unwrap_or(0.0);
    let frequency = sample_rate as f32 / (period as f32 + shift);
    (frequency.is_finite() && frequency > 20.0).then_some(frequency)
}

fn rms(signal: &[f32]) -> f32 {
    (signal.iter().map(|s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
}

/// Cumulative mean normalized difference for lags `0..half`; lag 0 is 1.
fn normalized_difference(signal: &[f32], half: usize) -> Vec<f32> {
    let head = &signal[..half];
    let mut cmnd = Vec::with_capacity(half);
    cmnd.push(1.0);

    let mut running_sum = 0.0;
    for tau in 1..half {
        let diff: f32 = head
            .iter()
            .zip(&signal[tau..tau + half])
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        running_sum += diff;
        cmnd.push(if running_sum > 0.0 { diff * tau as f32 / running_sum } else { 1.0 });
    }
    cmnd
}

/// First falling lag within 0.05 of the global minimum. Taking the first
/// such dip rather than the deepest avoids octave errors.
fn first_dip(cmnd: &[f32]) -> Option<usize> {
    let floor = cmnd[1..].iter().copied().fold(f32::INFINITY, f32::min);
    (2..cmnd.len()).find(|&tau| cmnd[tau] < floor + 0.05 && cmnd[tau] < cmnd[tau - 1])
}

fn dip_bottom(cmnd: &[f32], mut tau: usize) -> usize {
    while tau + 1 < cmnd.len() && cmnd[tau + 1] < cmnd[tau] {
        tau += 1;
    }
    tau
}
