//! # Configuration Module
//!
//! All tunables of the note-following engine live here. Every section
//! deserializes with `#[serde(default)]`, so a config file only needs to name
//! the values it overrides:
//!
//! ```json
//! { "timing": { "silence_gate_ms": 250 } }
//! ```
//!
//! Timings are plain wall-clock constants; nothing here scales with tempo.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SolfaError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolfaConfig {
    pub capture: CaptureConfig,
    pub estimator: EstimatorConfig,
    pub classifier: ClassifierConfig,
    pub timing: MatchTimings,
}

/// Microphone capture and framing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Requested input sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per analysis frame.
    pub frame_size: usize,
    /// Samples between the starts of consecutive frames.
    pub hop_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            frame_size: 4096,
            hop_size: 1024,
        }
    }
}

/// Frequency estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Lowest accepted frequency in Hz.
    pub min_frequency: f32,
    /// Highest accepted frequency in Hz.
    pub max_frequency: f32,
    /// Peak magnitude (normalized to sine amplitude) below which a frame has no pitch.
    pub noise_floor: f32,
    /// Interpolate the spectral peak between bins.
    pub refine_peak: bool,
    /// Consult the time-domain estimator when the spectral one finds nothing.
    pub yin_fallback: bool,
    /// RMS level below which the time-domain estimator gives up.
    pub yin_amplitude_threshold: f32,
    /// Maximum normalized difference accepted as a clear period.
    pub yin_clarity_threshold: f32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            min_frequency: 80.0,
            max_frequency: 2000.0,
            noise_floor: 0.01,
            refine_peak: true,
            yin_fallback: true,
            yin_amplitude_threshold: 0.01,
            yin_clarity_threshold: 0.1,
        }
    }
}

/// Note classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Maximum distance to the nearest reference, in semitones.
    pub tolerance_semitones: f32,
    /// Concert pitch of A4 in Hz.
    pub reference_a4: f32,
    /// First octave of the reference table (scientific pitch notation).
    pub lowest_octave: i32,
    /// Last octave of the reference table, inclusive.
    pub highest_octave: i32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            tolerance_semitones: 1.0,
            reference_a4: 440.0,
            lowest_octave: 3,
            highest_octave: 5,
        }
    }
}

/// Debounce timings of the note-match state machine, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchTimings {
    pub onset_sustain_ms: u64,
    pub silence_gate_ms: u64,
    pub decision_debounce_ms: u64,
    pub page_advance_delay_ms: u64,
    pub early_break_ms: u64,
}

impl Default for MatchTimings {
    fn default() -> Self {
        Self {
            onset_sustain_ms: 300,
            silence_gate_ms: 200,
            decision_debounce_ms: 500,
            page_advance_delay_ms: 500,
            early_break_ms: 150,
        }
    }
}

impl MatchTimings {
    pub fn onset_sustain(&self) -> Duration {
        Duration::from_millis(self.onset_sustain_ms)
    }

    pub fn silence_gate(&self) -> Duration {
        Duration::from_millis(self.silence_gate_ms)
    }

    pub fn decision_debounce(&self) -> Duration {
        Duration::from_millis(self.decision_debounce_ms)
    }

    pub fn page_advance_delay(&self) -> Duration {
        Duration::from_millis(self.page_advance_delay_ms)
    }

    pub fn early_break(&self) -> Duration {
        Duration::from_millis(self.early_break_ms)
    }
}

impl SolfaConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SolfaConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Writes the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Rejects values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        let capture = &self.capture;
        if capture.frame_size < 64 {
            return Err(SolfaError::InvalidConfig(format!(
                "frame_size must be at least 64, got {}",
                capture.frame_size
            )));
        }
        if capture.hop_size == 0 || capture.hop_size > capture.frame_size {
            return Err(SolfaError::InvalidConfig(format!(
                "hop_size must be in 1..={}, got {}",
                capture.frame_size, capture.hop_size
            )));
        }
        if capture.sample_rate == 0 {
            return Err(SolfaError::InvalidConfig("sample_rate must be non-zero".into()));
        }

        let est = &self.estimator;
        if !(est.min_frequency > 0.0 && est.min_frequency < est.max_frequency) {
            return Err(SolfaError::InvalidConfig(format!(
                "frequency band [{}, {}] is empty",
                est.min_frequency, est.max_frequency
            )));
        }

        let cls = &self.classifier;
        if cls.tolerance_semitones <= 0.0 || cls.reference_a4 <= 0.0 {
            return Err(SolfaError::InvalidConfig(
                "tolerance and reference pitch must be positive".into(),
            ));
        }
        if cls.lowest_octave > cls.highest_octave {
            return Err(SolfaError::InvalidConfig(format!(
                "octave range {}..={} is empty",
                cls.lowest_octave, cls.highest_octave
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_tunables() {
        let config = SolfaConfig::default();
        assert_eq!(config.timing.onset_sustain(), Duration::from_millis(300));
        assert_eq!(config.timing.silence_gate(), Duration::from_millis(200));
        assert_eq!(config.timing.decision_debounce(), Duration::from_millis(500));
        assert_eq!(config.timing.page_advance_delay(), Duration::from_millis(500));
        assert_eq!(config.timing.early_break(), Duration::from_millis(150));
        assert_eq!(config.classifier.tolerance_semitones, 1.0);
        assert_eq!(config.estimator.min_frequency, 80.0);
        assert_eq!(config.estimator.max_frequency, 2000.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config =
            SolfaConfig::from_json_str(r#"{ "timing": { "silence_gate_ms": 250 } }"#).unwrap();
        assert_eq!(config.timing.silence_gate_ms, 250);
        assert_eq!(config.timing.onset_sustain_ms, 300);
        assert_eq!(config.capture, CaptureConfig::default());
    }

    #[test]
    fn rejects_inverted_band() {
        let err = SolfaConfig::from_json_str(
            r#"{ "estimator": { "min_frequency": 900.0, "max_frequency": 100.0 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, SolfaError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_hop_larger_than_frame() {
        let mut config = SolfaConfig::default();
        config.capture.hop_size = config.capture.frame_size + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = SolfaConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, SolfaError::Config(_)));
    }

    #[test]
    fn save_then_load() {
        let path = std::env::temp_dir().join(format!("solfa-config-{}.json", std::process::id()));
        let mut config = SolfaConfig::default();
        config.timing.page_advance_delay_ms = 750;
        config.save(&path).unwrap();
        let loaded = SolfaConfig::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, config);
    }
}
