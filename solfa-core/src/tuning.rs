//! # Musical Tuning Module
//!
//! Maps a detected frequency onto a solfège scale degree.
//!
//! ## Features
//! - `NoteName`: the seven scale-degree names, octave-independent
//! - Equal-temperament reference table of the natural notes over several octaves
//! - Nearest-reference classification by semitone distance, with tolerance
//! - Cent deviation helper for pitch displays

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;

/// A scale-degree name in fixed-do solfège.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NoteName {
    Do,
    Re,
    Mi,
    Fa,
    So,
    La,
    Si,
}

impl NoteName {
    /// All names in scale order, starting from do.
    pub const ALL: [NoteName; 7] = [
        NoteName::Do,
        NoteName::Re,
        NoteName::Mi,
        NoteName::Fa,
        NoteName::So,
        NoteName::La,
        NoteName::Si,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NoteName::Do => "do",
            NoteName::Re => "re",
            NoteName::Mi => "mi",
            NoteName::Fa => "fa",
            NoteName::So => "so",
            NoteName::La => "la",
            NoteName::Si => "si",
        }
    }

    /// Semitones above C within one octave.
    pub fn semitone_offset(self) -> i32 {
        match self {
            NoteName::Do => 0,
            NoteName::Re => 2,
            NoteName::Mi => 4,
            NoteName::Fa => 5,
            NoteName::So => 7,
            NoteName::La => 9,
            NoteName::Si => 11,
        }
    }

    /// Equal-temperament frequency of this degree in the 4th octave (do = C4), A4 = 440 Hz.
    pub fn reference_frequency(self) -> f32 {
        equal_tempered(440.0, self, 4)
    }
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not one of the seven names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownNoteName(pub String);

impl fmt::Display for UnknownNoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown note name '{}'", self.0)
    }
}

impl std::error::Error for UnknownNoteName {}

impl FromStr for NoteName {
    type Err = UnknownNoteName;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        NoteName::ALL
            .into_iter()
            .find(|n| n.as_str() == lowered)
            .ok_or_else(|| UnknownNoteName(s.to_string()))
    }
}

impl TryFrom<String> for NoteName {
    type Error = UnknownNoteName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NoteName> for String {
    fn from(name: NoteName) -> Self {
        name.as_str().to_string()
    }
}

/// One entry of the reference table.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePitch {
    pub name: NoteName,
    pub octave: i32,
    /// Frequency in Hz
    pub frequency: f32,
}

/// f = a4 * 2^(n/12), n = semitones away from A4.
fn equal_tempered(reference_a4: f32, name: NoteName, octave: i32) -> f32 {
    let midi = (octave + 1) * 12 + name.semitone_offset();
    reference_a4 * 2.0_f32.powf((midi - 69) as f32 / 12.0)
}

/// Builds the natural notes from `lowest_octave` to `highest_octave` inclusive,
/// ascending. Ascending order means a tie can only occur between neighbours,
/// and the lower neighbour wins.
pub fn build_reference_table(reference_a4: f32, lowest_octave: i32, highest_octave: i32) -> Vec<ReferencePitch> {
    (lowest_octave..=highest_octave)
        .flat_map(|octave| {
            NoteName::ALL.into_iter().map(move |name| ReferencePitch {
                name,
                octave,
                frequency: equal_tempered(reference_a4, name, octave),
            })
        })
        .collect()
}

/// C3 to B5 at A4 = 440 Hz, computed once.
static DEFAULT_TABLE: Lazy<Vec<ReferencePitch>> = Lazy::new(|| build_reference_table(440.0, 3, 5));

/// Calculates the deviation from a target frequency in cents.
///
/// # Returns
/// * Cent deviation (positive = sharp, negative = flat)
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// A successful classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub name: NoteName,
    /// The reference that was closest.
    pub reference: ReferencePitch,
    /// Signed distance to that reference in semitones.
    pub semitones: f32,
}

impl Classification {
    pub fn cents_deviation(&self) -> f32 {
        self.semitones * 100.0
    }
}

/// Distances closer than this count as a tie.
const TIE_SEMITONES: f32 = 1e-4;

/// Nearest-reference note classifier.
#[derive(Debug, Clone)]
pub struct NoteClassifier {
    table: Vec<ReferencePitch>,
    tolerance_semitones: f32,
}

impl Default for NoteClassifier {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.clone(),
            tolerance_semitones: 1.0,
        }
    }
}

impl NoteClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            table: build_reference_table(config.reference_a4, config.lowest_octave, config.highest_octave),
            tolerance_semitones: config.tolerance_semitones,
        }
    }

    pub fn references(&self) -> &[ReferencePitch] {
        &self.table
    }

    /// Finds the reference nearest to `freq` in semitones.
    ///
    /// # Returns
    /// * `Some(classification)` - nearest reference within tolerance
    /// * `None` - non-positive frequency, or further than the tolerance from every reference
    pub fn classify(&self, freq: f32) -> Option<Classification> {
        if !(freq.is_finite() && freq > 0.0) {
            return None;
        }

        let mut best: Option<(&ReferencePitch, f32)> = None;
        for reference in &self.table {
            let semitones = 12.0 * (freq / reference.frequency).log2();
            // Only a clearly smaller distance replaces the earlier entry.
            if best.is_none_or(|(_, d)| semitones.abs() < d.abs() - TIE_SEMITONES) {
                best = Some((reference, semitones));
            }
        }

        let (reference, semitones) = best?;
        if semitones.abs() > self.tolerance_semitones {
            log::trace!(
                "[PITCH] {:.2} Hz is {:.2} semitones from {}{}; rejected",
                freq, semitones.abs(), reference.name, reference.octave
            );
            return None;
        }

        Some(Classification {
            name: reference.name,
            reference: reference.clone(),
            semitones,
        })
    }

    /// Shorthand for `classify(freq).map(|c| c.name)`.
    pub fn note_name(&self, freq: f32) -> Option<NoteName> {
        self.classify(freq).map(|c| c.name)
    }
}
