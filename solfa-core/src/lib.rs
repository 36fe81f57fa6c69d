// solfa-core/src/lib.rs

//! The core logic for the score-reading trainer.
//! This crate listens to a performer, detects which scale degree is being
//! played, and follows an expected-note sequence, reporting every hit and
//! miss. It is completely headless and contains no GUI code: score
//! rendering, markers and page display belong to the host.

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod fft;
pub mod follower;
pub mod matcher;
pub mod pitch;
pub mod sequence;
pub mod session;
pub mod tuning;

pub use config::SolfaConfig;
pub use error::{Result, SolfaError};
pub use events::{EventSink, MatchEvent, SessionEvent};
pub use follower::NoteFollower;
pub use matcher::{MatchState, NoteMatcher, PlaybackSnapshot};
pub use sequence::{ExpectedNote, NoteSequence, SequenceProvider};
pub use session::PracticeSession;
pub use tuning::NoteName;

/// Represents the result of a single audio analysis frame.
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    /// The dominant frequency in Hz, if any.
    pub detected_frequency: Option<f32>,
    /// The scale degree nearest to that frequency, within tolerance.
    pub note_name: Option<NoteName>,
    /// The deviation from the nearest reference in cents.
    pub cents_deviation: Option<f32>,
    /// The raw estimate, including which estimator produced it.
    pub estimate: pitch::PitchEstimate,
}
