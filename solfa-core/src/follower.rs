//! Per-frame pipeline: estimate → classify → match.

use crate::audio::AudioFrame;
use crate::config::SolfaConfig;
use crate::events::EventSink;
use crate::matcher::{NoteMatcher, PlaybackSnapshot};
use crate::pitch::FrequencyEstimator;
use crate::tuning::NoteClassifier;
use crate::FrameAnalysis;

/// Runs one frame at a time through the whole chain.
///
/// All work happens synchronously inside [`NoteFollower::process_frame`];
/// the caller must not hand in the next frame before it returns.
#[derive(Debug)]
pub struct NoteFollower {
    estimator: FrequencyEstimator,
    classifier: NoteClassifier,
    matcher: NoteMatcher,
}

impl NoteFollower {
    pub fn new(config: &SolfaConfig) -> Self {
        Self {
            estimator: FrequencyEstimator::new(config.estimator.clone(), config.capture.frame_size),
            classifier: NoteClassifier::new(&config.classifier),
            matcher: NoteMatcher::new(&config.timing),
        }
    }

    pub fn matcher(&self) -> &NoteMatcher {
        &self.matcher
    }

    pub fn matcher_mut(&mut self) -> &mut NoteMatcher {
        &mut self.matcher
    }

    /// Analyses `frame` and feeds the result to the matcher.
    pub fn process_frame(
        &mut self,
        frame: &AudioFrame,
        snapshot: &PlaybackSnapshot,
        sink: &mut dyn EventSink,
    ) -> FrameAnalysis {
        let estimate = self.estimator.estimate(frame);
        let classification = estimate.frequency.and_then(|f| self.classifier.classify(f));
        let note = classification.as_ref().map(|c| c.name);

        self.matcher.process(note, frame.captured_at, snapshot, sink);

        FrameAnalysis {
            detected_frequency: estimate.frequency,
            note_name: note,
            cents_deviation: classification.as_ref().map(|c| c.cents_deviation()),
            estimate,
        }
    }
}
