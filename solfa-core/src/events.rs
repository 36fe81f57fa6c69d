//! Events the matcher emits, and the sinks that receive them.

use std::time::Instant;

use crossbeam_channel::Sender;

use crate::sequence::ExpectedNote;
use crate::tuning::NoteName;

/// One resolved comparison between a played note and the expected one.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchEvent {
    pub expected: ExpectedNote,
    pub detected: NoteName,
    pub correct: bool,
    pub timestamp: Instant,
}

impl MatchEvent {
    /// Sequence index the decision was made for.
    pub fn index(&self) -> usize {
        self.expected.index
    }

    /// Marker text for the score overlay.
    pub fn describe(&self) -> String {
        if self.correct {
            format!("Correct: {}", self.expected.name)
        } else {
            format!("Error: detected {}, expected {}", self.detected, self.expected.name)
        }
    }
}

/// Receiver of matcher effects.
///
/// Calls happen on the processing path, synchronously, in the order the
/// effects occur. Implementations should return quickly.
pub trait EventSink {
    fn on_match_event(&mut self, event: &MatchEvent);

    fn on_sequence_complete(&mut self);

    /// The matcher finished the displayed page and wants `next_page` shown.
    fn on_page_advance_requested(&mut self, next_page: u32);
}

/// Everything a session reports to its host.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Match(MatchEvent),
    SequenceComplete,
    PageAdvanceRequested(u32),
    /// Capture could not be started; the session has stopped processing.
    CaptureUnavailable(String),
}

impl EventSink for Vec<SessionEvent> {
    fn on_match_event(&mut self, event: &MatchEvent) {
        self.push(SessionEvent::Match(event.clone()));
    }

    fn on_sequence_complete(&mut self) {
        self.push(SessionEvent::SequenceComplete);
    }

    fn on_page_advance_requested(&mut self, next_page: u32) {
        self.push(SessionEvent::PageAdvanceRequested(next_page));
    }
}

/// Forwards effects to another thread. A disconnected receiver is ignored.
impl EventSink for Sender<SessionEvent> {
    fn on_match_event(&mut self, event: &MatchEvent) {
        if self.send(SessionEvent::Match(event.clone())).is_err() {
            log::debug!("[EVENTS] Receiver gone, dropping match event");
        }
    }

    fn on_sequence_complete(&mut self) {
        let _ = self.send(SessionEvent::SequenceComplete);
    }

    fn on_page_advance_requested(&mut self, next_page: u32) {
        let _ = self.send(SessionEvent::PageAdvanceRequested(next_page));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(correct: bool) -> MatchEvent {
        MatchEvent {
            expected: ExpectedNote::new(NoteName::Re, 0.0, 0.0, 1),
            detected: if correct { NoteName::Re } else { NoteName::Fa },
            correct,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn marker_text() {
        assert_eq!(event(true).describe(), "Correct: re");
        assert_eq!(event(false).describe(), "Error: detected fa, expected re");
    }

    #[test]
    fn channel_sink_forwards_in_order() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut sink = tx;
        sink.on_match_event(&event(true));
        sink.on_page_advance_requested(2);
        sink.on_sequence_complete();
        let received: Vec<SessionEvent> = rx.try_iter().collect();
        assert!(matches!(received[0], SessionEvent::Match(ref e) if e.correct));
        assert_eq!(received[1], SessionEvent::PageAdvanceRequested(2));
        assert_eq!(received[2], SessionEvent::SequenceComplete);
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (tx, rx) = crossbeam_channel::unbounded::<SessionEvent>();
        drop(rx);
        let mut sink = tx;
        sink.on_match_event(&event(false));
        sink.on_sequence_complete();
    }
}
