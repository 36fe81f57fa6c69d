//! # Note-Match State Machine
//!
//! Turns a stream of per-frame note names into discrete, debounced decisions
//! against the expected-note cursor.
//!
//! A decision needs the same name held for the onset-sustain time. After every
//! decision the silence gate closes: it opens again after a stretch of no
//! pitch, or early when a different name has sustained for the early-break
//! time. Correct decisions move the cursor forward, finish the sequence, or
//! (at the end of a page) schedule a page advance.
//!
//! The matcher never reads global state. Each call gets an immutable
//! [`PlaybackSnapshot`] describing what the host currently shows, and reports
//! effects through an [`EventSink`]. Frames must be fed strictly in capture
//! order: onset and silence timers depend on it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::config::MatchTimings;
use crate::events::{EventSink, MatchEvent};
use crate::sequence::{ExpectedNote, NoteSequence, SequenceProvider};
use crate::tuning::NoteName;

/// What the host currently shows and plays, captured for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub playing: bool,
    pub score_id: Option<String>,
    /// Displayed page, 1-based.
    pub page: u32,
    pub sequence: Option<Arc<NoteSequence>>,
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self {
            playing: false,
            score_id: None,
            page: 1,
            sequence: None,
        }
    }
}

impl PlaybackSnapshot {
    pub fn playing(score_id: impl Into<String>, sequence: Arc<NoteSequence>, page: u32) -> Self {
        Self {
            playing: true,
            score_id: Some(score_id.into()),
            page,
            sequence: Some(sequence),
        }
    }

    /// A playing snapshot for `score_id` with whatever note data `provider`
    /// holds for it. A score without note data leaves the matcher idle.
    pub fn resolve(provider: &dyn SequenceProvider, score_id: &str, page: u32) -> Self {
        Self {
            playing: true,
            score_id: Some(score_id.to_owned()),
            page,
            sequence: provider.expected_sequence(score_id),
        }
    }

    /// The sequence, when playback is running and note data is loaded.
    fn active_sequence(&self) -> Option<&NoteSequence> {
        if !self.playing {
            return None;
        }
        self.sequence.as_deref().filter(|s| !s.is_empty())
    }
}

/// A name under observation and when it started sounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub name: NoteName,
    pub onset: Instant,
}

/// Phase of the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    Idle,
    AwaitingOnset {
        candidate: Option<Candidate>,
    },
    SilenceGating {
        last_name: NoteName,
        silence_since: Option<Instant>,
        /// A different name trying to break the gate early.
        candidate: Option<Candidate>,
    },
    Complete,
}

/// When and for which index the last decision was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastDecision {
    pub index: usize,
    pub at: Instant,
}

/// Transient bookkeeping carried from one frame to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationState {
    pub state: MatchState,
    pub last_decision: Option<LastDecision>,
}

impl ValidationState {
    pub fn idle() -> Self {
        Self {
            state: MatchState::Idle,
            last_decision: None,
        }
    }

    /// The candidate being timed, in either onset or gate phase.
    pub fn candidate(&self) -> Option<Candidate> {
        match self.state {
            MatchState::AwaitingOnset { candidate } | MatchState::SilenceGating { candidate, .. } => candidate,
            MatchState::Idle | MatchState::Complete => None,
        }
    }

    pub fn is_gating(&self) -> bool {
        matches!(self.state, MatchState::SilenceGating { .. })
    }
}

/// Read-only view of the cursor for the renderer.
#[derive(Debug, Clone, Default)]
pub struct CursorHandle(Arc<AtomicUsize>);

impl CursorHandle {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn publish(&self, cursor: usize) {
        self.0.store(cursor, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingAdvance {
    due: Instant,
    page: u32,
}

#[derive(Debug, Clone)]
struct Timings {
    onset_sustain: Duration,
    silence_gate: Duration,
    decision_debounce: Duration,
    page_advance_delay: Duration,
    early_break: Duration,
}

impl From<&MatchTimings> for Timings {
    fn from(t: &MatchTimings) -> Self {
        Self {
            onset_sustain: t.onset_sustain(),
            silence_gate: t.silence_gate(),
            decision_debounce: t.decision_debounce(),
            page_advance_delay: t.page_advance_delay(),
            early_break: t.early_break(),
        }
    }
}

/// The note-match state machine. Sole writer of the cursor.
#[derive(Debug)]
pub struct NoteMatcher {
    timings: Timings,
    validation: ValidationState,
    cursor: usize,
    complete: bool,
    score_id: Option<String>,
    /// Note data the cursor currently points into.
    loaded: Option<Arc<NoteSequence>>,
    displayed_page: Option<u32>,
    /// Page we asked the host to show and it has not shown yet.
    requested_page: Option<u32>,
    pending_advance: Option<PendingAdvance>,
    cursor_handle: CursorHandle,
}

impl Default for NoteMatcher {
    fn default() -> Self {
        Self::new(&MatchTimings::default())
    }
}

impl NoteMatcher {
    pub fn new(timings: &MatchTimings) -> Self {
        Self {
            timings: timings.into(),
            validation: ValidationState::idle(),
            cursor: 0,
            complete: false,
            score_id: None,
            loaded: None,
            displayed_page: None,
            requested_page: None,
            pending_advance: None,
            cursor_handle: CursorHandle::default(),
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn cursor_handle(&self) -> CursorHandle {
        self.cursor_handle.clone()
    }

    pub fn state(&self) -> MatchState {
        self.validation.state
    }

    pub fn validation(&self) -> &ValidationState {
        &self.validation
    }

    /// Whether the whole sequence has been played. Survives stop; cleared by
    /// [`Self::reset`] or a score change.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn has_pending_page_advance(&self) -> bool {
        self.pending_advance.is_some()
    }

    /// External stop: drop everything in flight and go idle.
    pub fn stop(&mut self) {
        self.enter_idle("stopped");
    }

    /// Starts the current score over from the beginning.
    pub fn reset(&mut self) {
        log::info!("[MATCH] Reset");
        self.enter_idle("reset");
        self.complete = false;
        self.set_cursor(0);
        // Forces the page rule to run against the next snapshot.
        self.displayed_page = None;
        self.requested_page = None;
    }

    /// Handles one frame's classification.
    ///
    /// `detected` is `None` for silence, noise, or an unclassifiable pitch.
    pub fn process(
        &mut self,
        detected: Option<NoteName>,
        now: Instant,
        snapshot: &PlaybackSnapshot,
        sink: &mut dyn EventSink,
    ) {
        let Some(sequence) = self.sync(now, snapshot, sink) else {
            return;
        };

        let state = self.validation.state;
        let next = match state {
            MatchState::Idle | MatchState::Complete => state,
            MatchState::AwaitingOnset { candidate } => {
                self.await_onset(candidate, detected, now, snapshot.page, sequence, sink)
            }
            MatchState::SilenceGating { last_name, silence_since, candidate } => self.gate(
                last_name,
                silence_since,
                candidate,
                detected,
                now,
                snapshot.page,
                sequence,
                sink,
            ),
        };
        self.validation.state = next;
    }

    /// Applies context changes and due timers without an observation.
    pub fn poll(&mut self, now: Instant, snapshot: &PlaybackSnapshot, sink: &mut dyn EventSink) {
        let _ = self.sync(now, snapshot, sink);
    }

    /// Reconciles with the snapshot. Returns the sequence when a decision
    /// cycle may run this frame.
    fn sync<'s>(
        &mut self,
        now: Instant,
        snapshot: &'s PlaybackSnapshot,
        sink: &mut dyn EventSink,
    ) -> Option<&'s NoteSequence> {
        if snapshot.score_id != self.score_id {
            log::info!("[MATCH] Score changed to {:?}", snapshot.score_id);
            self.load_score(snapshot);
        } else if self.notes_replaced(snapshot) {
            log::info!("[MATCH] Note data for {:?} replaced", snapshot.score_id);
            self.load_score(snapshot);
        }
        if let Some(sequence) = &snapshot.sequence {
            self.loaded = Some(Arc::clone(sequence));
        }

        if let Some(sequence) = snapshot.sequence.as_deref() {
            self.sync_page(snapshot.page, sequence);
        }

        let Some(sequence) = snapshot.active_sequence() else {
            self.enter_idle(if snapshot.playing { "no note data" } else { "playback inactive" });
            return None;
        };

        if let Some(pending) = self.pending_advance {
            if now >= pending.due {
                self.apply_page_advance(pending.page, sequence, sink);
            }
        }

        let len = sequence.len();
        if self.cursor > len || (self.cursor == len && !self.complete) {
            log::warn!("[MATCH] Cursor {} out of range for {} notes; ignoring frame", self.cursor, len);
            return None;
        }

        if self.validation.state == MatchState::Idle {
            self.validation.state = if self.complete {
                MatchState::Complete
            } else {
                log::debug!("[MATCH] Listening for index {}", self.cursor);
                MatchState::AwaitingOnset { candidate: None }
            };
        }

        Some(sequence)
    }

    /// New note data under the same score. A missing sequence is not a
    /// replacement: the host may still be loading it.
    fn notes_replaced(&self, snapshot: &PlaybackSnapshot) -> bool {
        match (&self.loaded, &snapshot.sequence) {
            (Some(loaded), Some(next)) => !Arc::ptr_eq(loaded, next) && **loaded != **next,
            _ => false,
        }
    }

    fn load_score(&mut self, snapshot: &PlaybackSnapshot) {
        self.enter_idle("score changed");
        self.score_id = snapshot.score_id.clone();
        self.loaded = None;
        self.complete = false;
        self.set_cursor(0);
        self.displayed_page = None;
        self.requested_page = None;
    }

    fn sync_page(&mut self, page: u32, sequence: &NoteSequence) {
        if self.displayed_page == Some(page) {
            return;
        }
        let previous = self.displayed_page.replace(page);

        if self.requested_page == Some(page) {
            log::debug!("[MATCH] Host now shows requested page {}", page);
            self.requested_page = None;
            return;
        }

        // Anything else is a switch the host made on its own.
        self.requested_page = None;
        if previous.is_some() {
            log::info!("[MATCH] Page switched {:?} -> {}", previous, page);
            self.enter_idle("page switched");
        }
        if self.complete {
            return;
        }

        let cursor_page = sequence.get(self.cursor).map(|n| n.page);
        if cursor_page != Some(page) {
            if let Some(first) = sequence.first_index_on_page(page) {
                log::info!("[MATCH] Cursor relocated {} -> {} (first note on page {})", self.cursor, first, page);
                self.set_cursor(first);
            }
        }
    }

    fn apply_page_advance(&mut self, page: u32, sequence: &NoteSequence, sink: &mut dyn EventSink) {
        self.pending_advance = None;
        match sequence.first_index_on_page(page) {
            Some(first) => self.set_cursor(first),
            None => log::warn!("[MATCH] Page {} has no notes; cursor stays at {}", page, self.cursor),
        }
        log::info!("[MATCH] Advancing to page {}, cursor {}", page, self.cursor);
        self.requested_page = Some(page);
        self.validation.state = MatchState::AwaitingOnset { candidate: None };
        sink.on_page_advance_requested(page);
    }

    fn enter_idle(&mut self, reason: &str) {
        if self.pending_advance.take().is_some() {
            log::info!("[MATCH] Pending page advance cancelled ({})", reason);
        }
        if self.validation != ValidationState::idle() {
            log::debug!("[MATCH] Idle ({})", reason);
        }
        self.validation = ValidationState::idle();
    }

    fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor;
        self.cursor_handle.publish(cursor);
    }

    fn await_onset(
        &mut self,
        candidate: Option<Candidate>,
        detected: Option<NoteName>,
        now: Instant,
        page: u32,
        sequence: &NoteSequence,
        sink: &mut dyn EventSink,
    ) -> MatchState {
        let Some(name) = detected else {
            return MatchState::AwaitingOnset { candidate: None };
        };

        let candidate = match candidate {
            Some(c) if c.name == name => c,
            _ => {
                log::trace!("[MATCH] Onset of {}", name);
                return MatchState::AwaitingOnset {
                    candidate: Some(Candidate { name, onset: now }),
                };
            }
        };
        let waiting = MatchState::AwaitingOnset { candidate: Some(candidate) };

        if now.saturating_duration_since(candidate.onset) < self.timings.onset_sustain {
            return waiting;
        }
        if self.pending_advance.is_some() {
            return waiting;
        }
        if let Some(last) = self.validation.last_decision {
            if last.index == self.cursor
                && now.saturating_duration_since(last.at) < self.timings.decision_debounce
            {
                return waiting;
            }
        }
        let Some(expected) = sequence.get(self.cursor) else {
            return waiting;
        };
        if expected.page != page {
            log::trace!("[MATCH] Index {} is on page {}, page {} shown; not deciding", self.cursor, expected.page, page);
            return waiting;
        }

        let expected = expected.clone();
        self.decide(name, expected, now, page, sequence, sink)
    }

    #[allow(clippy::too_many_arguments)]
    fn gate(
        &mut self,
        last_name: NoteName,
        silence_since: Option<Instant>,
        candidate: Option<Candidate>,
        detected: Option<NoteName>,
        now: Instant,
        page: u32,
        sequence: &NoteSequence,
        sink: &mut dyn EventSink,
    ) -> MatchState {
        match detected {
            Some(name) if name == last_name => MatchState::SilenceGating {
                last_name,
                silence_since: None,
                candidate: None,
            },
            None => {
                let since = silence_since.unwrap_or(now);
                if now.saturating_duration_since(since) >= self.timings.silence_gate {
                    log::debug!("[MATCH] Silence gate open");
                    MatchState::AwaitingOnset { candidate: None }
                } else {
                    MatchState::SilenceGating {
                        last_name,
                        silence_since: Some(since),
                        candidate: None,
                    }
                }
            }
            Some(name) => match candidate {
                Some(c) if c.name == name => {
                    if now.saturating_duration_since(c.onset) >= self.timings.early_break {
                        log::debug!("[MATCH] Gate broken early by {}", name);
                        self.await_onset(Some(c), detected, now, page, sequence, sink)
                    } else {
                        MatchState::SilenceGating {
                            last_name,
                            silence_since: None,
                            candidate: Some(c),
                        }
                    }
                }
                _ => MatchState::SilenceGating {
                    last_name,
                    silence_since: None,
                    candidate: Some(Candidate { name, onset: now }),
                },
            },
        }
    }

    fn decide(
        &mut self,
        detected: NoteName,
        expected: ExpectedNote,
        now: Instant,
        page: u32,
        sequence: &NoteSequence,
        sink: &mut dyn EventSink,
    ) -> MatchState {
        let index = self.cursor;
        let correct = detected == expected.name;
        log::info!(
            "[MATCH] Detected {}, expected {} at index {}: {}",
            detected,
            expected.name,
            index,
            if correct { "correct" } else { "error" }
        );

        let event = MatchEvent {
            expected,
            detected,
            correct,
            timestamp: now,
        };
        sink.on_match_event(&event);
        self.validation.last_decision = Some(LastDecision { index, at: now });

        let gating = MatchState::SilenceGating {
            last_name: detected,
            silence_since: None,
            candidate: None,
        };
        if !correct {
            return gating;
        }

        if sequence.is_last(index) {
            log::info!("[MATCH] Sequence complete");
            self.complete = true;
            self.set_cursor(sequence.len());
            sink.on_sequence_complete();
            return MatchState::Complete;
        }

        if sequence.last_index_on_page(page) == Some(index) {
            if let Some(next_page) = sequence.next_page_after(index) {
                log::info!("[MATCH] Last note of page {}; page {} follows", page, next_page);
                self.pending_advance = Some(PendingAdvance {
                    due: now + self.timings.page_advance_delay,
                    page: next_page,
                });
                return gating;
            }
        }

        self.set_cursor(index + 1);
        gating
    }
}
