//! # Practice Session Module
//!
//! Owns the analysis thread: microphone capture, the frame pipeline and the
//! matcher all live there, so frames are processed one at a time in capture
//! order.
//!
//! ## Architecture
//! - **Audio callback**: assembles frames and pushes them onto an unbounded channel
//! - **Analysis thread**: drains frames in order, applying host commands first
//! - **Host**: sends snapshots and commands, receives [`SessionEvent`]s, reads the cursor

use std::thread::{self, JoinHandle};
use std::time::Instant;

use cpal::traits::StreamTrait;
use crossbeam_channel::{Receiver, Sender};

use crate::audio::{self, AudioFrame};
use crate::config::{CaptureConfig, SolfaConfig};
use crate::error::Result;
use crate::events::SessionEvent;
use crate::follower::NoteFollower;
use crate::matcher::{CursorHandle, PlaybackSnapshot};
use crate::sequence::SequenceProvider;

/// Host → analysis thread.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// New playback context (playing flag, score, page, notes).
    Update(PlaybackSnapshot),
    /// Playback stopped. The completion flag survives.
    Stop,
    /// Start the current score over.
    Reset,
    Shutdown,
}

/// A running note-following session.
#[derive(Debug)]
pub struct PracticeSession {
    command_tx: Sender<SessionCommand>,
    events_rx: Receiver<SessionEvent>,
    cursor: CursorHandle,
    thread_handle: Option<JoinHandle<()>>,
}

impl PracticeSession {
    /// Spawns the analysis thread and starts capture on it.
    ///
    /// Capture failures are not returned here: the device is opened on the
    /// analysis thread, and a failure arrives as
    /// [`SessionEvent::CaptureUnavailable`], after which the session does nothing.
    pub fn start(config: SolfaConfig, snapshot: PlaybackSnapshot) -> Result<Self> {
        config.validate()?;

        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let follower = NoteFollower::new(&config);
        let cursor = follower.matcher().cursor_handle();

        let thread_handle = thread::Builder::new()
            .name("solfa-analysis".into())
            .spawn(move || {
                let mut follower = follower;
                run_worker(
                    &config,
                    &mut follower,
                    snapshot,
                    &command_rx,
                    events_tx,
                    audio::start_audio_capture,
                )
            })?;

        Ok(Self {
            command_tx,
            events_rx,
            cursor,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn update(&self, snapshot: PlaybackSnapshot) {
        self.send(SessionCommand::Update(snapshot));
    }

    /// Starts playing `score_id` on `page`, with the notes `provider` has for it.
    pub fn open_score(&self, provider: &dyn SequenceProvider, score_id: &str, page: u32) {
        self.update(PlaybackSnapshot::resolve(provider, score_id, page));
    }

    pub fn playback_stopped(&self) {
        self.send(SessionCommand::Stop);
    }

    pub fn reset(&self) {
        self.send(SessionCommand::Reset);
    }

    /// Events in the order the matcher produced them.
    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events_rx
    }

    /// Index of the next expected note, for the renderer.
    pub fn cursor(&self) -> &CursorHandle {
        &self.cursor
    }

    /// Stops capture and waits for the analysis thread to exit.
    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    fn send(&self, command: SessionCommand) {
        if self.command_tx.send(command).is_err() {
            log::warn!("[SESSION] Analysis thread has exited; command dropped");
        }
    }

    fn stop_worker(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = self.command_tx.send(SessionCommand::Shutdown);
            if handle.join().is_err() {
                log::error!("[SESSION] Analysis thread panicked");
            }
        }
    }
}

impl Drop for PracticeSession {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

/// Body of the analysis thread. `start_capture` opens the input stream; a
/// failure there ends the session with [`SessionEvent::CaptureUnavailable`].
pub(crate) fn run_worker<S, F>(
    config: &SolfaConfig,
    follower: &mut NoteFollower,
    snapshot: PlaybackSnapshot,
    command_rx: &Receiver<SessionCommand>,
    mut events_tx: Sender<SessionEvent>,
    start_capture: F,
) where
    S: StreamTrait,
    F: FnOnce(Sender<AudioFrame>, &CaptureConfig) -> anyhow::Result<(S, u32)>,
{
    log::info!("[AUDIO-THREAD] Starting audio capture...");
    let (frame_tx, frame_rx) = crossbeam_channel::unbounded::<AudioFrame>();

    let (stream, sample_rate) = match start_capture(frame_tx, &config.capture) {
        Ok(tuple) => tuple,
        Err(e) => {
            log::error!("[AUDIO-THREAD] Capture unavailable: {:#}", e);
            follower.matcher_mut().stop();
            let _ = events_tx.send(SessionEvent::CaptureUnavailable(format!("{:#}", e)));
            return;
        }
    };
    if sample_rate != config.capture.sample_rate {
        log::warn!(
            "[AUDIO-THREAD] Device runs at {} Hz instead of {} Hz",
            sample_rate, config.capture.sample_rate
        );
    }

    run_frame_loop(follower, snapshot, &frame_rx, command_rx, &mut events_tx);

    log::info!("[AUDIO-THREAD] Stopping stream and exiting...");
    if let Err(e) = stream.pause() {
        log::warn!("[AUDIO-THREAD] Error pausing stream: {}", e);
    }
    drop(stream);
}

/// Applies one command. Returns `false` when the loop should end.
fn apply_command(
    command: SessionCommand,
    follower: &mut NoteFollower,
    snapshot: &mut PlaybackSnapshot,
    sink: &mut Sender<SessionEvent>,
) -> bool {
    match command {
        SessionCommand::Update(next) => {
            *snapshot = next;
            // Stop and page changes must not wait for the next frame.
            follower.matcher_mut().poll(Instant::now(), snapshot, sink);
        }
        SessionCommand::Stop => {
            snapshot.playing = false;
            follower.matcher_mut().stop();
        }
        SessionCommand::Reset => follower.matcher_mut().reset(),
        SessionCommand::Shutdown => {
            log::info!("[AUDIO-THREAD] Received shutdown signal");
            return false;
        }
    }
    true
}

/// Processes frames strictly in order until shutdown or until either channel closes.
pub(crate) fn run_frame_loop(
    follower: &mut NoteFollower,
    mut snapshot: PlaybackSnapshot,
    frame_rx: &Receiver<AudioFrame>,
    command_rx: &Receiver<SessionCommand>,
    sink: &mut Sender<SessionEvent>,
) {
    loop {
        crossbeam_channel::select! {
            recv(command_rx) -> msg => match msg {
                Ok(command) => {
                    if !apply_command(command, follower, &mut snapshot, sink) {
                        break;
                    }
                }
                Err(_) => {
                    log::info!("[AUDIO-THREAD] Host went away");
                    break;
                }
            },
            recv(frame_rx) -> msg => match msg {
                Ok(frame) => {
                    // Commands already queued take effect before this frame.
                    while let Ok(command) = command_rx.try_recv() {
                        if !apply_command(command, follower, &mut snapshot, sink) {
                            return;
                        }
                    }
                    if !snapshot.playing {
                        follower.matcher_mut().poll(frame.captured_at, &snapshot, sink);
                        continue;
                    }
                    let analysis = follower.process_frame(&frame, &snapshot, sink);
                    log::trace!("[AUDIO-THREAD] {:?} -> {:?}", analysis.detected_frequency, analysis.note_name);
                }
                Err(_) => {
                    log::info!("[AUDIO-THREAD] Audio channel closed");
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{ExpectedNote, NoteSequence};
    use crate::tuning::NoteName;
    use std::sync::Arc;
    use std::time::Duration;

    const SR: u32 = 44_100;

    fn tone(freq: f32, len: usize, at: Instant) -> AudioFrame {
        let samples = (0..len)
            .map(|i| 0.4 * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect();
        AudioFrame::new(samples, SR, at)
    }

    fn snapshot() -> PlaybackSnapshot {
        let sequence = NoteSequence::new(vec![
            ExpectedNote::new(NoteName::La, 0.0, 0.0, 1),
            ExpectedNote::new(NoteName::Si, 0.0, 0.0, 1),
        ])
        .unwrap();
        PlaybackSnapshot::playing("drill", Arc::new(sequence), 1)
    }

    #[test]
    fn queued_frames_are_processed_in_order() {
        let config = SolfaConfig::default();
        let n = config.capture.frame_size;
        let mut follower = NoteFollower::new(&config);
        let cursor = follower.matcher().cursor_handle();
        let (frame_tx, frame_rx) = crossbeam_channel::unbounded();
        let (_command_tx, command_rx) = crossbeam_channel::unbounded();
        let (mut events_tx, events_rx) = crossbeam_channel::unbounded();

        let t0 = Instant::now();
        for ms in (0..=400).step_by(25) {
            frame_tx.send(tone(440.0, n, t0 + Duration::from_millis(ms))).unwrap();
        }
        drop(frame_tx);

        run_frame_loop(&mut follower, snapshot(), &frame_rx, &command_rx, &mut events_tx);

        let events: Vec<SessionEvent> = events_rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], SessionEvent::Match(m) if m.correct && m.index() == 0));
        assert_eq!(cursor.get(), 1);
    }

    #[test]
    fn stop_queued_before_frames_wins() {
        let config = SolfaConfig::default();
        let n = config.capture.frame_size;
        let mut follower = NoteFollower::new(&config);
        let (frame_tx, frame_rx) = crossbeam_channel::unbounded();
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (mut events_tx, events_rx) = crossbeam_channel::unbounded();

        command_tx.send(SessionCommand::Stop).unwrap();
        let t0 = Instant::now();
        for ms in (0..=600).step_by(25) {
            frame_tx.send(tone(440.0, n, t0 + Duration::from_millis(ms))).unwrap();
        }
        drop(frame_tx);

        run_frame_loop(&mut follower, snapshot(), &frame_rx, &command_rx, &mut events_tx);

        assert_eq!(events_rx.try_iter().count(), 0);
        assert_eq!(follower.matcher().cursor(), 0);
    }

    #[test]
    fn shutdown_ends_the_loop() {
        let mut follower = NoteFollower::new(&SolfaConfig::default());
        let (_frame_tx, frame_rx) = crossbeam_channel::unbounded::<AudioFrame>();
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (mut events_tx, _events_rx) = crossbeam_channel::unbounded();

        command_tx.send(SessionCommand::Reset).unwrap();
        command_tx.send(SessionCommand::Shutdown).unwrap();
        run_frame_loop(&mut follower, snapshot(), &frame_rx, &command_rx, &mut events_tx);
    }

    #[test]
    fn capture_failure_is_reported_and_matcher_goes_idle() {
        let config = SolfaConfig::default();
        let mut follower = NoteFollower::new(&config);
        let snapshot = snapshot();
        let mut primed: Vec<SessionEvent> = Vec::new();
        follower.matcher_mut().process(Some(NoteName::La), Instant::now(), &snapshot, &mut primed);
        assert!(follower.matcher().validation().candidate().is_some());

        let (_command_tx, command_rx) = crossbeam_channel::unbounded();
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        run_worker(
            &config,
            &mut follower,
            snapshot,
            &command_rx,
            events_tx,
            |_frames: Sender<AudioFrame>, _: &CaptureConfig| -> anyhow::Result<(cpal::Stream, u32)> {
                Err(anyhow::anyhow!("No input device available"))
            },
        );

        let events: Vec<SessionEvent> = events_rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], SessionEvent::CaptureUnavailable(msg) if msg.contains("No input device")));
        assert_eq!(follower.matcher().state(), crate::matcher::MatchState::Idle);
        assert!(primed.is_empty());
    }
}
