// Session runner - public façade for a view layer
// Snapshots a training at start, records the run, and forwards controls to
// the phase machine. Dropping the runner tears every timer and the metronome
// down unconditionally so audio never survives navigation away.

use crate::clock::source::ClockSource;
use crate::error::{ClockError, SessionError};
use crate::session::event::{EventReceiver, create_session_event_channel};
use crate::session::phase::{Phase, PhaseMachine};
use crate::session::shared::SharedSessionState;
use crate::training::model::{Exercise, Training};
use crate::training::store::{TrainingStore, UsageRecorder};
use std::sync::Arc;
use uuid::Uuid;

pub struct SessionRunner {
    clock: Arc<dyn ClockSource>,
    machine: PhaseMachine,
}

impl SessionRunner {
    /// Creates a runner and the event stream a view can drain
    pub fn new(clock: Arc<dyn ClockSource>) -> (Self, EventReceiver) {
        let (tx, rx) = create_session_event_channel();
        let machine = PhaseMachine::new(Arc::clone(&clock), tx);
        (Self { clock, machine }, rx)
    }

    /// Forwards the first user gesture to the audio clock; until this
    /// succeeds the session runs with silent count-ins
    pub fn unlock_audio(&self) -> Result<(), ClockError> {
        self.clock.unlock()
    }

    /// Looks a training up, records the run, and starts the session
    pub fn start_session(
        &self,
        store: &dyn TrainingStore,
        recorder: &dyn UsageRecorder,
        training_id: &Uuid,
        autoplay: bool,
    ) -> Result<(), SessionError> {
        let training = store
            .training_by_id(training_id)
            .ok_or(SessionError::TrainingNotFound(*training_id))?;
        self.start_training(&training, autoplay)?;
        recorder.record_session_start(training_id);
        Ok(())
    }

    /// Starts a session over a snapshot of the training's exercises
    pub fn start_training(&self, training: &Training, autoplay: bool) -> Result<(), SessionError> {
        if training.exercises.is_empty() {
            return Err(SessionError::EmptyTraining);
        }
        tracing::info!(training = %training.title, autoplay, "starting session");
        self.machine.start(training.exercises.clone(), autoplay);
        Ok(())
    }

    pub fn toggle_play_pause(&self) {
        self.machine.toggle_play_pause();
    }

    pub fn pause(&self) {
        self.machine.pause();
    }

    pub fn resume(&self) {
        self.machine.resume();
    }

    pub fn previous(&self) {
        self.machine.previous();
    }

    pub fn next_or_finish(&self) {
        self.machine.next_or_finish();
    }

    pub fn finish(&self) {
        self.machine.finish();
    }

    /// Relayed by the view when embedded external media reports its end
    pub fn on_media_ended(&self) {
        self.machine.on_media_ended();
    }

    pub fn current_exercise(&self) -> Option<Exercise> {
        self.machine.current_exercise()
    }

    pub fn current_phase(&self) -> Phase {
        self.machine.phase()
    }

    pub fn remaining_display_seconds(&self) -> u32 {
        self.machine.remaining_display_seconds()
    }

    /// Minutes part of the countdown readout
    pub fn remaining_minutes(&self) -> u32 {
        self.remaining_display_seconds() / 60
    }

    /// Seconds part of the countdown readout
    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_display_seconds() % 60
    }

    pub fn progress_fraction(&self) -> f64 {
        self.machine.progress_fraction()
    }

    /// (1-based position, total) for the "3 / 7" header display
    pub fn exercise_position(&self) -> (usize, usize) {
        self.machine.exercise_position()
    }

    pub fn is_last_exercise(&self) -> bool {
        let (position, total) = self.exercise_position();
        total > 0 && position == total
    }

    pub fn next_hint(&self) -> bool {
        self.machine.next_hint()
    }

    pub fn is_paused(&self) -> bool {
        self.machine.is_paused()
    }

    pub fn is_metronome_audible(&self) -> bool {
        self.machine.metronome().is_running()
    }

    /// Lock-free state snapshot for a polling view
    pub fn shared_state(&self) -> Arc<SharedSessionState> {
        self.machine.shared()
    }
}

impl Drop for SessionRunner {
    fn drop(&mut self) {
        self.machine.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::offline::OfflineClock;
    use crate::training::model::BeatStyle;
    use crate::training::store::{InMemoryStore, SessionLog};

    fn runner() -> (Arc<OfflineClock>, SessionRunner, EventReceiver) {
        let clock = Arc::new(OfflineClock::new());
        clock.unlock().unwrap();
        let (runner, rx) = SessionRunner::new(clock.clone() as Arc<dyn ClockSource>);
        (clock, runner, rx)
    }

    fn training_with(exercises: Vec<Exercise>) -> Training {
        let mut training = Training::new("Session");
        training.exercises = exercises;
        training
    }

    #[test]
    fn test_start_session_records_usage() {
        let (_clock, runner, _rx) = runner();
        let store = InMemoryStore::new();
        let log = SessionLog::new();

        let mut ex = Exercise::new("A");
        ex.duration_seconds = 5;
        let training = training_with(vec![ex]);
        let id = training.id;
        store.insert(training);

        runner.start_session(&store, &log, &id, false).unwrap();
        assert_eq!(runner.current_phase(), Phase::Preparing);
        assert_eq!(log.records().len(), 1);
        assert_eq!(log.records()[0].training_id, id);
    }

    #[test]
    fn test_start_session_unknown_training() {
        let (_clock, runner, _rx) = runner();
        let store = InMemoryStore::new();
        let log = SessionLog::new();

        let id = Uuid::new_v4();
        let err = runner.start_session(&store, &log, &id, false).unwrap_err();
        assert!(matches!(err, SessionError::TrainingNotFound(bad) if bad == id));
        assert!(log.records().is_empty());
    }

    #[test]
    fn test_empty_training_refuses_to_start() {
        let (_clock, runner, _rx) = runner();
        let training = training_with(Vec::new());
        assert!(matches!(
            runner.start_training(&training, true),
            Err(SessionError::EmptyTraining)
        ));
        // Nothing recorded through the store path either
        let store = InMemoryStore::new();
        let log = SessionLog::new();
        let id = training.id;
        store.insert(training);
        assert!(runner.start_session(&store, &log, &id, true).is_err());
        assert!(log.records().is_empty());
    }

    #[test]
    fn test_display_helpers() {
        let (clock, runner, _rx) = runner();
        let mut ex = Exercise::new("Long one");
        ex.duration_minutes = 2;
        ex.duration_seconds = 10;
        runner
            .start_training(&training_with(vec![ex]), false)
            .unwrap();

        clock.advance(5.0);
        assert_eq!(runner.current_phase(), Phase::Active);
        assert_eq!(runner.remaining_display_seconds(), 130);
        assert_eq!(runner.remaining_minutes(), 2);
        assert_eq!(runner.remaining_seconds(), 10);
        assert!(runner.is_last_exercise());

        clock.advance(65.0);
        assert_eq!(runner.remaining_minutes(), 1);
        assert_eq!(runner.remaining_seconds(), 5);
        assert!((runner.progress_fraction() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_drop_stops_audio() {
        let clock = Arc::new(OfflineClock::new());
        clock.unlock().unwrap();
        let (runner, _rx) = SessionRunner::new(clock.clone() as Arc<dyn ClockSource>);

        let mut ex = Exercise::new("Groove");
        ex.duration_minutes = 5;
        ex.bpm = 120;
        ex.beat_style = BeatStyle::FourBeat;
        runner
            .start_training(&training_with(vec![ex]), false)
            .unwrap();

        clock.advance(6.0);
        assert!(runner.is_metronome_audible());
        let clicks = clock.click_count();

        drop(runner);
        clock.advance(30.0);
        assert_eq!(clock.click_count(), clicks);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn test_finish_from_any_phase() {
        let (clock, runner, rx) = runner();
        let mut ex = Exercise::new("A");
        ex.duration_seconds = 30;
        ex.bpm = 90;
        runner
            .start_training(&training_with(vec![ex]), false)
            .unwrap();

        clock.advance(6.0);
        assert_eq!(runner.current_phase(), Phase::Active);
        runner.finish();
        assert_eq!(runner.current_phase(), Phase::Finished);
        assert!(!runner.is_metronome_audible());
        assert!(rx.try_iter().any(|e| e == crate::session::event::SessionEvent::Finished));
    }
}
