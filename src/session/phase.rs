// Phase state machine
// Drives a session through Preparing → Active → (Resting | Preparing) → …
// → Finished. The machine is the sole mutator of session state and the sole
// caller of metronome controls; timer callbacks re-enter it through Weak
// references so a dropped session cannot be ticked.

use crate::clock::source::{ClockSource, EventHandle};
use crate::session::event::{EventSender, SessionEvent};
use crate::session::metronome::MetronomeEngine;
use crate::session::shared::SharedSessionState;
use crate::session::timer::SessionTimer;
use crate::training::media::MediaKind;
use crate::training::model::Exercise;
use std::sync::{Arc, Mutex, Weak};

/// Lead-in before the first exercise of a session
pub const SESSION_PREP_SECONDS: u32 = 5;
/// Lead-in after a manual previous/next
pub const MANUAL_PREP_SECONDS: u32 = 3;
/// Rest phases never run shorter than this
pub const MIN_REST_SECONDS: u32 = 5;
/// Compensates the metronome's scheduling lead so a deferred stop lands just
/// after the last scheduled beat of the measure, before the next downbeat
/// enters the lookahead window
pub const LOOKAHEAD_GUARD: f64 = 0.11;

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Preparing,
    Active,
    Resting,
    Finished,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Finished)
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Phase::Preparing => 0,
            Phase::Active => 1,
            Phase::Resting => 2,
            Phase::Finished => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Preparing,
            1 => Phase::Active,
            2 => Phase::Resting,
            _ => Phase::Finished,
        }
    }
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Finished
    }
}

#[derive(Default)]
struct PhaseState {
    exercises: Vec<Exercise>,
    index: usize,
    phase: Phase,
    autoplay: bool,
    paused: bool,
    next_hint: bool,
    /// True once the rest countdown has swapped to the next exercise and
    /// started its count-in
    rest_prep_started: bool,
    /// Deferred measure-boundary completion, if one is in flight
    pending_transition: Option<EventHandle>,
    /// Bumped on every navigation; stale deferred callbacks compare and drop
    generation: u64,
}

struct PhaseCore {
    clock: Arc<dyn ClockSource>,
    metronome: MetronomeEngine,
    active_timer: SessionTimer,
    phase_timer: SessionTimer,
    shared: Arc<SharedSessionState>,
    events: EventSender,
    state: Mutex<PhaseState>,
}

enum Advance {
    Finish,
    Hint,
    Prep,
    Rest(u32),
}

/// Orchestrates phase transitions for one session
pub struct PhaseMachine {
    core: Arc<PhaseCore>,
}

impl PhaseMachine {
    pub fn new(clock: Arc<dyn ClockSource>, events: EventSender) -> Self {
        let shared = SharedSessionState::new();
        let metronome =
            MetronomeEngine::new(Arc::clone(&clock), events.clone(), Arc::clone(&shared));
        let active_timer = SessionTimer::new(Arc::clone(&clock));
        let phase_timer = SessionTimer::new(Arc::clone(&clock));
        Self {
            core: Arc::new(PhaseCore {
                clock,
                metronome,
                active_timer,
                phase_timer,
                shared,
                events,
                state: Mutex::new(PhaseState::default()),
            }),
        }
    }

    /// Begins a session over a snapshot of exercises
    pub fn start(&self, exercises: Vec<Exercise>, autoplay: bool) {
        let core = &self.core;
        let empty = {
            let Ok(mut st) = core.state.lock() else {
                return;
            };
            st.generation += 1;
            if let Some(handle) = st.pending_transition.take() {
                core.clock.cancel(handle);
            }
            st.index = 0;
            st.autoplay = autoplay;
            st.paused = false;
            st.next_hint = false;
            st.rest_prep_started = false;
            // A fresh session clears the terminal latch of any prior run
            st.phase = Phase::Preparing;
            core.shared.set_phase(Phase::Preparing);
            core.shared.set_exercise_count(exercises.len() as u32);
            core.shared.set_next_hint(false);
            st.exercises = exercises;
            st.exercises.is_empty()
        };
        if empty {
            PhaseCore::enter_finished(core);
        } else {
            PhaseCore::enter_preparing(core, SESSION_PREP_SECONDS);
        }
    }

    /// Moves to the prior exercise (clamped at the first) and re-enters
    /// Preparing with the short lead-in
    pub fn previous(&self) {
        let core = &self.core;
        {
            let Ok(mut st) = core.state.lock() else {
                return;
            };
            if st.phase.is_terminal() || st.exercises.is_empty() {
                return;
            }
            st.generation += 1;
            if let Some(handle) = st.pending_transition.take() {
                core.clock.cancel(handle);
            }
            st.index = st.index.saturating_sub(1);
            core.shared.set_exercise_index(st.index as u32);
            let _ = core.events.send(SessionEvent::ExerciseChanged { index: st.index });
        }
        PhaseCore::enter_preparing(core, MANUAL_PREP_SECONDS);
    }

    /// Finishes the session if the current exercise is the last one,
    /// otherwise advances immediately the way an autoplay advance would
    /// (break and count-in of the exercise being left are honored)
    pub fn next_or_finish(&self) {
        let core = &self.core;
        let action = {
            let Ok(mut st) = core.state.lock() else {
                return;
            };
            if st.phase.is_terminal() || st.exercises.is_empty() {
                return;
            }
            st.generation += 1;
            if let Some(handle) = st.pending_transition.take() {
                core.clock.cancel(handle);
            }
            st.next_hint = false;
            core.shared.set_next_hint(false);

            if st.phase == Phase::Resting {
                // Skip the rest; the index may already have advanced with
                // the count-in
                if !st.rest_prep_started {
                    st.index += 1;
                    core.shared.set_exercise_index(st.index as u32);
                    let _ = core.events.send(SessionEvent::ExerciseChanged { index: st.index });
                }
                Advance::Prep
            } else if st.index + 1 >= st.exercises.len() {
                Advance::Finish
            } else {
                let break_seconds = st.exercises[st.index].break_seconds;
                if break_seconds == 0 {
                    st.index += 1;
                    core.shared.set_exercise_index(st.index as u32);
                    let _ = core.events.send(SessionEvent::ExerciseChanged { index: st.index });
                    Advance::Prep
                } else {
                    Advance::Rest(break_seconds.max(MIN_REST_SECONDS))
                }
            }
        };
        PhaseCore::apply_advance(core, action);
    }

    /// Pauses or resumes the Active phase; a no-op in other phases and while
    /// the current exercise's media is external (the embed drives playback)
    pub fn toggle_play_pause(&self) {
        enum Op {
            Pause,
            Resume { bpm: u32, beats: u8 },
        }
        let core = &self.core;
        let op = {
            let Ok(mut st) = core.state.lock() else {
                return;
            };
            if st.phase != Phase::Active {
                return;
            }
            let Some(ex) = st.exercises.get(st.index) else {
                return;
            };
            if ex.media_kind() == MediaKind::External {
                return;
            }
            if st.paused {
                let bpm = ex.bpm;
                let beats = ex.beats_per_measure();
                st.paused = false;
                Op::Resume { bpm, beats }
            } else {
                st.paused = true;
                Op::Pause
            }
        };
        match op {
            Op::Pause => {
                core.active_timer.pause();
                core.metronome.stop();
                let _ = core.events.send(SessionEvent::PauseChanged { paused: true });
                tracing::debug!("session paused");
            }
            Op::Resume { bpm, beats } => {
                core.active_timer.resume();
                if bpm > 0 {
                    core.metronome.start(bpm, beats);
                }
                let _ = core.events.send(SessionEvent::PauseChanged { paused: false });
                tracing::debug!("session resumed");
            }
        }
    }

    pub fn pause(&self) {
        if !self.is_paused() {
            self.toggle_play_pause();
        }
    }

    pub fn resume(&self) {
        if self.is_paused() {
            self.toggle_play_pause();
        }
    }

    /// External media finished; ends the Active phase the same way the
    /// countdown would
    pub fn on_media_ended(&self) {
        let active = {
            let Ok(st) = self.core.state.lock() else {
                return;
            };
            st.phase == Phase::Active
        };
        if active {
            PhaseCore::active_elapsed(&self.core);
        }
    }

    /// Ends the session from any phase
    pub fn finish(&self) {
        PhaseCore::enter_finished(&self.core);
    }

    /// Unconditional resource teardown; stops the metronome and both timers
    /// without emitting a Finished event
    pub fn shutdown(&self) {
        let core = &self.core;
        core.metronome.stop();
        core.active_timer.stop();
        core.phase_timer.stop();
        let Ok(mut st) = core.state.lock() else {
            return;
        };
        st.generation += 1;
        if let Some(handle) = st.pending_transition.take() {
            core.clock.cancel(handle);
        }
        st.phase = Phase::Finished;
        core.shared.set_phase(Phase::Finished);
    }

    pub fn phase(&self) -> Phase {
        self.core.state.lock().map(|st| st.phase).unwrap_or_default()
    }

    pub fn current_exercise(&self) -> Option<Exercise> {
        let st = self.core.state.lock().ok()?;
        st.exercises.get(st.index).cloned()
    }

    /// (1-based position, total); (0, 0) before the first session
    pub fn exercise_position(&self) -> (usize, usize) {
        let Ok(st) = self.core.state.lock() else {
            return (0, 0);
        };
        if st.exercises.is_empty() {
            (0, 0)
        } else {
            (st.index + 1, st.exercises.len())
        }
    }

    pub fn autoplay(&self) -> bool {
        self.core.state.lock().map(|st| st.autoplay).unwrap_or(false)
    }

    pub fn next_hint(&self) -> bool {
        self.core.state.lock().map(|st| st.next_hint).unwrap_or(false)
    }

    pub fn is_paused(&self) -> bool {
        self.core.state.lock().map(|st| st.paused).unwrap_or(false)
    }

    /// Countdown value for the view: active seconds while Active, phase
    /// seconds while Preparing/Resting, 0 when Finished
    pub fn remaining_display_seconds(&self) -> u32 {
        match self.phase() {
            Phase::Active => self.core.active_timer.remaining(),
            Phase::Preparing | Phase::Resting => self.core.phase_timer.remaining(),
            Phase::Finished => 0,
        }
    }

    /// Fraction of the session completed, in [0, 1]
    pub fn progress_fraction(&self) -> f64 {
        let core = &self.core;
        let Ok(st) = core.state.lock() else {
            return 0.0;
        };
        let count = st.exercises.len();
        if count == 0 || st.phase.is_terminal() {
            return 1.0;
        }
        let mut done = st.index as f64;
        if st.phase == Phase::Active {
            if let Some(ex) = st.exercises.get(st.index) {
                let total = ex.active_seconds();
                if total > 0 {
                    let remaining = core.active_timer.remaining();
                    done += total.saturating_sub(remaining) as f64 / total as f64;
                }
            }
        }
        (done / count as f64).clamp(0.0, 1.0)
    }

    pub fn metronome(&self) -> &MetronomeEngine {
        &self.core.metronome
    }

    pub fn shared(&self) -> Arc<SharedSessionState> {
        Arc::clone(&self.core.shared)
    }
}

impl PhaseCore {
    fn weak_pair(core: &Arc<PhaseCore>) -> (Weak<PhaseCore>, Weak<PhaseCore>) {
        (Arc::downgrade(core), Arc::downgrade(core))
    }

    /// Enters Preparing for the current exercise: a fixed lead-in buffer
    /// plus, when the exercise has a tempo and count-in measures, enough
    /// whole seconds for the count-in to land beat 1 on phase end
    fn enter_preparing(core: &Arc<PhaseCore>, buffer_seconds: u32) {
        core.metronome.stop();
        core.active_timer.stop();
        let total = {
            let Ok(mut st) = core.state.lock() else {
                return;
            };
            let Some(ex) = st.exercises.get(st.index) else {
                return;
            };
            let total = buffer_seconds + ex.count_in_seconds();
            st.phase = Phase::Preparing;
            st.paused = false;
            st.next_hint = false;
            st.rest_prep_started = false;
            if let Some(handle) = st.pending_transition.take() {
                core.clock.cancel(handle);
            }
            core.shared.set_phase(Phase::Preparing);
            core.shared.set_exercise_index(st.index as u32);
            core.shared.set_next_hint(false);
            core.shared.set_remaining_phase(total);
            let _ = core.events.send(SessionEvent::PhaseChanged {
                phase: Phase::Preparing,
                exercise_index: st.index,
            });
            tracing::debug!(index = st.index, total, "entering preparing");
            total
        };

        let (weak_tick, weak_done) = Self::weak_pair(core);
        core.phase_timer.start(
            total,
            move |remaining| {
                if let Some(core) = weak_tick.upgrade() {
                    PhaseCore::preparing_tick(&core, remaining);
                }
            },
            move || {
                if let Some(core) = weak_done.upgrade() {
                    PhaseCore::begin_active(&core);
                }
            },
        );
    }

    fn preparing_tick(core: &Arc<PhaseCore>, remaining: u32) {
        core.shared.set_remaining_phase(remaining);
        let Ok(st) = core.state.lock() else {
            return;
        };
        if st.phase != Phase::Preparing {
            return;
        }
        let Some(ex) = st.exercises.get(st.index) else {
            return;
        };
        let count_in = ex.count_in_seconds();
        if count_in > 0 && remaining == count_in && !core.metronome.is_running() {
            core.metronome
                .start_aligned(ex.bpm, ex.beats_per_measure(), ex.prep_measures, remaining as f64);
        }
    }

    /// Enters Active for the current exercise; timed exercises arm the
    /// session timer, media-driven ones wait for an external end signal
    fn begin_active(core: &Arc<PhaseCore>) {
        let timed_seconds = {
            let Ok(mut st) = core.state.lock() else {
                return;
            };
            if st.phase.is_terminal() {
                return;
            }
            let Some(ex) = st.exercises.get(st.index).cloned() else {
                return;
            };
            st.phase = Phase::Active;
            st.paused = false;
            st.rest_prep_started = false;
            core.shared.set_phase(Phase::Active);
            core.shared.set_remaining_phase(0);
            let _ = core.events.send(SessionEvent::PhaseChanged {
                phase: Phase::Active,
                exercise_index: st.index,
            });
            tracing::debug!(index = st.index, title = %ex.title, "exercise active");

            // Keep a matching metronome run from the count-in; restart only
            // when the tempo actually changed
            if ex.bpm > 0 {
                if core.metronome.is_running() {
                    if core.metronome.current_bpm() != ex.bpm {
                        core.metronome.stop();
                        core.metronome.start(ex.bpm, ex.beats_per_measure());
                    }
                } else {
                    core.metronome.start(ex.bpm, ex.beats_per_measure());
                }
            } else {
                core.metronome.stop();
            }

            let timed = if ex.is_untimed() {
                None
            } else {
                Some(ex.active_seconds())
            };
            core.shared.set_remaining_active(timed.unwrap_or(0));
            timed
        };

        match timed_seconds {
            Some(seconds) => {
                let (weak_tick, weak_done) = Self::weak_pair(core);
                core.active_timer.start(
                    seconds,
                    move |remaining| {
                        if let Some(core) = weak_tick.upgrade() {
                            core.shared.set_remaining_active(remaining);
                        }
                    },
                    move || {
                        if let Some(core) = weak_done.upgrade() {
                            PhaseCore::active_elapsed(&core);
                        }
                    },
                );
            }
            None => core.active_timer.stop(),
        }
    }

    /// The active countdown (or media end signal) elapsed. The phase change
    /// is deferred until the metronome reaches a measure boundary; the delay
    /// is always read fresh from the live engine since bpm or meter may
    /// have changed.
    fn active_elapsed(core: &Arc<PhaseCore>) {
        let delay = if core.metronome.is_running() {
            (core.metronome.seconds_until_measure_end() - LOOKAHEAD_GUARD).max(0.0)
        } else {
            0.0
        };

        if delay <= 1e-6 {
            Self::complete_exercise(core);
            return;
        }

        let Ok(mut st) = core.state.lock() else {
            return;
        };
        if st.phase != Phase::Active {
            return;
        }
        let generation = st.generation;
        let weak = Arc::downgrade(core);
        let at = core.clock.now() + delay;
        st.pending_transition = Some(core.clock.schedule_at(
            at,
            Box::new(move || {
                let Some(core) = weak.upgrade() else {
                    return;
                };
                {
                    let Ok(mut st) = core.state.lock() else {
                        return;
                    };
                    if st.generation != generation {
                        return;
                    }
                    st.pending_transition = None;
                }
                PhaseCore::complete_exercise(&core);
            }),
        ));
        tracing::debug!(delay, "deferring completion to measure boundary");
    }

    fn complete_exercise(core: &Arc<PhaseCore>) {
        let action = {
            let Ok(mut st) = core.state.lock() else {
                return;
            };
            if st.phase != Phase::Active {
                return;
            }
            core.metronome.stop();
            core.active_timer.stop();

            if st.index + 1 >= st.exercises.len() {
                Advance::Finish
            } else if !st.autoplay {
                st.next_hint = true;
                core.shared.set_next_hint(true);
                let _ = core.events.send(SessionEvent::NextHint);
                Advance::Hint
            } else {
                let break_seconds = st.exercises[st.index].break_seconds;
                if break_seconds == 0 {
                    st.index += 1;
                    core.shared.set_exercise_index(st.index as u32);
                    let _ = core.events.send(SessionEvent::ExerciseChanged { index: st.index });
                    Advance::Prep
                } else {
                    Advance::Rest(break_seconds.max(MIN_REST_SECONDS))
                }
            }
        };
        PhaseCore::apply_advance(core, action);
    }

    fn apply_advance(core: &Arc<PhaseCore>, action: Advance) {
        match action {
            Advance::Finish => Self::enter_finished(core),
            Advance::Hint => {}
            Advance::Prep => Self::enter_preparing(core, MANUAL_PREP_SECONDS),
            Advance::Rest(seconds) => {
                core.metronome.stop();
                core.active_timer.stop();
                Self::enter_resting(core, seconds);
            }
        }
    }

    /// Enters Resting before the next exercise. The rest splits into a
    /// silent sub-phase and, once remaining time matches the next exercise's
    /// count-in, a prep sub-phase that swaps the visible exercise and starts
    /// the aligned count-in.
    fn enter_resting(core: &Arc<PhaseCore>, rest_seconds: u32) {
        let count_in_covers_rest = {
            let Ok(mut st) = core.state.lock() else {
                return;
            };
            st.phase = Phase::Resting;
            st.rest_prep_started = false;
            core.shared.set_phase(Phase::Resting);
            core.shared.set_remaining_phase(rest_seconds);
            let _ = core.events.send(SessionEvent::PhaseChanged {
                phase: Phase::Resting,
                exercise_index: st.index,
            });
            tracing::debug!(rest_seconds, "entering rest");
            let next_count_in = st
                .exercises
                .get(st.index + 1)
                .map(|e| e.count_in_seconds())
                .unwrap_or(0);
            next_count_in > 0 && next_count_in >= rest_seconds
        };

        // A count-in at least as long as the rest starts right away, clamped
        if count_in_covers_rest {
            Self::begin_rest_prep(core, rest_seconds);
        }

        let (weak_tick, weak_done) = Self::weak_pair(core);
        core.phase_timer.start(
            rest_seconds,
            move |remaining| {
                if let Some(core) = weak_tick.upgrade() {
                    PhaseCore::resting_tick(&core, remaining);
                }
            },
            move || {
                if let Some(core) = weak_done.upgrade() {
                    PhaseCore::rest_complete(&core);
                }
            },
        );
    }

    fn resting_tick(core: &Arc<PhaseCore>, remaining: u32) {
        core.shared.set_remaining_phase(remaining);
        let should_start = {
            let Ok(st) = core.state.lock() else {
                return;
            };
            if st.phase != Phase::Resting || st.rest_prep_started {
                return;
            }
            let Some(next) = st.exercises.get(st.index + 1) else {
                return;
            };
            let count_in = next.count_in_seconds();
            count_in > 0 && remaining == count_in
        };
        if should_start {
            Self::begin_rest_prep(core, remaining);
        }
    }

    /// Swaps the visible exercise to the upcoming one and starts its aligned
    /// count-in so beat 1 lands when the rest countdown reaches 0
    fn begin_rest_prep(core: &Arc<PhaseCore>, remaining: u32) {
        let Ok(mut st) = core.state.lock() else {
            return;
        };
        if st.phase != Phase::Resting || st.rest_prep_started {
            return;
        }
        if st.index + 1 >= st.exercises.len() {
            return;
        }
        st.rest_prep_started = true;
        st.index += 1;
        core.shared.set_exercise_index(st.index as u32);
        let _ = core.events.send(SessionEvent::ExerciseChanged { index: st.index });
        let ex = &st.exercises[st.index];
        core.metronome
            .start_aligned(ex.bpm, ex.beats_per_measure(), ex.prep_measures, remaining as f64);
        tracing::debug!(index = st.index, "rest count-in started");
    }

    fn rest_complete(core: &Arc<PhaseCore>) {
        {
            let Ok(mut st) = core.state.lock() else {
                return;
            };
            if st.phase != Phase::Resting {
                return;
            }
            // No count-in happened; the exercise swap is still due
            if !st.rest_prep_started && st.index + 1 < st.exercises.len() {
                st.index += 1;
                core.shared.set_exercise_index(st.index as u32);
                let _ = core.events.send(SessionEvent::ExerciseChanged { index: st.index });
            }
        }
        Self::begin_active(core);
    }

    fn enter_finished(core: &Arc<PhaseCore>) {
        core.metronome.stop();
        core.active_timer.stop();
        core.phase_timer.stop();
        let Ok(mut st) = core.state.lock() else {
            return;
        };
        if st.phase.is_terminal() {
            return;
        }
        st.phase = Phase::Finished;
        st.generation += 1;
        st.next_hint = false;
        if let Some(handle) = st.pending_transition.take() {
            core.clock.cancel(handle);
        }
        core.shared.set_phase(Phase::Finished);
        core.shared.set_next_hint(false);
        core.shared.set_remaining_active(0);
        core.shared.set_remaining_phase(0);
        let _ = core.events.send(SessionEvent::Finished);
        tracing::info!("session finished");
    }
}
