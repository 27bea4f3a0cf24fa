// Shared session state
// Thread-safe via atomics so a view layer can poll without locking

use crate::session::phase::Phase;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

/// Lock-free snapshot of the running session
/// Written by the phase machine and the metronome scheduler, read by the view.
#[derive(Debug)]
pub struct SharedSessionState {
    phase: AtomicU8,
    exercise_index: AtomicU32,
    exercise_count: AtomicU32,
    remaining_active: AtomicU32,
    remaining_phase: AtomicU32,
    beat_in_measure: AtomicU8,
    beats_fired: AtomicU64,
    metronome_running: AtomicBool,
    metronome_bpm: AtomicU32,
    next_hint: AtomicBool,
}

impl SharedSessionState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            phase: AtomicU8::new(Phase::Finished.as_u8()),
            exercise_index: AtomicU32::new(0),
            exercise_count: AtomicU32::new(0),
            remaining_active: AtomicU32::new(0),
            remaining_phase: AtomicU32::new(0),
            beat_in_measure: AtomicU8::new(1),
            beats_fired: AtomicU64::new(0),
            metronome_running: AtomicBool::new(false),
            metronome_bpm: AtomicU32::new(0),
            next_hint: AtomicBool::new(false),
        })
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase.as_u8(), Ordering::Relaxed);
    }

    pub fn exercise_index(&self) -> u32 {
        self.exercise_index.load(Ordering::Relaxed)
    }

    pub fn set_exercise_index(&self, index: u32) {
        self.exercise_index.store(index, Ordering::Relaxed);
    }

    pub fn exercise_count(&self) -> u32 {
        self.exercise_count.load(Ordering::Relaxed)
    }

    pub fn set_exercise_count(&self, count: u32) {
        self.exercise_count.store(count, Ordering::Relaxed);
    }

    pub fn remaining_active_seconds(&self) -> u32 {
        self.remaining_active.load(Ordering::Relaxed)
    }

    pub fn set_remaining_active(&self, seconds: u32) {
        self.remaining_active.store(seconds, Ordering::Relaxed);
    }

    pub fn remaining_phase_seconds(&self) -> u32 {
        self.remaining_phase.load(Ordering::Relaxed)
    }

    pub fn set_remaining_phase(&self, seconds: u32) {
        self.remaining_phase.store(seconds, Ordering::Relaxed);
    }

    /// 1-based beat position for the visual flash
    pub fn beat_in_measure(&self) -> u8 {
        self.beat_in_measure.load(Ordering::Relaxed)
    }

    pub fn beats_fired(&self) -> u64 {
        self.beats_fired.load(Ordering::Relaxed)
    }

    pub fn set_beat(&self, beat_in_measure: u8, total_beats: u64) {
        self.beat_in_measure.store(beat_in_measure, Ordering::Relaxed);
        self.beats_fired.store(total_beats, Ordering::Relaxed);
    }

    pub fn reset_beat(&self) {
        self.beat_in_measure.store(1, Ordering::Relaxed);
        self.beats_fired.store(0, Ordering::Relaxed);
    }

    pub fn is_metronome_running(&self) -> bool {
        self.metronome_running.load(Ordering::Relaxed)
    }

    pub fn metronome_bpm(&self) -> u32 {
        self.metronome_bpm.load(Ordering::Relaxed)
    }

    pub fn set_metronome(&self, running: bool, bpm: u32) {
        self.metronome_running.store(running, Ordering::Relaxed);
        self.metronome_bpm.store(bpm, Ordering::Relaxed);
    }

    pub fn set_metronome_bpm(&self, bpm: u32) {
        self.metronome_bpm.store(bpm, Ordering::Relaxed);
    }

    pub fn next_hint(&self) -> bool {
        self.next_hint.load(Ordering::Relaxed)
    }

    pub fn set_next_hint(&self, on: bool) {
        self.next_hint.store(on, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = SharedSessionState::new();
        assert_eq!(state.phase(), Phase::Finished);
        assert_eq!(state.beat_in_measure(), 1);
        assert_eq!(state.beats_fired(), 0);
        assert!(!state.is_metronome_running());
    }

    #[test]
    fn test_phase_round_trip() {
        let state = SharedSessionState::new();
        for phase in [
            Phase::Preparing,
            Phase::Active,
            Phase::Resting,
            Phase::Finished,
        ] {
            state.set_phase(phase);
            assert_eq!(state.phase(), phase);
        }
    }

    #[test]
    fn test_beat_updates() {
        let state = SharedSessionState::new();
        state.set_beat(3, 11);
        assert_eq!(state.beat_in_measure(), 3);
        assert_eq!(state.beats_fired(), 11);

        state.reset_beat();
        assert_eq!(state.beat_in_measure(), 1);
        assert_eq!(state.beats_fired(), 0);
    }
}
