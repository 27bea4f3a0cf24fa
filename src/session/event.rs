// Session notifications - core → view communication
// The bus is multi-producer (metronome scheduler and phase machine both emit),
// so it uses a std mpsc channel; the lock-free ring buffer stays on the
// audio-callback path where single-producer holds.

use crate::session::phase::Phase;
use std::sync::mpsc::{self, Receiver, Sender};

/// Observable session state changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A metronome beat fired at its scheduled audio time
    Beat {
        /// 1-based position within the measure
        beat_in_measure: u8,
        /// Beats fired since the current metronome run started
        total_beats: u64,
        accent: bool,
    },
    PhaseChanged {
        phase: Phase,
        exercise_index: usize,
    },
    /// The visible exercise changed (advance, rest count-in start, previous)
    ExerciseChanged {
        index: usize,
    },
    /// Exercise complete, waiting for a manual advance
    NextHint,
    PauseChanged {
        paused: bool,
    },
    Finished,
}

pub type EventSender = Sender<SessionEvent>;
pub type EventReceiver = Receiver<SessionEvent>;

pub fn create_session_event_channel() -> (EventSender, EventReceiver) {
    mpsc::channel()
}
