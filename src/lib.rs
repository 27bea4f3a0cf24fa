// MyMusic Trainer - Training session runner and metronome engine
// Drives guided practice sessions: exercise sequencing, prep/rest phase
// transitions, and drift-free metronome scheduling on an audio clock.

pub mod clock;
pub mod error;
pub mod session;
pub mod training;

// Re-export commonly used types for convenience
pub use clock::{AudioClock, ClickType, ClockSource, EventHandle, OfflineClock};
pub use error::{ClockError, SessionError, StoreError};
pub use session::{
    MetronomeEngine, Phase, PhaseMachine, SessionEvent, SessionRunner, SessionTimer,
    SharedSessionState, create_session_event_channel,
};
pub use training::{
    BeatStyle, Exercise, InMemoryStore, JsonFileStore, MediaKind, NullRecorder, SessionLog,
    Training, TrainingStore, UsageRecorder, classify_media,
};
