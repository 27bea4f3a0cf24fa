// Session module
// Metronome engine, timers, phase state machine, and the runner façade

pub mod event;
pub mod metronome;
pub mod phase;
pub mod runner;
pub mod shared;
pub mod timer;

pub use event::{EventReceiver, EventSender, SessionEvent, create_session_event_channel};
pub use metronome::MetronomeEngine;
pub use phase::{Phase, PhaseMachine};
pub use runner::SessionRunner;
pub use shared::SharedSessionState;
pub use timer::SessionTimer;
