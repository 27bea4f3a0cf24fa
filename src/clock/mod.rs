// Clock module
// Monotonic time base, future-event scheduling, and click output

pub mod audio;
pub mod click;
pub mod offline;
pub mod source;

pub use audio::AudioClock;
pub use click::{ClickBank, ClickType, ClickVoice};
pub use offline::OfflineClock;
pub use source::{ClockSource, EventHandle, ScheduledJob};
