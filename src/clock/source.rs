// Clock source contract
// A monotonic, audio-capable time base: current time in seconds plus the
// ability to run a callback at a future time with sub-10ms resolution.
// Scheduling always works; audible output exists only after unlock() succeeds.

use crate::clock::click::ClickType;
use crate::error::ClockError;

/// A callback scheduled for a future time
pub type ScheduledJob = Box<dyn FnOnce() + Send>;

/// Opaque handle to a scheduled callback, used for cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(pub(crate) u64);

/// Monotonic clock with future-event scheduling and click output
pub trait ClockSource: Send + Sync {
    /// Seconds since the clock was created; never decreases, independent of
    /// wall-clock adjustments
    fn now(&self) -> f64;

    /// Runs `job` at clock time `time` (immediately if `time` is in the past)
    fn schedule_at(&self, time: f64, job: ScheduledJob) -> EventHandle;

    /// Cancels a scheduled callback; no-op if it already ran
    fn cancel(&self, handle: EventHandle);

    /// Creates or resumes the audio output. Call on first user interaction;
    /// until it succeeds the clock schedules silently.
    fn unlock(&self) -> Result<(), ClockError>;

    fn is_unlocked(&self) -> bool;

    /// Plays a click now; silent while locked
    fn play_click(&self, click: ClickType);
}
