// Session timer - 1Hz countdown
// Advisory only: it drives countdown display and initiates end-of-exercise
// evaluation, but never silences the metronome itself (a 1-second timer
// firing asynchronously relative to the audio clock could cut a beat
// mid-measure). Stale ticks are discarded by generation comparison.

use crate::clock::source::{ClockSource, EventHandle};
use std::sync::{Arc, Mutex, Weak};

type TickFn = Arc<dyn Fn(u32) + Send + Sync>;
type CompleteFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct TimerState {
    remaining: u32,
    running: bool,
    paused: bool,
    generation: u64,
    handle: Option<EventHandle>,
    on_tick: Option<TickFn>,
    on_complete: Option<CompleteFn>,
}

struct TimerCore {
    clock: Arc<dyn ClockSource>,
    state: Mutex<TimerState>,
}

/// One-tick-per-second countdown with pause/resume
pub struct SessionTimer {
    core: Arc<TimerCore>,
}

impl SessionTimer {
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            core: Arc::new(TimerCore {
                clock,
                state: Mutex::new(TimerState::default()),
            }),
        }
    }

    /// Starts (or restarts) the countdown, replacing any running timer.
    /// `on_tick` fires once per elapsed second with the new remaining value;
    /// `on_complete` fires after the tick that reaches 0.
    pub fn start(
        &self,
        seconds: u32,
        on_tick: impl Fn(u32) + Send + Sync + 'static,
        on_complete: impl Fn() + Send + Sync + 'static,
    ) {
        let core = &self.core;
        let Ok(mut st) = core.state.lock() else {
            return;
        };
        st.generation += 1;
        if let Some(handle) = st.handle.take() {
            core.clock.cancel(handle);
        }
        st.remaining = seconds;
        st.running = true;
        st.paused = false;
        st.on_tick = Some(Arc::new(on_tick));
        st.on_complete = Some(Arc::new(on_complete));

        let now = core.clock.now();
        let first = if seconds == 0 { now } else { now + 1.0 };
        st.handle = Some(Self::schedule_fire(core, first, st.generation));
    }

    /// Pauses the countdown, preserving the remaining value
    pub fn pause(&self) {
        let Ok(mut st) = self.core.state.lock() else {
            return;
        };
        if !st.running {
            return;
        }
        st.running = false;
        st.paused = true;
        st.generation += 1;
        if let Some(handle) = st.handle.take() {
            self.core.clock.cancel(handle);
        }
    }

    /// Resumes a paused countdown
    pub fn resume(&self) {
        let core = &self.core;
        let Ok(mut st) = core.state.lock() else {
            return;
        };
        if !st.paused {
            return;
        }
        st.paused = false;
        st.running = true;
        st.generation += 1;
        let next = core.clock.now() + 1.0;
        st.handle = Some(Self::schedule_fire(core, next, st.generation));
    }

    pub fn stop(&self) {
        let Ok(mut st) = self.core.state.lock() else {
            return;
        };
        st.running = false;
        st.paused = false;
        st.remaining = 0;
        st.generation += 1;
        if let Some(handle) = st.handle.take() {
            self.core.clock.cancel(handle);
        }
        st.on_tick = None;
        st.on_complete = None;
    }

    pub fn remaining(&self) -> u32 {
        self.core.state.lock().map(|st| st.remaining).unwrap_or(0)
    }

    pub fn is_running(&self) -> bool {
        self.core.state.lock().map(|st| st.running).unwrap_or(false)
    }

    pub fn is_paused(&self) -> bool {
        self.core.state.lock().map(|st| st.paused).unwrap_or(false)
    }

    fn schedule_fire(core: &Arc<TimerCore>, at: f64, generation: u64) -> EventHandle {
        let weak: Weak<TimerCore> = Arc::downgrade(core);
        core.clock.schedule_at(
            at,
            Box::new(move || {
                if let Some(core) = weak.upgrade() {
                    TimerCore::fire(&core, generation);
                }
            }),
        )
    }
}

impl TimerCore {
    fn fire(core: &Arc<TimerCore>, generation: u64) {
        let (on_tick, on_complete, remaining) = {
            let Ok(mut st) = core.state.lock() else {
                return;
            };
            if st.generation != generation || !st.running {
                return;
            }
            st.remaining = st.remaining.saturating_sub(1);
            let remaining = st.remaining;
            let on_tick = st.on_tick.clone();
            if remaining == 0 {
                st.running = false;
                st.handle = None;
                (on_tick, st.on_complete.clone(), remaining)
            } else {
                let next = core.clock.now() + 1.0;
                st.handle = Some(SessionTimer::schedule_fire(core, next, generation));
                (on_tick, None, remaining)
            }
        };

        // Callbacks run without any lock held
        if let Some(cb) = on_tick {
            cb(remaining);
        }
        if let Some(cb) = on_complete {
            cb();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::offline::OfflineClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn timer() -> (Arc<OfflineClock>, SessionTimer) {
        let clock = Arc::new(OfflineClock::new());
        let timer = SessionTimer::new(clock.clone() as Arc<dyn ClockSource>);
        (clock, timer)
    }

    #[test]
    fn test_countdown_has_no_skipped_or_duplicated_seconds() {
        let (clock, timer) = timer();
        let ticks: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let completions = Arc::new(AtomicUsize::new(0));

        let ticks2 = Arc::clone(&ticks);
        let completions2 = Arc::clone(&completions);
        timer.start(
            90,
            move |remaining| ticks2.lock().unwrap().push(remaining),
            move || {
                completions2.fetch_add(1, Ordering::Relaxed);
            },
        );
        assert_eq!(timer.remaining(), 90);

        clock.advance(90.0);
        let ticks = ticks.lock().unwrap();
        assert_eq!(ticks.len(), 90);
        assert_eq!(ticks.first(), Some(&89));
        assert_eq!(ticks.last(), Some(&0));
        for pair in ticks.windows(2) {
            assert_eq!(pair[0] - 1, pair[1]);
        }
        assert_eq!(completions.load(Ordering::Relaxed), 1);
        assert!(!timer.is_running());
    }

    #[test]
    fn test_pause_preserves_remaining() {
        let (clock, timer) = timer();
        timer.start(10, |_| {}, || {});

        clock.advance(3.0);
        assert_eq!(timer.remaining(), 7);

        timer.pause();
        clock.advance(5.0);
        assert_eq!(timer.remaining(), 7);
        assert!(timer.is_paused());

        timer.resume();
        clock.advance(7.0);
        assert_eq!(timer.remaining(), 0);
        assert!(!timer.is_running());
    }

    #[test]
    fn test_start_replaces_running_timer() {
        let (clock, timer) = timer();
        let completions = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&completions);
        timer.start(5, |_| {}, move || {
            c1.fetch_add(1, Ordering::Relaxed);
        });
        clock.advance(2.0);

        let c2 = Arc::clone(&completions);
        timer.start(3, |_| {}, move || {
            c2.fetch_add(1, Ordering::Relaxed);
        });
        clock.advance(3.0);

        // Only the second timer completes
        assert_eq!(completions.load(Ordering::Relaxed), 1);
        clock.advance(10.0);
        assert_eq!(completions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_stop_silences_callbacks() {
        let (clock, timer) = timer();
        let fired = Arc::new(AtomicUsize::new(0));

        let fired2 = Arc::clone(&fired);
        timer.start(
            2,
            move |_| {
                fired2.fetch_add(1, Ordering::Relaxed);
            },
            || {},
        );
        timer.stop();
        clock.advance(5.0);
        assert_eq!(fired.load(Ordering::Relaxed), 0);
        assert_eq!(timer.remaining(), 0);
    }

    #[test]
    fn test_zero_second_timer_completes_async() {
        let (clock, timer) = timer();
        let done = Arc::new(AtomicUsize::new(0));

        let done2 = Arc::clone(&done);
        timer.start(0, |_| {}, move || {
            done2.fetch_add(1, Ordering::Relaxed);
        });
        // Not completed synchronously
        assert_eq!(done.load(Ordering::Relaxed), 0);
        clock.advance(0.0);
        assert_eq!(done.load(Ordering::Relaxed), 1);
    }
}
