// Metronome engine - lookahead beat scheduling
// Beats are scheduled at exact clock times a little ahead of now, and the
// scheduling pass re-runs on a short fixed interval; perceptual accuracy is
// decoupled from the pass interval. Every run carries a run id so callbacks
// from a stopped run are discarded at delivery time.

use crate::clock::click::ClickType;
use crate::clock::source::{ClockSource, EventHandle};
use crate::session::event::{EventSender, SessionEvent};
use crate::session::shared::SharedSessionState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// How far ahead of now beats get scheduled
const LOOKAHEAD_WINDOW: f64 = 0.1;
/// Interval between scheduling passes
const PASS_INTERVAL: f64 = 0.025;
/// Output latency buffer before the first beat of a plain start
const START_LATENCY: f64 = 0.05;

#[derive(Default)]
struct MetroState {
    running: bool,
    bpm: u32,
    beats_per_measure: u8,
    /// Index within the measure of the next beat to schedule
    beat_index: u8,
    /// Beats scheduled since this run started
    tick_count: u64,
    next_tick_time: f64,
    pass_handle: Option<EventHandle>,
    /// Scheduled-but-not-yet-fired beats, kept for cancellation on stop
    pending_beats: Vec<(f64, EventHandle)>,
}

struct MetroCore {
    clock: Arc<dyn ClockSource>,
    events: EventSender,
    shared: Arc<SharedSessionState>,
    run_id: AtomicU64,
    state: Mutex<MetroState>,
}

/// Drift-free beat generator over the audio clock
pub struct MetronomeEngine {
    core: Arc<MetroCore>,
}

impl MetronomeEngine {
    pub fn new(
        clock: Arc<dyn ClockSource>,
        events: EventSender,
        shared: Arc<SharedSessionState>,
    ) -> Self {
        Self {
            core: Arc::new(MetroCore {
                clock,
                events,
                shared,
                run_id: AtomicU64::new(0),
                state: Mutex::new(MetroState::default()),
            }),
        }
    }

    /// Starts a run with the first beat a small latency buffer from now.
    /// A bpm of 0 or a still-locked clock leaves the engine idle.
    pub fn start(&self, bpm: u32, beats_per_measure: u8) {
        self.begin(bpm, beats_per_measure, START_LATENCY);
    }

    /// Starts a run so that exactly `measures_to_play` full measures complete
    /// `seconds_until_target` seconds from now; the start offset is clamped
    /// at zero so the first beat never lands in the past
    pub fn start_aligned(
        &self,
        bpm: u32,
        beats_per_measure: u8,
        measures_to_play: u32,
        seconds_until_target: f64,
    ) {
        if bpm == 0 {
            return;
        }
        let seconds_per_beat = 60.0 / bpm as f64;
        let measure = seconds_per_beat * beats_per_measure.max(1) as f64;
        let offset = (seconds_until_target - measures_to_play as f64 * measure).max(0.0);
        self.begin(bpm, beats_per_measure, offset);
    }

    fn begin(&self, bpm: u32, beats_per_measure: u8, offset: f64) {
        if bpm == 0 {
            tracing::debug!("metronome start ignored: no tempo");
            return;
        }
        if !self.core.clock.is_unlocked() {
            tracing::debug!("metronome start ignored: audio locked");
            return;
        }

        // Any previous run becomes stale before the new one schedules anything
        let run = self.core.run_id.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let Ok(mut st) = self.core.state.lock() else {
                return;
            };
            MetroCore::cancel_scheduled(&self.core.clock, &mut st);
            st.running = true;
            st.bpm = bpm;
            st.beats_per_measure = beats_per_measure.max(1);
            st.beat_index = 0;
            st.tick_count = 0;
            st.next_tick_time = self.core.clock.now() + offset;
        }
        self.core.shared.set_metronome(true, bpm);
        tracing::debug!(bpm, beats = beats_per_measure, "metronome started");
        MetroCore::pass(&self.core, run);
    }

    /// Changes the tempo of a running metronome without resetting the beat
    /// position; beats already scheduled keep their times
    pub fn set_bpm(&self, bpm: u32) {
        if bpm == 0 {
            return;
        }
        if let Ok(mut st) = self.core.state.lock() {
            st.bpm = bpm;
        }
        self.core.shared.set_metronome_bpm(bpm);
    }

    /// Changes the meter; the beat index is reduced modulo the new size
    pub fn set_beats_per_measure(&self, beats_per_measure: u8) {
        let beats = beats_per_measure.max(1);
        if let Ok(mut st) = self.core.state.lock() {
            if st.beats_per_measure == beats {
                return;
            }
            st.beats_per_measure = beats;
            st.beat_index %= beats;
        }
    }

    /// Stops the run, cancels every pending beat, and resets public counters
    pub fn stop(&self) {
        self.core.run_id.fetch_add(1, Ordering::Relaxed);
        {
            let Ok(mut st) = self.core.state.lock() else {
                return;
            };
            MetroCore::cancel_scheduled(&self.core.clock, &mut st);
            st.running = false;
            st.bpm = 0;
            st.beat_index = 0;
            st.tick_count = 0;
            st.next_tick_time = 0.0;
        }
        self.core.shared.set_metronome(false, 0);
        self.core.shared.reset_beat();
        tracing::debug!("metronome stopped");
    }

    pub fn is_running(&self) -> bool {
        self.core.state.lock().map(|st| st.running).unwrap_or(false)
    }

    pub fn current_bpm(&self) -> u32 {
        self.core.state.lock().map(|st| st.bpm).unwrap_or(0)
    }

    /// Time until the next downbeat, computed from live scheduler state.
    /// 0 when idle or in a 1-beat meter (every beat is then a boundary).
    pub fn seconds_until_measure_end(&self) -> f64 {
        let Ok(st) = self.core.state.lock() else {
            return 0.0;
        };
        if !st.running || st.beats_per_measure <= 1 {
            return 0.0;
        }
        let seconds_per_beat = 60.0 / st.bpm as f64;
        let time_to_next = (st.next_tick_time - self.core.clock.now()).max(0.0);
        // Beats left after the next scheduled one before the measure turns over
        let beats_after = (st.beats_per_measure - st.beat_index) % st.beats_per_measure;
        time_to_next + beats_after as f64 * seconds_per_beat
    }
}

impl MetroCore {
    fn cancel_scheduled(clock: &Arc<dyn ClockSource>, st: &mut MetroState) {
        if let Some(handle) = st.pass_handle.take() {
            clock.cancel(handle);
        }
        for (_, handle) in st.pending_beats.drain(..) {
            clock.cancel(handle);
        }
    }

    /// One scheduling pass: emit every beat that falls inside the lookahead
    /// window, then re-arm the pass
    fn pass(core: &Arc<MetroCore>, run: u64) {
        let Ok(mut st) = core.state.lock() else {
            return;
        };
        if run != core.run_id.load(Ordering::Relaxed) || !st.running {
            return;
        }

        let now = core.clock.now();
        st.pending_beats.retain(|(due, _)| *due > now);

        while st.next_tick_time < now + LOOKAHEAD_WINDOW {
            let due = st.next_tick_time;
            let beat_in_measure = st.beat_index + 1;
            let accent = st.beat_index == 0 && st.beats_per_measure > 1;
            st.tick_count += 1;
            let total_beats = st.tick_count;

            let weak = Arc::downgrade(core);
            let handle = core.clock.schedule_at(
                due,
                Box::new(move || {
                    if let Some(core) = weak.upgrade() {
                        MetroCore::deliver_beat(&core, run, beat_in_measure, total_beats, accent);
                    }
                }),
            );
            st.pending_beats.push((due, handle));

            st.next_tick_time += 60.0 / st.bpm as f64;
            st.beat_index = (st.beat_index + 1) % st.beats_per_measure;
        }

        let weak = Arc::downgrade(core);
        st.pass_handle = Some(core.clock.schedule_at(
            now + PASS_INTERVAL,
            Box::new(move || {
                if let Some(core) = weak.upgrade() {
                    MetroCore::pass(&core, run);
                }
            }),
        ));
    }

    /// Runs at the beat's scheduled audio time
    fn deliver_beat(
        core: &Arc<MetroCore>,
        run: u64,
        beat_in_measure: u8,
        total_beats: u64,
        accent: bool,
    ) {
        if run != core.run_id.load(Ordering::Relaxed) {
            // Stale run: a stop or restart happened after scheduling
            return;
        }
        let click = if accent {
            ClickType::Accent
        } else {
            ClickType::Regular
        };
        core.clock.play_click(click);
        core.shared.set_beat(beat_in_measure, total_beats);
        let _ = core.events.send(SessionEvent::Beat {
            beat_in_measure,
            total_beats,
            accent,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::offline::OfflineClock;
    use crate::session::event::{EventReceiver, create_session_event_channel};

    fn engine() -> (Arc<OfflineClock>, MetronomeEngine, EventReceiver) {
        let clock = Arc::new(OfflineClock::new());
        clock.unlock().unwrap();
        let (tx, rx) = create_session_event_channel();
        let engine = MetronomeEngine::new(
            clock.clone() as Arc<dyn ClockSource>,
            tx,
            SharedSessionState::new(),
        );
        (clock, engine, rx)
    }

    fn beat_events(rx: &EventReceiver) -> Vec<(u8, u64, bool)> {
        rx.try_iter()
            .filter_map(|e| match e {
                SessionEvent::Beat {
                    beat_in_measure,
                    total_beats,
                    accent,
                } => Some((beat_in_measure, total_beats, accent)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_beat_interval_and_measure_cycle() {
        let (clock, engine, rx) = engine();
        engine.start(120, 4);
        clock.advance(3.0);

        let clicks = clock.clicks();
        // First beat 50ms out, then one every 0.5s
        assert!((clicks[0].0 - 0.05).abs() < 1e-9);
        for pair in clicks.windows(2) {
            assert!((pair[1].0 - pair[0].0 - 0.5).abs() < 1e-9);
        }

        let beats = beat_events(&rx);
        assert_eq!(beats.len(), clicks.len());
        for (i, (beat_in_measure, total_beats, accent)) in beats.iter().enumerate() {
            assert_eq!(*beat_in_measure as usize, i % 4 + 1);
            assert_eq!(*total_beats as usize, i + 1);
            assert_eq!(*accent, i % 4 == 0);
        }
    }

    #[test]
    fn test_single_beat_meter_has_no_accent() {
        let (clock, engine, rx) = engine();
        engine.start(60, 1);
        clock.advance(2.5);

        let beats = beat_events(&rx);
        assert!(!beats.is_empty());
        assert!(beats.iter().all(|(b, _, accent)| *b == 1 && !accent));
        assert_eq!(engine.seconds_until_measure_end(), 0.0);
    }

    #[test]
    fn test_start_aligned_offset() {
        let (clock, engine, _rx) = engine();
        clock.advance(10.0);

        // 1 measure of 4/4 at 120 BPM = 2s; target 5s away → start 3s from now
        engine.start_aligned(120, 4, 1, 5.0);
        clock.advance(5.1);

        let clicks = clock.clicks();
        assert!((clicks[0].0 - 13.0).abs() < 1e-9);
        // Beat 1 of the following measure lands exactly on the target
        assert!((clicks[4].0 - 15.0).abs() < 1e-9);
        assert_eq!(clicks[4].1, ClickType::Accent);
    }

    #[test]
    fn test_start_aligned_clamps_to_now() {
        let (clock, engine, _rx) = engine();
        clock.advance(2.0);

        // 2 measures need 4s but only 1s is available: clamp, start now
        engine.start_aligned(120, 4, 2, 1.0);
        clock.advance(0.1);

        let clicks = clock.clicks();
        assert!(!clicks.is_empty());
        assert!((clicks[0].0 - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_stop_then_start_drops_stale_beats() {
        let (clock, engine, rx) = engine();
        engine.start(120, 4);
        clock.advance(1.0);
        let fired_before = clock.click_count();
        let _ = beat_events(&rx);

        engine.stop();
        engine.start(120, 4);

        // Before the new run's first beat nothing may fire, even though the
        // old run had beats scheduled inside its lookahead window
        clock.advance(0.04);
        assert_eq!(clock.click_count(), fired_before);
        assert!(beat_events(&rx).is_empty());

        // New run numbering restarts at beat 1
        clock.advance(0.02);
        let beats = beat_events(&rx);
        assert_eq!(beats.first(), Some(&(1, 1, true)));
    }

    #[test]
    fn test_stop_resets_counters() {
        let (clock, engine, _rx) = engine();
        engine.start(100, 3);
        clock.advance(2.0);
        assert!(engine.is_running());
        assert_eq!(engine.current_bpm(), 100);

        engine.stop();
        assert!(!engine.is_running());
        assert_eq!(engine.current_bpm(), 0);
        assert_eq!(engine.seconds_until_measure_end(), 0.0);

        // No further beats after stop
        let count = clock.click_count();
        clock.advance(3.0);
        assert_eq!(clock.click_count(), count);
    }

    #[test]
    fn test_invalid_tempo_is_a_noop() {
        let (clock, engine, rx) = engine();
        engine.start(0, 4);
        assert!(!engine.is_running());
        clock.advance(2.0);
        assert_eq!(clock.click_count(), 0);
        assert!(beat_events(&rx).is_empty());
    }

    #[test]
    fn test_locked_clock_keeps_engine_idle() {
        let clock = Arc::new(OfflineClock::new());
        let (tx, rx) = create_session_event_channel();
        let engine = MetronomeEngine::new(
            clock.clone() as Arc<dyn ClockSource>,
            tx,
            SharedSessionState::new(),
        );

        engine.start(120, 4);
        assert!(!engine.is_running());
        clock.advance(2.0);
        assert_eq!(clock.click_count(), 0);
        assert!(beat_events(&rx).is_empty());
    }

    #[test]
    fn test_set_bpm_keeps_position() {
        let (clock, engine, rx) = engine();
        engine.start(60, 4);
        clock.advance(1.0);
        // One beat fired (at 0.05); position is mid-measure
        assert_eq!(beat_events(&rx).len(), 1);

        engine.set_bpm(120);
        assert_eq!(engine.current_bpm(), 120);
        clock.advance(2.0);

        // Position was not reset: numbering continues from beat 2
        let beats = beat_events(&rx);
        assert_eq!(beats.first().map(|(b, _, _)| *b), Some(2));
    }

    #[test]
    fn test_set_beats_per_measure_reduces_index() {
        let (clock, engine, _rx) = engine();
        engine.start(60, 4);
        clock.advance(3.1);

        // Same value is a no-op
        engine.set_beats_per_measure(4);
        // Shrinking the meter folds the index into range
        engine.set_beats_per_measure(2);
        let remaining = engine.seconds_until_measure_end();
        let beat = 1.0;
        assert!(remaining <= 2.0 * beat + 1e-9);
    }

    #[test]
    fn test_seconds_until_measure_end_points_at_next_downbeat() {
        let (clock, engine, _rx) = engine();
        engine.start(60, 4);
        clock.advance(0.2);

        // Beat 1 fired at 0.05; beat 2 is scheduled for 1.05 and two more
        // beats follow before the next downbeat at 4.05
        let expected = (1.05 - 0.2) + 3.0;
        assert!((engine.seconds_until_measure_end() - expected).abs() < 1e-9);
    }
}
