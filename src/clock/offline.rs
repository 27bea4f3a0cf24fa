// Offline clock for deterministic tests
// Time only moves when advance() is called; due callbacks run in time order
// on the calling thread. Clicks are recorded instead of played.

use crate::clock::click::ClickType;
use crate::clock::source::{ClockSource, EventHandle, ScheduledJob};
use crate::error::ClockError;
use std::sync::Mutex;

const TIME_EPSILON: f64 = 1e-9;

struct OfflineEntry {
    due: f64,
    id: u64,
    job: ScheduledJob,
}

#[derive(Default)]
struct OfflineInner {
    now: f64,
    next_id: u64,
    queue: Vec<OfflineEntry>,
    unlocked: bool,
    clicks: Vec<(f64, ClickType)>,
}

/// Manually advanced clock
/// Starts locked, like a real audio context before the first user gesture.
#[derive(Default)]
pub struct OfflineClock {
    inner: Mutex<OfflineInner>,
}

impl OfflineClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves time forward by `dt` seconds, running every callback that comes
    /// due on the way (including callbacks scheduled by earlier callbacks)
    pub fn advance(&self, dt: f64) {
        let target = {
            let Ok(inner) = self.inner.lock() else { return };
            inner.now + dt
        };

        loop {
            let job = {
                let Ok(mut inner) = self.inner.lock() else { return };
                let next = inner
                    .queue
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.due <= target + TIME_EPSILON)
                    .min_by(|(_, a), (_, b)| {
                        a.due.total_cmp(&b.due).then_with(|| a.id.cmp(&b.id))
                    })
                    .map(|(i, _)| i);
                match next {
                    Some(index) => {
                        let entry = inner.queue.swap_remove(index);
                        inner.now = inner.now.max(entry.due);
                        entry.job
                    }
                    None => break,
                }
            };
            job();
        }

        if let Ok(mut inner) = self.inner.lock() {
            inner.now = target;
        }
    }

    /// Recorded clicks as (time, type) pairs
    pub fn clicks(&self) -> Vec<(f64, ClickType)> {
        self.inner.lock().map(|i| i.clicks.clone()).unwrap_or_default()
    }

    pub fn click_count(&self) -> usize {
        self.inner.lock().map(|i| i.clicks.len()).unwrap_or(0)
    }

    /// Number of callbacks still queued
    pub fn pending(&self) -> usize {
        self.inner.lock().map(|i| i.queue.len()).unwrap_or(0)
    }
}

impl ClockSource for OfflineClock {
    fn now(&self) -> f64 {
        self.inner.lock().map(|i| i.now).unwrap_or(0.0)
    }

    fn schedule_at(&self, time: f64, job: ScheduledJob) -> EventHandle {
        let Ok(mut inner) = self.inner.lock() else {
            return EventHandle(0);
        };
        inner.next_id += 1;
        let id = inner.next_id;
        let due = time.max(inner.now);
        inner.queue.push(OfflineEntry { due, id, job });
        EventHandle(id)
    }

    fn cancel(&self, handle: EventHandle) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.queue.retain(|e| e.id != handle.0);
        }
    }

    fn unlock(&self) -> Result<(), ClockError> {
        if let Ok(mut inner) = self.inner.lock() {
            inner.unlocked = true;
        }
        Ok(())
    }

    fn is_unlocked(&self) -> bool {
        self.inner.lock().map(|i| i.unlocked).unwrap_or(false)
    }

    fn play_click(&self, click: ClickType) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.unlocked {
                let now = inner.now;
                inner.clicks.push((now, click));
            }
        }
    }
}
