// Horloge audio - temps monotone, scheduling, sortie CPAL
//
// Le scheduling tourne sur un thread dédié (tas binaire + condvar, précision
// sub-10ms). La sortie audio est créée paresseusement par unlock() et reçoit
// les clics via un ring buffer lock-free.
//
// Note: le Stream CPAL n'est pas Send/Sync sur toutes les plateformes
// (CoreAudio), donc il vit sur son propre thread jusqu'au shutdown.

use crate::clock::click::{ClickBank, ClickType, ClickVoice};
use crate::clock::source::{ClockSource, EventHandle, ScheduledJob};
use crate::error::ClockError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Producer, Split};
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, mpsc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub type ClickProducer = ringbuf::HeapProd<ClickType>;
pub type ClickConsumer = ringbuf::HeapCons<ClickType>;

pub fn create_click_channel(capacity: usize) -> (ClickProducer, ClickConsumer) {
    let rb = HeapRb::<ClickType>::new(capacity);
    rb.split()
}

const CLICK_CHANNEL_CAPACITY: usize = 64;

struct ScheduledEntry {
    due: f64,
    id: u64,
    job: ScheduledJob,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // (due, id) ordering; id breaks ties so same-time entries run FIFO
        self.due
            .total_cmp(&other.due)
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[derive(Default)]
struct Schedule {
    heap: BinaryHeap<Reverse<ScheduledEntry>>,
    cancelled: HashSet<u64>,
}

struct ClockShared {
    origin: Instant,
    schedule: Mutex<Schedule>,
    wakeup: Condvar,
    next_id: AtomicU64,
    shutdown: AtomicBool,
    unlocked: AtomicBool,
    click_tx: Mutex<Option<ClickProducer>>,
}

/// Process-wide audio clock
/// Construct once per process and share; tear down only at process exit.
pub struct AudioClock {
    shared: Arc<ClockShared>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    audio_thread: Mutex<Option<JoinHandle<()>>>,
}

impl AudioClock {
    pub fn new() -> Arc<Self> {
        let shared = Arc::new(ClockShared {
            origin: Instant::now(),
            schedule: Mutex::new(Schedule::default()),
            wakeup: Condvar::new(),
            next_id: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            unlocked: AtomicBool::new(false),
            click_tx: Mutex::new(None),
        });

        let worker_shared = Arc::clone(&shared);
        let scheduler = std::thread::spawn(move || scheduler_loop(&worker_shared));

        Arc::new(Self {
            shared,
            scheduler: Mutex::new(Some(scheduler)),
            audio_thread: Mutex::new(None),
        })
    }
}

impl ClockSource for AudioClock {
    fn now(&self) -> f64 {
        self.shared.origin.elapsed().as_secs_f64()
    }

    fn schedule_at(&self, time: f64, job: ScheduledJob) -> EventHandle {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        if let Ok(mut sched) = self.shared.schedule.lock() {
            sched.heap.push(Reverse(ScheduledEntry { due: time, id, job }));
        }
        self.shared.wakeup.notify_one();
        EventHandle(id)
    }

    fn cancel(&self, handle: EventHandle) {
        if let Ok(mut sched) = self.shared.schedule.lock() {
            // Only remember ids that are actually still queued
            if sched.heap.iter().any(|Reverse(e)| e.id == handle.0) {
                sched.cancelled.insert(handle.0);
            }
        }
    }

    fn unlock(&self) -> Result<(), ClockError> {
        if self.is_unlocked() {
            return Ok(());
        }

        let (result_tx, result_rx) = mpsc::channel();
        let (click_tx, click_rx) = create_click_channel(CLICK_CHANNEL_CAPACITY);

        let thread_shared = Arc::clone(&self.shared);
        let handle =
            std::thread::spawn(move || audio_output_thread(click_rx, result_tx, thread_shared));

        match result_rx.recv() {
            Ok(Ok(())) => {
                if let Ok(mut tx) = self.shared.click_tx.lock() {
                    *tx = Some(click_tx);
                }
                if let Ok(mut slot) = self.audio_thread.lock() {
                    *slot = Some(handle);
                }
                self.shared.unlocked.store(true, Ordering::Relaxed);
                tracing::info!("audio output unlocked");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                tracing::warn!("audio unlock failed: {e}");
                Err(e)
            }
            Err(_) => Err(ClockError::OutputThreadDied),
        }
    }

    fn is_unlocked(&self) -> bool {
        self.shared.unlocked.load(Ordering::Relaxed)
    }

    fn play_click(&self, click: ClickType) {
        if let Ok(mut tx) = self.shared.click_tx.lock() {
            if let Some(producer) = tx.as_mut() {
                if producer.try_push(click).is_err() {
                    tracing::warn!("click buffer full, click dropped");
                }
            }
        }
    }
}

impl Drop for AudioClock {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        self.shared.wakeup.notify_all();
        if let Ok(mut slot) = self.scheduler.lock() {
            if let Some(handle) = slot.take() {
                let _ = handle.join();
            }
        }
        if let Ok(mut slot) = self.audio_thread.lock() {
            if let Some(handle) = slot.take() {
                handle.thread().unpark();
                let _ = handle.join();
            }
        }
    }
}

fn scheduler_loop(shared: &Arc<ClockShared>) {
    let Ok(mut sched) = shared.schedule.lock() else {
        return;
    };
    loop {
        if shared.shutdown.load(Ordering::Relaxed) {
            return;
        }

        // Discard cancelled entries sitting at the head
        loop {
            let cancelled_head = match sched.heap.peek() {
                Some(Reverse(head)) if sched.cancelled.contains(&head.id) => Some(head.id),
                _ => None,
            };
            match cancelled_head {
                Some(id) => {
                    sched.heap.pop();
                    sched.cancelled.remove(&id);
                }
                None => break,
            }
        }

        let now = shared.origin.elapsed().as_secs_f64();
        let due_in = match sched.heap.peek() {
            Some(Reverse(head)) => head.due - now,
            None => {
                sched = match shared.wakeup.wait(sched) {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
                continue;
            }
        };

        if due_in > 0.0 {
            let timeout = Duration::from_secs_f64(due_in.min(1.0));
            sched = match shared.wakeup.wait_timeout(sched, timeout) {
                Ok((guard, _)) => guard,
                Err(_) => return,
            };
            continue;
        }

        if let Some(Reverse(entry)) = sched.heap.pop() {
            // Run the job without holding the queue lock
            drop(sched);
            (entry.job)();
            sched = match shared.schedule.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
        }
    }
}

// Construit le stream de sortie et le garde vivant jusqu'au shutdown
fn audio_output_thread(
    click_rx: ClickConsumer,
    result_tx: mpsc::Sender<Result<(), ClockError>>,
    shared: Arc<ClockShared>,
) {
    let stream = match build_output(click_rx) {
        Ok(stream) => {
            let _ = result_tx.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = result_tx.send(Err(e));
            return;
        }
    };

    while !shared.shutdown.load(Ordering::Relaxed) {
        std::thread::park_timeout(Duration::from_millis(200));
    }
    drop(stream);
}

fn build_output(click_rx: ClickConsumer) -> Result<cpal::Stream, ClockError> {
    // Host et device de sortie par défaut
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(ClockError::NoDevice)?;
    let supported = device.default_output_config()?;

    let sample_format = supported.sample_format();
    let sample_rate = supported.sample_rate().0 as f32;
    let channels = supported.channels() as usize;
    let config: cpal::StreamConfig = supported.into();

    let voice = ClickVoice::new(ClickBank::new(sample_rate));

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, click_rx, voice),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, click_rx, voice),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, channels, click_rx, voice),
        other => return Err(ClockError::UnsupportedFormat(other)),
    }?;

    stream.play()?;
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    mut click_rx: ClickConsumer,
    mut voice: ClickVoice,
) -> Result<cpal::Stream, ClockError>
where
    T: SizedSample + FromSample<f32>,
{
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            // Drain pending click commands, then render mono to all channels
            while let Some(click) = click_rx.try_pop() {
                voice.trigger(click);
            }
            for frame in data.chunks_mut(channels) {
                let sample = voice.next_sample();
                for out in frame.iter_mut() {
                    *out = T::from_sample(sample);
                }
            }
        },
        move |err| {
            tracing::warn!("audio stream error: {err}");
        },
        None,
    )?;
    Ok(stream)
}
