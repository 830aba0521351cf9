//! Capture statistics

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

#[derive(Default)]
struct Counters {
    frames_completed: AtomicU64,
    frames_dropped: AtomicU64,
    starvations: AtomicU64,
    spurious_interrupts: AtomicU64,
    buffers_enqueued: AtomicU64,
    buffers_dequeued: AtomicU64,
}

/// Counters updated from both call and interrupt context
#[derive(Default)]
pub struct CaptureStats {
    counters: CachePadded<Counters>,
}

/// Point-in-time copy of [`CaptureStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_completed: u64,
    pub frames_dropped: u64,
    pub starvations: u64,
    pub spurious_interrupts: u64,
    pub buffers_enqueued: u64,
    pub buffers_dequeued: u64,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_completed(&self) {
        self.counters.frames_completed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("isi_frames_completed_total").increment(1);
    }

    pub fn frame_dropped(&self) {
        self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("isi_frames_dropped_total").increment(1);
    }

    pub fn starved(&self) {
        self.counters.starvations.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("isi_buffer_starvation_total").increment(1);
    }

    pub fn spurious_interrupt(&self) {
        self.counters
            .spurious_interrupts
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!("isi_spurious_interrupts_total").increment(1);
    }

    pub fn buffer_enqueued(&self) {
        self.counters.buffers_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn buffer_dequeued(&self) {
        self.counters.buffers_dequeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.counters;
        StatsSnapshot {
            frames_completed: c.frames_completed.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
            starvations: c.starvations.load(Ordering::Relaxed),
            spurious_interrupts: c.spurious_interrupts.load(Ordering::Relaxed),
            buffers_enqueued: c.buffers_enqueued.load(Ordering::Relaxed),
            buffers_dequeued: c.buffers_dequeued.load(Ordering::Relaxed),
        }
    }
}
