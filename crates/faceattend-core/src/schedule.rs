//! Single-slot periodic scheduler.
//!
//! A [`PollTask`] ticks at a fixed period and starts a job only when the
//! shared [`SingleSlot`] is free. Ticks that land while a job is still
//! running are dropped, never queued.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Mutual-exclusion flag admitting at most one in-flight attempt.
#[derive(Debug, Clone, Default)]
pub struct SingleSlot {
    busy: Arc<AtomicBool>,
}

/// Holding this means the slot is taken; dropping it frees the slot.
#[derive(Debug)]
pub struct SlotGuard {
    busy: Arc<AtomicBool>,
}

impl SingleSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the slot, or `None` if an attempt is already in flight.
    pub fn try_acquire(&self) -> Option<SlotGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SlotGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Handle to a running poll loop. Dropping it stops the ticker.
///
/// An attempt already in flight is allowed to finish.
#[derive(Debug)]
pub struct PollTask {
    ticker: JoinHandle<()>,
    skipped: Arc<AtomicU64>,
}

impl PollTask {
    /// Ticks dropped because the slot was busy.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn stop(self) {
        self.ticker.abort();
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

/// Start ticking every `period`; the first tick fires one period from now.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_poll<F, Fut>(period: Duration, slot: SingleSlot, job: F) -> PollTask
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let skipped = Arc::new(AtomicU64::new(0));
    let skipped_in_loop = Arc::clone(&skipped);

    let ticker = tokio::spawn(async move {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match slot.try_acquire() {
                Some(guard) => {
                    let attempt = job();
                    tokio::spawn(async move {
                        attempt.await;
                        drop(guard);
                    });
                }
                None => {
                    let n = skipped_in_loop.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::debug!(skipped = n, "previous attempt still in flight; tick dropped");
                }
            }
        }
    });

    PollTask { ticker, skipped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_slot_exclusive() {
        let slot = SingleSlot::new();
        let guard = slot.try_acquire().expect("free slot");
        assert!(slot.is_busy());
        assert!(slot.try_acquire().is_none());
        drop(guard);
        assert!(!slot.is_busy());
        assert!(slot.try_acquire().is_some());
    }

    #[test]
    fn test_slot_clones_share_state() {
        let a = SingleSlot::new();
        let b = a.clone();
        let _g = a.try_acquire().unwrap();
        assert!(b.try_acquire().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_jobs_drop_ticks_without_overlap() {
        let slot = SingleSlot::new();
        let started = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));

        let task = {
            let started = started.clone();
            let running = running.clone();
            let max_running = max_running.clone();
            spawn_poll(Duration::from_millis(100), slot.clone(), move || {
                let started = started.clone();
                let running = running.clone();
                let max_running = max_running.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_running.fetch_max(now, Ordering::SeqCst);
                    time::sleep(Duration::from_millis(250)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }
            })
        };

        time::sleep(Duration::from_millis(1050)).await;

        assert_eq!(max_running.load(Ordering::SeqCst), 1);
        let started = started.load(Ordering::SeqCst);
        assert!(started >= 3 && started < 10, "started {started}");
        assert!(task.skipped() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_jobs_run_every_tick() {
        let slot = SingleSlot::new();
        let started = Arc::new(AtomicUsize::new(0));
        let task = {
            let started = started.clone();
            spawn_poll(Duration::from_millis(100), slot, move || {
                let started = started.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        time::sleep(Duration::from_millis(550)).await;
        assert_eq!(started.load(Ordering::SeqCst), 5);
        assert_eq!(task.skipped(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_ticks() {
        let started = Arc::new(AtomicUsize::new(0));
        let task = {
            let started = started.clone();
            spawn_poll(Duration::from_millis(100), SingleSlot::new(), move || {
                let started = started.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        time::sleep(Duration::from_millis(250)).await;
        task.stop();
        let seen = started.load(Ordering::SeqCst);
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(started.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_holder_blocks_ticks() {
        let slot = SingleSlot::new();
        let guard = slot.try_acquire().unwrap();
        let started = Arc::new(AtomicUsize::new(0));
        let task = {
            let started = started.clone();
            spawn_poll(Duration::from_millis(100), slot.clone(), move || {
                let started = started.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        time::sleep(Duration::from_millis(350)).await;
        assert_eq!(started.load(Ordering::SeqCst), 0);
        assert_eq!(task.skipped(), 3);

        drop(guard);
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }
}
