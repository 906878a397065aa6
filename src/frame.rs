//! Per-frame task scheduling.
//!
//! The host calls [`FrameScheduler::tick`] once per display refresh. Tasks
//! repeat every tick until their [`FrameHandle`] is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type FrameTask = Box<dyn FnMut() + Send>;

/// Stop handle for a repeating frame task
#[derive(Debug, Clone)]
pub struct FrameHandle {
    cancelled: Arc<AtomicBool>,
}

impl FrameHandle {
    /// Prevent every future run of the task, including later in the current tick
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Runs registered tasks once per display refresh
#[derive(Default)]
pub struct FrameScheduler {
    tasks: Vec<(FrameHandle, FrameTask)>,
    frames: u64,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task to run on every tick from the next one on
    pub fn schedule(&mut self, task: impl FnMut() + Send + 'static) -> FrameHandle {
        let handle = FrameHandle {
            cancelled: Arc::new(AtomicBool::new(false)),
        };
        self.tasks.push((handle.clone(), Box::new(task)));
        handle
    }

    /// Run one display frame
    pub fn tick(&mut self) {
        self.frames += 1;
        self.tasks.retain(|(handle, _)| !handle.is_cancelled());
        for (handle, task) in self.tasks.iter_mut() {
            if !handle.is_cancelled() {
                task();
            }
        }
    }

    /// Number of live tasks
    pub fn active(&self) -> usize {
        self.tasks
            .iter()
            .filter(|(handle, _)| !handle.is_cancelled())
            .count()
    }

    /// Frames ticked so far
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_task_repeats_each_tick() {
        let mut scheduler = FrameScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        scheduler.schedule(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..3 {
            scheduler.tick();
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.frames(), 3);
    }

    #[test]
    fn test_cancel_stops_future_frames() {
        let mut scheduler = FrameScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let handle = scheduler.schedule(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.tick();
        handle.cancel();
        scheduler.tick();
        scheduler.tick();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.active(), 0);
    }

    #[test]
    fn test_cancel_during_tick_skips_later_task() {
        let mut scheduler = FrameScheduler::new();
        let victim: Arc<std::sync::Mutex<Option<FrameHandle>>> =
            Arc::new(std::sync::Mutex::new(None));

        let target = Arc::clone(&victim);
        scheduler.schedule(move || {
            if let Some(handle) = target.lock().unwrap().as_ref() {
                handle.cancel();
            }
        });

        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let handle = scheduler.schedule(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        *victim.lock().unwrap() = Some(handle);

        scheduler.tick();
        scheduler.tick();

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.active(), 1);
    }
}
