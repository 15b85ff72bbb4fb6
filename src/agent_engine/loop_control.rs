// Iteration ceiling and cooperative cancellation.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle shared between the engine worker and whoever may cancel it.
/// Holds the only two pieces of cross-thread state: the cancel flag and the
/// running status.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancel: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes effect at the next iteration boundary; gestures in flight finish.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Marks a task as running. Callers that hand a goal to the engine may
    /// call this before sending it so a cancel in between is not lost.
    /// A cancellation requested before the task starts is kept, so the
    /// task ends before its first model call.
    pub fn begin(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Marks the task done and consumes any pending cancellation.
    pub(crate) fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.store(false, Ordering::SeqCst);
    }
}

pub struct LoopController {
    max_iterations: u32,
    iteration: u32,
}

impl LoopController {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            iteration: 0,
        }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Iterations started so far.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn exhausted(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    /// Counts a new pass and returns its 1-based number. Every pass counts,
    /// including ones that end in a recoverable failure.
    pub fn next_iteration(&mut self) -> u32 {
        self.iteration += 1;
        self.iteration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_counts_every_pass() {
        let mut ctl = LoopController::new(2);
        assert!(!ctl.exhausted());
        assert_eq!(ctl.next_iteration(), 1);
        assert_eq!(ctl.next_iteration(), 2);
        assert!(ctl.exhausted());
    }

    #[test]
    fn begin_before_handoff_keeps_an_early_cancel() {
        let handle = TaskHandle::new();
        handle.begin();
        handle.cancel();
        // the engine calls begin again once it picks the goal up
        handle.begin();
        assert!(handle.is_running());
        assert!(handle.is_cancelled());
    }

    #[test]
    fn zero_ceiling_is_immediately_exhausted() {
        assert!(LoopController::new(0).exhausted());
    }

    #[test]
    fn cancellation_is_visible_across_clones() {
        let handle = TaskHandle::new();
        let remote = handle.clone();
        handle.begin();
        assert!(remote.is_running());

        std::thread::spawn(move || remote.cancel()).join().unwrap();
        assert!(handle.is_cancelled());

        handle.finish();
        assert!(!handle.is_running());
        assert!(!handle.is_cancelled());
    }
}
