//! The scheduler interface turnstiles depend on.
//!
//! Turnstiles never touch run queues or switch stacks themselves. They ask
//! the scheduler, through [`SchedulerBridge`], to put a thread to sleep, to
//! make one runnable again, or to move a runnable thread whose priority just
//! changed. All of those happen with the scheduler lock held; the bridge
//! hands that lock out as an opaque guard so the turnstile code can thread
//! it through a whole operation (e.g. an entire priority propagation).

use crate::task::thread::{Priority, Thread, ThreadRef};

/// What a thread is doing right now, as far as priority lending cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Executing on some CPU.
    Running,
    /// On a run queue, waiting for a CPU.
    Runnable,
    /// Off every run queue.
    Blocked,
}

/// Scheduler services used by turnstiles.
///
/// Lock ordering: the scheduler lock is the OUTERMOST lock of the turnstile
/// subsystem. Turnstile code takes it only after dropping every chain lock,
/// and may take chain locks while holding it.
pub trait SchedulerBridge {
    /// The held scheduler lock.
    type Guard<'a>
    where
        Self: 'a;

    /// Acquire the scheduler lock.
    fn lock(&self) -> Self::Guard<'_>;

    /// The thread executing this call.
    ///
    /// Called with a chain lock held, so it must not take the scheduler
    /// lock.
    fn current_thread(&self) -> ThreadRef;

    /// Running, runnable, or blocked.
    fn status(&self, td: &Thread, guard: &Self::Guard<'_>) -> ThreadStatus;

    /// Switch away from `td` (the current thread), releasing the scheduler
    /// lock. Returns once `td` has been made runnable again and rescheduled.
    fn block(&self, td: &ThreadRef, guard: Self::Guard<'_>);

    /// Put a thread that `block`ed back on a run queue.
    fn make_runnable(&self, td: &ThreadRef, guard: &mut Self::Guard<'_>);

    /// `td` is runnable and its priority just became `pri`; requeue it.
    fn reposition(&self, td: &ThreadRef, pri: Priority, guard: &mut Self::Guard<'_>);
}
