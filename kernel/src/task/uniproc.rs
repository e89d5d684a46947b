//! Uniprocessor priority scheduler.
//!
//! A single CPU, a priority-ordered ready queue (FIFO among equals) and a
//! list of blocked threads. It implements [`SchedulerBridge`] so turnstiles
//! can be brought up, and exercised deterministically, before SMP
//! scheduling exists.
//!
//! Hosted builds have no stacks to switch: `block` records the switch to the
//! next thread and returns to its caller. Whoever drives the scheduler (a
//! test, the boot path) then acts as whichever thread is current.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use log::trace;
use spin::{Mutex, MutexGuard};

use crate::sync::spinlock::SpinLock;
use crate::task::sched::{SchedulerBridge, ThreadStatus};
use crate::task::thread::{Priority, Thread, ThreadRef};

// ── Run queue ───────────────────────────────────────────────────

/// Scheduler state, protected by the scheduler lock.
pub struct RunQueue {
    /// The thread on the CPU.
    current: Option<ThreadRef>,
    /// Runnable threads, most urgent first.
    ready: VecDeque<ThreadRef>,
    /// Threads switched away from by `block`.
    blocked: Vec<ThreadRef>,
    /// Context switches performed.
    switches: u64,
}

impl RunQueue {
    const fn new() -> Self {
        Self {
            current: None,
            ready: VecDeque::new(),
            blocked: Vec::new(),
            switches: 0,
        }
    }

    /// Queue behind every thread at least as urgent.
    fn enqueue(&mut self, td: ThreadRef) {
        let pri = td.priority();
        let at = self
            .ready
            .iter()
            .position(|t| t.priority() < pri)
            .unwrap_or(self.ready.len());
        self.ready.insert(at, td);
    }

    fn take_ready(&mut self, td: &Thread) -> Option<ThreadRef> {
        let at = self.ready.iter().position(|t| t.is(td))?;
        self.ready.remove(at)
    }

    fn take_blocked(&mut self, td: &Thread) -> Option<ThreadRef> {
        let at = self.blocked.iter().position(|t| t.is(td))?;
        Some(self.blocked.swap_remove(at))
    }

    fn is_current(&self, td: &Thread) -> bool {
        self.current.as_ref().is_some_and(|c| c.is(td))
    }

    /// Put the most urgent ready thread on the CPU. The CPU must be free.
    fn dispatch(&mut self) {
        debug_assert!(self.current.is_none());
        if let Some(next) = self.ready.pop_front() {
            trace!(target: "sched", "switch to {next}");
            self.current = Some(next);
            self.switches += 1;
        }
    }

    /// The thread on the CPU.
    pub fn current(&self) -> Option<&ThreadRef> {
        self.current.as_ref()
    }

    /// Runnable threads in the order they will run.
    pub fn ready(&self) -> impl Iterator<Item = &ThreadRef> {
        self.ready.iter()
    }

    /// Number of tasks in the ready queue (excluding current).
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    /// Total tasks (ready + current + blocked).
    pub fn task_count(&self) -> usize {
        self.ready.len() + self.blocked.len() + usize::from(self.current.is_some())
    }

    pub fn switches(&self) -> u64 {
        self.switches
    }

    /// Where `td` is, or `None` if this scheduler does not know it.
    pub fn status(&self, td: &Thread) -> Option<ThreadStatus> {
        if self.is_current(td) {
            Some(ThreadStatus::Running)
        } else if self.ready.iter().any(|t| t.is(td)) {
            Some(ThreadStatus::Runnable)
        } else if self.blocked.iter().any(|t| t.is(td)) {
            Some(ThreadStatus::Blocked)
        } else {
            None
        }
    }
}

// ── Scheduler ───────────────────────────────────────────────────

pub struct UniprocScheduler {
    rq: Mutex<RunQueue>,
    /// Copy of `rq.current`, the CPU's curthread. A leaf lock, so the
    /// current thread can be read under chain locks without the run queue.
    on_cpu: SpinLock<Option<ThreadRef>>,
}

impl UniprocScheduler {
    pub const fn new() -> Self {
        Self {
            rq: Mutex::new(RunQueue::new()),
            on_cpu: SpinLock::new(None),
        }
    }

    /// Run queue locked. Call after every change to `rq.current`.
    fn publish(&self, rq: &RunQueue) {
        *self.on_cpu.lock() = rq.current.clone();
    }

    /// Add a new thread to the ready queue.
    pub fn spawn(&self, td: ThreadRef) {
        trace!(target: "sched", "spawn {td} at priority {}", td.priority());
        self.rq.lock().enqueue(td);
    }

    /// Put `td` on the CPU now, preempting whatever runs.
    ///
    /// Fails if `td` is neither runnable nor already current.
    pub fn switch_to(&self, td: &ThreadRef) -> Result<(), &'static str> {
        let mut rq = self.rq.lock();
        if rq.is_current(td) {
            return Ok(());
        }
        let td = rq.take_ready(td).ok_or("thread is not runnable")?;
        if let Some(old) = rq.current.take() {
            rq.enqueue(old);
        }
        trace!(target: "sched", "switch to {td}");
        rq.current = Some(td);
        rq.switches += 1;
        self.publish(&rq);
        Ok(())
    }

    /// Let a strictly more urgent ready thread preempt the current one, or
    /// fill an idle CPU. Returns the thread now running.
    pub fn schedule(&self) -> Option<ThreadRef> {
        let mut rq = self.rq.lock();
        let preempt = match (&rq.current, rq.ready.front()) {
            (None, _) => true,
            (Some(cur), Some(next)) => next.priority() > cur.priority(),
            (Some(_), None) => false,
        };
        if preempt {
            if let Some(old) = rq.current.take() {
                rq.enqueue(old);
            }
            rq.dispatch();
            self.publish(&rq);
        }
        rq.current.clone()
    }

    /// Remove `td` from the scheduler and free its turnstile.
    ///
    /// Panics (through `release_turnstile`) if `td` is still queued on a lock.
    pub fn exit(&self, td: &ThreadRef) -> Result<(), &'static str> {
        {
            let mut rq = self.rq.lock();
            if rq.is_current(td) {
                rq.current = None;
                rq.dispatch();
                self.publish(&rq);
            } else if rq.take_ready(td).is_none() && rq.take_blocked(td).is_none() {
                return Err("thread is not scheduled here");
            }
        }
        trace!(target: "sched", "exit {td}");
        td.release_turnstile();
        Ok(())
    }

    pub fn current(&self) -> Option<ThreadRef> {
        self.on_cpu.lock().clone()
    }

    pub fn status_of(&self, td: &Thread) -> Option<ThreadStatus> {
        self.rq.lock().status(td)
    }
}

impl Default for UniprocScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBridge for UniprocScheduler {
    type Guard<'a> = MutexGuard<'a, RunQueue>;

    fn lock(&self) -> MutexGuard<'_, RunQueue> {
        self.rq.lock()
    }

    fn current_thread(&self) -> ThreadRef {
        match self.on_cpu.lock().clone() {
            Some(td) => td,
            None => panic!("uniproc: no thread is running"),
        }
    }

    fn status(&self, td: &Thread, rq: &MutexGuard<'_, RunQueue>) -> ThreadStatus {
        match rq.status(td) {
            Some(status) => status,
            None => panic!("uniproc: {td} is not scheduled here"),
        }
    }

    fn block(&self, td: &ThreadRef, mut rq: MutexGuard<'_, RunQueue>) {
        assert!(rq.is_current(td), "uniproc: {td} blocked while not running");
        if let Some(td) = rq.current.take() {
            rq.blocked.push(td);
        }
        rq.dispatch();
        self.publish(&rq);
    }

    fn make_runnable(&self, td: &ThreadRef, rq: &mut MutexGuard<'_, RunQueue>) {
        match rq.take_blocked(td) {
            Some(td) => rq.enqueue(td),
            None => panic!("uniproc: {td} made runnable but was not blocked"),
        }
    }

    fn reposition(&self, td: &ThreadRef, _pri: Priority, rq: &mut MutexGuard<'_, RunQueue>) {
        if let Some(td) = rq.take_ready(td) {
            rq.enqueue(td);
        }
    }
}
