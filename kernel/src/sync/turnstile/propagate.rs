//! Priority propagation.
//!
//! A thread that blocks lends its priority to the owner of the lock it
//! blocks on. If that owner is itself blocked on a lock, the loan continues
//! to that lock's owner, and so on up the chain, one hop per iteration with
//! only one chain lock held at a time.

use log::debug;

use super::TurnstileTable;
use crate::task::sched::{SchedulerBridge, ThreadStatus};
use crate::task::thread::{Priority, ThreadRef};

impl TurnstileTable {
    /// Lend `start`'s priority to every owner up its chain of locks.
    ///
    /// Scheduler lock held. Stops at the first owner already at least as
    /// urgent, at a running or runnable owner, or where the chain breaks
    /// (a waiter concurrently woken, a lock with no recorded owner).
    /// Panics if the chain leads back to `start`.
    pub fn propagate<S: SchedulerBridge>(
        &self,
        start: &ThreadRef,
        sched: &S,
        guard: &mut S::Guard<'_>,
    ) {
        let pri = start.priority();
        let mut td = start.clone();
        loop {
            let Some(owner) = self.requeue(&td) else {
                return;
            };
            if owner.is(start) {
                panic!("deadlock: {start} waits for itself\n{}", self.lockchain(start));
            }
            if owner.priority() >= pri {
                return;
            }
            match sched.status(&owner, guard) {
                ThreadStatus::Running => {
                    owner.set_priority(pri);
                    return;
                }
                ThreadStatus::Runnable => {
                    owner.set_priority(pri);
                    sched.reposition(&owner, pri, guard);
                    return;
                }
                ThreadStatus::Blocked => {
                    assert!(owner.is_on_lock(), "{owner} is blocked, but not on a lock");
                    owner.set_priority(pri);
                    td = owner;
                }
            }
        }
    }

    /// The scheduler changed `td`'s priority from `old`. If `td` is blocked
    /// on a lock, restore that queue's order and, if the priority went up,
    /// lend it onward.
    ///
    /// Scheduler lock held.
    pub fn adjust<S: SchedulerBridge>(
        &self,
        td: &ThreadRef,
        old: Priority,
        sched: &S,
        guard: &mut S::Guard<'_>,
    ) {
        if self.requeue(td).is_none() {
            return;
        }
        if td.priority() > old {
            self.propagate(td, sched, guard);
        }
    }

    /// Fix `td`'s place in the queue of the lock it is blocked on and return
    /// that lock's owner. `None` if `td` is not (or no longer) queued there,
    /// or the lock has no recorded owner.
    fn requeue(&self, td: &ThreadRef) -> Option<ThreadRef> {
        let lock = td.blocked_on()?;
        let mut chain = self.chain(lock);
        let at = chain.find(lock)?;
        let ts = &mut chain.turnstiles[at];
        if !ts.blocked.contains(td) {
            return None;
        }
        let mut contested = self.contested.lock();
        if ts.blocked.reposition(td) {
            debug!(
                target: "turnstile",
                "{td} requeued on {} at priority {} (slot {})",
                ts.lock_name,
                td.priority(),
                ts.blocked.position(td).unwrap_or_default()
            );
            ts.sync_head(&mut contested);
        }
        ts.check(&contested);
        ts.owner.clone()
    }
}
