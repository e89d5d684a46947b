//! The lock-side protocol: claim, wait, signal, wakeup, unpend.
//!
//! Every operation starts from a [`ChainGuard`] returned by
//! [`TurnstileTable::lookup`](super::TurnstileTable::lookup), so the chain
//! lock of the lock in question is already held. Operations that consume
//! the guard release the chain lock before they take the scheduler lock.

use core::mem;

use log::{trace, warn};

use super::{ChainGuard, Turnstile};
use crate::task::sched::SchedulerBridge;
use crate::task::thread::{TdFlags, ThreadRef};

impl ChainGuard<'_> {
    /// The attached turnstile; the caller's contract says there is one.
    fn attached_mut(&mut self, op: &str) -> &mut Turnstile {
        let name = self.name;
        match self.slot {
            Some(at) => &mut *self.chain.turnstiles[at],
            None => panic!("{op} on lock {name} with no turnstile attached"),
        }
    }

    /// Record the current thread as owner of a lock that has waiters but no
    /// known owner, and lend it the priority of the most urgent waiter.
    pub fn claim<S: SchedulerBridge>(mut self, sched: &S) {
        let td = sched.current_thread();
        let table = self.table;
        let head = {
            let ts = self.attached_mut("claim");
            let mut contested = table.contested.lock();
            ts.set_owner(&td, &mut contested);
            ts.first_waiter().cloned()
        };
        trace!(target: "turnstile", "{td} claims {}", self.name);
        drop(self);

        // The owner is running, so lending needs no propagation.
        let _guard = sched.lock();
        if let Some(head) = head {
            let pri = head.priority();
            if pri > td.priority() {
                td.set_priority(pri);
            }
        }
    }

    /// Block the current thread on this guard's lock, held by `owner`.
    ///
    /// The first waiter attaches its own turnstile to the lock; later
    /// waiters queue on the attached one and park their own turnstile on
    /// its spare list. Returns once the thread has been woken by
    /// `signal`/`wakeup` and `unpend`.
    pub fn wait<S: SchedulerBridge>(mut self, owner: &ThreadRef, sched: &S) {
        let td = sched.current_thread();
        if let Some(lock) = td.blocked_on() {
            panic!("{td} waits on {} while blocked on {lock}", self.name);
        }
        assert!(!owner.is(&td), "{td} waits on {}, which it owns", self.name);
        assert!(self.detached.is_none(), "wait on a guard that already woke waiters");

        let table = self.table;
        let lock = self.lock;
        let mine = td.take_turnstile();
        if self.slot.is_none() {
            self.attach(mine);
            let ts = self.attached_mut("wait");
            ts.blocked.push_back(td.clone());
            let mut contested = table.contested.lock();
            ts.set_owner(owner, &mut contested);
        } else {
            let name = self.name;
            let ts = self.attached_mut("wait");
            {
                let mut contested = table.contested.lock();
                ts.blocked.insert(td.clone());
                ts.sync_head(&mut contested);
                match &ts.owner {
                    None => {
                        warn!(target: "turnstile", "{td} found {name} unclaimed; owner is {owner}");
                        ts.set_owner(owner, &mut contested);
                    }
                    Some(current) => debug_assert!(
                        current.is(owner),
                        "{name} owned by {current}, waiter says {owner}"
                    ),
                }
            }
            ts.free.push(mine);
        }
        trace!(target: "turnstile", "{td} blocks on {} owned by {owner}", self.name);
        drop(self);

        let mut guard = sched.lock();
        // `unpend` got here first: we were woken before we slept.
        if td.take_flag(TdFlags::TS_NOBLOCK) {
            trace!(target: "turnstile", "{td} woken before blocking");
            return;
        }
        td.set_blocked_on(Some(lock));
        td.insert_flags(TdFlags::ON_LOCK);
        table.propagate(&td, sched, &mut guard);
        sched.block(&td, guard);
    }

    /// Pick the most urgent waiter to wake.
    ///
    /// Returns `true` if that emptied the queue, in which case the
    /// turnstile is now detached from the lock (and will go to the woken
    /// thread in `unpend`). Otherwise the woken thread leaves with a spare.
    pub fn signal(&mut self) -> bool {
        let table = self.table;
        let name = self.name;
        let ts = self.attached_mut("signal");
        let td = {
            let mut contested = table.contested.lock();
            let td = match ts.blocked.pop_front() {
                Some(td) => td,
                None => panic!("signal on {name} with an empty queue"),
            };
            ts.sync_head(&mut contested);
            td
        };
        ts.pending.push_back(td.clone());

        let emptied = ts.blocked.is_empty();
        if emptied {
            assert!(ts.free.is_empty(), "{} drained with spares left", ts.id);
        } else {
            match ts.free.pop() {
                Some(spare) => td.give_turnstile(spare),
                None => panic!("{} has waiters but no spare for {td}", ts.id),
            }
        }
        trace!(target: "turnstile", "signal {name}: wake {td}");
        if emptied {
            self.detach();
        }
        emptied
    }

    /// Pick every waiter to wake and detach the turnstile from the lock.
    pub fn wakeup(&mut self) {
        let table = self.table;
        let name = self.name;
        let ts = self.attached_mut("wakeup");
        let already = ts.pending.len();
        {
            let mut contested = table.contested.lock();
            ts.blocked.drain_into(&mut ts.pending);
            ts.sync_head(&mut contested);
        }
        // The last one out gets the turnstile itself, in `unpend`.
        for td in ts.pending.iter().skip(already) {
            if let Some(spare) = ts.free.pop() {
                td.give_turnstile(spare);
            }
        }
        assert!(ts.free.is_empty(), "{} has more spares than waiters", ts.id);
        trace!(
            target: "turnstile",
            "wakeup {name}: {} waiters",
            ts.pending.len() - already
        );
        self.detach();
    }

    /// Finish releasing the lock: drop ownership, recompute the current
    /// thread's priority from the locks it still owns, and make every picked
    /// waiter runnable.
    ///
    /// A picked waiter that has not gone to sleep yet is told not to.
    pub fn unpend<S: SchedulerBridge>(self, sched: &S) {
        let td = sched.current_thread();
        let ChainGuard {
            table,
            mut chain,
            name,
            slot,
            mut detached,
            ..
        } = self;

        let pending = {
            let ts: &mut Turnstile = match (slot, detached.as_deref_mut()) {
                (Some(at), _) => &mut *chain.turnstiles[at],
                (None, Some(ts)) => ts,
                (None, None) => panic!("unpend on {name} with no turnstile"),
            };
            assert!(!ts.pending.is_empty(), "unpend on {name} with nothing pending");
            let pending = mem::take(&mut ts.pending);
            match ts.owner.take() {
                Some(owner) if owner.is(&td) => {
                    table.contested.lock().remove(owner.tid(), ts.id);
                }
                Some(owner) => panic!("{td} unpends {name}, owned by {owner}"),
                None => panic!("{td} unpends {name}, which has no owner"),
            }
            pending
        };

        if let Some(mut ts) = detached.take() {
            ts.reset();
            match pending.iter().rev().find(|t| !t.has_turnstile()) {
                Some(heir) => heir.give_turnstile(ts),
                None => panic!("{} detached with no thread to take it", ts.id),
            }
        }
        drop(chain);

        let mut guard = sched.lock();
        let base = td.base_priority();
        let pri = match table.contested.lock().top_priority(td.tid()) {
            Some(lent) => lent.max(base),
            None => base,
        };
        if pri != td.priority() {
            trace!(target: "turnstile", "{td} priority {} -> {pri}", td.priority());
        }
        td.set_priority(pri);

        for waiter in &pending {
            if waiter.take_flag(TdFlags::ON_LOCK) {
                waiter.set_blocked_on(None);
                sched.make_runnable(waiter, &mut guard);
            } else {
                waiter.insert_flags(TdFlags::TS_NOBLOCK);
            }
        }
    }
}
