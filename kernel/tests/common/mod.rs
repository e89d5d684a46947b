//! Shared test fixtures: a priority-inheriting mutex built on the public
//! turnstile entry points, and two scheduler bridges for hosted tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Condvar, Mutex, MutexGuard};

use minimalos_turnstile::sync::turnstile::{ChainGuard, LockObject, TurnstileId, TurnstileTable};
use minimalos_turnstile::task::sched::{SchedulerBridge, ThreadStatus};
use minimalos_turnstile::task::thread::{Priority, Thread, ThreadRef, Tid};

// ── Test mutex ──────────────────────────────────────────────────

/// Sleep mutex with priority inheritance.
///
/// `owner` is only read or written while the lock's chain lock is held, so
/// ownership and the turnstile always change together.
pub struct PiMutex {
    obj: LockObject,
    owner: Mutex<Option<ThreadRef>>,
}

impl PiMutex {
    pub fn new(name: &'static str) -> Self {
        Self {
            obj: LockObject::new(name),
            owner: Mutex::new(None),
        }
    }

    pub fn object(&self) -> &LockObject {
        &self.obj
    }

    pub fn owner(&self) -> Option<ThreadRef> {
        self.owner.lock().unwrap().clone()
    }

    /// One acquisition attempt. Takes the lock and returns `true`, or queues
    /// on it and returns `false` once woken (or, on a scheduler whose
    /// `block` returns immediately, once switched away).
    pub fn lock_or_wait<S: SchedulerBridge>(&self, table: &TurnstileTable, sched: &S) -> bool {
        let me = sched.current_thread();
        let guard = table.lookup(&self.obj);
        let mut owner = self.owner.lock().unwrap();
        match owner.clone() {
            None => {
                *owner = Some(me);
                drop(owner);
                if guard.has_turnstile() {
                    guard.claim(sched);
                } else {
                    guard.release();
                }
                true
            }
            Some(holder) => {
                drop(owner);
                guard.wait(&holder, sched);
                false
            }
        }
    }

    /// Acquire, retrying after every wakeup. Needs a scheduler whose
    /// `block` really sleeps.
    pub fn lock<S: SchedulerBridge>(&self, table: &TurnstileTable, sched: &S) {
        while !self.lock_or_wait(table, sched) {}
    }

    /// Release, waking the most urgent waiter.
    pub fn unlock<S: SchedulerBridge>(&self, table: &TurnstileTable, sched: &S) {
        self.release_with(table, sched, |guard| {
            guard.signal();
        });
    }

    /// Release, waking every waiter.
    pub fn unlock_all<S: SchedulerBridge>(&self, table: &TurnstileTable, sched: &S) {
        self.release_with(table, sched, |guard| guard.wakeup());
    }

    fn release_with<S: SchedulerBridge>(
        &self,
        table: &TurnstileTable,
        sched: &S,
        wake: impl FnOnce(&mut ChainGuard<'_>),
    ) {
        let me = sched.current_thread();
        let mut guard = table.lookup(&self.obj);
        {
            let mut owner = self.owner.lock().unwrap();
            assert!(owner.as_ref().is_some_and(|o| o.is(&me)), "{me} unlocks a mutex it does not hold");
            *owner = None;
        }
        if guard.has_turnstile() {
            wake(&mut guard);
            guard.unpend(sched);
        } else {
            guard.release();
        }
    }
}

// ── Checks ──────────────────────────────────────────────────────

/// Tids of the threads blocked on `m`, most urgent first.
pub fn waiters(table: &TurnstileTable, m: &PiMutex) -> Vec<Tid> {
    let guard = table.lookup(m.object());
    let tids = guard
        .turnstile()
        .map(|ts| ts.waiters().map(|t| t.tid()).collect())
        .unwrap_or_default();
    guard.release();
    tids
}

/// A turnstile is attached to each lock exactly when it has waiters.
pub fn assert_attached_iff_waiters(table: &TurnstileTable, locks: &[&PiMutex]) {
    let mut expected = 0;
    for m in locks {
        let guard = table.lookup(m.object());
        assert_eq!(guard.has_turnstile(), !guard.is_empty(), "{}", m.object().name());
        if guard.has_turnstile() {
            expected += 1;
        }
        guard.release();
    }
    assert_eq!(table.attached(), expected);
}

/// Every thread holds a turnstile or has one parked in the table, and no
/// turnstile is accounted for twice.
pub fn assert_turnstiles_exclusive(table: &TurnstileTable, threads: &[&ThreadRef]) {
    let mut ids: Vec<TurnstileId> = threads.iter().filter_map(|t| t.turnstile_id()).collect();
    ids.extend(table.census().ids());
    assert_eq!(ids.len(), threads.len(), "turnstiles lost or duplicated: {ids:?}");
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), threads.len(), "a turnstile is shared");
}

// ── Host-thread scheduler ───────────────────────────────────────

thread_local! {
    static CURRENT: RefCell<Option<ThreadRef>> = const { RefCell::new(None) };
}

#[derive(Default)]
pub struct HostState {
    status: HashMap<Tid, ThreadStatus>,
    pub blocks: HashMap<Tid, u32>,
    pub wakeups: HashMap<Tid, u32>,
    pub repositions: u32,
}

struct Gate {
    tid: Tid,
    arrived: Sender<()>,
    go: Receiver<()>,
}

/// Each kernel thread is a host thread. `block` parks it on a condvar
/// until `make_runnable` flips its status.
#[derive(Default)]
pub struct HostScheduler {
    state: Mutex<HostState>,
    wake: Condvar,
    gate: Mutex<Option<Gate>>,
}

impl HostScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the calling host thread run as `td`.
    pub fn enter(&self, td: &ThreadRef) {
        CURRENT.with(|c| *c.borrow_mut() = Some(td.clone()));
        self.state.lock().unwrap().status.insert(td.tid(), ThreadStatus::Running);
    }

    /// Stop `tid` the next time it asks for the scheduler lock, until the
    /// returned sender fires. The receiver reports its arrival.
    pub fn arm_gate(&self, tid: Tid) -> (Receiver<()>, Sender<()>) {
        let (arrived_tx, arrived_rx) = mpsc::channel();
        let (go_tx, go_rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some(Gate {
            tid,
            arrived: arrived_tx,
            go: go_rx,
        });
        (arrived_rx, go_tx)
    }

    pub fn blocks(&self, td: &Thread) -> u32 {
        self.state.lock().unwrap().blocks.get(&td.tid()).copied().unwrap_or(0)
    }

    pub fn wakeups(&self, td: &Thread) -> u32 {
        self.state.lock().unwrap().wakeups.get(&td.tid()).copied().unwrap_or(0)
    }

    pub fn status_of(&self, td: &Thread) -> Option<ThreadStatus> {
        self.state.lock().unwrap().status.get(&td.tid()).copied()
    }
}

impl SchedulerBridge for HostScheduler {
    type Guard<'a> = MutexGuard<'a, HostState>;

    fn lock(&self) -> MutexGuard<'_, HostState> {
        let me = CURRENT.with(|c| c.borrow().as_ref().map(|t| t.tid()));
        let gate = {
            let mut gate = self.gate.lock().unwrap();
            if gate.as_ref().is_some_and(|g| Some(g.tid) == me) {
                gate.take()
            } else {
                None
            }
        };
        if let Some(gate) = gate {
            gate.arrived.send(()).unwrap();
            gate.go.recv().unwrap();
        }
        self.state.lock().unwrap()
    }

    fn current_thread(&self) -> ThreadRef {
        CURRENT.with(|c| c.borrow().clone()).expect("host thread did not enter()")
    }

    fn status(&self, td: &Thread, state: &MutexGuard<'_, HostState>) -> ThreadStatus {
        state.status.get(&td.tid()).copied().unwrap_or(ThreadStatus::Running)
    }

    fn block(&self, td: &ThreadRef, mut state: MutexGuard<'_, HostState>) {
        state.status.insert(td.tid(), ThreadStatus::Blocked);
        *state.blocks.entry(td.tid()).or_default() += 1;
        while state.status.get(&td.tid()) == Some(&ThreadStatus::Blocked) {
            state = self.wake.wait(state).unwrap();
        }
        state.status.insert(td.tid(), ThreadStatus::Running);
    }

    fn make_runnable(&self, td: &ThreadRef, state: &mut MutexGuard<'_, HostState>) {
        assert_eq!(state.status.get(&td.tid()), Some(&ThreadStatus::Blocked));
        state.status.insert(td.tid(), ThreadStatus::Runnable);
        *state.wakeups.entry(td.tid()).or_default() += 1;
        self.wake.notify_all();
    }

    fn reposition(&self, _td: &ThreadRef, _pri: Priority, state: &mut MutexGuard<'_, HostState>) {
        state.repositions += 1;
    }
}

// ── Scheduler that never switches ───────────────────────────────

/// `block` returns at once and every thread counts as running. Lets a
/// single host thread play several kernel threads to reach states the
/// protocol forbids.
#[derive(Default)]
pub struct NullScheduler {
    current: Mutex<Option<ThreadRef>>,
}

impl NullScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_current(&self, td: &ThreadRef) {
        *self.current.lock().unwrap() = Some(td.clone());
    }
}

impl SchedulerBridge for NullScheduler {
    type Guard<'a> = ();

    fn lock(&self) -> Self::Guard<'_> {}

    fn current_thread(&self) -> ThreadRef {
        self.current.lock().unwrap().clone().expect("no current thread")
    }

    fn status(&self, _td: &Thread, _guard: &()) -> ThreadStatus {
        ThreadStatus::Running
    }

    fn block(&self, _td: &ThreadRef, _guard: ()) {}

    fn make_runnable(&self, _td: &ThreadRef, _guard: &mut ()) {}

    fn reposition(&self, _td: &ThreadRef, _pri: Priority, _guard: &mut ()) {}
}
