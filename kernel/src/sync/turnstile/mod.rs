//! Turnstiles: queues for threads blocked on contested kernel locks.
//!
//! Every thread owns one [`Turnstile`]. When a thread is the first to block
//! on a lock, it lends its turnstile to that lock: the turnstile is attached
//! to the lock's hash chain and queues every later waiter. Later waiters
//! don't need theirs, so they park them on the attached turnstile's spare
//! list. As waiters leave, each one takes a turnstile back with it (a spare,
//! or for the last one out the attached turnstile itself), so no allocation
//! happens while locks are contended.
//!
//! While queued, a thread lends its priority to the lock owner, and through
//! that owner to whatever the owner is itself blocked on ([`propagate`]).
//!
//! A lock drives the protocol through [`TurnstileTable::lookup`], which
//! returns a [`ChainGuard`] holding the lock's chain lock:
//!
//! - `claim` records the caller as owner of a lock that already has waiters.
//! - `wait` queues the caller and blocks it.
//! - `signal` / `wakeup` pick one / all waiters to wake.
//! - `unpend` finishes a release: drops the caller's lent priority and puts
//!   the picked waiters back on run queues.
//!
//! [`propagate`]: TurnstileTable::propagate

use alloc::boxed::Box;
use alloc::collections::LinkedList;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::info;

use crate::task::thread::ThreadRef;

mod chain;
mod contested;
mod propagate;
mod protocol;
mod queue;
mod show;

pub use chain::{chain_index, ChainGuard, TurnstileTable, TC_MASK, TC_SHIFT, TC_TABLESIZE};
pub use queue::ThreadQueue;
pub use show::{Census, Link, LockChain};

use contested::{ContestedEntry, ContestedSet};

/// Run the O(n) consistency checks after each mutation.
const CHECK_INVARIANTS: bool = cfg!(any(debug_assertions, feature = "invariants"));

// ── Lock identity ───────────────────────────────────────────────

/// The part of a blocking lock that turnstiles know about.
///
/// A lock embeds one of these; its address is the lock's identity, so it
/// must not move while any thread is queued on it (statics, or locks that
/// live in pinned heap objects).
#[derive(Debug)]
pub struct LockObject {
    name: &'static str,
}

impl LockObject {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The address-derived identity used as the chain hash key.
    pub fn id(&self) -> LockId {
        LockId(self as *const Self as usize)
    }
}

/// Identity of a [`LockObject`]. Compared, hashed, never dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(usize);

impl LockId {
    /// Rebuild an id from [`LockId::addr`]; 0 means "no lock".
    pub(crate) fn from_raw(addr: usize) -> Option<Self> {
        (addr != 0).then_some(Self(addr))
    }

    pub fn addr(self) -> usize {
        self.0
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// ── Turnstile ───────────────────────────────────────────────────

static NEXT_TURNSTILE: AtomicU64 = AtomicU64::new(1);

/// Stable name of a turnstile object for diagnostics and accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TurnstileId(pub u64);

impl fmt::Display for TurnstileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ts#{}", self.0)
    }
}

/// Waiter queues for one contested lock.
///
/// Fields other than `id` are protected by the chain lock of the lock the
/// turnstile is attached to. An unattached turnstile belongs to a single
/// thread (or spare list) and is idle.
pub struct Turnstile {
    id: TurnstileId,
    /// Lock this turnstile serves, while attached.
    lock: Option<LockId>,
    lock_name: &'static str,
    /// Thread holding `lock`, once known.
    owner: Option<ThreadRef>,
    /// Threads waiting for `lock`, most urgent first.
    blocked: ThreadQueue,
    /// Threads picked by `signal`/`wakeup`, not yet handed back to the scheduler.
    pending: LinkedList<ThreadRef>,
    /// Turnstiles lent by the second and later waiters.
    free: Vec<Box<Turnstile>>,
}

impl Turnstile {
    pub(crate) fn new() -> Box<Self> {
        Box::new(Self {
            id: TurnstileId(NEXT_TURNSTILE.fetch_add(1, Ordering::Relaxed)),
            lock: None,
            lock_name: "",
            owner: None,
            blocked: ThreadQueue::new(),
            pending: LinkedList::new(),
            free: Vec::new(),
        })
    }

    pub fn id(&self) -> TurnstileId {
        self.id
    }

    pub fn lock(&self) -> Option<LockId> {
        self.lock
    }

    pub fn lock_name(&self) -> &'static str {
        self.lock_name
    }

    pub fn owner(&self) -> Option<&ThreadRef> {
        self.owner.as_ref()
    }

    /// Blocked threads, most urgent first.
    pub fn waiters(&self) -> impl Iterator<Item = &ThreadRef> {
        self.blocked.iter()
    }

    pub fn first_waiter(&self) -> Option<&ThreadRef> {
        self.blocked.front()
    }

    /// No thread is blocked here.
    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of turnstiles parked on the spare list.
    pub fn spares(&self) -> usize {
        self.free.len()
    }

    /// Unattached, unowned, with nothing queued or parked.
    pub(crate) fn is_idle(&self) -> bool {
        self.lock.is_none()
            && self.owner.is_none()
            && self.blocked.is_empty()
            && self.pending.is_empty()
            && self.free.is_empty()
    }

    fn attach(&mut self, lock: LockId, name: &'static str) {
        debug_assert!(self.is_idle(), "{} attached while busy", self.id);
        self.lock = Some(lock);
        self.lock_name = name;
    }

    /// Forget the lock once every thread has been handed back.
    fn reset(&mut self) {
        debug_assert!(self.blocked.is_empty() && self.pending.is_empty() && self.free.is_empty());
        self.lock = None;
        self.lock_name = "";
        self.owner = None;
    }

    /// Record `owner` and enter this turnstile in its contested set.
    /// Contested-set lock held.
    fn set_owner(&mut self, owner: &ThreadRef, contested: &mut ContestedSet) {
        assert!(self.owner.is_none(), "{} already has an owner", self.id);
        let lock = match self.lock {
            Some(lock) => lock,
            None => panic!("{} owned while unattached", self.id),
        };
        contested.insert(
            owner.tid(),
            ContestedEntry {
                ts: self.id,
                lock,
                head: self.blocked.front().cloned(),
            },
        );
        self.owner = Some(owner.clone());
    }

    /// Queue order and the owner's contested entry agree with the queues.
    /// Chain lock and scheduler lock held, so no priority is mid-update.
    fn check(&self, contested: &ContestedSet) {
        if !CHECK_INVARIANTS {
            return;
        }
        assert!(self.blocked.is_ordered(), "{} queue out of priority order", self.id);
        if let Some(owner) = &self.owner {
            assert!(
                contested.contains(owner.tid(), self.id),
                "{} missing from the contested set of {owner}",
                self.id
            );
            let recorded = contested.head(owner.tid(), self.id);
            let same = match (recorded, self.blocked.front()) {
                (Some(a), Some(b)) => a.is(b),
                (None, None) => true,
                _ => false,
            };
            assert!(same, "{} contested head is stale", self.id);
        }
    }

    /// Tell the owner's contested set who is at the head of `blocked` now.
    /// Contested-set lock held.
    fn sync_head(&self, contested: &mut ContestedSet) {
        if let Some(owner) = &self.owner {
            contested.refresh(owner.tid(), self.id, self.blocked.front().cloned());
        }
    }
}

// ── Global table ────────────────────────────────────────────────

static TURNSTILES: TurnstileTable = TurnstileTable::new();
static READY: AtomicBool = AtomicBool::new(false);

/// Bring up the turnstile table. Call once, before any blocking lock is used.
pub fn init() {
    if READY.swap(true, Ordering::AcqRel) {
        return;
    }
    info!(
        target: "turnstile",
        "{} chains (hash = addr >> {} & {:#x})",
        TC_TABLESIZE,
        TC_SHIFT,
        TC_MASK
    );
}

/// The system turnstile table.
///
/// Panics if [`init`] has not run.
pub fn turnstiles() -> &'static TurnstileTable {
    assert!(READY.load(Ordering::Acquire), "turnstiles used before init");
    &TURNSTILES
}
