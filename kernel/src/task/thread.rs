//! Thread bookkeeping touched by the turnstile core.
//!
//! The scheduler owns threads; turnstiles only need a handful of fields:
//! priorities, the lock a thread is blocked on, two flags, and the slot
//! holding the thread's current turnstile.
//!
//! Field protection:
//!   - `priority`, `base_priority`, `flags`, `blocked_on`: written with the
//!     scheduler lock held, read anywhere (atomics).
//!   - `turnstile`: its own leaf spinlock; written by `wait` (taking it)
//!     and by the thread that wakes us (handing one back).

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use bitflags::bitflags;

use crate::sync::spinlock::SpinLock;
use crate::sync::turnstile::{LockId, Turnstile, TurnstileId};

// ── Thread identifiers ──────────────────────────────────────────

/// Monotonically increasing TID counter.
static NEXT_TID: AtomicU64 = AtomicU64::new(1);

/// Allocate a unique TID.
fn alloc_tid() -> Tid {
    Tid(NEXT_TID.fetch_add(1, Ordering::Relaxed))
}

/// Kernel thread identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(pub u64);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid {}", self.0)
    }
}

// ── Priority ────────────────────────────────────────────────────

/// Scheduling priority. A larger value is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub u8);

impl Priority {
    /// Least urgent.
    pub const IDLE: Priority = Priority(0);
    /// Most urgent.
    pub const MAX: Priority = Priority(u8::MAX);
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Flags ───────────────────────────────────────────────────────

bitflags! {
    /// Turnstile-related thread flags. Scheduler lock held for writes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TdFlags: u32 {
        /// Asleep on a turnstile; only `unpend` may make it runnable.
        const ON_LOCK = 1 << 0;
        /// `unpend` reached this thread before it went to sleep in `wait`;
        /// `wait` must return instead of blocking.
        const TS_NOBLOCK = 1 << 1;
    }
}

// ── Thread ──────────────────────────────────────────────────────

/// Shared handle to a thread.
pub type ThreadRef = Arc<Thread>;

pub struct Thread {
    tid: Tid,
    /// Human-readable name for diagnostics.
    name: String,
    /// Effective priority, possibly lent by waiters.
    priority: AtomicU8,
    /// Priority the thread returns to when nothing is lent to it.
    base_priority: AtomicU8,
    flags: AtomicU32,
    /// `LockId` address of the lock this thread sleeps on, 0 if none.
    blocked_on: AtomicUsize,
    /// The turnstile this thread brings to the next lock it blocks on.
    /// Empty exactly while the thread is queued on (or being woken from) a lock.
    turnstile: SpinLock<Option<Box<Turnstile>>>,
}

impl Thread {
    /// Create a thread at `base` priority with its own turnstile.
    pub fn new(name: &str, base: Priority) -> ThreadRef {
        Arc::new(Self {
            tid: alloc_tid(),
            name: String::from(name),
            priority: AtomicU8::new(base.0),
            base_priority: AtomicU8::new(base.0),
            flags: AtomicU32::new(0),
            blocked_on: AtomicUsize::new(0),
            turnstile: SpinLock::new(Some(Turnstile::new())),
        })
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Same thread (identity, not equality of fields).
    #[inline]
    pub fn is(&self, other: &Thread) -> bool {
        core::ptr::eq(self, other)
    }

    pub fn priority(&self) -> Priority {
        Priority(self.priority.load(Ordering::Relaxed))
    }

    /// Set the effective priority. Caller holds the scheduler lock.
    pub fn set_priority(&self, pri: Priority) {
        self.priority.store(pri.0, Ordering::Relaxed);
    }

    pub fn base_priority(&self) -> Priority {
        Priority(self.base_priority.load(Ordering::Relaxed))
    }

    /// Set the base priority. Caller holds the scheduler lock.
    ///
    /// The effective priority is left alone; a blocked thread whose
    /// effective priority changes must also go through `adjust`.
    pub fn set_base_priority(&self, pri: Priority) {
        self.base_priority.store(pri.0, Ordering::Relaxed);
    }

    pub fn flags(&self) -> TdFlags {
        TdFlags::from_bits_retain(self.flags.load(Ordering::Acquire))
    }

    pub(crate) fn insert_flags(&self, flags: TdFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// Clear `flag`, reporting whether it was set.
    pub(crate) fn take_flag(&self, flag: TdFlags) -> bool {
        let old = self.flags.fetch_and(!flag.bits(), Ordering::AcqRel);
        TdFlags::from_bits_retain(old).contains(flag)
    }

    /// Asleep on a turnstile.
    pub fn is_on_lock(&self) -> bool {
        self.flags().contains(TdFlags::ON_LOCK)
    }

    /// The lock this thread is blocked on, if any.
    pub fn blocked_on(&self) -> Option<LockId> {
        LockId::from_raw(self.blocked_on.load(Ordering::Acquire))
    }

    pub(crate) fn set_blocked_on(&self, lock: Option<LockId>) {
        let raw = lock.map_or(0, LockId::addr);
        self.blocked_on.store(raw, Ordering::Release);
    }

    /// Whether the thread currently holds a turnstile.
    pub fn has_turnstile(&self) -> bool {
        self.turnstile.lock().is_some()
    }

    pub fn turnstile_id(&self) -> Option<TurnstileId> {
        self.turnstile.lock().as_ref().map(|ts| ts.id())
    }

    /// Take the thread's turnstile to lend it to a lock.
    pub(crate) fn take_turnstile(&self) -> Box<Turnstile> {
        match self.turnstile.lock().take() {
            Some(ts) => ts,
            None => panic!("{self} has no turnstile to block with"),
        }
    }

    /// Hand a (clean) turnstile to a thread being woken.
    pub(crate) fn give_turnstile(&self, ts: Box<Turnstile>) {
        let mut slot = self.turnstile.lock();
        assert!(slot.is_none(), "{self} was handed a second turnstile");
        *slot = Some(ts);
    }

    /// Free the thread's turnstile as the thread is destroyed.
    ///
    /// Panics if the turnstile is still lent to a lock: the thread is
    /// queued somewhere and destroying it would corrupt that queue.
    pub fn release_turnstile(&self) {
        let ts = self.turnstile.lock().take();
        match ts {
            Some(ts) => {
                assert!(ts.is_idle(), "{self} is being destroyed with a busy turnstile");
                drop(ts);
            }
            None => panic!("{self} destroyed while its turnstile is attached to a lock"),
        }
    }
}

impl fmt::Display for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.tid, self.name)
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid.0)
            .field("name", &self.name)
            .field("priority", &self.priority())
            .field("base_priority", &self.base_priority())
            .field("flags", &self.flags())
            .finish()
    }
}
