//! The chain table: lock identity -> attached turnstile.
//!
//! A fixed array of hash chains, each behind its own spinlock. A lock
//! hashes to exactly one chain; the chain lock protects membership of the
//! chain and every field of the turnstiles attached to it.

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::contested::ContestedSet;
use super::{LockId, LockObject, Turnstile};
use crate::sync::spinlock::{SpinLock, SpinLockGuard};
use crate::task::thread::{Thread, ThreadRef};

/// Number of chains. Must be a power of two.
pub const TC_TABLESIZE: usize = 128;
/// Low address bits ignored by the hash (locks are rarely that small).
pub const TC_SHIFT: u32 = 8;
pub const TC_MASK: usize = TC_TABLESIZE - 1;

const _: () = assert!(TC_TABLESIZE.is_power_of_two());

/// The chain `lock` hashes to.
pub fn chain_index(lock: LockId) -> usize {
    (lock.addr() >> TC_SHIFT) & TC_MASK
}

/// One hash bucket. Buckets are expected to be short and are scanned linearly.
pub(super) struct Chain {
    pub(super) turnstiles: Vec<Box<Turnstile>>,
}

impl Chain {
    const fn new() -> Self {
        Self {
            turnstiles: Vec::new(),
        }
    }

    pub(super) fn find(&self, lock: LockId) -> Option<usize> {
        self.turnstiles.iter().position(|ts| ts.lock == Some(lock))
    }
}

/// Every chain plus the global contested-set lock.
pub struct TurnstileTable {
    chains: [SpinLock<Chain>; TC_TABLESIZE],
    pub(super) contested: SpinLock<ContestedSet>,
}

impl TurnstileTable {
    pub const fn new() -> Self {
        Self {
            chains: [const { SpinLock::new(Chain::new()) }; TC_TABLESIZE],
            contested: SpinLock::new(ContestedSet::new()),
        }
    }

    /// Lock the chain for `lock` and find the turnstile attached to it.
    ///
    /// The chain lock stays held, whether or not a turnstile was found,
    /// until the returned guard is consumed by one of the protocol
    /// operations or by [`ChainGuard::release`].
    pub fn lookup(&self, lock: &LockObject) -> ChainGuard<'_> {
        let id = lock.id();
        let chain = self.chains[chain_index(id)].lock();
        let slot = chain.find(id);
        ChainGuard {
            table: self,
            chain,
            lock: id,
            name: lock.name(),
            slot,
            detached: None,
        }
    }

    /// Lock the chain for a lock known only by id.
    pub(super) fn chain(&self, lock: LockId) -> SpinLockGuard<'_, Chain> {
        self.chains[chain_index(lock)].lock()
    }

    /// Number of turnstiles attached across all chains.
    pub fn attached(&self) -> usize {
        self.chains.iter().map(|c| c.lock().turnstiles.len()).sum()
    }

    /// Locks `td` owns that have waiters.
    pub fn contested_locks(&self, td: &Thread) -> Vec<LockId> {
        self.contested.lock().locks(td.tid())
    }

    pub(super) fn chains(&self) -> &[SpinLock<Chain>] {
        &self.chains
    }
}

impl Default for TurnstileTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A held chain lock, positioned on one lock's turnstile (if attached).
///
/// Dropping the guard releases the chain lock. A guard that detached its
/// turnstile in `signal`/`wakeup` must be finished with `unpend`.
pub struct ChainGuard<'t> {
    pub(super) table: &'t TurnstileTable,
    pub(super) chain: SpinLockGuard<'t, Chain>,
    pub(super) lock: LockId,
    pub(super) name: &'static str,
    /// Index of the attached turnstile in `chain`.
    pub(super) slot: Option<usize>,
    /// The turnstile `signal`/`wakeup` took off the chain, until `unpend`.
    pub(super) detached: Option<Box<Turnstile>>,
}

impl<'t> ChainGuard<'t> {
    pub fn lock_id(&self) -> LockId {
        self.lock
    }

    /// A turnstile is attached to the lock, i.e. the lock has waiters.
    pub fn has_turnstile(&self) -> bool {
        self.slot.is_some()
    }

    /// The turnstile this guard works on: the attached one, or the one just
    /// detached by `signal`/`wakeup`.
    pub fn turnstile(&self) -> Option<&Turnstile> {
        match self.slot {
            Some(at) => self.chain.turnstiles.get(at).map(|ts| &**ts),
            None => self.detached.as_deref(),
        }
    }

    pub(super) fn turnstile_mut(&mut self) -> Option<&mut Turnstile> {
        match self.slot {
            Some(at) => self.chain.turnstiles.get_mut(at).map(|ts| &mut **ts),
            None => self.detached.as_deref_mut(),
        }
    }

    /// Most urgent thread blocked on the lock.
    pub fn first_waiter(&self) -> Option<&ThreadRef> {
        self.turnstile().and_then(Turnstile::first_waiter)
    }

    /// No thread is blocked on the lock.
    pub fn is_empty(&self) -> bool {
        self.turnstile().is_none_or(Turnstile::is_empty)
    }

    /// Unlock the chain without doing anything.
    pub fn release(self) {
        assert!(
            self.detached.is_none(),
            "lock {} released with a detached turnstile; call unpend",
            self.name
        );
    }

    /// Attach `ts` for this guard's lock.
    pub(super) fn attach(&mut self, mut ts: Box<Turnstile>) {
        debug_assert!(self.slot.is_none());
        ts.attach(self.lock, self.name);
        self.chain.turnstiles.push(ts);
        self.slot = Some(self.chain.turnstiles.len() - 1);
    }

    /// Take the attached turnstile off the chain; it stays with the guard.
    pub(super) fn detach(&mut self) {
        if let Some(at) = self.slot.take() {
            self.detached = Some(self.chain.turnstiles.swap_remove(at));
        }
    }
}
