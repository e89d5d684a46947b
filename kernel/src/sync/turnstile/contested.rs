//! Per-owner record of contested locks.
//!
//! For each thread that owns at least one lock with waiters, the set keeps
//! one entry per such lock together with the lock's most urgent waiter. When
//! the owner releases one of them, the remaining heads decide how much
//! priority it keeps borrowing.
//!
//! Protected by the table's global contested-set spinlock, which nests
//! inside chain locks.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use super::{LockId, TurnstileId};
use crate::task::thread::{Priority, ThreadRef, Tid};

pub(super) struct ContestedEntry {
    pub(super) ts: TurnstileId,
    pub(super) lock: LockId,
    /// Most urgent waiter; its live priority is what the owner inherits.
    pub(super) head: Option<ThreadRef>,
}

#[derive(Default)]
pub(super) struct ContestedSet {
    owners: BTreeMap<Tid, Vec<ContestedEntry>>,
}

impl ContestedSet {
    pub(super) const fn new() -> Self {
        Self {
            owners: BTreeMap::new(),
        }
    }

    pub(super) fn insert(&mut self, owner: Tid, entry: ContestedEntry) {
        let entries = self.owners.entry(owner).or_default();
        debug_assert!(
            entries.iter().all(|e| e.ts != entry.ts),
            "{} entered twice in the contested set of {owner}",
            entry.ts
        );
        entries.push(entry);
    }

    /// Drop `ts` from `owner`'s set. Returns whether it was there.
    pub(super) fn remove(&mut self, owner: Tid, ts: TurnstileId) -> bool {
        let Some(entries) = self.owners.get_mut(&owner) else {
            return false;
        };
        let Some(at) = entries.iter().position(|e| e.ts == ts) else {
            return false;
        };
        entries.swap_remove(at);
        if entries.is_empty() {
            self.owners.remove(&owner);
        }
        true
    }

    pub(super) fn refresh(&mut self, owner: Tid, ts: TurnstileId, head: Option<ThreadRef>) {
        if let Some(entry) = self
            .owners
            .get_mut(&owner)
            .and_then(|entries| entries.iter_mut().find(|e| e.ts == ts))
        {
            entry.head = head;
        }
    }

    /// Most urgent waiter priority over every lock `owner` still holds.
    pub(super) fn top_priority(&self, owner: Tid) -> Option<Priority> {
        self.owners
            .get(&owner)?
            .iter()
            .filter_map(|e| e.head.as_ref().map(|td| td.priority()))
            .max()
    }

    pub(super) fn locks(&self, owner: Tid) -> Vec<LockId> {
        self.owners
            .get(&owner)
            .map(|entries| entries.iter().map(|e| e.lock).collect())
            .unwrap_or_default()
    }

    pub(super) fn contains(&self, owner: Tid, ts: TurnstileId) -> bool {
        self.owners
            .get(&owner)
            .is_some_and(|entries| entries.iter().any(|e| e.ts == ts))
    }

    pub(super) fn head(&self, owner: Tid, ts: TurnstileId) -> Option<&ThreadRef> {
        self.owners
            .get(&owner)?
            .iter()
            .find(|e| e.ts == ts)?
            .head
            .as_ref()
    }

    /// Number of (owner, lock) pairs recorded.
    pub(super) fn len(&self) -> usize {
        self.owners.values().map(Vec::len).sum()
    }
}
