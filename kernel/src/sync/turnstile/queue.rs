//! Priority-ordered thread queue.
//!
//! Most urgent first; threads of equal priority are served in arrival order.
//! Built on `LinkedList` so a whole queue can be spliced onto another in
//! O(1) (`wakeup` moves every waiter at once), and so a single thread can be
//! cut out and re-spliced without shifting the rest.

use alloc::collections::LinkedList;
use alloc::collections::linked_list::Iter;

use crate::task::thread::{Thread, ThreadRef};

#[derive(Default)]
pub struct ThreadQueue {
    list: LinkedList<ThreadRef>,
}

impl ThreadQueue {
    pub const fn new() -> Self {
        Self {
            list: LinkedList::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn front(&self) -> Option<&ThreadRef> {
        self.list.front()
    }

    pub fn iter(&self) -> Iter<'_, ThreadRef> {
        self.list.iter()
    }

    /// Append without looking at priorities (first waiter of an empty queue).
    pub fn push_back(&mut self, td: ThreadRef) {
        self.list.push_back(td);
    }

    pub fn pop_front(&mut self) -> Option<ThreadRef> {
        self.list.pop_front()
    }

    /// Queue `td` behind every thread at least as urgent.
    pub fn insert(&mut self, td: ThreadRef) {
        let pri = td.priority();
        match self.list.iter().position(|t| t.priority() < pri) {
            None => self.list.push_back(td),
            Some(at) => {
                let mut tail = self.list.split_off(at);
                self.list.push_back(td);
                self.list.append(&mut tail);
            }
        }
    }

    pub fn position(&self, td: &Thread) -> Option<usize> {
        self.list.iter().position(|t| t.is(td))
    }

    pub fn contains(&self, td: &Thread) -> bool {
        self.position(td).is_some()
    }

    pub fn remove(&mut self, td: &Thread) -> Option<ThreadRef> {
        let at = self.position(td)?;
        let mut tail = self.list.split_off(at);
        let removed = tail.pop_front();
        self.list.append(&mut tail);
        removed
    }

    /// Restore ordering around `td` after its priority changed.
    ///
    /// Leaves it in place if it is still no more urgent than its predecessor
    /// and at least as urgent as its successor. Returns whether it moved.
    pub fn reposition(&mut self, td: &Thread) -> bool {
        let Some(at) = self.position(td) else {
            return false;
        };
        let pri = td.priority();
        let prev_ok = at == 0
            || self
                .list
                .iter()
                .nth(at - 1)
                .is_some_and(|p| p.priority() >= pri);
        let next_ok = self
            .list
            .iter()
            .nth(at + 1)
            .is_none_or(|n| n.priority() <= pri);
        if prev_ok && next_ok {
            return false;
        }
        if let Some(td) = self.remove(td) {
            self.insert(td);
        }
        true
    }

    /// Move every thread onto the back of `dst`, keeping order.
    pub fn drain_into(&mut self, dst: &mut LinkedList<ThreadRef>) {
        dst.append(&mut self.list);
    }

    /// Non-increasing priority from front to back.
    pub fn is_ordered(&self) -> bool {
        self.list
            .iter()
            .zip(self.list.iter().skip(1))
            .all(|(a, b)| a.priority() >= b.priority())
    }
}

impl<'a> IntoIterator for &'a ThreadQueue {
    type Item = &'a ThreadRef;
    type IntoIter = Iter<'a, ThreadRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.list.iter()
    }
}
