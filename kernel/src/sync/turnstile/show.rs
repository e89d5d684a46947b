//! Debugger views: "show turnstile", "show lockchain", and a census of
//! every turnstile the table can reach.

use alloc::vec::Vec;
use core::fmt;

use super::{LockId, Turnstile, TurnstileId, TurnstileTable};
use crate::task::thread::ThreadRef;

fn write_queue<'a>(
    f: &mut fmt::Formatter<'_>,
    label: &str,
    threads: impl Iterator<Item = &'a ThreadRef>,
) -> fmt::Result {
    write!(f, "\t{label}:")?;
    let mut empty = true;
    for td in threads {
        write!(f, " {td} [{}]", td.priority())?;
        empty = false;
    }
    if empty {
        write!(f, " empty")?;
    }
    writeln!(f)
}

impl fmt::Display for Turnstile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lock {
            Some(lock) => writeln!(f, "{} lock: {} ({lock})", self.id, self.lock_name)?,
            None => writeln!(f, "{} lock: none", self.id)?,
        }
        match &self.owner {
            Some(owner) => writeln!(f, "\towner: {owner} [{}]", owner.priority())?,
            None => writeln!(f, "\towner: none")?,
        }
        write_queue(f, "blocked", self.blocked.iter())?;
        write_queue(f, "pending", self.pending.iter())?;
        write!(f, "\tspares: {}", self.free.len())
    }
}

/// One thread on a lock chain, and the lock it waits on.
pub struct Link {
    pub thread: ThreadRef,
    pub lock: Option<(LockId, &'static str)>,
}

/// The chain of locks and owners a thread waits behind.
pub struct LockChain {
    links: Vec<Link>,
    /// The walk came back to a thread already on the chain.
    cycle: Option<ThreadRef>,
}

impl LockChain {
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Threads on the chain, starting with the one asked about.
    pub fn threads(&self) -> impl Iterator<Item = &ThreadRef> {
        self.links.iter().map(|l| &l.thread)
    }

    pub fn is_cycle(&self) -> bool {
        self.cycle.is_some()
    }
}

impl fmt::Display for LockChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for link in &self.links {
            let td = &link.thread;
            match link.lock {
                Some((id, name)) => {
                    writeln!(f, "{td} [{}] blocked on lock {name} ({id})", td.priority())?
                }
                None => writeln!(f, "{td} [{}] is not blocked", td.priority())?,
            }
        }
        if let Some(td) = &self.cycle {
            writeln!(f, "{td} again: deadlock")?;
        }
        Ok(())
    }
}

/// Every turnstile reachable from the chains.
#[derive(Debug, Default)]
pub struct Census {
    /// Attached to a lock.
    pub attached: Vec<TurnstileId>,
    /// Parked on an attached turnstile's spare list.
    pub spares: Vec<TurnstileId>,
    /// (owner, lock) pairs in the contested set.
    pub contested: usize,
}

impl Census {
    pub fn total(&self) -> usize {
        self.attached.len() + self.spares.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = TurnstileId> + '_ {
        self.attached.iter().chain(&self.spares).copied()
    }
}

impl TurnstileTable {
    /// Walk from `td` through the locks it waits on to their owners, until
    /// a thread that is not blocked, a lock with no owner, or a repeat.
    pub fn lockchain(&self, td: &ThreadRef) -> LockChain {
        let mut links: Vec<Link> = Vec::new();
        let mut cycle = None;
        let mut cur = td.clone();
        loop {
            let Some(lock) = cur.blocked_on() else {
                links.push(Link { thread: cur, lock: None });
                break;
            };
            let (name, owner) = {
                let chain = self.chain(lock);
                match chain.find(lock) {
                    Some(at) => {
                        let ts = &chain.turnstiles[at];
                        (ts.lock_name, ts.owner.clone())
                    }
                    None => ("?", None),
                }
            };
            links.push(Link {
                thread: cur,
                lock: Some((lock, name)),
            });
            let Some(owner) = owner else {
                break;
            };
            if links.iter().any(|l| l.thread.is(&owner)) {
                cycle = Some(owner);
                break;
            }
            cur = owner;
        }
        LockChain { links, cycle }
    }

    /// Collect the ids of all attached and parked turnstiles, one chain
    /// at a time.
    pub fn census(&self) -> Census {
        let mut census = Census::default();
        for chain in self.chains() {
            let chain = chain.lock();
            for ts in &chain.turnstiles {
                census.attached.push(ts.id);
                census.spares.extend(ts.free.iter().map(|s| s.id));
            }
        }
        census.contested = self.contested.lock().len();
        census
    }

    /// Render every attached turnstile.
    pub fn show(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        for chain in self.chains() {
            let chain = chain.lock();
            for ts in &chain.turnstiles {
                writeln!(out, "{ts}")?;
            }
        }
        Ok(())
    }
}
