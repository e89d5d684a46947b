//! Real host threads contending through the turnstile protocol.

mod common;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use common::{assert_turnstiles_exclusive, HostScheduler, PiMutex};
use minimalos_turnstile::sync::turnstile::TurnstileTable;
use minimalos_turnstile::task::sched::{SchedulerBridge, ThreadStatus};
use minimalos_turnstile::task::thread::{Priority, TdFlags, Thread};
use minimalos_turnstile::task::uniproc::UniprocScheduler;

#[test]
fn every_blocked_waiter_is_woken_exactly_once() {
    const ROUNDS: u64 = 300;

    let table = TurnstileTable::new();
    let sched = HostScheduler::new();
    let m = PiMutex::new("stress");
    let inside = AtomicBool::new(false);
    let total = AtomicU64::new(0);
    let threads: Vec<_> = (0..6u8)
        .map(|i| Thread::new("worker", Priority(1 + 2 * i)))
        .collect();

    thread::scope(|s| {
        for td in &threads {
            let (table, sched, m, inside, total) = (&table, &sched, &m, &inside, &total);
            s.spawn(move || {
                sched.enter(td);
                for _ in 0..ROUNDS {
                    m.lock(table, sched);
                    assert!(!inside.swap(true, Ordering::AcqRel), "two owners at once");
                    total.fetch_add(1, Ordering::Relaxed);
                    thread::yield_now();
                    inside.store(false, Ordering::Release);
                    m.unlock(table, sched);
                }
            });
        }
    });

    assert_eq!(total.load(Ordering::Relaxed), ROUNDS * threads.len() as u64);
    assert_eq!(table.attached(), 0);
    for td in &threads {
        assert_eq!(sched.blocks(td), sched.wakeups(td), "{td}");
        assert_eq!(td.priority(), td.base_priority(), "{td} kept a loan");
        assert!(td.flags().is_empty(), "{td}: {:?}", td.flags());
        assert!(td.blocked_on().is_none());
    }
    let refs: Vec<_> = threads.iter().collect();
    assert_turnstiles_exclusive(&table, &refs);
}

#[test]
fn a_waiter_woken_before_it_sleeps_does_not_block() {
    let table = TurnstileTable::new();
    let sched = HostScheduler::new();
    let m = PiMutex::new("race");
    let owner = Thread::new("owner", Priority(1));
    let racer = Thread::new("racer", Priority(4));

    sched.enter(&owner);
    m.lock(&table, &sched);
    let (arrived, go) = sched.arm_gate(racer.tid());

    thread::scope(|s| {
        let waiter = s.spawn(|| {
            sched.enter(&racer);
            m.lock(&table, &sched);
            m.unlock(&table, &sched);
        });

        // The racer is queued and has dropped the chain lock, but has not
        // taken the scheduler lock yet.
        arrived.recv().unwrap();
        {
            let guard = table.lookup(m.object());
            assert_eq!(guard.first_waiter().map(|t| t.tid()), Some(racer.tid()));
            guard.release();
        }
        // Not asleep yet, so priority was not lent.
        assert_eq!(owner.priority(), Priority(1));

        m.unlock(&table, &sched);
        assert!(racer.flags().contains(TdFlags::TS_NOBLOCK));
        assert!(racer.has_turnstile());
        go.send(()).unwrap();

        waiter.join().unwrap();
    });

    assert_eq!(sched.blocks(&racer), 0);
    assert_eq!(sched.wakeups(&racer), 0);
    assert!(racer.flags().is_empty());
    assert_eq!(sched.status_of(&racer), Some(ThreadStatus::Running));
    assert_eq!(table.attached(), 0);
    assert_turnstiles_exclusive(&table, &[&owner, &racer]);
}

#[test]
fn a_sleeping_owner_inherits_across_host_threads() {
    let table = TurnstileTable::new();
    let sched = HostScheduler::new();
    let m = PiMutex::new("handoff");
    let owner = Thread::new("owner", Priority(2));
    let waiter = Thread::new("waiter", Priority(7));

    sched.enter(&owner);
    m.lock(&table, &sched);

    thread::scope(|s| {
        let handle = s.spawn(|| {
            sched.enter(&waiter);
            m.lock(&table, &sched);
            let held = m.owner().is_some_and(|o| o.is(&waiter));
            m.unlock(&table, &sched);
            held
        });

        while sched.status_of(&waiter) != Some(ThreadStatus::Blocked) {
            thread::yield_now();
        }
        assert_eq!(owner.priority(), Priority(7));
        assert_eq!(waiter.blocked_on(), Some(m.object().id()));
        m.unlock(&table, &sched);
        assert_eq!(owner.priority(), Priority(2));
        assert!(handle.join().unwrap());
    });

    assert_eq!(sched.blocks(&waiter), 1);
    assert_eq!(sched.wakeups(&waiter), 1);
}

#[test]
fn wakeup_hands_its_turnstile_to_a_waiter_not_yet_asleep() {
    let table = TurnstileTable::new();
    let sched = HostScheduler::new();
    let m = PiMutex::new("broadcast");
    let owner = Thread::new("owner", Priority(1));
    let sleeper = Thread::new("sleeper", Priority(5));
    let racer = Thread::new("racer", Priority(3));

    sched.enter(&owner);
    m.lock(&table, &sched);

    thread::scope(|s| {
        let (table, sched, m) = (&table, &sched, &m);
        let first = s.spawn(|| {
            sched.enter(&sleeper);
            m.lock(table, sched);
            m.unlock(table, sched);
        });
        while sched.status_of(&sleeper) != Some(ThreadStatus::Blocked) {
            thread::yield_now();
        }

        let (arrived, go) = sched.arm_gate(racer.tid());
        let second = s.spawn(|| {
            sched.enter(&racer);
            m.lock(table, sched);
            m.unlock(table, sched);
        });
        arrived.recv().unwrap();
        assert_eq!(owner.priority(), Priority(5));

        m.unlock_all(table, sched);
        assert_eq!(owner.priority(), Priority(1));
        assert_eq!(table.attached(), 0);
        // The sleeper left with the spare, the racer with the turnstile
        // that was attached to the lock.
        assert!(sleeper.has_turnstile() && racer.has_turnstile());
        assert!(racer.flags().contains(TdFlags::TS_NOBLOCK));
        assert!(!sleeper.flags().contains(TdFlags::ON_LOCK));
        go.send(()).unwrap();

        first.join().unwrap();
        second.join().unwrap();
    });

    assert!(sched.wakeups(&sleeper) >= 1);
    for td in [&sleeper, &racer] {
        assert_eq!(sched.blocks(td), sched.wakeups(td), "{td}");
        assert!(td.flags().is_empty(), "{td}: {:?}", td.flags());
        assert!(td.blocked_on().is_none());
    }
    assert_eq!(table.attached(), 0);
    assert_turnstiles_exclusive(&table, &[&owner, &sleeper, &racer]);
}

/// `claim` holds a chain lock while it asks who is running; `propagate`
/// holds the scheduler lock while it walks chains. Neither may wait on the
/// other.
#[test]
fn claim_under_a_chain_lock_does_not_wait_for_the_scheduler() {
    let table = Arc::new(TurnstileTable::new());
    let sched = Arc::new(UniprocScheduler::new());
    let m = Arc::new(PiMutex::new("order"));
    let owner = Thread::new("owner", Priority(2));
    let waiter = Thread::new("waiter", Priority(4));
    let claimer = Thread::new("claimer", Priority(6));
    for td in [&owner, &waiter, &claimer] {
        sched.spawn(td.clone());
    }

    // Leave `waiter` queued on an unowned turnstile, `claimer` running.
    sched.switch_to(&owner).unwrap();
    assert!(m.lock_or_wait(&table, &*sched));
    sched.switch_to(&waiter).unwrap();
    assert!(!m.lock_or_wait(&table, &*sched));
    assert!(sched.current().is_some_and(|t| t.is(&claimer)));
    assert!(!m.lock_or_wait(&table, &*sched));
    assert!(sched.current().is_some_and(|t| t.is(&owner)));
    m.unlock(&table, &*sched);
    sched.switch_to(&claimer).unwrap();
    assert_eq!(waiter.blocked_on(), Some(m.object().id()));

    let (locked_tx, locked_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();
    {
        let (table, sched, m, done) = (table.clone(), sched.clone(), m.clone(), done_tx.clone());
        thread::spawn(move || {
            let guard = table.lookup(m.object());
            locked_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
            guard.claim(&*sched);
            done.send("claim").unwrap();
        });
    }
    {
        let (table, sched, waiter) = (table.clone(), sched.clone(), waiter.clone());
        thread::spawn(move || {
            locked_rx.recv().unwrap();
            let mut guard = sched.lock();
            table.propagate(&waiter, &*sched, &mut guard);
            drop(guard);
            done_tx.send("propagate").unwrap();
        });
    }
    for _ in 0..2 {
        if let Err(e) = done_rx.recv_timeout(Duration::from_secs(10)) {
            panic!("claim and propagate wait on each other: {e}");
        }
    }

    let guard = table.lookup(m.object());
    let owned = guard.turnstile().and_then(|ts| ts.owner()).is_some_and(|o| o.is(&claimer));
    guard.release();
    assert!(owned);
    assert_eq!(claimer.priority(), Priority(6));
    assert_eq!(table.contested_locks(&claimer), [m.object().id()]);
}
