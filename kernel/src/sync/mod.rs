// =============================================================================
// MinimalOS NextGen: Kernel Synchronization Primitives
// =============================================================================
//
// In a kernel, we can't use std::sync (there is no std). This module provides
// the two layers contested kernel locks are built from:
//
//   spinlock.rs  : ticket spinlock; never sleeps, masks interrupts while held
//   turnstile/   : queues for threads that must block on a contested lock,
//                   with priority inheritance toward the lock owner
//
// IMPORTANT: Lock ordering rules for the turnstile subsystem:
//   Level 1 (outermost): Scheduler lock (owned by the SchedulerBridge)
//   Level 2: Turnstile chain lock (one per hash bucket)
//   Level 3: Contested-set lock (global)
//   Level 4 (innermost): Per-thread turnstile slot lock, and the
//                        scheduler's current-thread slot
//
// `SchedulerBridge::current_thread` runs under chain locks and so may only
// take a level 4 lock.
//
// NEVER acquire an outer lock while holding an inner one. In particular a
// chain lock is always released before the scheduler lock is taken, and
// nothing that can context-switch runs while a spinlock is held.
// =============================================================================

pub mod spinlock;
pub mod turnstile;
