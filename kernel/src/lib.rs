// =============================================================================
// MinimalOS NextGen: Turnstile Subsystem
// =============================================================================
//
// This crate holds the part of the kernel that contested locks are built on.
// A lock that cannot be acquired immediately hands the calling thread to a
// turnstile: the thread is queued by priority, its priority is lent to the
// lock owner (and transitively to whoever that owner is waiting for), and it
// is woken in priority order when the lock is released.
//
// MODULE MAP:
//   arch/         : interrupt-flag save/restore used by spinlocks
//   sync/         : ticket spinlock, turnstiles, priority propagation
//   task/         : thread bookkeeping, the scheduler bridge, and a
//                    uniprocessor scheduler for hosted bring-up
//
// The crate is `#![no_std]` with `alloc`. Under `cfg(test)` it links std so
// unit tests can spawn host threads.
// =============================================================================

#![cfg_attr(not(test), no_std)]

extern crate alloc;

/// Architecture-specific code (interrupt masking).
pub mod arch;

/// Synchronization primitives: spinlock and turnstiles.
pub mod sync;

/// Threads and the scheduler interface turnstiles rely on.
pub mod task;
