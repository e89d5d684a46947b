// =============================================================================
// MinimalOS NextGen: Ticket Spinlock
// =============================================================================
//
// The lowest-level lock in the kernel. Turnstile chain locks and the global
// contested-set lock are both SpinLocks: they protect short, bounded critical
// sections and MUST NOT be held across anything that can block or switch.
//
// HOW IT WORKS:
//   - Two counters: `next_ticket` and `now_serving`
//   - To lock: atomically increment `next_ticket`, get your ticket number.
//     Spin until `now_serving` equals your ticket.
//   - To unlock: increment `now_serving`, which lets the next waiter proceed.
//
// Tickets make the lock FIFO-fair, so a chain lock hammered by many CPUs
// still serves every waiter in bounded time.
//
// IRQ SAFETY:
//   Interrupts are masked on the local core for as long as the lock is held.
//   Otherwise an interrupt handler that contends for the same lock would
//   spin forever on top of the holder. The previous state is restored on
//   unlock, so nested lock/unlock pairs work correctly.
//
// =============================================================================

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

use crate::arch::irq::{self, IrqState};

/// A ticket-based spinlock that disables interrupts while held.
///
/// # Examples
/// ```
/// use minimalos_turnstile::sync::spinlock::SpinLock;
///
/// static COUNTER: SpinLock<u64> = SpinLock::new(0);
///
/// {
///     let mut guard = COUNTER.lock();
///     *guard += 1;
/// } // Lock automatically released when guard goes out of scope
/// assert_eq!(*COUNTER.lock(), 1);
/// ```
pub struct SpinLock<T> {
    /// The next ticket to be dispensed (atomically incremented by each locker).
    next_ticket: AtomicU32,

    /// The ticket number currently being served (incremented on unlock).
    now_serving: AtomicU32,

    /// The protected data. UnsafeCell is required because we mutate through
    /// a shared reference (the lock ensures exclusive access at runtime).
    data: UnsafeCell<T>,
}

// SAFETY: the lock hands out access to T on one core at a time, so sharing
// the lock only requires that T may move between cores.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new, unlocked spinlock. `const` so it can back a static.
    pub const fn new(value: T) -> Self {
        Self {
            next_ticket: AtomicU32::new(0),
            now_serving: AtomicU32::new(0),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, disabling interrupts on the current core first.
    ///
    /// Spins (with a PAUSE hint) while another core holds the lock.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let irq = irq::save_and_disable();

        // Relaxed is enough for taking a ticket: the Acquire load in the
        // spin loop is what orders us after the previous holder.
        let my_ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        while self.now_serving.load(Ordering::Acquire) != my_ticket {
            core::hint::spin_loop();
        }

        SpinLockGuard { lock: self, irq }
    }

    /// Attempts to acquire the lock without spinning.
    ///
    /// Returns `None` (with the interrupt flag restored) if another core
    /// holds the lock or is queued for it.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let irq = irq::save_and_disable();

        let current = self.now_serving.load(Ordering::Relaxed);
        let result = self.next_ticket.compare_exchange(
            current,
            current.wrapping_add(1),
            Ordering::Acquire,
            Ordering::Relaxed,
        );

        match result {
            Ok(_) => Some(SpinLockGuard { lock: self, irq }),
            Err(_) => {
                irq::restore(irq);
                None
            }
        }
    }

    /// Whether some core currently holds (or is queued for) the lock.
    ///
    /// Only meaningful for assertions; the answer may be stale on return.
    pub fn is_locked(&self) -> bool {
        self.next_ticket.load(Ordering::Relaxed) != self.now_serving.load(Ordering::Relaxed)
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// `&mut self` proves nobody else can hold the lock.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// RAII guard for a held spinlock.
///
/// Dropping the guard serves the next ticket and restores the interrupt
/// state that was saved when the lock was taken.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    irq: IrqState,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: holding the guard means holding the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard means holding the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Release ordering publishes our writes to the next ticket holder.
        self.lock.now_serving.fetch_add(1, Ordering::Release);
        irq::restore(self.irq);
    }
}
