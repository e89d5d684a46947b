// =============================================================================
// MinimalOS NextGen: Architecture Abstraction
// =============================================================================
//
// The turnstile code only needs one thing from the CPU: the ability to mask
// local interrupts while a spinlock is held.
// =============================================================================

pub mod irq;
