//! Local interrupt flag management.
//!
//! On the bare-metal kernel target these compile to PUSHFQ/CLI/STI through
//! the `x86_64` crate. On a hosted target (unit and integration tests) there
//! is no interrupt flag to touch: user mode would fault on CLI, so the
//! functions report "disabled" and do nothing.

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod imp {
    use x86_64::instructions::interrupts;

    #[inline(always)]
    pub fn enabled() -> bool {
        interrupts::are_enabled()
    }

    #[inline(always)]
    pub fn disable() {
        interrupts::disable();
    }

    #[inline(always)]
    pub fn enable() {
        interrupts::enable();
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod imp {
    #[inline(always)]
    pub fn enabled() -> bool {
        false
    }

    #[inline(always)]
    pub fn disable() {}

    #[inline(always)]
    pub fn enable() {}
}

/// Interrupt state captured by [`save_and_disable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct IrqState {
    was_enabled: bool,
}

/// Checks whether maskable interrupts are enabled on this core.
#[inline(always)]
pub fn interrupts_enabled() -> bool {
    imp::enabled()
}

/// Disables interrupts on this core and returns what to restore later.
///
/// The state is read BEFORE disabling so nested save/restore pairs unwind
/// to exactly the state the outermost caller saw.
#[inline(always)]
pub fn save_and_disable() -> IrqState {
    let was_enabled = imp::enabled();
    imp::disable();
    IrqState { was_enabled }
}

/// Restores the interrupt flag captured by [`save_and_disable`].
#[inline(always)]
pub fn restore(state: IrqState) {
    if state.was_enabled {
        imp::enable();
    }
}
