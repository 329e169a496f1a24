//! Interrupt flag management: sti, cli, irqsave/irqrestore.

use x86_64::instructions::interrupts;
use x86_64::registers::rflags::{self, RFlags};

/// Enable interrupts (STI).
#[inline(always)]
pub fn enable_interrupts() {
    interrupts::enable();
}

/// Disable interrupts (CLI).
#[inline(always)]
pub fn disable_interrupts() {
    interrupts::disable();
}

/// Save RFLAGS and disable interrupts (irqsave pattern).
/// Returns the saved RFLAGS value.
#[inline(always)]
pub fn save_flags_cli() -> u64 {
    let flags = rflags::read_raw();
    interrupts::disable();
    flags
}

/// Restore interrupt flag from saved RFLAGS (irqrestore pattern).
/// Only re-enables interrupts if they were enabled in the saved flags.
#[inline(always)]
pub fn restore_flags(flags: u64) {
    if flags & RFlags::INTERRUPT_FLAG.bits() != 0 {
        interrupts::enable();
    }
}

/// Returns true if interrupts are currently enabled (IF bit set).
#[inline(always)]
pub fn are_interrupts_enabled() -> bool {
    interrupts::are_enabled()
}

/// Spin-wait hint (PAUSE).
#[inline(always)]
pub fn pause() {
    core::hint::spin_loop();
}
