#![no_std]
#![allow(unsafe_op_in_unsafe_fn)]

pub mod clock;
pub mod cpu;
pub mod init_flag;
pub mod kernel_services;
pub mod klog;
pub mod ports;
pub mod preempt;
pub mod service_cell;
pub mod service_macro;
pub mod spinlock;
pub mod testing;
pub mod waitqueue;

pub mod tsc {
    use core::arch::asm;

    #[inline(always)]
    pub fn rdtsc() -> u64 {
        let lo: u32;
        let hi: u32;
        unsafe {
            asm!(
                "rdtsc",
                out("eax") lo,
                out("edx") hi,
                options(nomem, nostack, preserves_flags)
            );
        }
        ((hi as u64) << 32) | (lo as u64)
    }
}

/// Saved CPU register state at interrupt entry, as pushed by the
/// platform's interrupt stubs. The driver treats this as opaque context
/// passed through to handlers.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct InterruptFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub vector: u64,
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

#[doc(hidden)]
pub use paste;

pub use init_flag::{InitFlag, StateFlag};
pub use klog::{
    KlogLevel, klog_get_level, klog_is_enabled, klog_register_backend, klog_set_level,
};
pub use preempt::{IrqPreemptGuard, PreemptGuard, is_preemption_disabled, preempt_count};
pub use service_cell::ServiceCell;
pub use spinlock::{IrqMutex, IrqMutexGuard};
pub use waitqueue::WaitQueue;
