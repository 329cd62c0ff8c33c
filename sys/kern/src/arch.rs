// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture/port interface.
//!
//! The kernel core is machine-independent; everything that touches hardware
//! is reached through the [`Port`] trait. A port is a zero-sized type whose
//! associated functions wrap interrupt masking, the cycle counter, the tick
//! timer, stack memory, and the context-switch request. The kernel is
//! generic over its port (`Kernel<P>`), which is what lets the whole core
//! run under a simulated port on a development host.
//!
//! An on-target port additionally provides:
//!
//! - a pended context-switch handler (PendSV or equivalent) that calls
//!   [`Kernel::task_switch`] when the request fires,
//! - a tick-timer interrupt handler that calls [`Kernel::tick_handler`],
//! - the kernel singleton, exposed via [`Port::with_kernel`] so in-kernel
//!   task bodies (idle, the timer task) can reach it.
//!
//! [`Kernel::task_switch`]: crate::Kernel::task_switch
//! [`Kernel::tick_handler`]: crate::Kernel::tick_handler
//! [`Port::with_kernel`]: Port::with_kernel

use core::ptr::NonNull;

/// Low-cost kernel assertion, used where a failure indicates kernel
/// corruption rather than a user error. Deliberately formats nothing.
macro_rules! uassert {
    ($cond:expr) => {
        if !$cond {
            panic!("kernel assertion failed")
        }
    };
}

cfg_if::cfg_if! {
    if #[cfg(not(target_os = "none"))] {
        /// Kernel log line. On hosted builds this goes to stderr; on bare
        /// metal it is stubbed out (a port can route it to ITM or
        /// semihosting by replacing this crate's logging, not via feature
        /// creep here).
        macro_rules! klog {
            ($s:expr) => { std::eprintln!($s) };
            ($s:expr, $($tt:tt)*) => { std::eprintln!($s, $($tt)*) };
        }
    } else {
        macro_rules! klog {
            ($s:expr) => {};
            ($s:expr, $($tt:tt)*) => {};
        }
    }
}

/// The architecture port consumed by the kernel core.
///
/// All functions are associated (no state on the type): a port is a
/// compile-time selection, not a runtime object. Functions that the kernel
/// calls with interrupts already masked are documented as such.
pub trait Port: Sized + 'static {
    /// Masks interrupts and returns the previous state for
    /// [`Port::irq_restore`]. Nesting must work: disable/disable/restore/
    /// restore leaves interrupts masked until the outer restore.
    fn irq_disable() -> u32;

    /// Restores the interrupt state captured by [`Port::irq_disable`].
    fn irq_restore(state: u32);

    /// Reports whether the current context is an interrupt handler. Several
    /// operations are rejected from interrupt context; others (event write)
    /// are expressly allowed there.
    fn in_interrupt() -> bool;

    /// Reads the monotonic cycle counter.
    fn current_cycles() -> u64;

    /// Programs the tick timer to fire `ns` nanoseconds from now and
    /// returns the number of cycles actually programmed (hardware timers
    /// quantize). Called with interrupts masked.
    fn tick_timer_reload(ns: u64) -> u64;

    /// Requests an asynchronous context switch and returns immediately.
    /// When the request fires, the port's handler must call
    /// [`Kernel::task_switch`] and perform the actual register swap.
    ///
    /// [`Kernel::task_switch`]: crate::Kernel::task_switch
    fn context_switch();

    /// Allocates a task stack of `size` bytes, aligned to
    /// [`config::TASK_STACK_ALIGN`]. Returns `None` when out of memory.
    ///
    /// [`config::TASK_STACK_ALIGN`]: crate::config::TASK_STACK_ALIGN
    fn alloc_stack(size: usize) -> Option<NonNull<u8>>;

    /// Frees a stack previously handed out by [`Port::alloc_stack`].
    ///
    /// # Safety
    ///
    /// `ptr`/`size` must match a live `alloc_stack` allocation, and no task
    /// may still be using it.
    unsafe fn free_stack(ptr: NonNull<u8>, size: usize);

    /// Builds the initial register frame on a fresh stack such that
    /// "returning" from the first context switch enters the task trampoline
    /// for `task_index`. Returns the opaque initial stack pointer.
    fn stack_init(
        task_index: usize,
        stack_size: usize,
        top_of_stack: NonNull<u8>,
    ) -> usize;

    /// Parks the CPU until the next interrupt. Called by the idle task when
    /// there is nothing to run. Default: busy-return.
    fn enter_sleep() {}

    /// Optional stack-guard hook, called on every switch with the incoming
    /// task's lowest stack address. An MPU-equipped port reprograms a guard
    /// region here; the default relies on the magic-word check alone.
    fn protect_stack(_top_of_stack: usize) {}

    /// Grants access to the kernel singleton hosted by this port. Only
    /// in-kernel task bodies (idle, the software-timer task) call this; a
    /// port that starts tasks must override it.
    fn with_kernel<R>(_f: impl FnOnce(&mut crate::Kernel<Self>) -> R) -> R {
        unimplemented!("port does not host a kernel singleton")
    }
}

cfg_if::cfg_if! {
    if #[cfg(not(target_os = "none"))] {
        pub mod host;
        pub use host::HostPort;
    }
}
