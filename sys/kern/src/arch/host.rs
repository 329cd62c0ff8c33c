// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated port for development hosts.
//!
//! This port backs the kernel's test suite: time is a thread-local counter
//! the test advances by hand, "interrupt masking" is a depth counter, and a
//! requested context switch merely raises a flag that the test consumes by
//! calling [`Kernel::task_switch`] itself -- the cooperative stand-in for
//! PendSV. Nothing here ever runs task code; tests act out the tasks.
//!
//! [`Kernel::task_switch`]: crate::Kernel::task_switch

use super::Port;
use crate::config;
use crate::time;
use core::cell::Cell;
use core::ptr::NonNull;
use std::alloc::{alloc, dealloc, Layout};

thread_local! {
    static CYCLES: Cell<u64> = Cell::new(0);
    static IRQ_DEPTH: Cell<u32> = Cell::new(0);
    static IN_INTERRUPT: Cell<bool> = Cell::new(false);
    static SWITCH_PENDED: Cell<bool> = Cell::new(false);
    static TIMER_DEADLINE: Cell<Option<u64>> = Cell::new(None);
}

/// The simulated port. Uninhabited: only its associated functions exist.
pub enum HostPort {}

impl Port for HostPort {
    fn irq_disable() -> u32 {
        IRQ_DEPTH.with(|d| {
            let prev = d.get();
            d.set(prev + 1);
            prev
        })
    }

    fn irq_restore(state: u32) {
        IRQ_DEPTH.with(|d| d.set(state));
    }

    fn in_interrupt() -> bool {
        IN_INTERRUPT.with(|i| i.get())
    }

    fn current_cycles() -> u64 {
        CYCLES.with(|c| c.get())
    }

    fn tick_timer_reload(ns: u64) -> u64 {
        let programmed = time::ns_to_cycles(ns);
        let now = CYCLES.with(|c| c.get());
        TIMER_DEADLINE.with(|t| t.set(Some(now + programmed)));
        programmed
    }

    fn context_switch() {
        SWITCH_PENDED.with(|p| p.set(true));
    }

    fn alloc_stack(size: usize) -> Option<NonNull<u8>> {
        let layout =
            Layout::from_size_align(size, config::TASK_STACK_ALIGN).ok()?;
        // Safety: layout has nonzero size for any valid task stack.
        NonNull::new(unsafe { alloc(layout) })
    }

    unsafe fn free_stack(ptr: NonNull<u8>, size: usize) {
        let layout =
            Layout::from_size_align(size, config::TASK_STACK_ALIGN).unwrap();
        dealloc(ptr.as_ptr(), layout);
    }

    fn stack_init(
        _task_index: usize,
        stack_size: usize,
        top_of_stack: NonNull<u8>,
    ) -> usize {
        // Pretend a register frame was pushed; point the sp a frame's worth
        // below the high end of the stack.
        top_of_stack.as_ptr() as usize + stack_size - 64
    }
}

// Test controls. These manipulate the thread-local machine state the same
// way hardware would.

/// Sets the simulated cycle counter.
pub fn set_cycles(v: u64) {
    CYCLES.with(|c| c.set(v));
}

/// Advances the simulated cycle counter.
pub fn advance_cycles(delta: u64) {
    CYCLES.with(|c| c.set(c.get() + delta));
}

/// Reads the simulated cycle counter.
pub fn cycles() -> u64 {
    CYCLES.with(|c| c.get())
}

/// Returns whether a context switch was requested since the last call, and
/// clears the flag. Tests follow a `true` with `Kernel::task_switch`.
pub fn take_pended_switch() -> bool {
    SWITCH_PENDED.with(|p| p.replace(false))
}

/// Marks the current context as interrupt (or not), for exercising the
/// in-interrupt rejection paths.
pub fn set_in_interrupt(active: bool) {
    IN_INTERRUPT.with(|i| i.set(active));
}

/// The absolute cycle deadline the tick timer is currently armed for, as
/// of the most recent reload. Tests use this to fire ticks exactly when
/// the hardware would.
pub fn programmed_deadline() -> Option<u64> {
    TIMER_DEADLINE.with(|t| t.get())
}

/// Disarms the simulated timer. The timer is one-shot: a test that fires
/// a tick at the programmed deadline clears it first, and the kernel
/// re-arms during tick handling if anything remains scheduled.
pub fn clear_programmed_deadline() {
    TIMER_DEADLINE.with(|t| t.set(None));
}

/// Current interrupt-mask nesting depth; zero means unmasked. Tests use
/// this to confirm the kernel restores what it disables.
pub fn irq_depth() -> u32 {
    IRQ_DEPTH.with(|d| d.get())
}
