// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compile-time kernel configuration.
//!
//! All limits are fixed at build time; the kernel never allocates control
//! blocks dynamically. Adjust with care: every task slot costs a TCB plus a
//! stack, and the arrays below are sized directly from these values.

/// Maximum number of live tasks, including the idle task and (if the
/// software-timer module is initialized) the timer task.
pub const MAX_TASKS: usize = 16;

/// Number of TCB slots. One extra slot beyond [`MAX_TASKS`] serves as the
/// boot placeholder: it stands in for "the running task" before scheduling
/// starts and adopts the context of a task that deletes itself.
pub const NUM_TASK_SLOTS: usize = MAX_TASKS + 1;

/// Maximum number of mutex control blocks.
pub const MAX_MUTEXES: usize = 8;

/// Maximum number of event control blocks.
pub const MAX_EVENTS: usize = 8;

/// Maximum number of software timers.
pub const MAX_SWTMRS: usize = 8;

/// Tick interrupt rate, in Hz. One tick is the unit of every user-visible
/// delay and timeout.
pub const TICK_HZ: u32 = 1000;

/// Frequency of the monotonic cycle counter, in Hz. All absolute expiries
/// and time slices are kept in cycles of this clock.
pub const CYCLES_PER_SEC: u64 = 100_000_000;

/// Cycles per tick, derived.
pub const CYCLES_PER_TICK: u64 = CYCLES_PER_SEC / TICK_HZ as u64;

/// Full time slice granted to a task when its previous slice is exhausted,
/// in microseconds.
pub const TIMESLICE_US: u64 = 20_000;

/// Remaining-slice threshold below which a task is considered to have used
/// up its slice, in microseconds.
pub const MIN_SLICE_US: u64 = 50;

/// Smallest interval the tick timer is ever programmed for, in cycles.
pub const SCHED_MINI_PERIOD: u64 = CYCLES_PER_TICK;

/// Alignment granule for tick-timer programming: deadlines closer together
/// than this are considered the same and do not cause a reprogram.
pub const TICK_RESPONSE_PRECISION: u64 = (SCHED_MINI_PERIOD * 75) / 100;

/// Stack size of the idle task, in bytes.
pub const IDLE_STACK_SIZE: usize = 0x180;

/// Stack size of the software-timer task, in bytes.
pub const SWTMR_STACK_SIZE: usize = 0x300;

/// Stack size used when task creation passes zero, in bytes.
pub const DEFAULT_TASK_STACK: usize = 0x2D0;

/// Smallest acceptable task stack, in bytes.
pub const MIN_TASK_STACK: usize = 0x130;

/// Ceiling on a single task stack: requests above this are rejected as
/// certainly-wrong.
pub const HEAP_SIZE: usize = 0x10000;

/// Required alignment of task stacks, in bytes.
pub const TASK_STACK_ALIGN: usize = 8;
