// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small preemptive real-time kernel for single-core microcontrollers.
//!
//! The core is four tightly coupled pieces: a fixed-priority, round-robin-
//! within-priority scheduler driven by a tick interrupt; the *sortlinks*,
//! ordered lists of pending absolute expirations backing sleeps, timed IPC
//! waits, and software timers; IPC objects (event flags and recursive
//! mutexes with priority inheritance); and a fixed-block pool allocator for
//! kernel-adjacent storage.
//!
//! # Design principles
//!
//! 1. Safe code wherever reasonable. Kernel objects refer to each other by
//!    dense integer index into fixed arrays -- never by pointer -- so the
//!    cyclic task/mutex/wait-queue graph needs no unsafe and no lifetimes.
//!    The exceptions are the pool allocator and stack poisoning, which are
//!    about raw memory by nature.
//! 2. One state struct. Everything the kernel owns lives in [`Kernel`],
//!    created once at boot. There is no hidden global; a port hosts the
//!    singleton and hands it to interrupt handlers.
//! 3. Simple, clear algorithms over clever ones. Queues are index-linked
//!    lists, the ready set is a 32-bit bitmap, timed waits are one sorted
//!    list per class.
//! 4. The machine behind a trait. Interrupt masking, the cycle counter, the
//!    tick timer, stacks, and the context-switch request sit behind
//!    [`arch::Port`], so the entire kernel runs -- and is tested -- against a
//!    simulated port on a development host.
//!
//! # Concurrency model
//!
//! The kernel's only internal synchronization primitive is interrupt
//! masking. Every mutation of scheduler or IPC state happens in a short
//! masked section; there are no nested locks anywhere. Blocking calls park
//! the caller, request a context switch from the port, and complete when
//! the task is next scheduled: on hardware the switch happens inside the
//! call, while tests drive [`Kernel::task_switch`] and
//! [`Kernel::tick_handler`] explicitly through the host port.

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
pub mod arch;

pub mod config;
pub mod event;
pub mod fail;
pub mod list;
pub mod membox;
pub mod mutex;
pub mod sched;
pub mod sortlink;
pub mod startup;
pub mod swtmr;
pub mod task;
pub mod time;

use core::marker::PhantomData;

use crate::arch::Port;
use crate::event::EventCb;
use crate::list::TaskQueue;
use crate::mutex::MuxCb;
use crate::sched::Sched;
use crate::sortlink::SortLink;
use crate::swtmr::{SwtmrCb, SwtmrRing};
use crate::task::Task;

pub use crate::event::EventId;
pub use crate::membox::MemboxStats;
pub use crate::mutex::MuxId;
pub use crate::swtmr::{SwtmrId, SwtmrMode};
pub use crate::task::{TaskEntry, TaskInfo, TaskParams};
pub use abi::{
    EventError, EventMode, MemboxError, MuxError, Priority, SwtmrError,
    TaskId, TaskStatus, TskError, WAIT_FOREVER,
};

/// The kernel: every piece of state the scheduler, IPC objects, and timers
/// own, in one place.
///
/// `P` selects the architecture port. The struct is `const`-constructible
/// so a target can keep it in a `static`; host tests just put one on the
/// (generous) test stack.
pub struct Kernel<P: Port> {
    /// All TCB slots. Indices `0..MAX_TASKS` are creatable tasks; the last
    /// slot is the boot placeholder that stands in for "the running task"
    /// before scheduling starts and adopts the context of a task deleting
    /// itself.
    pub(crate) tasks: [Task; config::NUM_TASK_SLOTS],
    /// Free TCB slots, threaded through the pend links.
    pub(crate) free_tasks: TaskQueue,
    /// Exited tasks whose stacks await reclamation by the idle task.
    pub(crate) recycle_tasks: TaskQueue,

    /// Index of the task currently holding the CPU.
    pub(crate) running: u16,
    /// Index elected by the last scheduling decision.
    pub(crate) next_task: u16,
    /// Index of the idle task; `NONE_INDEX` before `init`.
    pub(crate) idle_task: u16,
    /// Index of the software-timer task; `NONE_INDEX` unless `swtmr_init`
    /// ran.
    pub(crate) swtmr_task: u16,

    /// Timed task waits, ordered by absolute expiry.
    pub(crate) task_sortlink: SortLink,
    /// Armed software timers, ordered by absolute expiry.
    pub(crate) swtmr_sortlink: SortLink,
    /// Ready queues, bitmap, slice horizon, scheduler lock.
    pub(crate) sched: Sched,
    /// Power-management mode: gates freezing of timed waits across suspend.
    pub(crate) pm_mode: bool,

    pub(crate) events: [EventCb; config::MAX_EVENTS],
    pub(crate) mutexes: [MuxCb; config::MAX_MUTEXES],
    pub(crate) swtmrs: [SwtmrCb; config::MAX_SWTMRS],
    /// Expired timers waiting for the timer task to run their handlers.
    pub(crate) swtmr_ring: SwtmrRing,

    pub(crate) _port: PhantomData<P>,
}

impl<P: Port> Kernel<P> {
    /// Runs `f` with interrupts masked. The workhorse bracket for short
    /// state mutations; longer operations that must release the mask before
    /// rescheduling manage the state explicitly instead.
    pub(crate) fn with_irqs_off<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let state = P::irq_disable();
        let r = f(self);
        P::irq_restore(state);
        r
    }

    /// Enables or disables power-management mode. While enabled, suspending
    /// a task that is waiting with a deadline freezes the remaining wait
    /// instead of leaving it armed; resume re-arms whatever remains.
    pub fn set_pm_mode(&mut self, on: bool) {
        self.with_irqs_off(|k| k.pm_mode = on);
    }
}
