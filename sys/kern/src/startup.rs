// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel construction and startup.
//!
//! Boot is three stages, each a method so a port (or a test) can stop
//! between them:
//!
//! 1. [`Kernel::new`] -- `const` construction of the whole state.
//! 2. [`Kernel::init`] -- threads the free lists and creates the idle task
//!    (plus, optionally, [`Kernel::swtmr_init`] for software timers).
//! 3. [`Kernel::start`] -- elects the first task and enables scheduling.
//!    This only does bookkeeping: the caller (a port's `main`) hands the
//!    CPU to the returned task with its architecture-specific jump, after
//!    which the kernel runs entirely from interrupts and task calls.
//!
//! Before `start`, the boot placeholder slot plays "the running task" so
//! code paths that consult the current task have something coherent to
//! look at.

use crate::arch::Port;
use crate::config;
use crate::event::EventCb;
use crate::list::{TaskQueue, NONE_INDEX};
use crate::mutex::MuxCb;
use crate::sched::Sched;
use crate::sortlink::SortLink;
use crate::swtmr::{SwtmrCb, SwtmrRing};
use crate::task::{idle_main, Task, TaskParams};
use crate::time::MAX_RESPONSE_TIME;
use crate::Kernel;
use abi::{Priority, TaskId, TaskStatus, TskError, PRIORITY_LOWEST};

use core::marker::PhantomData;

impl<P: Port> Kernel<P> {
    /// Builds a kernel with every slot unused. `const` so targets can park
    /// it in a `static`.
    pub const fn new() -> Self {
        Self {
            tasks: [Task::DEFAULT; config::NUM_TASK_SLOTS],
            free_tasks: TaskQueue::EMPTY,
            recycle_tasks: TaskQueue::EMPTY,
            running: config::MAX_TASKS as u16,
            next_task: config::MAX_TASKS as u16,
            idle_task: NONE_INDEX,
            swtmr_task: NONE_INDEX,
            task_sortlink: SortLink::EMPTY,
            swtmr_sortlink: SortLink::EMPTY,
            sched: Sched::DEFAULT,
            pm_mode: false,
            events: [EventCb::DEFAULT; config::MAX_EVENTS],
            mutexes: [MuxCb::DEFAULT; config::MAX_MUTEXES],
            swtmrs: [SwtmrCb::DEFAULT; config::MAX_SWTMRS],
            swtmr_ring: SwtmrRing::EMPTY,
            _port: PhantomData,
        }
    }

    /// Threads the TCB free list, sets up the boot placeholder, and
    /// creates the idle task. Call exactly once, before anything else.
    pub fn init(&mut self) -> Result<(), TskError> {
        for index in 0..config::MAX_TASKS {
            self.tasks[index].status = TaskStatus::UNUSED;
            self.free_tasks.push_tail(&mut self.tasks, index);
        }

        // The boot placeholder stands in for "the running task" until the
        // scheduler starts. Its priority sits below even idle so it never
        // wins an election.
        let boot = config::MAX_TASKS;
        self.tasks[boot].status = TaskStatus::UNUSED | TaskStatus::RUNNING;
        self.tasks[boot].priority = Priority(PRIORITY_LOWEST + 1);
        self.running = boot as u16;
        self.next_task = boot as u16;

        let idle = self.task_create_only(TaskParams {
            entry: idle_main::<P>,
            arg: 0,
            stack_size: config::IDLE_STACK_SIZE,
            name: "IdleCore000",
            priority: PRIORITY_LOWEST,
            joinable: false,
        })?;
        let index = idle.index();
        self.with_irqs_off(|k| {
            k.tasks[index].status.insert(TaskStatus::SYSTEM_TASK);
            k.idle_task = index as u16;
            k.enqueue_ready(index);
        });
        Ok(())
    }

    /// Elects the first task and enables scheduling. Returns the task the
    /// caller must hand the CPU to.
    pub fn start(&mut self) -> TaskId {
        uassert!(!self.sched.started);
        uassert!(self.idle_task != NONE_INDEX);

        self.with_irqs_off(|k| {
            let top = usize::from(k.top_task());
            k.tasks[top].status.insert(TaskStatus::RUNNING);
            k.tasks[config::MAX_TASKS]
                .status
                .remove(TaskStatus::RUNNING);
            k.running = top as u16;
            k.next_task = top as u16;
            k.tasks[top].start_time = P::current_cycles();
            k.dequeue_ready(top);

            k.sched.started = true;
            k.sched.response_time = MAX_RESPONSE_TIME;
            k.sched.response_id = NONE_INDEX;

            let end_time = k.tasks[top]
                .start_time
                .saturating_add_signed(k.tasks[top].time_slice);
            k.set_next_expire_time(top as u16, end_time);
            k.task_id_for(top)
        })
    }
}

impl<P: Port> Default for Kernel<P> {
    fn default() -> Self {
        Self::new()
    }
}
