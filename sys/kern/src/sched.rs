// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scheduler core.
//!
//! Ready tasks live on one queue per priority, summarized by a 32-bit
//! bitmap (bit `31 - p` set ⇔ queue `p` non-empty) so electing the top
//! task is a count-leading-zeros. Within a priority, tasks that still hold
//! slice budget resume at the front of their queue; tasks whose slice ran
//! out are refilled and rotate to the back, which is what produces
//! round-robin among equal-priority CPU-bound tasks.
//!
//! Time is accounted in cycles against a per-task slice. The scheduler
//! keeps a single armed deadline (`response_time`): either the running
//! task's slice end or the earliest sortlink expiry, whichever is sooner.
//! `response_id` remembers whose slice the alarm is for; when the alarm was
//! armed for a sortlink deadline instead, the tick handler scans the
//! sortlinks and wakes whatever expired.
//!
//! The actual context switch is the port's business: [`Kernel::reschedule`]
//! only *requests* one. The port's switch handler calls
//! [`Kernel::task_switch`], which settles all bookkeeping and reports
//! whether the register swap is needed.

use crate::arch::Port;
use crate::config;
use crate::fail;
use crate::list::{TaskQueue, NONE_INDEX};
use crate::task::PendTarget;
use crate::time::{self, MAX_RESPONSE_TIME};
use crate::Kernel;
use abi::{Priority, TaskStatus, WAIT_FOREVER};

/// Bit representing priority 0 in the ready bitmap.
const PRIQUEUE_PRIOR0_BIT: u32 = 0x8000_0000;

/// Status bits that keep a task off the ready queue at switch time.
const TASK_BLOCKED_STATUS: TaskStatus = TaskStatus::PEND
    .union(TaskStatus::SUSPEND)
    .union(TaskStatus::EXIT)
    .union(TaskStatus::UNUSED);

/// Scheduler bookkeeping, embedded in [`Kernel`].
pub(crate) struct Sched {
    /// One ready queue per priority.
    pub(crate) ready: [TaskQueue; abi::NUM_PRIORITIES],
    /// Bit `31 - p` set ⇔ `ready[p]` non-empty.
    pub(crate) bitmap: u32,
    /// True once `start` has elected the first task.
    pub(crate) started: bool,
    /// Preemption-lock nesting count. Nonzero blocks rescheduling (and
    /// blocking IPC), but interrupts stay live.
    pub(crate) lock: u32,
    /// Nonzero while the tick handler is mid-scan; suppresses redundant
    /// expiry reprogramming from wake paths it triggers.
    pub(crate) tick_latch: u32,
    /// Absolute cycle deadline the tick timer is armed for.
    pub(crate) response_time: u64,
    /// Task index whose slice end the alarm tracks, or `NONE_INDEX` when
    /// the alarm tracks a sortlink expiry.
    pub(crate) response_id: u16,
}

impl Sched {
    pub(crate) const DEFAULT: Self = Self {
        ready: [TaskQueue::EMPTY; abi::NUM_PRIORITIES],
        bitmap: 0,
        started: false,
        lock: 0,
        tick_latch: 0,
        response_time: MAX_RESPONSE_TIME,
        response_id: NONE_INDEX,
    };

    /// Invalidates the cached alarm if it was (or may have been) armed for
    /// `removed_expiry`, forcing the next update to recompute it.
    pub(crate) fn reset_response_time(&mut self, removed_expiry: u64) {
        if removed_expiry <= self.response_time {
            self.response_time = MAX_RESPONSE_TIME;
        }
    }
}

impl<P: Port> Kernel<P> {
    fn is_idle(&self, index: usize) -> bool {
        self.idle_task != NONE_INDEX && index == usize::from(self.idle_task)
    }

    /// Whether a requested reschedule may actually happen right now.
    fn check_schedule(&self) -> bool {
        self.sched.started && self.sched.lock == 0
    }

    /// Requests a context switch from the port if scheduling is live. Safe
    /// to call from either task or interrupt context; in the latter the
    /// switch happens on interrupt return.
    pub(crate) fn reschedule(&mut self) {
        if self.check_schedule() {
            P::context_switch();
        }
    }

    /// Puts a task on its priority's ready queue: at the front if it still
    /// has slice budget, at the back (with a fresh slice) if not. Clears
    /// every waiting bit. The idle task is never queued; the bitmap simply
    /// falls back to it.
    pub(crate) fn enqueue_ready(&mut self, index: usize) {
        uassert!(!self.tasks[index].status.contains(TaskStatus::READY));

        if !self.is_idle(index) {
            let prio = usize::from(self.tasks[index].priority.0);
            if self.sched.ready[prio].is_empty() {
                self.sched.bitmap |= PRIQUEUE_PRIOR0_BIT >> prio;
            }
            if self.tasks[index].time_slice > time::TIME_SLICE_MIN {
                self.sched.ready[prio].push_head(&mut self.tasks, index);
            } else {
                self.tasks[index].time_slice = time::TIME_SLICE_FULL;
                self.sched.ready[prio].push_tail(&mut self.tasks, index);
            }
        }

        self.tasks[index].status.remove(
            TaskStatus::PEND
                | TaskStatus::SUSPEND
                | TaskStatus::DELAY
                | TaskStatus::PEND_TIME,
        );
        self.tasks[index].status.insert(TaskStatus::READY);
    }

    /// Takes a ready task off its queue.
    pub(crate) fn dequeue_ready(&mut self, index: usize) {
        if !self.tasks[index].status.contains(TaskStatus::READY) {
            return;
        }
        if !self.is_idle(index) {
            let prio = usize::from(self.tasks[index].priority.0);
            self.sched.ready[prio].remove(&mut self.tasks, index);
            if self.sched.ready[prio].is_empty() {
                self.sched.bitmap &= !(PRIQUEUE_PRIOR0_BIT >> prio);
            }
        }
        self.tasks[index].status.remove(TaskStatus::READY);
    }

    /// Elects the highest-priority ready task, falling back to idle.
    pub(crate) fn top_task(&self) -> u16 {
        if self.sched.bitmap != 0 {
            let prio = self.sched.bitmap.leading_zeros() as usize;
            match self.sched.ready[prio].head() {
                Some(index) => index as u16,
                None => fail::die("ready bitmap names an empty queue"),
            }
        } else {
            self.idle_task
        }
    }

    /// Charges elapsed time against a task's slice (idle is exempt) and
    /// restarts its accounting clock.
    fn time_slice_update(&mut self, index: usize, now: u64) {
        let task = &mut self.tasks[index];
        if now < task.start_time {
            fail::die("time went backwards");
        }
        let elapsed = (now - task.start_time) as i64;
        if !self.is_idle(index) {
            self.tasks[index].time_slice -= elapsed;
        }
        self.tasks[index].start_time = now;
    }

    /// Stack health checks performed on every real switch: the outgoing
    /// task's magic word must be intact, and the incoming task's saved
    /// stack pointer must lie inside its stack.
    fn switch_check(&self, run: usize, new: usize) {
        let out = &self.tasks[run];
        if out.top_of_stack != 0 {
            // Safety: top_of_stack/stack_size describe this task's live
            // stack allocation; we only read the guard word.
            let magic = unsafe { (out.top_of_stack as *const u32).read() };
            if magic != crate::task::STACK_MAGIC {
                fail::die("running task stack overflow");
            }
        }
        let inc = &self.tasks[new];
        if inc.top_of_stack != 0 {
            let end = inc.top_of_stack + inc.stack_size;
            if inc.stack_pointer <= inc.top_of_stack
                || inc.stack_pointer > end
            {
                fail::die("incoming task stack pointer out of range");
            }
        }
    }

    /// Settles a scheduling decision. Called by the port's pended-switch
    /// handler (and directly by tests). Returns whether a different task
    /// was elected, i.e. whether the port must actually swap register
    /// state.
    ///
    /// On return, [`Kernel::current_task_id`] already names the elected
    /// task; the port performs the machine-level swap using the saved
    /// stack pointers.
    pub fn task_switch(&mut self) -> bool {
        let state = P::irq_disable();
        let run = usize::from(self.running);
        let now = P::current_cycles();
        self.time_slice_update(run, now);

        let status = self.tasks[run].status;
        if status.intersects(TaskStatus::PEND_TIME | TaskStatus::DELAY) {
            // The wait was registered before the switch; arm it now that
            // the start time is final.
            let start = self.tasks[run].start_time;
            let ticks = self.tasks[run].wait_ticks;
            self.task_sortlink.insert(&mut self.tasks, run, start, ticks);
        } else if !status.intersects(TASK_BLOCKED_STATUS) {
            self.enqueue_ready(run);
        }

        let new = usize::from(self.top_task());
        self.next_task = new as u16;

        let switched = new != run;
        if switched {
            self.switch_check(run, new);
            self.tasks[run].status.remove(TaskStatus::RUNNING);
            self.tasks[new].status.insert(TaskStatus::RUNNING);
            // The incoming task inherits the accounting clock as of this
            // decision.
            self.tasks[new].start_time = self.tasks[run].start_time;
            P::protect_stack(self.tasks[new].top_of_stack);
        }

        self.dequeue_ready(new);

        let end_time = if self.is_idle(new) {
            MAX_RESPONSE_TIME - config::TICK_RESPONSE_PRECISION
        } else {
            self.tasks[new]
                .start_time
                .saturating_add_signed(self.tasks[new].time_slice)
        };

        if self.sched.response_id == run as u16 {
            self.sched.response_time = MAX_RESPONSE_TIME;
        }
        self.set_next_expire_time(new as u16, end_time);

        self.running = new as u16;
        P::irq_restore(state);
        switched
    }

    /// The task elected by the most recent scheduling decision. A port's
    /// switch assembly uses this (with the saved stack pointers) to pick
    /// the frame to restore.
    pub fn next_task_id(&self) -> abi::TaskId {
        self.task_id_for(usize::from(self.next_task))
    }

    /// Earliest deadline across both sortlinks.
    fn next_expire_time(&self, now: u64) -> u64 {
        let p = config::TICK_RESPONSE_PRECISION;
        let task = self.task_sortlink.peek_expiry(&self.tasks, now, p);
        let swtmr = self.swtmr_sortlink.peek_expiry(&self.swtmrs, now, p);
        task.min(swtmr)
    }

    /// Arms the tick timer for the sooner of `task_end_time` (the
    /// prospective slice end of task `response_id`) and the earliest
    /// sortlink expiry -- unless the currently armed deadline is already at
    /// least as soon, within precision.
    pub(crate) fn set_next_expire_time(
        &mut self,
        response_id: u16,
        task_end_time: u64,
    ) {
        let now = P::current_cycles();
        let mut next = self.next_expire_time(now);

        // Slice ends are aligned onto sortlink deadlines when they are
        // close, so one tick serves both.
        let mut is_slice = false;
        if next > task_end_time
            && next - task_end_time > config::SCHED_MINI_PERIOD
        {
            next = task_end_time;
            is_slice = true;
        }

        if self.sched.response_time <= next
            || self.sched.response_time - next
                < config::TICK_RESPONSE_PRECISION
        {
            return;
        }

        self.sched.response_id =
            if is_slice { response_id } else { NONE_INDEX };

        let mut delta = next.saturating_sub(now);
        if delta < config::TICK_RESPONSE_PRECISION {
            delta = config::TICK_RESPONSE_PRECISION;
        }
        let programmed = P::tick_timer_reload(time::cycles_to_ns(delta));
        self.sched.response_time = now + programmed;
    }

    /// Recomputes the armed deadline for the running task. Used after
    /// operations that may have changed what the next interesting moment
    /// is without going through a switch.
    pub(crate) fn update_expire_time(&mut self) {
        if !self.sched.started || self.sched.tick_latch != 0 {
            return;
        }
        let run = usize::from(self.running);
        let end_time = if !self.is_idle(run) && !self.pm_mode {
            let slice = if self.tasks[run].time_slice <= time::TIME_SLICE_MIN
            {
                time::TIME_SLICE_FULL
            } else {
                self.tasks[run].time_slice
            };
            self.tasks[run].start_time.saturating_add_signed(slice)
        } else {
            MAX_RESPONSE_TIME - config::TICK_RESPONSE_PRECISION
        };
        self.set_next_expire_time(self.running, end_time);
    }

    /// The tick interrupt. When the armed alarm was for a sortlink
    /// deadline (not a slice end), scans software timers and timed task
    /// waits and wakes everything expired; then settles slice accounting
    /// and either pends a switch or re-arms the timer.
    pub fn tick_handler(&mut self) {
        if !self.sched.started {
            return;
        }
        let state = P::irq_disable();
        let tick_start = P::current_cycles();

        if self.sched.response_id == NONE_INDEX {
            self.sched.tick_latch += 1;
            if self.swtmr_task != NONE_INDEX {
                self.swtmr_scan();
            }
            self.scan_task_sortlink();
            self.sched.tick_latch -= 1;
        }

        let run = usize::from(self.running);
        self.time_slice_update(run, tick_start);
        self.tasks[run].start_time = P::current_cycles();

        self.sched.response_time = MAX_RESPONSE_TIME;
        if self.check_schedule() {
            P::context_switch();
        } else {
            self.update_expire_time();
        }
        P::irq_restore(state);
    }

    /// Wakes every task whose sortlink deadline has passed. An expired IPC
    /// wait gets `TIMEOUT` and is unlinked from its wait queue here; the
    /// woken task reports the timeout when it next runs.
    fn scan_task_sortlink(&mut self) -> bool {
        let mut need_sched = false;
        let now = P::current_cycles();
        while let Some(head) = self.task_sortlink.head() {
            if self.tasks[head].sort_node.response_time() > now {
                break;
            }
            self.task_sortlink.remove(&mut self.tasks, head);
            self.wake_pend_time_task(head, &mut need_sched);
        }
        need_sched
    }

    fn wake_pend_time_task(&mut self, index: usize, need_sched: &mut bool) {
        let status = self.tasks[index].status;
        if !status.intersects(TaskStatus::PEND | TaskStatus::DELAY) {
            return;
        }
        self.tasks[index].status.remove(
            TaskStatus::PEND | TaskStatus::PEND_TIME | TaskStatus::DELAY,
        );
        if status.contains(TaskStatus::PEND) {
            self.tasks[index].status.insert(TaskStatus::TIMEOUT);
            let target = self.tasks[index].pending_on;
            self.unlink_from_pend_queue(index, target);
            self.tasks[index].pending_on = PendTarget::None;
        }
        if !status.contains(TaskStatus::SUSPEND) {
            self.enqueue_ready(index);
            *need_sched = true;
        }
    }

    /// Removes `index` from the wait queue named by `target`. Queues
    /// embedded in TCBs (join queues) are lifted out by value to satisfy
    /// the borrow checker; they are small `Copy` records.
    pub(crate) fn unlink_from_pend_queue(
        &mut self,
        index: usize,
        target: PendTarget,
    ) {
        match target {
            PendTarget::Event(e) => {
                self.events[usize::from(e)]
                    .queue
                    .remove(&mut self.tasks, index);
            }
            PendTarget::Mutex(m) => {
                self.mutexes[usize::from(m)]
                    .queue
                    .remove(&mut self.tasks, index);
            }
            PendTarget::Join(t) => {
                let mut q = self.tasks[usize::from(t)].join_queue;
                q.remove(&mut self.tasks, index);
                self.tasks[usize::from(t)].join_queue = q;
            }
            PendTarget::OwnEvent | PendTarget::None => {}
        }
    }

    fn push_to_pend_queue(&mut self, index: usize, target: PendTarget) {
        match target {
            PendTarget::Event(e) => {
                self.events[usize::from(e)]
                    .queue
                    .push_tail(&mut self.tasks, index);
            }
            PendTarget::Mutex(m) => {
                self.mutexes[usize::from(m)]
                    .queue
                    .push_tail(&mut self.tasks, index);
            }
            PendTarget::Join(t) => {
                let mut q = self.tasks[usize::from(t)].join_queue;
                q.push_tail(&mut self.tasks, index);
                self.tasks[usize::from(t)].join_queue = q;
            }
            PendTarget::OwnEvent | PendTarget::None => {}
        }
    }

    /// Parks the running task on a wait: FIFO on the target's queue, with
    /// a deadline recorded for the switch path to arm when the timeout is
    /// finite. Callers follow up with a reschedule.
    pub(crate) fn pend_current(&mut self, target: PendTarget, ticks: u32) {
        let running = usize::from(self.running);
        self.tasks[running].status.insert(TaskStatus::PEND);
        self.tasks[running].pending_on = target;
        self.push_to_pend_queue(running, target);
        if ticks != WAIT_FOREVER {
            self.tasks[running].status.insert(TaskStatus::PEND_TIME);
            self.tasks[running].wait_ticks = ticks;
        }
    }

    /// Removes a task from the task sortlink, invalidating the armed alarm
    /// if it may have been set for this entry.
    pub(crate) fn remove_from_task_sortlink(&mut self, index: usize) {
        if let Some(expiry) =
            self.task_sortlink.remove(&mut self.tasks, index)
        {
            self.sched.reset_response_time(expiry);
        }
    }

    /// Wakes a pended task: unlinks it from its wait queue and the
    /// sortlink and readies it (unless it is suspended, or it is the
    /// running task that has not yet switched away).
    pub(crate) fn wake_task(&mut self, index: usize) {
        let target = self.tasks[index].pending_on;
        self.unlink_from_pend_queue(index, target);
        self.tasks[index].pending_on = PendTarget::None;
        self.tasks[index].status.remove(TaskStatus::PEND);

        if self.tasks[index].status.contains(TaskStatus::PEND_TIME) {
            self.remove_from_task_sortlink(index);
            self.tasks[index].status.remove(TaskStatus::PEND_TIME);
        }

        if !self.tasks[index]
            .status
            .intersects(TaskStatus::SUSPEND | TaskStatus::RUNNING)
        {
            self.enqueue_ready(index);
        }
    }

    /// Preserves a suspended task's remaining deadline: the entry leaves
    /// the sortlink but the node keeps the absolute expiry for resume to
    /// re-arm.
    fn freeze_task(&mut self, index: usize) {
        let expiry = self.tasks[index].sort_node.response_time();
        self.remove_from_task_sortlink(index);
        self.tasks[index].sort_node.set_response_time(expiry);
        self.tasks[index].status.insert(TaskStatus::FREEZE);
    }

    fn unfreeze_task(&mut self, index: usize) {
        self.tasks[index].status.remove(TaskStatus::FREEZE);
        let expiry = self.tasks[index].sort_node.response_time();
        let now = P::current_cycles();
        if expiry > now {
            let remaining = time::cycles_to_ticks_round_up(expiry - now);
            self.task_sortlink
                .insert(&mut self.tasks, index, now, remaining);
            return;
        }
        // Already expired while frozen: dissolve the wait without a
        // TIMEOUT verdict; resume decides whether the task runs.
        self.tasks[index]
            .sort_node
            .set_response_time(time::INVALID_TIME);
        if self.tasks[index].status.contains(TaskStatus::PEND) {
            let target = self.tasks[index].pending_on;
            self.unlink_from_pend_queue(index, target);
            self.tasks[index].pending_on = PendTarget::None;
        }
        self.tasks[index].status.remove(
            TaskStatus::DELAY | TaskStatus::PEND_TIME | TaskStatus::PEND,
        );
    }

    /// Suspension bookkeeping: off the ready queue, and in power-
    /// management mode a pending deadline is frozen in place.
    pub(crate) fn sched_suspend(&mut self, index: usize) {
        if self.tasks[index].status.contains(TaskStatus::READY) {
            self.dequeue_ready(index);
        }
        if self.tasks[index]
            .status
            .intersects(TaskStatus::PEND_TIME | TaskStatus::DELAY)
            && self.pm_mode
        {
            self.freeze_task(index);
        }
        self.tasks[index].status.insert(TaskStatus::SUSPEND);
    }

    /// Resume bookkeeping. Returns whether the task became ready (a task
    /// still mid-wait stays blocked).
    pub(crate) fn sched_resume(&mut self, index: usize) -> bool {
        if self.tasks[index].status.contains(TaskStatus::FREEZE) {
            self.unfreeze_task(index);
        }
        self.tasks[index].status.remove(TaskStatus::SUSPEND);
        if !self.tasks[index]
            .status
            .intersects(TaskStatus::DELAY | TaskStatus::PEND)
        {
            self.enqueue_ready(index);
            return true;
        }
        false
    }

    /// Changes a task's priority, re-homing a ready task to its new
    /// queue. Returns whether a reschedule is warranted (the task was
    /// ready or running).
    pub(crate) fn modify_priority(
        &mut self,
        index: usize,
        priority: Priority,
    ) -> bool {
        if self.tasks[index].status.contains(TaskStatus::READY) {
            self.dequeue_ready(index);
            self.tasks[index].priority = priority;
            self.enqueue_ready(index);
            return true;
        }
        self.tasks[index].priority = priority;
        self.tasks[index].status.contains(TaskStatus::RUNNING)
    }
}
