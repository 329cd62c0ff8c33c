// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tasks: control blocks and lifecycle.
//!
//! TCBs are preallocated in [`Kernel::tasks`]; free slots are threaded on a
//! list, and a task is always named externally by a [`TaskId`] carrying the
//! slot's generation so handles to recycled slots go stale instead of
//! aliasing the new occupant.
//!
//! Deletion is two-stage. A task deleting itself cannot free the stack it
//! is still executing on, so it is parked on the recycle list and the boot
//! placeholder slot adopts its context until the next switch; the idle task
//! later frees the stack and returns the slot to the free list. Joinable
//! tasks instead linger in `EXIT` until a joiner collects their return
//! value.

use crate::arch::Port;
use crate::config;
use crate::list::{HasQueueLink, QueueLink, TaskQueue, NONE_INDEX};
use crate::sortlink::{HasSortNode, SortNode};
use crate::time;
use crate::Kernel;
use abi::{
    EventMode, Generation, Priority, TaskId, TaskStatus, TskError,
    PRIORITY_LOWEST,
};

use core::ptr::NonNull;

/// A task's entry function. Its return value becomes the task's join
/// value.
pub type TaskEntry = fn(usize) -> usize;

/// Byte pattern task stacks are filled with at creation; the stack
/// watermark is measured by counting how much of it survives.
pub(crate) const STACK_POISON: u8 = 0xCA;

/// Word written at the lowest address of every stack. The switch path
/// checks it on each switch; a mismatch means the outgoing task ran off
/// the end of its stack.
pub(crate) const STACK_MAGIC: u32 = 0xCCCC_CCCC;

/// What a pending task is blocked on. This is how the tick handler and
/// task deletion find the wait queue a task must be unlinked from; it also
/// backs the debug fields of [`TaskInfo`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum PendTarget {
    None,
    /// An event object's wait queue.
    Event(u16),
    /// A mutex's wait queue.
    Mutex(u16),
    /// Another task's join queue.
    Join(u16),
    /// The task's own event word; no wait queue involved.
    OwnEvent,
}

/// Internal representation of a task.
///
/// Fields are `pub(crate)`: the scheduler, IPC objects, and the timer
/// machinery all cooperate on TCB state, but nothing outside the kernel
/// sees anything except accessors and [`TaskInfo`] snapshots.
#[derive(Copy, Clone)]
pub struct Task {
    pub(crate) generation: Generation,
    pub(crate) priority: Priority,
    pub(crate) status: TaskStatus,
    /// Remaining slice in cycles; may go negative before the tick notices.
    pub(crate) time_slice: i64,
    /// Cycle stamp of when this task last started running (or was last
    /// charged for time).
    pub(crate) start_time: u64,
    /// Pending delay/timeout in ticks; armed onto the sortlink during the
    /// switch that takes this task off the CPU.
    pub(crate) wait_ticks: u32,
    /// Lowest address of the stack allocation; 0 when the task has no
    /// stack.
    pub(crate) top_of_stack: usize,
    pub(crate) stack_size: usize,
    /// Opaque saved stack pointer, produced by the port.
    pub(crate) stack_pointer: usize,
    pub(crate) entry: Option<TaskEntry>,
    pub(crate) arg: usize,
    pub(crate) name: &'static str,
    /// Mask/mode of the event wait currently in progress.
    pub(crate) event_mask: u32,
    pub(crate) event_mode: EventMode,
    /// Task-local event flags, posted with `task_event_write`.
    pub(crate) event_word: u32,
    pub(crate) pending_on: PendTarget,
    pub(crate) sort_node: SortNode,
    /// Queue membership: exactly one of ready queue, IPC wait queue,
    /// recycle list, or free list at any time.
    pub(crate) pend_link: QueueLink,
    /// Tasks waiting to join this one (at most one in practice).
    pub(crate) join_queue: TaskQueue,
    pub(crate) join_retval: usize,
}

impl Task {
    pub(crate) const DEFAULT: Self = Self {
        generation: Generation::ZERO,
        priority: Priority(0),
        status: TaskStatus::UNUSED,
        time_slice: 0,
        start_time: 0,
        wait_ticks: 0,
        top_of_stack: 0,
        stack_size: 0,
        stack_pointer: 0,
        entry: None,
        arg: 0,
        name: "",
        event_mask: 0,
        event_mode: EventMode::empty(),
        event_word: 0,
        pending_on: PendTarget::None,
        sort_node: SortNode::UNLINKED,
        pend_link: QueueLink::UNLINKED,
        join_queue: TaskQueue::EMPTY,
        join_retval: 0,
    };

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl HasQueueLink for Task {
    fn link(&self) -> &QueueLink {
        &self.pend_link
    }
    fn link_mut(&mut self) -> &mut QueueLink {
        &mut self.pend_link
    }
}

impl HasSortNode for Task {
    fn sort_node(&self) -> &SortNode {
        &self.sort_node
    }
    fn sort_node_mut(&mut self) -> &mut SortNode {
        &mut self.sort_node
    }
}

/// Parameters for task creation.
#[derive(Copy, Clone)]
pub struct TaskParams {
    pub entry: TaskEntry,
    pub arg: usize,
    /// Stack size in bytes; 0 selects [`config::DEFAULT_TASK_STACK`].
    pub stack_size: usize,
    pub name: &'static str,
    /// 0 (highest) through 31; 31 is reserved for the idle task.
    pub priority: u8,
    /// Whether the task can be joined; detached otherwise.
    pub joinable: bool,
}

/// Point-in-time snapshot of a task, for diagnostics.
#[derive(Copy, Clone, Debug)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: &'static str,
    pub status: TaskStatus,
    pub priority: Priority,
    pub stack_size: usize,
    pub top_of_stack: usize,
    pub stack_pointer: usize,
    pub bottom_of_stack: usize,
    /// Bytes of stack currently in use.
    pub curr_used: usize,
    /// High-water mark of stack use, from poison scanning.
    pub peak_used: usize,
    /// True when the stack magic word was found corrupted.
    pub overflow: bool,
    pub event_mask: u32,
    pub event_word: u32,
    /// Mutex this task is blocked on, if any.
    pub pending_mutex: Option<u16>,
    /// Event object this task is blocked on, if any.
    pub pending_event: Option<u16>,
}

/// The idle task. Lowest priority; reclaims exited tasks' resources, then
/// parks the CPU until the next interrupt.
pub fn idle_main<P: Port>(_arg: usize) -> usize {
    loop {
        P::with_kernel(|k| k.task_res_recycle());
        P::enter_sleep();
    }
}

/// Entry trampoline: every task starts here. Runs the task's entry
/// function, records its return value for a joiner, and self-deletes.
/// The port's `stack_init` builds frames that land here.
pub fn task_entry_trampoline<P: Port>(task_index: usize) {
    let (entry, arg) = P::with_kernel(|k| {
        (k.tasks[task_index].entry, k.tasks[task_index].arg)
    });
    if let Some(entry) = entry {
        let retval = entry(arg);
        P::with_kernel(|k| {
            k.tasks[task_index].join_retval = retval;
            let id = k.task_id_for(task_index);
            if k.task_delete(id).is_err() {
                klog!("failed to delete exiting task {}", task_index);
            }
        });
    }
}

impl<P: Port> Kernel<P> {
    /// The current `TaskId` for slot `index`.
    pub(crate) fn task_id_for(&self, index: usize) -> TaskId {
        TaskId::for_index_and_gen(index, self.tasks[index].generation)
    }

    /// Validates a user-supplied id: in range and not stale.
    fn task_index_checked(&self, id: TaskId) -> Result<usize, TskError> {
        let index = id.index();
        if index >= config::MAX_TASKS {
            return Err(TskError::IdInvalid);
        }
        if self.tasks[index].generation != id.generation() {
            return Err(TskError::IdInvalid);
        }
        Ok(index)
    }

    /// Validates a user-supplied id for operations that must not touch the
    /// kernel's own tasks.
    fn task_index_user(&self, id: TaskId) -> Result<usize, TskError> {
        let index = id.index();
        if index == usize::from(self.idle_task) {
            return Err(TskError::OperateIdle);
        }
        if self.swtmr_task != NONE_INDEX
            && index == usize::from(self.swtmr_task)
        {
            return Err(TskError::OperateSwtmr);
        }
        self.task_index_checked(id)
    }

    /// Resets a slot and returns it to the free list, bumping its
    /// generation so outstanding handles go stale.
    pub(crate) fn insert_to_free_list(&mut self, index: usize) {
        let gen = self.tasks[index].generation.next();
        self.tasks[index] = Task::DEFAULT;
        self.tasks[index].generation = gen;
        self.free_tasks.push_head(&mut self.tasks, index);
    }

    /// Releases a finished task's stack (reporting what to free once
    /// interrupts are back on) and, unless the task still awaits a joiner,
    /// returns the TCB to the free list.
    fn recycle_resources(
        &mut self,
        index: usize,
    ) -> Option<(NonNull<u8>, usize)> {
        let task = &mut self.tasks[index];
        let mut stack = None;
        if task.status.contains(TaskStatus::STACK_FREE)
            && task.top_of_stack != 0
        {
            stack = NonNull::new(task.top_of_stack as *mut u8)
                .map(|p| (p, task.stack_size));
            task.top_of_stack = 0;
            task.status.remove(TaskStatus::STACK_FREE);
        }
        if !task.status.contains(TaskStatus::EXIT) {
            self.insert_to_free_list(index);
        }
        stack
    }

    /// Drains the recycle list, freeing stacks and returning TCBs to the
    /// free list. The idle task calls this on every pass; task creation
    /// also calls it so a slot freed by a recently-exited task is available
    /// immediately.
    pub fn task_res_recycle(&mut self) {
        let mut state = P::irq_disable();
        while let Some(index) = self.recycle_tasks.pop_head(&mut self.tasks)
        {
            let stack = self.recycle_resources(index);
            P::irq_restore(state);
            if let Some((ptr, size)) = stack {
                // Safety: the pointer was produced by `alloc_stack` at
                // creation and the owning task is off the CPU for good.
                unsafe { P::free_stack(ptr, size) };
            }
            state = P::irq_disable();
        }
        P::irq_restore(state);
    }

    fn check_params(&self, params: &mut TaskParams) -> Result<(), TskError> {
        if params.name.is_empty() {
            return Err(TskError::NameEmpty);
        }
        if params.priority > PRIORITY_LOWEST {
            return Err(TskError::PriorityError);
        }
        // Priority 31 is the idle task's alone.
        if params.priority == PRIORITY_LOWEST
            && params.entry != (idle_main::<P> as TaskEntry)
        {
            return Err(TskError::PriorityError);
        }
        if params.stack_size > config::HEAP_SIZE {
            return Err(TskError::StackSizeTooLarge);
        }
        if params.stack_size == 0 {
            params.stack_size = config::DEFAULT_TASK_STACK;
        }
        if params.stack_size < config::MIN_TASK_STACK {
            return Err(TskError::StackSizeTooSmall);
        }
        Ok(())
    }

    /// Creates a task and leaves it suspended: the slot is claimed, the
    /// stack is allocated, poisoned, and given an initial frame, but the
    /// task is not made ready.
    pub fn task_create_only(
        &mut self,
        params: TaskParams,
    ) -> Result<TaskId, TskError> {
        let mut params = params;
        self.check_params(&mut params)?;

        self.task_res_recycle();

        let index = self
            .with_irqs_off(|k| k.free_tasks.pop_head(&mut k.tasks))
            .ok_or(TskError::NoFreeTcb)?;

        let stack_size = (params.stack_size
            + (config::TASK_STACK_ALIGN - 1))
            & !(config::TASK_STACK_ALIGN - 1);
        let Some(stack) = P::alloc_stack(stack_size) else {
            self.with_irqs_off(|k| k.insert_to_free_list(index));
            return Err(TskError::NoMemory);
        };

        let task = &mut self.tasks[index];
        task.status = TaskStatus::SUSPEND | TaskStatus::STACK_FREE;
        task.priority = Priority(params.priority);
        task.entry = Some(params.entry);
        task.arg = params.arg;
        task.name = params.name;
        task.time_slice = 0;
        task.wait_ticks = 0;
        task.top_of_stack = stack.as_ptr() as usize;
        task.stack_size = stack_size;
        if params.joinable {
            task.status.insert(TaskStatus::JOINABLE);
            task.join_queue = TaskQueue::EMPTY;
        }

        // Safety: the allocation is `stack_size` bytes and nobody else
        // references it yet.
        unsafe {
            core::ptr::write_bytes(stack.as_ptr(), STACK_POISON, stack_size);
            (stack.as_ptr() as *mut u32).write(STACK_MAGIC);
        }
        task.stack_pointer = P::stack_init(index, stack_size, stack);

        Ok(self.task_id_for(index))
    }

    /// Creates a task and makes it ready, rescheduling if the new task
    /// could preempt.
    pub fn task_create(
        &mut self,
        params: TaskParams,
    ) -> Result<TaskId, TskError> {
        let id = self.task_create_only(params)?;
        let index = id.index();
        self.with_irqs_off(|k| k.enqueue_ready(index));
        if self.sched.started {
            self.reschedule();
        }
        Ok(id)
    }

    /// Pulls a task out of every scheduler structure it occupies, in
    /// preparation for deletion.
    fn sched_task_exit(&mut self, index: usize) {
        let status = self.tasks[index].status;
        if status.contains(TaskStatus::READY) {
            self.dequeue_ready(index);
        } else if status.contains(TaskStatus::PEND) {
            let target = self.tasks[index].pending_on;
            self.unlink_from_pend_queue(index, target);
            self.tasks[index].pending_on = PendTarget::None;
            self.tasks[index].status.remove(TaskStatus::PEND);
        }
        if status
            .intersects(TaskStatus::DELAY | TaskStatus::PEND_TIME)
        {
            self.remove_from_task_sortlink(index);
            self.tasks[index]
                .status
                .remove(TaskStatus::DELAY | TaskStatus::PEND_TIME);
        }
        self.tasks[index].status.remove(TaskStatus::FREEZE);
    }

    /// Wakes (at most) the one task joined on `index` and marks the task
    /// exited.
    fn join_post(&mut self, index: usize) {
        if !self.tasks[index].status.contains(TaskStatus::JOINABLE) {
            return;
        }
        if let Some(joiner) = self.tasks[index].join_queue.head() {
            self.wake_task(joiner);
        }
        self.tasks[index].status.insert(TaskStatus::EXIT);
    }

    /// A task deleting itself keeps executing (on its own stack) until the
    /// forced switch completes, so the slot goes to the recycle list and
    /// the boot placeholder adopts just enough of the context -- stack
    /// identity above all -- for the switch path's checks to pass.
    fn running_task_delete(&mut self, index: usize) {
        self.recycle_tasks.push_tail(&mut self.tasks, index);
        let boot = config::MAX_TASKS;
        self.tasks[boot].top_of_stack = self.tasks[index].top_of_stack;
        self.tasks[boot].stack_size = self.tasks[index].stack_size;
        self.tasks[boot].stack_pointer = self.tasks[index].stack_pointer;
        self.tasks[boot].name = self.tasks[index].name;
        self.tasks[boot].status =
            self.tasks[index].status | TaskStatus::RUNNING;
        self.running = boot as u16;
    }

    /// Deletes a task. A joinable task (other than the caller itself
    /// mid-flight) transitions to `EXIT` and wakes its joiner; a detached
    /// one is recycled immediately. Deleting the running task forces a
    /// switch and defers reclamation to the idle task.
    pub fn task_delete(&mut self, id: TaskId) -> Result<(), TskError> {
        let index = self.task_index_user(id)?;

        let state = P::irq_disable();
        let status = self.tasks[index].status;
        if status.contains(TaskStatus::SYSTEM_TASK) {
            P::irq_restore(state);
            return Err(TskError::OperateSystemTask);
        }
        if status.contains(TaskStatus::UNUSED) {
            P::irq_restore(state);
            return Err(TskError::NotCreated);
        }
        if status.contains(TaskStatus::EXIT) {
            P::irq_restore(state);
            return Err(TskError::AlreadyExit);
        }

        if status.contains(TaskStatus::RUNNING) && self.sched.lock != 0 {
            klog!("deleting the running task under scheduler lock");
            self.sched.lock = 0;
        }

        self.sched_task_exit(index);
        self.join_post(index);
        self.tasks[index].event_word = 0;
        self.tasks[index].event_mask = 0;

        if self.tasks[index].status.contains(TaskStatus::RUNNING) {
            if !self.tasks[index].status.contains(TaskStatus::EXIT) {
                self.tasks[index].status.insert(TaskStatus::UNUSED);
                self.running_task_delete(index);
            }
            P::irq_restore(state);
            self.reschedule();
            return Ok(());
        }

        self.tasks[index].join_retval = usize::from(self.running);
        let stack = self.recycle_resources(index);
        P::irq_restore(state);
        if let Some((ptr, size)) = stack {
            // Safety: allocation from `alloc_stack`, owner now dismantled.
            unsafe { P::free_stack(ptr, size) };
        }
        Ok(())
    }

    /// First half of join: blocks the caller until `id` exits. Returns
    /// without blocking when the target has already exited. On hardware the
    /// context switch happens inside this call; the caller then collects
    /// the result with [`Kernel::task_join_finish`].
    pub fn task_join_start(&mut self, id: TaskId) -> Result<(), TskError> {
        let index = self.task_index_user(id)?;
        if P::in_interrupt() {
            return Err(TskError::InInterrupt);
        }
        if self.sched.lock != 0 {
            return Err(TskError::SchedLocked);
        }
        if index == usize::from(self.running) {
            return Err(TskError::NotJoinSelf);
        }

        let state = P::irq_disable();
        let status = self.tasks[index].status;
        if status.contains(TaskStatus::UNUSED) {
            P::irq_restore(state);
            return Err(TskError::NotCreated);
        }
        if status.contains(TaskStatus::EXIT) {
            P::irq_restore(state);
            return Ok(());
        }
        if !status.contains(TaskStatus::JOINABLE) {
            P::irq_restore(state);
            return Err(TskError::NotJoinable);
        }
        if !self.tasks[index].join_queue.is_empty() {
            P::irq_restore(state);
            return Err(TskError::AlreadyJoined);
        }

        self.pend_current(PendTarget::Join(index as u16), abi::WAIT_FOREVER);
        P::irq_restore(state);
        self.reschedule();
        Ok(())
    }

    /// Second half of join: collects the exited task's return value and
    /// recycles its slot and stack.
    pub fn task_join_finish(
        &mut self,
        id: TaskId,
    ) -> Result<usize, TskError> {
        let index = self.task_index_checked(id)?;
        let retval = self.tasks[index].join_retval;

        let state = P::irq_disable();
        self.tasks[index].status.remove(TaskStatus::EXIT);
        let stack = self.recycle_resources(index);
        P::irq_restore(state);
        if let Some((ptr, size)) = stack {
            // Safety: allocation from `alloc_stack`; the task has exited.
            unsafe { P::free_stack(ptr, size) };
        }
        Ok(retval)
    }

    /// Joins `id`: blocks until it exits, then returns its entry function's
    /// return value and recycles it.
    pub fn task_join(&mut self, id: TaskId) -> Result<usize, TskError> {
        self.task_join_start(id)?;
        self.task_join_finish(id)
    }

    /// Detaches `id` so it recycles without a join. Fails with a
    /// distinguished error if a task has already joined it; performs an
    /// immediate join if the target has already exited.
    pub fn task_detach(&mut self, id: TaskId) -> Result<(), TskError> {
        let index = self.task_index_user(id)?;
        if P::in_interrupt() {
            return Err(TskError::InInterrupt);
        }

        let state = P::irq_disable();
        let status = self.tasks[index].status;
        if status.contains(TaskStatus::UNUSED) {
            P::irq_restore(state);
            return Err(TskError::NotCreated);
        }
        if status.contains(TaskStatus::EXIT) {
            P::irq_restore(state);
            return self.task_join(id).map(|_| ());
        }
        if !status.contains(TaskStatus::JOINABLE) {
            P::irq_restore(state);
            return Err(TskError::NotJoinable);
        }
        if !self.tasks[index].join_queue.is_empty() {
            P::irq_restore(state);
            return Err(TskError::AlreadyJoined);
        }
        self.tasks[index].status.remove(TaskStatus::JOINABLE);
        P::irq_restore(state);
        Ok(())
    }

    /// Suspends a task. A ready task leaves its queue; a task waiting with
    /// a deadline keeps its sortlink entry (or, in power-management mode,
    /// has the remaining wait frozen for resume to re-arm).
    pub fn task_suspend(&mut self, id: TaskId) -> Result<(), TskError> {
        let index = self.task_index_user(id)?;

        let state = P::irq_disable();
        let status = self.tasks[index].status;
        if status.contains(TaskStatus::UNUSED) {
            P::irq_restore(state);
            return Err(TskError::NotCreated);
        }
        if status.contains(TaskStatus::SYSTEM_TASK) {
            P::irq_restore(state);
            return Err(TskError::OperateSystemTask);
        }
        if status.contains(TaskStatus::SUSPEND) {
            P::irq_restore(state);
            return Err(TskError::AlreadySuspended);
        }
        if status.contains(TaskStatus::RUNNING) && self.sched.lock != 0 {
            P::irq_restore(state);
            return Err(TskError::SuspendLocked);
        }

        self.sched_suspend(index);
        if index == usize::from(self.running) {
            P::irq_restore(state);
            self.reschedule();
            return Ok(());
        }
        P::irq_restore(state);
        Ok(())
    }

    /// Resumes a suspended task; it becomes ready again unless it is still
    /// mid-wait (delayed or pending).
    pub fn task_resume(&mut self, id: TaskId) -> Result<(), TskError> {
        let index = self.task_index_checked(id)?;

        let state = P::irq_disable();
        let status = self.tasks[index].status;
        if status.contains(TaskStatus::UNUSED) {
            P::irq_restore(state);
            return Err(TskError::NotCreated);
        }
        if !status.contains(TaskStatus::SUSPEND) {
            P::irq_restore(state);
            return Err(TskError::NotSuspended);
        }

        let need_sched = self.sched_resume(index);
        P::irq_restore(state);
        if need_sched && self.sched.started {
            self.reschedule();
        }
        Ok(())
    }

    /// Delays the calling task by `ticks`. `0` degrades to a yield and
    /// never touches the sortlink.
    pub fn task_delay(&mut self, ticks: u32) -> Result<(), TskError> {
        if P::in_interrupt() {
            return Err(TskError::InInterrupt);
        }
        if self.sched.lock != 0 {
            return Err(TskError::SchedLocked);
        }
        if self.tasks[usize::from(self.running)]
            .status
            .contains(TaskStatus::SYSTEM_TASK)
        {
            return Err(TskError::OperateSystemTask);
        }
        if ticks == 0 {
            return self.task_yield();
        }

        self.with_irqs_off(|k| {
            let running = usize::from(k.running);
            k.tasks[running].status.insert(TaskStatus::DELAY);
            k.tasks[running].wait_ticks = ticks;
        });
        self.reschedule();
        Ok(())
    }

    /// Surrenders the remainder of the slice; equal-priority peers run
    /// next.
    pub fn task_yield(&mut self) -> Result<(), TskError> {
        self.with_irqs_off(|k| {
            k.tasks[usize::from(k.running)].time_slice = 0;
        });
        self.reschedule();
        Ok(())
    }

    /// Millisecond sleep convenience. Quietly does nothing from interrupt
    /// context; a nonzero duration sleeps at least one tick.
    pub fn sleep_ms(&mut self, ms: u32) {
        if P::in_interrupt() {
            return;
        }
        let interval = if ms == 0 {
            0
        } else {
            time::ms_to_ticks(ms).max(1)
        };
        let _ = self.task_delay(interval);
    }

    /// Changes a task's priority; a ready task is re-homed to the new
    /// priority queue.
    pub fn task_priority_set(
        &mut self,
        id: TaskId,
        priority: u8,
    ) -> Result<(), TskError> {
        if priority > PRIORITY_LOWEST {
            return Err(TskError::PriorityError);
        }
        let index = self.task_index_user(id)?;

        let state = P::irq_disable();
        let status = self.tasks[index].status;
        if status.contains(TaskStatus::UNUSED) {
            P::irq_restore(state);
            return Err(TskError::NotCreated);
        }
        if status.contains(TaskStatus::SYSTEM_TASK) {
            P::irq_restore(state);
            return Err(TskError::OperateSystemTask);
        }
        let need_sched = self.modify_priority(index, Priority(priority));
        P::irq_restore(state);
        if need_sched {
            self.reschedule();
        }
        Ok(())
    }

    pub fn task_priority_get(&mut self, id: TaskId) -> Result<Priority, TskError> {
        let index = self.task_index_checked(id)?;
        self.with_irqs_off(|k| {
            if k.tasks[index].status.contains(TaskStatus::UNUSED) {
                Err(TskError::NotCreated)
            } else {
                Ok(k.tasks[index].priority)
            }
        })
    }

    /// The id of the task currently holding the CPU.
    pub fn current_task_id(&self) -> TaskId {
        self.task_id_for(usize::from(self.running))
    }

    pub fn task_name(&mut self, id: TaskId) -> Result<&'static str, TskError> {
        let index = self.task_index_checked(id)?;
        self.with_irqs_off(|k| {
            if k.tasks[index].status.contains(TaskStatus::UNUSED) {
                Err(TskError::NotCreated)
            } else {
                Ok(k.tasks[index].name)
            }
        })
    }

    pub fn task_status(&mut self, id: TaskId) -> Result<TaskStatus, TskError> {
        let index = self.task_index_checked(id)?;
        self.with_irqs_off(|k| {
            if k.tasks[index].status.contains(TaskStatus::UNUSED) {
                Err(TskError::NotCreated)
            } else {
                Ok(k.tasks[index].status)
            }
        })
    }

    /// Measures a task's stack high-water mark by scanning for surviving
    /// poison. Returns `(peak_used, overflow)`.
    fn water_line(&self, index: usize) -> (usize, bool) {
        let task = &self.tasks[index];
        if task.top_of_stack == 0 {
            return (0, false);
        }
        // Safety: top_of_stack/stack_size describe a live allocation owned
        // by this task; we only read.
        unsafe {
            let top = task.top_of_stack as *const u32;
            if top.read() != STACK_MAGIC {
                klog!("task {} stack overflow", task.name);
                return (task.stack_size, true);
            }
            let words = task.stack_size / 4;
            let mut i = 1;
            while i < words {
                let b = (task.top_of_stack as *const u8).add(i * 4);
                if (b as *const u32).read()
                    != u32::from_ne_bytes([STACK_POISON; 4])
                {
                    break;
                }
                i += 1;
            }
            (task.stack_size - i * 4, false)
        }
    }

    /// Snapshots a task for diagnostics.
    pub fn task_info(&mut self, id: TaskId) -> Result<TaskInfo, TskError> {
        let index = self.task_index_checked(id)?;
        let state = P::irq_disable();
        if self.tasks[index].status.contains(TaskStatus::UNUSED) {
            P::irq_restore(state);
            return Err(TskError::NotCreated);
        }
        let (peak_used, overflow) = self.water_line(index);
        let task = &self.tasks[index];
        let bottom = task.top_of_stack + task.stack_size;
        let (pending_mutex, pending_event) = match task.pending_on {
            PendTarget::Mutex(m) => (Some(m), None),
            PendTarget::Event(e) => (None, Some(e)),
            _ => (None, None),
        };
        let info = TaskInfo {
            id,
            name: task.name,
            status: task.status,
            priority: task.priority,
            stack_size: task.stack_size,
            top_of_stack: task.top_of_stack,
            stack_pointer: task.stack_pointer,
            bottom_of_stack: bottom,
            curr_used: bottom.saturating_sub(task.stack_pointer),
            peak_used,
            overflow,
            event_mask: task.event_mask,
            event_word: task.event_word,
            pending_mutex,
            pending_event,
        };
        P::irq_restore(state);
        Ok(info)
    }

    /// Disables preemption. Interrupts stay enabled; blocking operations
    /// fail while the lock is held. Nests.
    pub fn task_lock(&mut self) {
        self.with_irqs_off(|k| k.sched.lock += 1);
    }

    /// Re-enables preemption when the matching count reaches zero, and
    /// reschedules in case something became ready meanwhile.
    pub fn task_unlock(&mut self) {
        let state = P::irq_disable();
        if self.sched.lock > 0 {
            self.sched.lock -= 1;
            if self.sched.lock == 0 {
                P::irq_restore(state);
                self.reschedule();
                return;
            }
        }
        P::irq_restore(state);
    }

    /// Whether the scheduler has been started.
    pub fn is_running(&self) -> bool {
        self.sched.started
    }
}
