// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Recursive mutexes with priority inheritance.
//!
//! A mutex tracks its owner and a recursion count; the owner may acquire
//! again without blocking. When a more important task arrives at a held
//! mutex, the owner is raised to the waiter's priority before the waiter
//! yields, so the switch that follows already sees the boosted owner in
//! the right ready queue. The boost is reverted on release, using the
//! priority captured when ownership was first taken.
//!
//! Release with waiters present *transfers* ownership to the head waiter
//! rather than unlocking and letting it re-acquire: the waiter is woken
//! already owning the mutex, so an intervening higher-priority acquirer
//! cannot starve it and no convoy forms.
//!
//! Inheritance is single-hop: a boost applies to the immediate owner only
//! and is not propagated across a chain of mutexes the owner itself may be
//! waiting on.

use crate::arch::Port;
use crate::config;
use crate::event::CbState;
use crate::list::{TaskQueue, NONE_INDEX};
use crate::task::PendTarget;
use crate::Kernel;
use abi::{MuxError, Priority, TaskStatus};

/// Handle to a mutex.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MuxId(pub(crate) u16);

/// A mutex control block.
#[derive(Copy, Clone)]
pub(crate) struct MuxCb {
    pub(crate) state: CbState,
    /// Recursion depth; 0 means free.
    pub(crate) count: u32,
    /// Owning task index, or `NONE_INDEX`.
    pub(crate) owner: u16,
    /// The owner's priority at first acquisition, restored on final
    /// release.
    pub(crate) owner_priority: Priority,
    pub(crate) queue: TaskQueue,
}

impl MuxCb {
    pub(crate) const DEFAULT: Self = Self {
        state: CbState::Unused,
        count: 0,
        owner: NONE_INDEX,
        owner_priority: Priority(0),
        queue: TaskQueue::EMPTY,
    };
}

impl<P: Port> Kernel<P> {
    /// Claims a mutex control block.
    pub fn mux_create(&mut self) -> Result<MuxId, MuxError> {
        self.with_irqs_off(|k| {
            for (index, cb) in k.mutexes.iter_mut().enumerate() {
                if cb.state == CbState::Unused {
                    *cb = MuxCb {
                        state: CbState::Used,
                        ..MuxCb::DEFAULT
                    };
                    return Ok(MuxId(index as u16));
                }
            }
            Err(MuxError::AllBusy)
        })
    }

    /// Releases a mutex control block. Refused while held or waited on.
    pub fn mux_delete(&mut self, id: MuxId) -> Result<(), MuxError> {
        let index = usize::from(id.0);
        if index >= config::MAX_MUTEXES {
            return Err(MuxError::Invalid);
        }
        self.with_irqs_off(|k| {
            let cb = &mut k.mutexes[index];
            if cb.state == CbState::Unused {
                return Err(MuxError::Invalid);
            }
            if !cb.queue.is_empty() || cb.count != 0 {
                return Err(MuxError::Pended);
            }
            cb.state = CbState::Unused;
            Ok(())
        })
    }

    /// First half of acquire. Returns `Some(())` when the mutex was taken
    /// (or re-entered) immediately, `None` after parking the caller with
    /// the owner boosted; on hardware the context switch happens inside
    /// this call and the caller then runs [`Kernel::mux_acquire_finish`].
    pub fn mux_acquire_start(
        &mut self,
        id: MuxId,
        timeout: u32,
    ) -> Result<Option<()>, MuxError> {
        let index = usize::from(id.0);
        if index >= config::MAX_MUTEXES {
            return Err(MuxError::Invalid);
        }

        let state = P::irq_disable();
        if self.mutexes[index].state == CbState::Unused {
            P::irq_restore(state);
            return Err(MuxError::Invalid);
        }
        if P::in_interrupt() {
            P::irq_restore(state);
            return Err(MuxError::InInterrupt);
        }
        if self.sched.lock != 0 {
            P::irq_restore(state);
            klog!("mutex acquire while scheduler locked");
            return Err(MuxError::PendInLock);
        }
        let running = usize::from(self.running);
        if self.tasks[running].status.contains(TaskStatus::SYSTEM_TASK) {
            P::irq_restore(state);
            return Err(MuxError::PendInSystemTask);
        }

        if self.mutexes[index].count == 0 {
            self.mutexes[index].count = 1;
            self.mutexes[index].owner = running as u16;
            self.mutexes[index].owner_priority =
                self.tasks[running].priority;
            P::irq_restore(state);
            return Ok(Some(()));
        }

        if self.mutexes[index].owner == running as u16 {
            self.mutexes[index].count += 1;
            P::irq_restore(state);
            return Ok(Some(()));
        }

        if timeout == 0 {
            P::irq_restore(state);
            return Err(MuxError::Unavailable);
        }

        // Priority inheritance: a less important owner is raised to the
        // caller's priority before the caller yields.
        let owner = usize::from(self.mutexes[index].owner);
        let caller_priority = self.tasks[running].priority;
        if caller_priority.is_more_important_than(self.tasks[owner].priority)
        {
            self.modify_priority(owner, caller_priority);
        }

        self.pend_current(PendTarget::Mutex(index as u16), timeout);
        P::irq_restore(state);
        self.reschedule();
        Ok(None)
    }

    /// Second half of acquire, run by the woken task. Ownership was either
    /// handed over by the releaser (success) or the wait timed out.
    pub fn mux_acquire_finish(&mut self, _id: MuxId) -> Result<(), MuxError> {
        let state = P::irq_disable();
        let running = usize::from(self.running);
        if self.tasks[running].status.contains(TaskStatus::TIMEOUT) {
            self.tasks[running].status.remove(TaskStatus::TIMEOUT);
            P::irq_restore(state);
            return Err(MuxError::Timeout);
        }
        P::irq_restore(state);
        Ok(())
    }

    /// Acquires the mutex, waiting up to `timeout` ticks
    /// ([`abi::WAIT_FOREVER`] for no deadline, 0 for try-acquire).
    pub fn mux_acquire(
        &mut self,
        id: MuxId,
        timeout: u32,
    ) -> Result<(), MuxError> {
        match self.mux_acquire_start(id, timeout)? {
            Some(()) => Ok(()),
            // Parked; on hardware we resume here owning the mutex or timed
            // out.
            None => self.mux_acquire_finish(id),
        }
    }

    /// Releases the mutex. The final release restores any inherited
    /// priority and, when tasks wait, hands ownership to the head waiter
    /// and wakes it.
    pub fn mux_release(&mut self, id: MuxId) -> Result<(), MuxError> {
        let index = usize::from(id.0);
        if index >= config::MAX_MUTEXES {
            return Err(MuxError::Invalid);
        }

        let state = P::irq_disable();
        if self.mutexes[index].state == CbState::Unused {
            P::irq_restore(state);
            return Err(MuxError::Invalid);
        }
        if P::in_interrupt() {
            P::irq_restore(state);
            return Err(MuxError::InInterrupt);
        }
        let running = self.running;
        if self.mutexes[index].count == 0
            || self.mutexes[index].owner != running
        {
            P::irq_restore(state);
            return Err(MuxError::Invalid);
        }

        self.mutexes[index].count -= 1;
        if self.mutexes[index].count != 0 {
            P::irq_restore(state);
            return Ok(());
        }

        let owner = usize::from(self.mutexes[index].owner);
        let original = self.mutexes[index].owner_priority;
        if self.tasks[owner].priority != original {
            self.modify_priority(owner, original);
        }

        if let Some(waiter) = self.mutexes[index].queue.head() {
            // Hand the mutex to the head waiter before waking it, so it
            // resumes already owning it.
            self.mutexes[index].count = 1;
            self.mutexes[index].owner = waiter as u16;
            self.mutexes[index].owner_priority = self.tasks[waiter].priority;
            self.wake_task(waiter);
            P::irq_restore(state);
            self.reschedule();
        } else {
            self.mutexes[index].owner = NONE_INDEX;
            P::irq_restore(state);
        }
        Ok(())
    }
}
