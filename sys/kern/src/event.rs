// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event flags.
//!
//! An event object is a 32-bit word of flags plus a FIFO queue of waiting
//! tasks. Readers wait for a mask of bits under `OR` (any) or `AND` (all)
//! semantics, optionally consuming the satisfying bits (`CLR`); writers OR
//! bits in and wake every waiter whose predicate the write satisfies.
//! Writing is legal from interrupt context, which is how interrupt
//! handlers hand work to tasks.
//!
//! Two details worth knowing:
//!
//! - A woken reader re-evaluates its predicate when it resumes (and applies
//!   `CLR` then), so the value it returns reflects the word at wake-up
//!   time, not at write time. There are no spurious wakes: only a
//!   satisfying write or a timeout lifts a waiter.
//! - `clear` takes a *keep*-mask: `events &= mask`. `clear(id, 0)` wipes
//!   the word.
//!
//! Besides these shared objects, every task owns a private event word that
//! others post to directly ([`Kernel::task_event_write`]); the kernel's
//! timer task sleeps on its own word. Task-local waits use the same
//! mask/mode rules but no wait queue, and -- unlike shared-object reads --
//! are permitted for system tasks.

use crate::arch::Port;
use crate::config;
use crate::list::TaskQueue;
use crate::task::PendTarget;
use crate::Kernel;
use abi::{EventError, EventMode, TaskId, TaskStatus, TskError};
use abi::EVENT_ERRTYPE_ERROR;

/// Handle to an event object.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EventId(pub(crate) u16);

/// Allocation state of a control block slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum CbState {
    Unused,
    Used,
}

/// An event control block.
#[derive(Copy, Clone)]
pub(crate) struct EventCb {
    pub(crate) state: CbState,
    pub(crate) events: u32,
    pub(crate) queue: TaskQueue,
}

impl EventCb {
    pub(crate) const DEFAULT: Self = Self {
        state: CbState::Unused,
        events: 0,
        queue: TaskQueue::EMPTY,
    };
}

/// Evaluates a wait predicate against `events`, applying `CLR` on
/// success. Returns the satisfying bits, or 0.
fn poll_word(events: &mut u32, mask: u32, mode: EventMode) -> u32 {
    let mut hit = 0;
    if mode.contains(EventMode::OR) {
        if *events & mask != 0 {
            hit = *events & mask;
        }
    } else if mask != 0 && (*events & mask) == mask {
        hit = *events & mask;
    }
    if hit != 0 && mode.contains(EventMode::CLR) {
        *events &= !hit;
    }
    hit
}

/// Validates a read's mask and mode: a nonzero mask without the reserved
/// bit, and exactly one of OR/AND plus at most CLR.
fn read_param_check(mask: u32, mode: EventMode) -> Result<(), EventError> {
    if mask == 0 {
        return Err(EventError::MaskInvalid);
    }
    if mask & EVENT_ERRTYPE_ERROR != 0 {
        return Err(EventError::SetbitInvalid);
    }
    let both = EventMode::OR | EventMode::AND;
    if mode & both == both || !mode.intersects(both) {
        return Err(EventError::FlagsInvalid);
    }
    Ok(())
}

impl<P: Port> Kernel<P> {
    fn event_index(&self, id: EventId) -> Result<usize, EventError> {
        let index = usize::from(id.0);
        if index >= config::MAX_EVENTS
            || self.events[index].state == CbState::Unused
        {
            return Err(EventError::NotInitialized);
        }
        Ok(index)
    }

    /// Claims and initializes an event object.
    pub fn event_init(&mut self) -> Result<EventId, EventError> {
        self.with_irqs_off(|k| {
            for (index, cb) in k.events.iter_mut().enumerate() {
                if cb.state == CbState::Unused {
                    *cb = EventCb {
                        state: CbState::Used,
                        events: 0,
                        queue: TaskQueue::EMPTY,
                    };
                    return Ok(EventId(index as u16));
                }
            }
            Err(EventError::AllBusy)
        })
    }

    /// Non-blocking predicate test against the current word; applies `CLR`
    /// on success. Returns 0 on a miss.
    pub fn event_poll(
        &mut self,
        id: EventId,
        mask: u32,
        mode: EventMode,
    ) -> Result<u32, EventError> {
        let index = self.event_index(id)?;
        Ok(self
            .with_irqs_off(|k| poll_word(&mut k.events[index].events, mask, mode)))
    }

    /// First half of a blocking read. Returns `Some(bits)` when the wait
    /// completed immediately (`Some(0)` for a non-blocking miss), or `None`
    /// after parking the caller; on hardware the context switch happens
    /// inside this call and the caller then runs
    /// [`Kernel::event_read_finish`].
    pub fn event_read_start(
        &mut self,
        id: EventId,
        mask: u32,
        mode: EventMode,
        timeout: u32,
    ) -> Result<Option<u32>, EventError> {
        let index = self.event_index(id)?;
        read_param_check(mask, mode)?;
        if P::in_interrupt() {
            return Err(EventError::ReadInInterrupt);
        }
        let running = usize::from(self.running);
        if self.tasks[running].status.contains(TaskStatus::SYSTEM_TASK) {
            return Err(EventError::ReadInSystemTask);
        }

        let state = P::irq_disable();
        let bits = poll_word(&mut self.events[index].events, mask, mode);
        if bits != 0 {
            P::irq_restore(state);
            return Ok(Some(bits));
        }
        if timeout == 0 {
            P::irq_restore(state);
            return Ok(Some(0));
        }
        if self.sched.lock != 0 {
            P::irq_restore(state);
            return Err(EventError::ReadInLock);
        }

        self.tasks[running].event_mask = mask;
        self.tasks[running].event_mode = mode;
        self.pend_current(PendTarget::Event(index as u16), timeout);
        P::irq_restore(state);
        self.reschedule();
        Ok(None)
    }

    /// Second half of a blocking read, run by the woken task: reports the
    /// timeout if the deadline fired, otherwise re-evaluates the predicate
    /// (consuming bits under `CLR`).
    pub fn event_read_finish(
        &mut self,
        id: EventId,
    ) -> Result<u32, EventError> {
        let index = self.event_index(id)?;
        let state = P::irq_disable();
        let running = usize::from(self.running);
        if self.tasks[running].status.contains(TaskStatus::TIMEOUT) {
            self.tasks[running].status.remove(TaskStatus::TIMEOUT);
            P::irq_restore(state);
            return Err(EventError::ReadTimeout);
        }
        let mask = self.tasks[running].event_mask;
        let mode = self.tasks[running].event_mode;
        let bits = poll_word(&mut self.events[index].events, mask, mode);
        P::irq_restore(state);
        Ok(bits)
    }

    /// Blocking read: waits up to `timeout` ticks ([`abi::WAIT_FOREVER`]
    /// for no deadline) for the mask/mode predicate. Returns the
    /// satisfying bits, 0 for an immediate miss with `timeout == 0`, or
    /// [`EventError::ReadTimeout`].
    pub fn event_read(
        &mut self,
        id: EventId,
        mask: u32,
        mode: EventMode,
        timeout: u32,
    ) -> Result<u32, EventError> {
        match self.event_read_start(id, mask, mode, timeout)? {
            Some(bits) => Ok(bits),
            // Parked; on hardware we resume here after the wake.
            None => self.event_read_finish(id),
        }
    }

    /// ORs `bits` into the word and wakes satisfied waiters. Walks the
    /// queue reading each successor first, since waking unlinks the
    /// current entry. Returns whether anyone woke.
    pub(crate) fn event_write_inner(&mut self, index: usize, bits: u32) -> bool {
        self.events[index].events |= bits;
        let word = self.events[index].events;

        let mut woke = false;
        let mut cursor = self.events[index].queue.head();
        while let Some(t) = cursor {
            cursor = crate::list::next_of(&self.tasks, t);
            let mask = self.tasks[t].event_mask;
            let mode = self.tasks[t].event_mode;
            let satisfied = (mode.contains(EventMode::OR)
                && mask & bits != 0)
                || (mode.contains(EventMode::AND) && word & mask == mask);
            if satisfied {
                self.wake_task(t);
                woke = true;
            }
        }
        woke
    }

    /// Sets event bits. Legal from interrupt context.
    pub fn event_write(
        &mut self,
        id: EventId,
        bits: u32,
    ) -> Result<(), EventError> {
        let index = self.event_index(id)?;
        if bits & EVENT_ERRTYPE_ERROR != 0 {
            return Err(EventError::SetbitInvalid);
        }
        let state = P::irq_disable();
        let woke = self.event_write_inner(index, bits);
        P::irq_restore(state);
        if woke {
            self.reschedule();
        }
        Ok(())
    }

    /// Retains only the bits in `mask`: `events &= mask`.
    pub fn event_clear(
        &mut self,
        id: EventId,
        mask: u32,
    ) -> Result<(), EventError> {
        let index = self.event_index(id)?;
        self.with_irqs_off(|k| k.events[index].events &= mask);
        Ok(())
    }

    /// Tears an event object down. Refused while tasks wait on it.
    pub fn event_destroy(&mut self, id: EventId) -> Result<(), EventError> {
        let index = self.event_index(id)?;
        self.with_irqs_off(|k| {
            if !k.events[index].queue.is_empty() {
                return Err(EventError::ShouldNotDestroy);
            }
            k.events[index].state = CbState::Unused;
            Ok(())
        })
    }

    // Task-local events -----------------------------------------------------

    /// Posts bits to a task's private event word, waking it if it is
    /// blocked on a now-satisfied task-local wait. Returns whether it
    /// woke.
    pub(crate) fn task_event_post(&mut self, index: usize, bits: u32) -> bool {
        self.tasks[index].event_word |= bits;
        if !self.tasks[index].status.contains(TaskStatus::PEND)
            || self.tasks[index].pending_on != PendTarget::OwnEvent
        {
            return false;
        }
        let mask = self.tasks[index].event_mask;
        let mode = self.tasks[index].event_mode;
        let word = self.tasks[index].event_word;
        let satisfied = (mode.contains(EventMode::OR) && mask & bits != 0)
            || (mode.contains(EventMode::AND) && word & mask == mask);
        if satisfied {
            self.wake_task(index);
        }
        satisfied
    }

    /// Posts bits to another task's private event word. Legal from
    /// interrupt context.
    pub fn task_event_write(
        &mut self,
        id: TaskId,
        bits: u32,
    ) -> Result<(), TskError> {
        let index = id.index();
        if index >= config::MAX_TASKS
            || self.tasks[index].generation != id.generation()
        {
            return Err(TskError::IdInvalid);
        }
        let state = P::irq_disable();
        if self.tasks[index].status.contains(TaskStatus::UNUSED) {
            P::irq_restore(state);
            return Err(TskError::NotCreated);
        }
        let woke = self.task_event_post(index, bits);
        P::irq_restore(state);
        if woke {
            self.reschedule();
        }
        Ok(())
    }

    /// First half of a task-local wait on the caller's own event word.
    /// Same contract as [`Kernel::event_read_start`], but with no wait
    /// queue and no system-task restriction (the kernel's timer task lives
    /// on this).
    pub fn task_event_read_start(
        &mut self,
        mask: u32,
        mode: EventMode,
        timeout: u32,
    ) -> Result<Option<u32>, EventError> {
        read_param_check(mask, mode)?;
        if P::in_interrupt() {
            return Err(EventError::ReadInInterrupt);
        }

        let state = P::irq_disable();
        let running = usize::from(self.running);
        let bits =
            poll_word(&mut self.tasks[running].event_word, mask, mode);
        if bits != 0 {
            P::irq_restore(state);
            return Ok(Some(bits));
        }
        if timeout == 0 {
            P::irq_restore(state);
            return Ok(Some(0));
        }
        if self.sched.lock != 0 {
            P::irq_restore(state);
            return Err(EventError::ReadInLock);
        }

        self.tasks[running].event_mask = mask;
        self.tasks[running].event_mode = mode;
        self.pend_current(PendTarget::OwnEvent, timeout);
        P::irq_restore(state);
        self.reschedule();
        Ok(None)
    }

    /// Second half of a task-local wait.
    pub fn task_event_read_finish(&mut self) -> Result<u32, EventError> {
        let state = P::irq_disable();
        let running = usize::from(self.running);
        if self.tasks[running].status.contains(TaskStatus::TIMEOUT) {
            self.tasks[running].status.remove(TaskStatus::TIMEOUT);
            P::irq_restore(state);
            return Err(EventError::ReadTimeout);
        }
        let mask = self.tasks[running].event_mask;
        let mode = self.tasks[running].event_mode;
        let bits =
            poll_word(&mut self.tasks[running].event_word, mask, mode);
        P::irq_restore(state);
        Ok(bits)
    }

    /// Blocking wait on the caller's own event word.
    pub fn task_event_read(
        &mut self,
        mask: u32,
        mode: EventMode,
        timeout: u32,
    ) -> Result<u32, EventError> {
        match self.task_event_read_start(mask, mode, timeout)? {
            Some(bits) => Ok(bits),
            None => self.task_event_read_finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_or_returns_any_overlap() {
        let mut w = 0b1010;
        assert_eq!(poll_word(&mut w, 0b0110, EventMode::OR), 0b0010);
        // No CLR: the word is untouched.
        assert_eq!(w, 0b1010);
    }

    #[test]
    fn poll_and_requires_all_bits() {
        let mut w = 0b0010;
        assert_eq!(poll_word(&mut w, 0b0110, EventMode::AND), 0);
        w = 0b0110;
        assert_eq!(poll_word(&mut w, 0b0110, EventMode::AND), 0b0110);
    }

    #[test]
    fn poll_clr_consumes_only_satisfying_bits() {
        let mut w = 0b1011;
        assert_eq!(
            poll_word(&mut w, 0b0011, EventMode::OR | EventMode::CLR),
            0b0011
        );
        assert_eq!(w, 0b1000);
    }

    #[test]
    fn mode_validation_rejects_bad_combinations() {
        // Both AND and OR.
        assert_eq!(
            read_param_check(1, EventMode::AND | EventMode::OR),
            Err(EventError::FlagsInvalid)
        );
        // Neither.
        assert_eq!(
            read_param_check(1, EventMode::CLR),
            Err(EventError::FlagsInvalid)
        );
        assert_eq!(read_param_check(0, EventMode::OR), Err(EventError::MaskInvalid));
        assert_eq!(
            read_param_check(EVENT_ERRTYPE_ERROR, EventMode::OR),
            Err(EventError::SetbitInvalid)
        );
        assert!(read_param_check(1, EventMode::OR | EventMode::CLR).is_ok());
        assert!(read_param_check(0b110, EventMode::AND).is_ok());
    }
}
