// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Software timers.
//!
//! Timers multiplex the tick timer through the second sortlink. The tick
//! handler's scan pops expired timers, re-arms periodic ones from their
//! recorded expiry (so periods do not drift), and queues the handlers on a
//! small ring; the timer task -- a system task at priority 0, woken through
//! its task-local event word -- drains the ring and runs the handlers in
//! task context. Handlers therefore may do anything a task may do, and an
//! interrupt is never extended by user code.

use crate::arch::Port;
use crate::config;
use crate::sortlink::{HasSortNode, SortNode};
use crate::task::TaskParams;
use crate::Kernel;
use abi::{EventMode, SwtmrError, TaskStatus, TskError, WAIT_FOREVER};

/// Handle to a software timer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SwtmrId(pub(crate) u16);

/// One-shot timers disarm after firing; periodic timers re-arm
/// automatically.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SwtmrMode {
    Once,
    Periodic,
}

/// Timer expiry handler, run by the timer task.
pub type SwtmrHandler = fn(usize);

/// Event bit used to wake the timer task.
pub(crate) const SWTMR_SIGNAL: u32 = 1;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum SwtmrState {
    Unused,
    /// Created but not armed.
    Created,
    /// Armed on the timer sortlink.
    Running,
}

/// A software-timer control block.
#[derive(Copy, Clone)]
pub(crate) struct SwtmrCb {
    pub(crate) state: SwtmrState,
    pub(crate) mode: SwtmrMode,
    /// Period in ticks.
    pub(crate) interval: u32,
    pub(crate) handler: Option<SwtmrHandler>,
    pub(crate) arg: usize,
    pub(crate) sort_node: SortNode,
}

impl SwtmrCb {
    pub(crate) const DEFAULT: Self = Self {
        state: SwtmrState::Unused,
        mode: SwtmrMode::Once,
        interval: 0,
        handler: None,
        arg: 0,
        sort_node: SortNode::UNLINKED,
    };
}

impl HasSortNode for SwtmrCb {
    fn sort_node(&self) -> &SortNode {
        &self.sort_node
    }
    fn sort_node_mut(&mut self) -> &mut SortNode {
        &mut self.sort_node
    }
}

/// Ring of expired timers awaiting their handlers. Fixed capacity; if the
/// timer task falls so far behind that the ring fills, further expiries in
/// that window are dropped (and logged).
#[derive(Copy, Clone)]
pub(crate) struct SwtmrRing {
    slots: [u16; config::MAX_SWTMRS],
    head: usize,
    len: usize,
}

impl SwtmrRing {
    pub(crate) const EMPTY: Self = Self {
        slots: [0; config::MAX_SWTMRS],
        head: 0,
        len: 0,
    };

    fn push(&mut self, index: u16) -> bool {
        if self.len == config::MAX_SWTMRS {
            return false;
        }
        self.slots[(self.head + self.len) % config::MAX_SWTMRS] = index;
        self.len += 1;
        true
    }

    fn pop(&mut self) -> Option<u16> {
        if self.len == 0 {
            return None;
        }
        let v = self.slots[self.head];
        self.head = (self.head + 1) % config::MAX_SWTMRS;
        self.len -= 1;
        Some(v)
    }
}

/// The timer task: sleeps on its event word until the tick scan posts,
/// then drains the ring, running each handler at task level.
pub fn swtmr_main<P: Port>(_arg: usize) -> usize {
    loop {
        let _ = P::with_kernel(|k| {
            k.task_event_read(
                SWTMR_SIGNAL,
                EventMode::OR | EventMode::CLR,
                WAIT_FOREVER,
            )
        });
        while let Some((handler, arg)) =
            P::with_kernel(|k| k.swtmr_ring_pop())
        {
            handler(arg);
        }
    }
}

impl<P: Port> Kernel<P> {
    fn swtmr_index(&self, id: SwtmrId) -> Result<usize, SwtmrError> {
        let index = usize::from(id.0);
        if index >= config::MAX_SWTMRS
            || self.swtmrs[index].state == SwtmrState::Unused
        {
            return Err(SwtmrError::IdInvalid);
        }
        Ok(index)
    }

    /// Creates the timer task and enables the software-timer module. Must
    /// run after [`Kernel::init`] and before any timer is created.
    pub fn swtmr_init(&mut self) -> Result<(), TskError> {
        let id = self.task_create_only(TaskParams {
            entry: swtmr_main::<P>,
            arg: 0,
            stack_size: config::SWTMR_STACK_SIZE,
            name: "Swt_Task",
            priority: 0,
            joinable: false,
        })?;
        let index = id.index();
        self.with_irqs_off(|k| {
            k.tasks[index].status.insert(TaskStatus::SYSTEM_TASK);
            k.swtmr_task = index as u16;
            k.enqueue_ready(index);
        });
        if self.sched.started {
            self.reschedule();
        }
        Ok(())
    }

    /// Creates a timer, initially disarmed.
    pub fn swtmr_create(
        &mut self,
        interval_ticks: u32,
        mode: SwtmrMode,
        handler: SwtmrHandler,
        arg: usize,
    ) -> Result<SwtmrId, SwtmrError> {
        if interval_ticks == 0 {
            return Err(SwtmrError::IntervalZero);
        }
        self.with_irqs_off(|k| {
            for (index, cb) in k.swtmrs.iter_mut().enumerate() {
                if cb.state == SwtmrState::Unused {
                    *cb = SwtmrCb {
                        state: SwtmrState::Created,
                        mode,
                        interval: interval_ticks,
                        handler: Some(handler),
                        arg,
                        sort_node: SortNode::UNLINKED,
                    };
                    return Ok(SwtmrId(index as u16));
                }
            }
            Err(SwtmrError::AllBusy)
        })
    }

    /// Arms a timer for one interval from now. Restarting a running timer
    /// re-arms it from scratch.
    pub fn swtmr_start(&mut self, id: SwtmrId) -> Result<(), SwtmrError> {
        let index = self.swtmr_index(id)?;
        let state = P::irq_disable();
        if self.swtmrs[index].state == SwtmrState::Running {
            if let Some(expiry) =
                self.swtmr_sortlink.remove(&mut self.swtmrs, index)
            {
                self.sched.reset_response_time(expiry);
            }
        }
        let now = P::current_cycles();
        let interval = self.swtmrs[index].interval;
        self.swtmr_sortlink
            .insert(&mut self.swtmrs, index, now, interval);
        self.swtmrs[index].state = SwtmrState::Running;
        self.update_expire_time();
        P::irq_restore(state);
        Ok(())
    }

    /// Disarms a running timer.
    pub fn swtmr_stop(&mut self, id: SwtmrId) -> Result<(), SwtmrError> {
        let index = self.swtmr_index(id)?;
        let state = P::irq_disable();
        if self.swtmrs[index].state != SwtmrState::Running {
            P::irq_restore(state);
            return Err(SwtmrError::NotStarted);
        }
        if let Some(expiry) =
            self.swtmr_sortlink.remove(&mut self.swtmrs, index)
        {
            self.sched.reset_response_time(expiry);
        }
        self.swtmrs[index].state = SwtmrState::Created;
        self.update_expire_time();
        P::irq_restore(state);
        Ok(())
    }

    /// Destroys a timer, disarming it first if needed.
    pub fn swtmr_delete(&mut self, id: SwtmrId) -> Result<(), SwtmrError> {
        let index = self.swtmr_index(id)?;
        self.with_irqs_off(|k| {
            if k.swtmrs[index].state == SwtmrState::Running {
                if let Some(expiry) =
                    k.swtmr_sortlink.remove(&mut k.swtmrs, index)
                {
                    k.sched.reset_response_time(expiry);
                }
            }
            k.swtmrs[index] = SwtmrCb::DEFAULT;
        });
        Ok(())
    }

    /// Tick-side scan: pops expired timers, re-arms periodic ones from
    /// their recorded expiry, queues handlers, and wakes the timer task.
    /// Returns whether anything fired.
    pub(crate) fn swtmr_scan(&mut self) -> bool {
        let now = P::current_cycles();
        let mut fired = false;
        while let Some(head) = self.swtmr_sortlink.head() {
            if self.swtmrs[head].sort_node.response_time() > now {
                break;
            }
            let expiry = self
                .swtmr_sortlink
                .remove(&mut self.swtmrs, head)
                .unwrap_or(now);
            match self.swtmrs[head].mode {
                SwtmrMode::Periodic => {
                    let interval = self.swtmrs[head].interval;
                    self.swtmr_sortlink
                        .insert(&mut self.swtmrs, head, expiry, interval);
                }
                SwtmrMode::Once => {
                    self.swtmrs[head].state = SwtmrState::Created;
                }
            }
            if !self.swtmr_ring.push(head as u16) {
                klog!("software-timer ring full, dropping expiry");
            }
            fired = true;
        }
        if fired && self.swtmr_task != crate::list::NONE_INDEX {
            self.task_event_post(usize::from(self.swtmr_task), SWTMR_SIGNAL);
        }
        fired
    }

    /// Dequeues one expired timer's handler for the timer task.
    pub fn swtmr_ring_pop(&mut self) -> Option<(SwtmrHandler, usize)> {
        self.with_irqs_off(|k| {
            let index = usize::from(k.swtmr_ring.pop()?);
            let cb = &k.swtmrs[index];
            cb.handler.map(|h| (h, cb.arg))
        })
    }
}
