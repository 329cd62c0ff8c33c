// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel and application code.
//!
//! Everything here is deliberately plain data: handles, flag words, and the
//! error-code taxonomy. Kernel behavior lives in the `kern` crate; this crate
//! only pins down the shapes that both sides must agree on.

#![no_std]

use serde::{Deserialize, Serialize};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Number of distinct task priorities. Priority values are `0..NUM_PRIORITIES`
/// where numerically lower is more important.
pub const NUM_PRIORITIES: usize = 32;

/// The numerically largest (least important) priority. Reserved for the idle
/// task; task creation at this priority with any other entry point is
/// rejected.
pub const PRIORITY_LOWEST: u8 = (NUM_PRIORITIES - 1) as u8;

/// Names a particular incarnation of a task.
///
/// A `TaskId` combines two fields, a task index (dense, assigned from the TCB
/// table) and a task generation number. The generation begins counting at
/// zero and is incremented every time the TCB slot is recycled for a new
/// task. Attempts to operate on a task using an outdated generation fail with
/// an invalid-id error rather than silently aliasing the slot's new occupant.
///
/// The index lives in the lower [`TaskId::INDEX_BITS`] bits, the generation
/// in the remaining top bits.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TaskId(pub u16);

impl TaskId {
    /// Number of bits of a `TaskId` used for the task index. The rest hold
    /// the generation number.
    pub const INDEX_BITS: u32 = 8;

    /// Derived mask of the index portion.
    pub const INDEX_MASK: u16 = (1 << Self::INDEX_BITS) - 1;

    /// Fabricates a `TaskId` for a known index and generation number.
    pub const fn for_index_and_gen(index: usize, gen: Generation) -> Self {
        TaskId(
            (index as u16 & Self::INDEX_MASK)
                | (gen.0 as u16) << Self::INDEX_BITS,
        )
    }

    /// Extracts the index part of this ID.
    pub fn index(&self) -> usize {
        usize::from(self.0 & Self::INDEX_MASK)
    }

    /// Extracts the generation part of this ID.
    pub fn generation(&self) -> Generation {
        Generation((self.0 >> Self::INDEX_BITS) as u8)
    }
}

/// Type used to track TCB-slot generation numbers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Generation(u8);

impl Generation {
    pub const ZERO: Self = Self(0);

    pub fn next(self) -> Self {
        const MASK: u16 = 0xFFFF << TaskId::INDEX_BITS >> TaskId::INDEX_BITS;
        Generation(self.0.wrapping_add(1) & MASK as u8)
    }
}

impl From<u8> for Generation {
    fn from(x: u8) -> Self {
        Self(x)
    }
}

/// Indicates priority of a task.
///
/// Priorities are small numbers starting from zero. Numerically lower
/// priorities are more important, so Priority 0 is the most likely to be
/// scheduled, followed by 1, and so forth.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`,
/// to keep us from confusing ourselves on whether `>` means numerically
/// greater / less important, or more important / numerically smaller.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
    Default,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Checks if `self` is strictly more important than `other`.
    ///
    /// This is easier to read than comparing the numeric values of the
    /// priorities, since lower numbers are more important.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 < other.0
    }
}

bitflags::bitflags! {
    /// Task status word.
    ///
    /// These are genuine *bits*, not an enum: several can be set at once
    /// (e.g. `PEND | PEND_TIME | SUSPEND`). The scheduler relies on precise
    /// combinations; see the invariants documented on `kern`'s task module.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    #[repr(transparent)]
    pub struct TaskStatus: u16 {
        /// TCB slot is free.
        const UNUSED = 1 << 0;
        /// Explicitly suspended; only resume clears it.
        const SUSPEND = 1 << 1;
        /// On a priority ready queue.
        const READY = 1 << 2;
        /// Blocked on an IPC wait queue.
        const PEND = 1 << 3;
        /// Currently executing. At most one task carries this.
        const RUNNING = 1 << 4;
        /// Sleeping on a pure timeout, no IPC object involved.
        const DELAY = 1 << 5;
        /// The tick handler expired this task's IPC wait. Cleared by the
        /// woken task when it reports the timeout.
        const TIMEOUT = 1 << 6;
        /// Blocked with a deadline; implies presence on the task sortlink.
        const PEND_TIME = 1 << 7;
        /// Task function returned; TCB awaits join.
        const EXIT = 1 << 8;
        /// May be joined; otherwise detached.
        const JOINABLE = 1 << 9;
        /// Sortlink expiry preserved while suspended in low-power mode.
        const FREEZE = 1 << 10;
        /// Kernel-internal task; cannot be suspended or deleted by user
        /// code.
        const SYSTEM_TASK = 1 << 11;
        /// The kernel owns this task's stack allocation and frees it on
        /// recycle.
        const STACK_FREE = 1 << 12;
    }
}

bitflags::bitflags! {
    /// Wait mode for event-flag reads.
    ///
    /// Exactly one of `OR` / `AND` must be given; `CLR` is optional.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    #[repr(transparent)]
    pub struct EventMode: u32 {
        /// Clear the satisfying bits from the event word on success.
        const CLR = 1 << 0;
        /// Satisfied when *any* bit of the mask is set.
        const OR = 1 << 1;
        /// Satisfied when *all* bits of the mask are set.
        const AND = 1 << 2;
    }
}

/// Bit of the 32-bit event word reserved for error signaling. Masks and
/// writes that include it are rejected.
pub const EVENT_ERRTYPE_ERROR: u32 = 0x02 << 24;

// Error codes
// ---------------------------------------------------------------------------
//
// Every kernel API reports failure through one of the domain enums below.
// Each variant has a stable 32-bit code, module-tagged so a raw code can be
// attributed without context: 0x02 in the top byte marks an error, the next
// byte names the module, the low byte the condition. 0 is never a valid
// error code, so "0 = success" holds for anything shuttling raw codes.

const ERRTYPE_ERROR: u32 = 0x02 << 24;

const MOD_TSK: u32 = 0x02;
const MOD_EVENT: u32 = 0x0C;
const MOD_MEMBOX: u32 = 0x18;
const MOD_MUX: u32 = 0x1D;
const MOD_SWTMR: u32 = 0x06;

const fn os_error(module: u32, errno: u32) -> u32 {
    ERRTYPE_ERROR | (module << 8) | errno
}

/// Task-module errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TskError {
    /// Task ID is out of range, or its generation is stale.
    IdInvalid,
    /// The TCB slot behind this ID holds no live task.
    NotCreated,
    /// No free TCB slot is available.
    NoFreeTcb,
    /// Task name must be non-empty.
    NameEmpty,
    /// Priority outside `0..NUM_PRIORITIES`, or the idle priority requested
    /// for a non-idle entry point.
    PriorityError,
    /// Requested stack exceeds the configured heap ceiling.
    StackSizeTooLarge,
    /// Requested stack is below the architecture minimum.
    StackSizeTooSmall,
    /// Stack allocation failed.
    NoMemory,
    /// Target is already suspended.
    AlreadySuspended,
    /// Target is not suspended.
    NotSuspended,
    /// The idle task cannot be operated on.
    OperateIdle,
    /// The software-timer task cannot be operated on.
    OperateSwtmr,
    /// System tasks cannot be suspended or deleted by user code.
    OperateSystemTask,
    /// Operation requires task context.
    InInterrupt,
    /// Operation is not permitted while the scheduler is locked.
    SchedLocked,
    /// The running task cannot be suspended while the scheduler is locked.
    SuspendLocked,
    /// Target has already exited.
    AlreadyExit,
    /// A task cannot join itself.
    NotJoinSelf,
    /// Target is detached.
    NotJoinable,
    /// Another task has already joined the target.
    AlreadyJoined,
}

impl TskError {
    pub const fn code(self) -> u32 {
        let errno: u32 = match self {
            Self::IdInvalid => 0x01,
            Self::NotCreated => 0x02,
            Self::NoFreeTcb => 0x03,
            Self::NameEmpty => 0x04,
            Self::PriorityError => 0x05,
            Self::StackSizeTooLarge => 0x06,
            Self::StackSizeTooSmall => 0x07,
            Self::NoMemory => 0x08,
            Self::AlreadySuspended => 0x09,
            Self::NotSuspended => 0x0A,
            Self::OperateIdle => 0x0B,
            Self::OperateSwtmr => 0x0C,
            Self::OperateSystemTask => 0x0D,
            Self::InInterrupt => 0x0E,
            Self::SchedLocked => 0x0F,
            Self::SuspendLocked => 0x10,
            Self::AlreadyExit => 0x11,
            Self::NotJoinSelf => 0x12,
            Self::NotJoinable => 0x13,
            Self::AlreadyJoined => 0x14,
        };
        os_error(MOD_TSK, errno)
    }
}

/// Event-module errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum EventError {
    /// Event ID does not name an initialized event object.
    NotInitialized,
    /// No free event control block is available.
    AllBusy,
    /// A wait mask of zero is meaningless.
    MaskInvalid,
    /// The mask or write set includes the reserved error bit.
    SetbitInvalid,
    /// The mode word is not exactly one of AND/OR plus optional CLR.
    FlagsInvalid,
    /// Blocking reads are not allowed in interrupt context.
    ReadInInterrupt,
    /// System tasks may not block on events.
    ReadInSystemTask,
    /// Blocking reads are not allowed while the scheduler is locked.
    ReadInLock,
    /// The wait's deadline elapsed before the predicate was satisfied.
    ReadTimeout,
    /// Destroy is refused while tasks are queued on the event.
    ShouldNotDestroy,
}

impl EventError {
    pub const fn code(self) -> u32 {
        let errno: u32 = match self {
            Self::NotInitialized => 0x01,
            Self::AllBusy => 0x02,
            Self::MaskInvalid => 0x03,
            Self::SetbitInvalid => 0x04,
            Self::FlagsInvalid => 0x05,
            Self::ReadInInterrupt => 0x06,
            Self::ReadInSystemTask => 0x07,
            Self::ReadInLock => 0x08,
            Self::ReadTimeout => 0x09,
            Self::ShouldNotDestroy => 0x0A,
        };
        os_error(MOD_EVENT, errno)
    }
}

/// Mutex-module errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MuxError {
    /// Handle out of range, control block unused, or the caller does not own
    /// the mutex it is releasing.
    Invalid,
    /// No free mutex control block is available.
    AllBusy,
    /// Non-blocking acquire found the mutex held by another task.
    Unavailable,
    /// The timed acquire's deadline elapsed.
    Timeout,
    /// Mutex operations require task context.
    InInterrupt,
    /// Acquire is not permitted while the scheduler is locked.
    PendInLock,
    /// System tasks may not block on mutexes.
    PendInSystemTask,
    /// Delete is refused while the mutex is held or waited on.
    Pended,
}

impl MuxError {
    pub const fn code(self) -> u32 {
        let errno: u32 = match self {
            Self::Invalid => 0x01,
            Self::AllBusy => 0x02,
            Self::Unavailable => 0x03,
            Self::Timeout => 0x04,
            Self::InInterrupt => 0x05,
            Self::PendInLock => 0x06,
            Self::PendInSystemTask => 0x07,
            Self::Pended => 0x08,
        };
        os_error(MOD_MUX, errno)
    }
}

/// Membox (fixed-block pool) errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MemboxError {
    /// The pool pointer/region is null, too small, or its header is
    /// corrupted.
    PoolInvalid,
    /// No free block remains.
    AllocEmpty,
    /// The pointer passed to free is out of range, misaligned relative to
    /// the block grid, or its node word fails the magic check.
    FreeBadPtr,
}

impl MemboxError {
    pub const fn code(self) -> u32 {
        let errno: u32 = match self {
            Self::PoolInvalid => 0x01,
            Self::AllocEmpty => 0x02,
            Self::FreeBadPtr => 0x03,
        };
        os_error(MOD_MEMBOX, errno)
    }
}

/// Software-timer errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SwtmrError {
    /// Timer ID out of range or slot not created.
    IdInvalid,
    /// No free timer control block is available.
    AllBusy,
    /// A zero interval is meaningless.
    IntervalZero,
    /// Stop/restart of a timer that is not running.
    NotStarted,
}

impl SwtmrError {
    pub const fn code(self) -> u32 {
        let errno: u32 = match self {
            Self::IdInvalid => 0x01,
            Self::AllBusy => 0x02,
            Self::IntervalZero => 0x03,
            Self::NotStarted => 0x04,
        };
        os_error(MOD_SWTMR, errno)
    }
}

/// Timeout argument accepted by all blocking primitives, in ticks.
/// [`WAIT_FOREVER`] disables the deadline entirely.
pub const WAIT_FOREVER: u32 = u32::MAX;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_round_trips_index_and_generation() {
        let id = TaskId::for_index_and_gen(7, Generation::from(3));
        assert_eq!(id.index(), 7);
        assert_eq!(id.generation(), Generation::from(3));
    }

    #[test]
    fn generation_wraps_within_its_field() {
        let mut g = Generation::ZERO;
        for _ in 0..=u8::MAX as u32 {
            g = g.next();
        }
        // Full cycle returns to the start.
        assert_eq!(g, Generation::ZERO);
    }

    #[test]
    fn priority_comparison_reads_correctly() {
        assert!(Priority(0).is_more_important_than(Priority(31)));
        assert!(!Priority(31).is_more_important_than(Priority(0)));
        assert!(!Priority(5).is_more_important_than(Priority(5)));
    }

    #[test]
    fn error_codes_are_nonzero_and_distinct_across_modules() {
        assert_ne!(TskError::IdInvalid.code(), 0);
        assert_ne!(TskError::IdInvalid.code(), EventError::NotInitialized.code());
        assert_ne!(MuxError::Invalid.code(), MemboxError::PoolInvalid.code());
    }
}
