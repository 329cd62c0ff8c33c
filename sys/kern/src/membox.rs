// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Membox: fixed-block memory pools.
//!
//! A membox turns a caller-provided memory region into a constant-time
//! allocator for equal-sized blocks. The region starts with a small
//! [`MemboxInfo`] header, followed by the blocks; each block is prefixed
//! with one word that either links it into the free list (free) or holds a
//! magic/owner stamp (allocated). The stamp's low eight bits record the
//! task that allocated the block, which is the first thing to look at when
//! a pool is found corrupted.
//!
//! This module is one of the few places the kernel does raw pointer
//! arithmetic: the pool layout is defined by addresses, not types, so the
//! usual safe containers cannot express it. Every dereference below is
//! justified against the validation performed on entry.
//!
//! Concurrency: each operation brackets its list mutation with interrupt
//! masking via the port, so pools may be used from tasks and interrupt
//! handlers alike.

use crate::arch::Port;
use crate::config;
use abi::MemboxError;

use core::mem::{align_of, size_of};
use core::ptr::NonNull;

/// Pool header, resident at the start of the region.
#[repr(C)]
pub struct MemboxInfo {
    /// Block stride in bytes: user block size plus the node word, aligned.
    blk_size: usize,
    /// Number of blocks in the pool.
    blk_num: usize,
    /// Number of blocks currently allocated.
    blk_cnt: usize,
    /// Address of the first free node, or 0 when exhausted.
    free_head: usize,
}

/// Size of the per-block node word.
const NODE_SIZE: usize = size_of::<usize>();

/// Magic stamped into an allocated block's node word. The low
/// [`TASKID_BITS`] bits are replaced by the allocating task's index.
const MAGIC: usize = 0xa55a_5a00;

const TASKID_BITS: u32 = 8;
const TASKID_MASK: usize = (1 << TASKID_BITS) - 1;

/// Snapshot returned by [`stats`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemboxStats {
    /// Total number of blocks.
    pub capacity: usize,
    /// Blocks currently allocated.
    pub in_use: usize,
    /// Block stride in bytes, including the node word.
    pub stride: usize,
}

fn align_up(x: usize, align: usize) -> usize {
    (x + align - 1) & !(align - 1)
}

/// Checks that `pool` could plausibly point at a pool header.
fn pool_ok(pool: *const u8) -> bool {
    !pool.is_null() && (pool as usize) % align_of::<MemboxInfo>() == 0
}

fn stamp_for(owner: u8) -> usize {
    MAGIC | owner as usize
}

/// Validates an allocated node word: the owner field must name a plausible
/// task and the rest must be the magic pattern.
fn stamp_ok(word: usize) -> bool {
    let owner = word & TASKID_MASK;
    owner < config::NUM_TASK_SLOTS && word == MAGIC | owner
}

/// Partitions `pool_size` bytes at `pool` into a fixed-block pool with user
/// blocks of `blk_size` bytes.
///
/// # Safety
///
/// `pool` must be valid for reads and writes of `pool_size` bytes, and the
/// region must not be in use for anything else (including a live membox:
/// re-initializing orphans any outstanding blocks).
pub unsafe fn init<P: Port>(
    pool: *mut u8,
    pool_size: usize,
    blk_size: usize,
) -> Result<(), MemboxError> {
    if !pool_ok(pool) || blk_size == 0 || pool_size < size_of::<MemboxInfo>()
    {
        return Err(MemboxError::PoolInvalid);
    }

    let stride = align_up(blk_size + NODE_SIZE, align_of::<usize>());
    let blk_num = (pool_size - size_of::<MemboxInfo>()) / stride;
    if blk_num == 0 {
        return Err(MemboxError::PoolInvalid);
    }

    let state = P::irq_disable();
    let info = pool as *mut MemboxInfo;
    // Safety: `pool` is aligned and large enough for the header per the
    // checks above, and the caller granted us the region.
    info.write(MemboxInfo {
        blk_size: stride,
        blk_num,
        blk_cnt: 0,
        free_head: 0,
    });

    // Thread the free list through the node word at the head of each block.
    let first = pool.add(size_of::<MemboxInfo>()) as usize;
    (*info).free_head = first;
    for i in 0..blk_num {
        let node = (first + i * stride) as *mut usize;
        let next = if i + 1 < blk_num {
            first + (i + 1) * stride
        } else {
            0
        };
        // Safety: node lies within the region: first + blk_num * stride <=
        // pool + pool_size by construction of blk_num.
        node.write(next);
    }
    P::irq_restore(state);
    Ok(())
}

/// Allocates one block, stamping it with `owner` (the allocating task's
/// index). Returns a pointer to the user area, past the node word.
///
/// # Safety
///
/// `pool` must point at a region initialized by [`init`] and not since
/// repurposed.
pub unsafe fn alloc<P: Port>(
    pool: *mut u8,
    owner: u8,
) -> Result<NonNull<u8>, MemboxError> {
    if !pool_ok(pool) {
        return Err(MemboxError::PoolInvalid);
    }
    let info = pool as *mut MemboxInfo;

    let state = P::irq_disable();
    let node = (*info).free_head;
    let result = if node == 0 {
        Err(MemboxError::AllocEmpty)
    } else {
        // Safety: every address threaded into the free list points at a
        // node word inside the pool.
        let node_ptr = node as *mut usize;
        (*info).free_head = node_ptr.read();
        node_ptr.write(stamp_for(owner));
        (*info).blk_cnt += 1;
        // The user area starts just past the node word; never null.
        Ok(NonNull::new_unchecked((node + NODE_SIZE) as *mut u8))
    };
    P::irq_restore(state);
    result
}

/// Returns a block to the pool. The pointer is validated against the pool
/// bounds, the block grid, and the magic stamp before the free list is
/// touched; a bad pointer leaves the pool unchanged.
///
/// # Safety
///
/// `pool` must point at a region initialized by [`init`]. `user` may be
/// anything; invalid pointers are rejected, not dereferenced beyond the
/// candidate node word (which lies in the pool if the range checks pass).
pub unsafe fn free<P: Port>(
    pool: *mut u8,
    user: *mut u8,
) -> Result<(), MemboxError> {
    if !pool_ok(pool) {
        return Err(MemboxError::PoolInvalid);
    }
    if user.is_null() {
        return Err(MemboxError::FreeBadPtr);
    }
    let info = pool as *mut MemboxInfo;

    let state = P::irq_disable();
    let result = (|| {
        let stride = (*info).blk_size;
        if stride == 0 {
            return Err(MemboxError::PoolInvalid);
        }
        let first = pool as usize + size_of::<MemboxInfo>();
        let node = match (user as usize).checked_sub(NODE_SIZE) {
            Some(n) => n,
            None => return Err(MemboxError::FreeBadPtr),
        };
        let offset = match node.checked_sub(first) {
            Some(o) => o,
            None => return Err(MemboxError::FreeBadPtr),
        };
        if offset % stride != 0 || offset / stride >= (*info).blk_num {
            return Err(MemboxError::FreeBadPtr);
        }
        // Safety: node is now known to be a block head inside the pool.
        let node_ptr = node as *mut usize;
        if !stamp_ok(node_ptr.read()) {
            return Err(MemboxError::FreeBadPtr);
        }
        node_ptr.write((*info).free_head);
        (*info).free_head = node;
        (*info).blk_cnt -= 1;
        Ok(())
    })();
    P::irq_restore(state);
    result
}

/// Zeroes the user area of an allocated block.
///
/// # Safety
///
/// `pool` must be an initialized pool and `user` a pointer previously
/// returned by [`alloc`] from it and not yet freed.
pub unsafe fn clear<P: Port>(pool: *mut u8, user: *mut u8) {
    if !pool_ok(pool) || user.is_null() {
        return;
    }
    let info = pool as *const MemboxInfo;
    let user_size = (*info).blk_size - NODE_SIZE;
    // Safety: per the contract, `user` heads a user area of exactly
    // `stride - NODE_SIZE` bytes.
    core::ptr::write_bytes(user, 0, user_size);
}

/// Reads the pool's capacity and usage counters.
///
/// # Safety
///
/// `pool` must point at a region initialized by [`init`].
pub unsafe fn stats<P: Port>(
    pool: *const u8,
) -> Result<MemboxStats, MemboxError> {
    if !pool_ok(pool) {
        return Err(MemboxError::PoolInvalid);
    }
    let info = pool as *const MemboxInfo;
    let state = P::irq_disable();
    let stats = MemboxStats {
        capacity: (*info).blk_num,
        in_use: (*info).blk_cnt,
        stride: (*info).blk_size,
    };
    P::irq_restore(state);
    Ok(stats)
}

impl<P: Port> crate::Kernel<P> {
    /// [`alloc`] with the owner stamp taken from the running task.
    ///
    /// # Safety
    ///
    /// Same contract as [`alloc`].
    pub unsafe fn membox_alloc(
        &mut self,
        pool: *mut u8,
    ) -> Result<NonNull<u8>, MemboxError> {
        alloc::<P>(pool, self.running as u8)
    }
}
