// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of kernel time.
//!
//! Two units appear throughout the kernel:
//!
//! - **Cycles**: the port's monotonic high-resolution counter. Every
//!   absolute expiry, start time, and time slice is held in cycles.
//! - **Ticks**: the coarse unit of user-visible delays and timeouts,
//!   [`config::TICK_HZ`] per second.
//!
//! Conversion factors are fixed at build time in [`config`].

use crate::config;

/// Sentinel expiry meaning "this node is not armed". No real deadline ever
/// takes this value.
pub const INVALID_TIME: u64 = u64::MAX;

/// Largest value the scheduler's cached response time can take; used as
/// "no alarm pending".
pub const MAX_RESPONSE_TIME: u64 = INVALID_TIME - 1;

/// Converts a tick count to cycles.
pub const fn ticks_to_cycles(ticks: u32) -> u64 {
    ticks as u64 * config::CYCLES_PER_TICK
}

/// Converts a cycle count to whole ticks, rounding up. Used when re-arming
/// a preserved expiry so a partial tick still counts.
pub const fn cycles_to_ticks_round_up(cycles: u64) -> u32 {
    ((cycles + config::CYCLES_PER_TICK - 1) / config::CYCLES_PER_TICK) as u32
}

/// Converts cycles to nanoseconds for tick-timer programming.
pub const fn cycles_to_ns(cycles: u64) -> u64 {
    cycles * 1_000_000_000 / config::CYCLES_PER_SEC
}

/// Converts nanoseconds to cycles.
pub const fn ns_to_cycles(ns: u64) -> u64 {
    ns * config::CYCLES_PER_SEC / 1_000_000_000
}

/// Converts milliseconds to ticks, rounding down. Callers that must not
/// round a nonzero delay to zero handle that themselves.
pub const fn ms_to_ticks(ms: u32) -> u32 {
    (ms as u64 * config::TICK_HZ as u64 / 1000) as u32
}

/// Full time slice in cycles.
pub const TIME_SLICE_FULL: i64 =
    (config::TIMESLICE_US * config::CYCLES_PER_SEC / 1_000_000) as i64;

/// Remaining-slice threshold in cycles; at or below this, the slice counts
/// as spent.
pub const TIME_SLICE_MIN: i64 =
    (config::MIN_SLICE_US * config::CYCLES_PER_SEC / 1_000_000) as i64;
