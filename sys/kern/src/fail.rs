// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for recording kernel failures such that they can be found by
//! tooling.
//!
//! Unrecoverable conditions -- a corrupted sortlink, a stack magic word gone
//! bad, time running backwards -- funnel through [`die`]. On bare metal this
//! records the failure where a debugger can find it and parks the CPU; it
//! does not attempt any cleverness, because the kernel's own invariants are
//! no longer trustworthy. On hosted builds it panics so tests can observe
//! the failure.
//!
//! The binary interface to debuggers:
//!
//! - `kern::fail::KERNEL_HAS_FAILED` is a `bool`, cleared before kernel
//!   entry and set when [`die`] is reached.
//! - `kern::fail::KERNEL_EPITAPH` is a byte array holding as much of the
//!   failure reason (UTF-8) as fits, NUL-padded.

#[cfg(target_os = "none")]
const EPITAPH_LEN: usize = 128;

#[cfg(target_os = "none")]
#[used]
static mut KERNEL_HAS_FAILED: bool = false;

#[cfg(target_os = "none")]
#[used]
static mut KERNEL_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

/// Records `msg` as the kernel's last words and halts.
#[cfg(target_os = "none")]
pub fn die(msg: &str) -> ! {
    // Safety: we only touch these statics here, with the CPU about to spin
    // forever; a racing second failure loses the epitaph but nothing else.
    unsafe {
        let previous =
            core::ptr::replace(core::ptr::addr_of_mut!(KERNEL_HAS_FAILED), true);
        if !previous {
            let buf = &mut *core::ptr::addr_of_mut!(KERNEL_EPITAPH);
            let n = msg.len().min(EPITAPH_LEN);
            buf[..n].copy_from_slice(&msg.as_bytes()[..n]);
        }
    }
    loop {
        // Platform-independent NOP.
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }
}

/// Hosted stand-in: panic so tests observe the failure.
#[cfg(not(target_os = "none"))]
pub fn die(msg: &str) -> ! {
    panic!("kernel failure: {msg}");
}
