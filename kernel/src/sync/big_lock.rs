//! The big kernel lock (C8).
//!
//! A single test-and-set spinlock. Held for the entire duration of every
//! kernel entry from user mode; released immediately before the
//! privilege-changing return to user mode and before a halted CPU's
//! wait-for-interrupt loop. While held, the kernel runs single-threaded —
//! every kernel-shared structure (environment table, frame table, free
//! lists, scheduler state, page tables below the self-map) is touched only
//! by the holder.

use core::sync::atomic::{AtomicBool, Ordering};

pub struct BigKernelLock {
    locked: AtomicBool,
}

impl BigKernelLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Spin until acquired.
    pub fn lock(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
    }

    /// Release. Caller must be the current holder.
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for BigKernelLock {
    fn default() -> Self {
        Self::new()
    }
}

/// The sole instance. Every CPU entry from user mode, every halted-CPU
/// re-entry, acquires this before touching anything kernel-shared.
pub static KERNEL_LOCK: BigKernelLock = BigKernelLock::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_unlock_roundtrip() {
        let lock = BigKernelLock::new();
        assert!(!lock.is_locked());
        lock.lock();
        assert!(lock.is_locked());
        lock.unlock();
        assert!(!lock.is_locked());
    }
}
