//! Round-robin scheduler (C7).
//!
//! Each CPU remembers only the index it last ran; `yield_cpu` rescans the
//! environment table from there every time rather than keeping a run
//! queue, matching `original_source/kern/sched.c`'s `sched_yield`. The
//! big kernel lock is held on entry to every path that reaches this module
//! (the T_SYSCALL and timer-IRQ arms of `arch::x86_64::trap::dispatch`
//! already took it); `halt()` is the one place that releases it.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::arch::x86_64::smp::{self, CpuStatus};
use crate::env::{self, EnvState};
use crate::sync::KERNEL_LOCK;

static LAST_RUN: [AtomicUsize; smp::MAX_CPUS] = [const { AtomicUsize::new(0) }; smp::MAX_CPUS];

/// Per-CPU entry point: called once by the boot processor after C1-C5/C8
/// setup, and once by every AP in `arch::x86_64::smp::ap_rust_entry` after
/// it signals STARTED and takes the big lock. Never returns.
pub fn enter(cpu_id: usize) -> ! {
    smp::cpu(cpu_id).set_status(CpuStatus::Started);
    yield_cpu()
}

/// `yield()` (spec.md §4.7): scan circularly from the slot after this
/// CPU's last-run environment for the first RUNNABLE entry. If none is
/// found but the caller's own environment is still RUNNING, resume it.
/// Otherwise halt.
pub fn yield_cpu() -> ! {
    let cpu_id = smp::current_cpu_id();
    let last = LAST_RUN[cpu_id].load(Ordering::Relaxed);

    for index in env::iter_from(last) {
        if let Some(e) = env::env_at(index) {
            if e.state == EnvState::Runnable {
                LAST_RUN[cpu_id].store(index, Ordering::Relaxed);
                return run(e.id);
            }
        }
    }

    if let Some(id) = env::current() {
        if env::state(id) == Some(EnvState::Running) {
            return run(id);
        }
    }

    halt(cpu_id)
}

fn run(id: env::EnvId) -> ! {
    env::set_current(id);
    let frame = env::get_mut(id).expect("just-selected env vanished").saved_frame;
    let root = env::get_mut(id).expect("just-selected env vanished").root;
    // SAFETY: `root` was built by `vas::new_space`/`vas::init_boot_space` and
    // shares the kernel window; `id` is the environment whose frame is about
    // to be restored, so its address space must be active first.
    unsafe {
        crate::mm::vas::activate(root);
    }
    KERNEL_LOCK.unlock();
    // SAFETY: `frame` is this environment's own last-saved trap frame.
    unsafe {
        crate::arch::x86_64::trap::resume(&frame);
    }
}

/// Clear this CPU's current environment, switch to the boot address
/// space, mark HALTED, release the big lock, enable interrupts, and spin
/// on `hlt` until the next timer tick re-dispatches through
/// `trap::dispatch`'s lock-reacquire path (spec.md §4.7).
fn halt(cpu_id: usize) -> ! {
    crate::mm::vas::activate_boot();
    smp::cpu(cpu_id).set_status(CpuStatus::Halted);
    KERNEL_LOCK.unlock();
    x86_64::instructions::interrupts::enable();
    loop {
        x86_64::instructions::hlt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_run_starts_at_zero_for_every_cpu() {
        for cpu_id in 0..smp::MAX_CPUS {
            assert_eq!(LAST_RUN[cpu_id].load(Ordering::Relaxed), 0);
        }
    }
}
