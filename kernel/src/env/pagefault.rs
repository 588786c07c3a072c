//! Page-fault handler (C6): kernel-mode faults panic, user-mode faults
//! redirect to the faulting environment's registered upcall. Grounded on
//! `original_source/kern/trap.c`'s `page_fault_handler`.

use x86_64::registers::control::Cr2;

use crate::arch::x86_64::trap::TrapFrame;
use crate::mm::{self, VirtAddr};

/// Mirrors `UTrapframe` from `original_source/inc/trap.h`: what the kernel
/// writes onto an environment's user exception stack before redirecting it
/// to its page-fault upcall.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct UserTrapFrame {
    pub fault_va: u64,
    pub errcode: u64,
    pub regs: crate::arch::x86_64::trap::PushedRegs,
    pub rip: u64,
    pub rflags: u64,
    pub rsp: u64,
}

/// Size of the scratch gap left below the current stack pointer in the
/// nested case, so the faulting instruction's own push/call sequence (if
/// any) doesn't collide with the frame the kernel is about to write.
const SCRATCH_GAP: u64 = 8;

pub fn handle(tf: &mut TrapFrame) -> ! {
    let fault_va = Cr2::read_raw();

    if !tf.came_from_user() {
        panic!(
            "page fault in kernel mode at {:#x}, fault addr {:#x}, error {:#x}",
            tf.rip, fault_va, tf.errcode
        );
    }

    let id = crate::env::current().expect("user-mode fault with no current environment");
    let env = crate::env::get_mut(id).expect("current environment vanished mid-fault");

    if env.pgfault_upcall == 0 {
        log::warn!(
            "env {:#x}: unhandled page fault at {:#x} (rip {:#x}), destroying",
            id.0,
            fault_va,
            tf.rip
        );
        crate::env::destroy(id);
        crate::sched::yield_cpu();
    }

    let exc_stack_top = mm::UXSTACKTOP;
    let exc_stack_bottom = exc_stack_top - mm::PAGE_SIZE;

    let nested = tf.rsp >= exc_stack_bottom && tf.rsp < exc_stack_top;
    let write_top = if nested {
        tf.rsp - SCRATCH_GAP
    } else {
        exc_stack_top
    };
    let frame_addr = write_top - core::mem::size_of::<UserTrapFrame>() as u64;

    if frame_addr < exc_stack_bottom {
        log::warn!(
            "env {:#x}: exception stack overflow building page-fault upcall frame, destroying",
            id.0
        );
        crate::env::destroy(id);
        crate::sched::yield_cpu();
    }

    match mm::paging::lookup(env.root, VirtAddr::new(frame_addr)) {
        Some((_, perm)) if perm.contains(mm::PageFlags::WRITABLE) && perm.contains(mm::PageFlags::USER) => {}
        _ => {
            log::warn!(
                "env {:#x}: exception stack not writable, destroying",
                id.0
            );
            crate::env::destroy(id);
            crate::sched::yield_cpu();
        }
    }

    let utf = UserTrapFrame {
        fault_va,
        errcode: tf.errcode,
        regs: tf.regs,
        rip: tf.rip,
        rflags: tf.rflags,
        rsp: tf.rsp,
    };

    // SAFETY: the fault happened while `env`'s address space was active on
    // this CPU (it is still CR3 right now), and the lookup above confirmed
    // `frame_addr` is mapped user-writable there, so this raw write lands on
    // the same mapping the environment itself would use.
    unsafe {
        core::ptr::write_unaligned(frame_addr as *mut UserTrapFrame, utf);
    }

    tf.rip = env.pgfault_upcall;
    tf.rsp = frame_addr;

    crate::env::set_saved_frame(id, *tf);
    crate::arch::x86_64::trap::finish(tf);
}
