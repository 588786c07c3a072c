//! User-level page-fault entry point (C10): the trampoline the kernel
//! jumps to on a user-mode fault, and the default copy-on-write handler it
//! calls. Grounded on `original_source/lib/pfentry.S` and
//! `original_source/lib/pgfault.c`, adapted to this kernel's 64-bit
//! `UserTrapFrame` (`env::pagefault::UserTrapFrame`) instead of the
//! original's 32-bit `UTrapframe`.

use core::arch::naked_asm;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::pgtbl::{COW, PRESENT, USER, WRITABLE};
use crate::sys;
use crate::{PAGE_SIZE, UXSTACKTOP};

/// Mirrors `env::pagefault::UserTrapFrame` field-for-field: what the
/// kernel writes onto this environment's exception stack before jumping
/// to [`upcall_entry`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct UserTrapFrame {
    pub fault_va: u64,
    pub errcode: u64,
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,
    pub rip: u64,
    pub rflags: u64,
    pub rsp: u64,
}

const _: () = assert!(core::mem::size_of::<UserTrapFrame>() == 160);

type HandlerFn = fn(&mut UserTrapFrame);

/// Installed by [`set_pgfault_handler`]; defaults to [`default_handler`]
/// so a program that never calls it but does `fork` still gets working
/// copy-on-write.
static HANDLER: AtomicU64 = AtomicU64::new(default_handler as usize as u64);

static UPCALL_REGISTERED: AtomicU64 = AtomicU64::new(0);

/// Install a custom page-fault handler, replacing the default
/// copy-on-write one. Rare outside of test programs; `fork` relies on the
/// default handler remaining in place for `COW` faults.
pub fn set_pgfault_handler(handler: HandlerFn) {
    HANDLER.store(handler as usize as u64, Ordering::Relaxed);
    ensure_upcall_registered();
}

/// Register [`upcall_entry`] as this environment's page-fault upcall, once.
/// `fork` must call this before its first `exofork` so the child inherits
/// a working handler even if it never faults before its own first `fork`.
pub fn ensure_upcall_registered() {
    if UPCALL_REGISTERED.swap(1, Ordering::Relaxed) == 0 {
        let id = sys::get_env_id();
        sys::env_set_pgfault_upcall(id, upcall_entry_addr())
            .expect("registering the page-fault upcall");
    }
}

pub fn upcall_entry_addr() -> u64 {
    upcall_entry as usize as u64
}

/// Called by the trampoline with a pointer to the `UserTrapFrame` the
/// kernel built; dispatches to the currently installed handler.
extern "C" fn dispatch(utf: *mut UserTrapFrame) {
    let handler_ptr = HANDLER.load(Ordering::Relaxed);
    // SAFETY: `HANDLER` only ever holds a value written by `set_pgfault_handler`
    // or its own initializer, both valid `HandlerFn`s.
    let handler: HandlerFn = unsafe { core::mem::transmute::<u64, HandlerFn>(handler_ptr) };
    // SAFETY: `utf` points at a live `UserTrapFrame` on the exception
    // stack, written by the kernel just before this upcall ran.
    let frame = unsafe { &mut *utf };
    handler(frame);
}

/// The default handler `fork` depends on: a write fault on a `COW` page
/// allocates a fresh private frame, copies the old contents, and remaps
/// it writable at the faulting address (spec.md §4.10). Any other fault
/// is unrecoverable here.
fn default_handler(utf: &mut UserTrapFrame) {
    const FEC_WR: u64 = 1 << 1;

    let va = utf.fault_va & !(PAGE_SIZE - 1);
    let writable_fault = utf.errcode & FEC_WR != 0;
    let perm = crate::pgtbl::mapped_perm(va).unwrap_or(0);
    let is_cow = perm & COW != 0;

    if !writable_fault || !is_cow {
        panic!(
            "unhandled page fault at {:#x} (rip {:#x}, errcode {:#x})",
            utf.fault_va, utf.rip, utf.errcode
        );
    }

    const PFTEMP: u64 = UXSTACKTOP + PAGE_SIZE;

    sys::page_alloc(0, PFTEMP, PRESENT | WRITABLE | USER).expect("allocating copy scratch page");

    // SAFETY: `PFTEMP` and `va` are both this environment's own mapped
    // pages (the former just allocated, the latter confirmed `COW` above);
    // a whole-page copy cannot read or write outside either.
    unsafe {
        core::ptr::copy_nonoverlapping(va as *const u8, PFTEMP as *mut u8, PAGE_SIZE as usize);
    }

    sys::page_map(0, PFTEMP, 0, va, PRESENT | WRITABLE | USER).expect("remapping the copy writable");
    sys::page_unmap(0, PFTEMP).expect("dropping the scratch alias");
}

/// Entry point the kernel's `EnvSetPgfaultUpcall` registers and jumps to
/// directly in user mode, `rsp` already pointing at the `UserTrapFrame`
/// [`crate::dispatch`] consumes.
///
/// After `dispatch` returns (the fault is resolved), rebuilds an `iretq`
/// frame at `[trap_rsp - 40, trap_rsp)`, restores every general-purpose
/// register from the `UserTrapFrame`, then switches `rsp` there and
/// `iretq`s back to the faulting instruction on the faulting stack. Same
/// stack-switch-then-resume shape as `arch::x86_64::trap::resume`, run
/// from ring 3 instead of ring 0 so it needs a real `iretq` frame (rip,
/// cs, rflags, rsp, ss) rather than just a direct jump, even though the
/// privilege level itself never changes.
#[unsafe(naked)]
pub unsafe extern "C" fn upcall_entry() -> ! {
    naked_asm!(
        "mov rdi, rsp",
        "call {dispatch}",

        // Build the 5-qword iretq frame 40 bytes below the trap-time rsp.
        "mov rax, [rsp + 152]",   // trap-time rsp (UserTrapFrame.rsp)
        "sub rax, 40",
        "mov rbx, [rsp + 136]",   // trap-time rip
        "mov [rax], rbx",
        "mov qword ptr [rax + 8], {ucode}",
        "mov rbx, [rsp + 144]",   // trap-time rflags
        "mov [rax + 16], rbx",
        "mov rbx, [rsp + 152]",   // trap-time rsp (again, for the frame's own rsp slot)
        "mov [rax + 24], rbx",
        "mov qword ptr [rax + 32], {udata}",

        // Repurpose the frame's own `rsp` field as the pointer to the
        // iretq frame just built; the final `pop rsp` below picks it up
        // once every other register has been restored in front of it.
        "mov [rsp + 152], rax",

        "add rsp, 16",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rdi",
        "pop rsi",
        "pop rbp",
        "pop rbx",
        "pop rdx",
        "pop rcx",
        "pop rax",
        "add rsp, 16",
        "pop rsp",
        "iretq",
        dispatch = sym dispatch,
        ucode = const 0x33u64,
        udata = const 0x2Bu64,
    )
}
