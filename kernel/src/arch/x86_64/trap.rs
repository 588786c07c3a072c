//! Trap/IDT layer (C5) and the page-fault handler (C6).
//!
//! Every vector gets its own short naked stub (`global_asm!`, grounded on
//! `original_source/kern/trapentry.S`'s `TRAPHANDLER`/`TRAPHANDLER_NOEC`
//! macros) that pushes a trap number, and for vectors the hardware doesn't
//! give an error code, a dummy zero, then falls into one shared prologue.
//! The prologue pushes the general-purpose registers and calls
//! [`dispatch`], which never returns to it: every path out of `dispatch`
//! ends in [`resume`] (loads a `TrapFrame` and `iretq`s) or the scheduler's
//! halt loop. This mirrors `original_source/kern/trap.c`'s `trap()` /
//! `env_run()` / `env_pop_tf()` split.

#![allow(dead_code)]

use core::arch::{global_asm, naked_asm};

use x86_64::{
    structures::idt::InterruptDescriptorTable,
    PrivilegeLevel, VirtAddr,
};

use crate::env::{self, EnvId, EnvState};
use crate::mm;
use crate::sync::KERNEL_LOCK;

/// General-purpose registers, pushed in this order so `regs.r15` lands at
/// the lowest stack address (spec.md §4.5's "full general-purpose register
/// set").
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PushedRegs {
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
}

/// The trap frame (spec.md §4.5). Its layout is the contract between the
/// asm stubs, [`dispatch`], and [`resume`] — every environment's
/// `saved_frame` is one of these, copied off the kernel stack on first
/// entry from user mode and restored verbatim (modulo `rax`) on resume.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapFrame {
    pub regs: PushedRegs,
    pub trapno: u64,
    pub errcode: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    /// All-zero frame, usable in `const fn` contexts where `Default::default`
    /// is unavailable (the env table's static initializer).
    pub const fn zeroed() -> Self {
        Self {
            regs: PushedRegs {
                r15: 0,
                r14: 0,
                r13: 0,
                r12: 0,
                r11: 0,
                r10: 0,
                r9: 0,
                r8: 0,
                rdi: 0,
                rsi: 0,
                rbp: 0,
                rbx: 0,
                rdx: 0,
                rcx: 0,
                rax: 0,
            },
            trapno: 0,
            errcode: 0,
            rip: 0,
            cs: 0,
            rflags: 0,
            rsp: 0,
            ss: 0,
        }
    }
}

impl TrapFrame {
    /// A brand-new environment's initial frame (spec.md §4.4's `alloc`):
    /// user code/data/stack selectors, user privilege, interrupts enabled,
    /// `rip` zero (patched by the image loader).
    pub fn new_user(cpu_id: usize) -> Self {
        let sel = super::gdt::selectors(cpu_id);
        let mut tf = Self::default();
        tf.cs = sel.user_code_selector.0 as u64;
        tf.ss = sel.user_data_selector.0 as u64;
        tf.rflags = 0x202; // IF set
        tf.rsp = mm::USTACKTOP;
        tf
    }

    pub fn came_from_user(&self) -> bool {
        self.cs & 0x3 == PrivilegeLevel::Ring3 as u64
    }
}

/// Architected exception vectors (spec.md §4.5: "20 architecturally
/// defined vectors"), matching `original_source/inc/trap.h`'s `T_*`
/// constants.
pub const T_DIVIDE: u8 = 0;
pub const T_DEBUG: u8 = 1;
pub const T_NMI: u8 = 2;
pub const T_BRKPT: u8 = 3;
pub const T_OFLOW: u8 = 4;
pub const T_BOUND: u8 = 5;
pub const T_ILLOP: u8 = 6;
pub const T_DEVICE: u8 = 7;
pub const T_DBLFLT: u8 = 8;
pub const T_COPROC: u8 = 9;
pub const T_TSS: u8 = 10;
pub const T_SEGNP: u8 = 11;
pub const T_STACK: u8 = 12;
pub const T_GPFLT: u8 = 13;
pub const T_PGFLT: u8 = 14;
pub const T_RES: u8 = 15;
pub const T_FPERR: u8 = 16;
pub const T_ALIGN: u8 = 17;
pub const T_MCHK: u8 = 18;
pub const T_SIMDERR: u8 = 19;

/// First of 16 external IRQ vectors, remapped above the architected range.
pub const IRQ_OFFSET: u8 = 32;
pub const IRQ_TIMER: u8 = 0;
pub const IRQ_KBD: u8 = 1;
pub const IRQ_SPURIOUS: u8 = 7;

/// Dedicated syscall vector (spec.md §4.9).
pub const T_SYSCALL: u8 = 48;

/// Vectors that push a hardware error code (Intel SDM vol. 3, 6.3.1).
const fn has_error_code(vector: u8) -> bool {
    matches!(vector, 8 | 10 | 11 | 12 | 13 | 14 | 17)
}

/// Emits one stub: `$has_err` is a literal `has_err`/`no_err` marker (not a
/// computed value) because `global_asm!`'s text has to be built by
/// `concat!` at macro-expansion time, before `has_error_code` could run.
/// [`error_code_vectors_match_intel_sdm`] below cross-checks the two stay
/// in sync.
macro_rules! trap_stub {
    ($sym:ident, $vector:expr, no_err) => {
        global_asm!(concat!(
            ".global ",
            stringify!($sym),
            "\n",
            stringify!($sym),
            ":\n",
            "push 0\n",
            "push ",
            stringify!($vector),
            "\n",
            "jmp trap_common\n",
        ));
    };
    ($sym:ident, $vector:expr, has_err) => {
        global_asm!(concat!(
            ".global ",
            stringify!($sym),
            "\n",
            stringify!($sym),
            ":\n",
            "push ",
            stringify!($vector),
            "\n",
            "jmp trap_common\n",
        ));
    };
}

trap_stub!(trap_stub_0, 0, no_err);
trap_stub!(trap_stub_1, 1, no_err);
trap_stub!(trap_stub_2, 2, no_err);
trap_stub!(trap_stub_3, 3, no_err);
trap_stub!(trap_stub_4, 4, no_err);
trap_stub!(trap_stub_5, 5, no_err);
trap_stub!(trap_stub_6, 6, no_err);
trap_stub!(trap_stub_7, 7, no_err);
trap_stub!(trap_stub_8, 8, has_err);
trap_stub!(trap_stub_9, 9, no_err);
trap_stub!(trap_stub_10, 10, has_err);
trap_stub!(trap_stub_11, 11, has_err);
trap_stub!(trap_stub_12, 12, has_err);
trap_stub!(trap_stub_13, 13, has_err);
trap_stub!(trap_stub_14, 14, has_err);
trap_stub!(trap_stub_15, 15, no_err);
trap_stub!(trap_stub_16, 16, no_err);
trap_stub!(trap_stub_17, 17, has_err);
trap_stub!(trap_stub_18, 18, no_err);
trap_stub!(trap_stub_19, 19, no_err);
trap_stub!(trap_stub_32, 32, no_err);
trap_stub!(trap_stub_33, 33, no_err);
trap_stub!(trap_stub_34, 34, no_err);
trap_stub!(trap_stub_35, 35, no_err);
trap_stub!(trap_stub_36, 36, no_err);
trap_stub!(trap_stub_37, 37, no_err);
trap_stub!(trap_stub_38, 38, no_err);
trap_stub!(trap_stub_39, 39, no_err);
trap_stub!(trap_stub_40, 40, no_err);
trap_stub!(trap_stub_41, 41, no_err);
trap_stub!(trap_stub_42, 42, no_err);
trap_stub!(trap_stub_43, 43, no_err);
trap_stub!(trap_stub_44, 44, no_err);
trap_stub!(trap_stub_45, 45, no_err);
trap_stub!(trap_stub_46, 46, no_err);
trap_stub!(trap_stub_47, 47, no_err);
trap_stub!(trap_stub_48, 48, no_err);

/// Shared prologue: push the general-purpose registers so the stack
/// exactly matches [`TrapFrame`], then hand the frame pointer to
/// [`dispatch`] in `rdi`. `dispatch` never returns here — see the module
/// doc comment.
global_asm!(
    "trap_common:",
    "push rax",
    "push rcx",
    "push rdx",
    "push rbx",
    "push rbp",
    "push rsi",
    "push rdi",
    "push r8",
    "push r9",
    "push r10",
    "push r11",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "mov rdi, rsp",
    "call {dispatch}",
    "ud2",
    dispatch = sym dispatch_trampoline,
);

unsafe extern "C" {
    fn trap_stub_0();
    fn trap_stub_1();
    fn trap_stub_2();
    fn trap_stub_3();
    fn trap_stub_4();
    fn trap_stub_5();
    fn trap_stub_6();
    fn trap_stub_7();
    fn trap_stub_8();
    fn trap_stub_9();
    fn trap_stub_10();
    fn trap_stub_11();
    fn trap_stub_12();
    fn trap_stub_13();
    fn trap_stub_14();
    fn trap_stub_15();
    fn trap_stub_16();
    fn trap_stub_17();
    fn trap_stub_18();
    fn trap_stub_19();
    fn trap_stub_32();
    fn trap_stub_33();
    fn trap_stub_34();
    fn trap_stub_35();
    fn trap_stub_36();
    fn trap_stub_37();
    fn trap_stub_38();
    fn trap_stub_39();
    fn trap_stub_40();
    fn trap_stub_41();
    fn trap_stub_42();
    fn trap_stub_43();
    fn trap_stub_44();
    fn trap_stub_45();
    fn trap_stub_46();
    fn trap_stub_47();
    fn trap_stub_48();
}

static mut IDT: InterruptDescriptorTable = InterruptDescriptorTable::new();

/// Build the IDT (spec.md §4.5): interrupt gates for asynchronous vectors
/// and the two synchronous exceptions that can legitimately arrive from
/// hardware outside instruction execution (page fault, illegal opcode),
/// trap gates otherwise. Breakpoint and syscall get DPL=3 so user code may
/// invoke them directly.
pub fn init() {
    macro_rules! install {
        ($vector:expr, $stub:expr, $dpl3:expr, $interrupt_gate:expr) => {
            // SAFETY: each stub's address is a valid, never-returning entry
            // point matching the trap-frame contract the prologue above
            // establishes; the table itself is only mutated here, once,
            // before any CPU loads it.
            unsafe {
                let entry = &mut (*core::ptr::addr_of_mut!(IDT))[$vector as usize];
                let opts = entry.set_handler_addr(VirtAddr::new($stub as u64));
                opts.disable_interrupts($interrupt_gate);
                if $dpl3 {
                    opts.set_privilege_level(PrivilegeLevel::Ring3);
                }
            }
        };
    }

    install!(T_DIVIDE, trap_stub_0 as usize, false, false);
    install!(T_DEBUG, trap_stub_1 as usize, false, false);
    install!(T_NMI, trap_stub_2 as usize, false, true);
    install!(T_BRKPT, trap_stub_3 as usize, true, false);
    install!(T_OFLOW, trap_stub_4 as usize, false, false);
    install!(T_BOUND, trap_stub_5 as usize, false, false);
    install!(T_ILLOP, trap_stub_6 as usize, false, true);
    install!(T_DEVICE, trap_stub_7 as usize, false, false);
    install!(T_DBLFLT, trap_stub_8 as usize, false, true);
    install!(T_COPROC, trap_stub_9 as usize, false, false);
    install!(T_TSS, trap_stub_10 as usize, false, false);
    install!(T_SEGNP, trap_stub_11 as usize, false, false);
    install!(T_STACK, trap_stub_12 as usize, false, false);
    install!(T_GPFLT, trap_stub_13 as usize, false, false);
    install!(T_PGFLT, trap_stub_14 as usize, false, true);
    install!(T_RES, trap_stub_15 as usize, false, false);
    install!(T_FPERR, trap_stub_16 as usize, false, false);
    install!(T_ALIGN, trap_stub_17 as usize, false, false);
    install!(T_MCHK, trap_stub_18 as usize, false, true);
    install!(T_SIMDERR, trap_stub_19 as usize, false, false);

    install!(IRQ_OFFSET + 0, trap_stub_32 as usize, false, true);
    install!(IRQ_OFFSET + 1, trap_stub_33 as usize, false, true);
    install!(IRQ_OFFSET + 2, trap_stub_34 as usize, false, true);
    install!(IRQ_OFFSET + 3, trap_stub_35 as usize, false, true);
    install!(IRQ_OFFSET + 4, trap_stub_36 as usize, false, true);
    install!(IRQ_OFFSET + 5, trap_stub_37 as usize, false, true);
    install!(IRQ_OFFSET + 6, trap_stub_38 as usize, false, true);
    install!(IRQ_OFFSET + 7, trap_stub_39 as usize, false, true);
    install!(IRQ_OFFSET + 8, trap_stub_40 as usize, false, true);
    install!(IRQ_OFFSET + 9, trap_stub_41 as usize, false, true);
    install!(IRQ_OFFSET + 10, trap_stub_42 as usize, false, true);
    install!(IRQ_OFFSET + 11, trap_stub_43 as usize, false, true);
    install!(IRQ_OFFSET + 12, trap_stub_44 as usize, false, true);
    install!(IRQ_OFFSET + 13, trap_stub_45 as usize, false, true);
    install!(IRQ_OFFSET + 14, trap_stub_46 as usize, false, true);
    install!(IRQ_OFFSET + 15, trap_stub_47 as usize, false, true);

    install!(T_SYSCALL, trap_stub_48 as usize, true, true);

    // SAFETY: `IDT` was just fully populated above and lives in `.bss` for
    // the kernel's entire lifetime, so a `'static` reference to it is sound.
    unsafe {
        let idt: &'static InterruptDescriptorTable = &*core::ptr::addr_of!(IDT);
        idt.load();
    }
}

/// Bridges the asm prologue's C calling convention into a `!`-returning
/// Rust fn; `dispatch` never falls off the end, so this is never reached
/// past the call, but the real ABI boundary needs a concrete `extern "C"`
/// symbol for `global_asm!`'s `sym` operand.
extern "C" fn dispatch_trampoline(tf: *mut TrapFrame) -> ! {
    // SAFETY: `tf` points at the `TrapFrame` the prologue just built on
    // this CPU's kernel stack; nothing else holds a reference to it yet.
    dispatch(unsafe { &mut *tf })
}

/// Dispatcher policy (spec.md §4.5).
fn dispatch(tf: &mut TrapFrame) -> ! {
    let from_user = tf.came_from_user();
    let vector = tf.trapno as u8;

    // A timer tick can land here with `from_user == false` in exactly one
    // case: this CPU is spinning in `sched::halt`'s wait-for-interrupt loop,
    // the only kernel code that ever runs with interrupts enabled while not
    // holding the lock (every other kernel entry uses an interrupt gate,
    // which clears IF). That is the HALTED-to-STARTED reentry spec.md §4.7
    // describes.
    let halted_reentry = !from_user && vector == IRQ_OFFSET + IRQ_TIMER;

    if from_user || halted_reentry {
        KERNEL_LOCK.lock();
    }
    if from_user {
        if let Some(id) = env::current() {
            if env::state(id) == Some(EnvState::Dying) {
                env::free(id);
                crate::sched::yield_cpu();
            }
            env::set_saved_frame(id, *tf);
        }
    }
    if halted_reentry {
        super::apic::send_eoi();
        crate::sched::yield_cpu();
    }

    match vector {
        T_PGFLT => crate::env::pagefault::handle(tf),
        T_BRKPT => {
            log::info!("trap: breakpoint at {:#x}, dropping to monitor", tf.rip);
            finish(tf);
        }
        T_SYSCALL => {
            let ret = crate::syscall::dispatch(
                tf.regs.rax,
                tf.regs.rdx,
                tf.regs.rcx,
                tf.regs.rbx,
                tf.regs.rdi,
                tf.regs.rsi,
            );
            tf.regs.rax = ret;
            finish(tf);
        }
        v if v == IRQ_OFFSET + IRQ_TIMER => {
            super::apic::send_eoi();
            crate::sched::yield_cpu();
        }
        v if v == IRQ_OFFSET + IRQ_SPURIOUS => {
            log::trace!("trap: spurious interrupt");
            finish(tf);
        }
        _ => {
            if from_user {
                if let Some(id) = env::current() {
                    log::warn!("trap: env {:?} killed by trap {}", id, tf.trapno);
                    env::destroy(id);
                }
                crate::sched::yield_cpu();
            } else {
                panic!(
                    "unhandled trap {} in kernel mode at {:#x}, errcode {:#x}",
                    tf.trapno, tf.rip, tf.errcode
                );
            }
        }
    }
}

/// On return: if the current environment is RUNNING, resume it; otherwise
/// enter the scheduler (spec.md §4.5, last bullet).
///
/// `dispatch` takes `KERNEL_LOCK` on every user-mode entry; `sched::run`/
/// `sched::halt` release it on the yield path, so the direct-resume path
/// here must release it too, or the next trap on any CPU spins forever in
/// `dispatch`'s `KERNEL_LOCK.lock()` (`original_source/kern/trap.c`'s
/// `trap()` always returns to user mode through `env_run()`, the only
/// non-halt call site of `unlock_kernel()`).
pub(crate) fn finish(tf: &TrapFrame) -> ! {
    match env::current() {
        Some(id) if env::state(id) == Some(EnvState::Running) => {
            KERNEL_LOCK.unlock();
            resume(tf)
        }
        _ => crate::sched::yield_cpu(),
    }
}

/// Resume an environment from its saved frame. Never returns; the final
/// instruction is `iretq`, which atomically restores `rflags`, `rsp`, and
/// `rip` (spec.md §4.5). Grounded on `original_source/kern/trap.c`'s
/// `env_pop_tf`.
///
/// # Safety
/// `tf` must be a fully-formed frame for an environment whose address
/// space is already active on this CPU.
#[unsafe(naked)]
pub unsafe extern "C" fn resume(tf: *const TrapFrame) -> ! {
    naked_asm!(
        "mov rsp, rdi",
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
        "add rsp, 16", // drop trapno, errcode
        "iretq",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_vectors_match_intel_sdm() {
        assert!(has_error_code(T_DBLFLT));
        assert!(has_error_code(T_PGFLT));
        assert!(has_error_code(T_GPFLT));
        assert!(!has_error_code(T_BRKPT));
        assert!(!has_error_code(T_DIVIDE));
    }

    #[test]
    fn trap_frame_size_matches_push_sequence() {
        // regs (15 * 8) + trapno + errcode + rip + cs + rflags + rsp + ss
        assert_eq!(core::mem::size_of::<TrapFrame>(), 15 * 8 + 7 * 8);
    }
}
