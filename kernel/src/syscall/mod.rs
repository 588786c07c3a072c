//! System-call surface (C9), invoked via the dedicated software interrupt.
//! The fixed register convention (`arch::x86_64::trap::dispatch`'s T_SYSCALL
//! arm) hands the call selector and up to five arguments straight to
//! [`dispatch`]; its return value is written back to the caller's saved
//! `rax`. Grounded on `original_source/kern/syscall.c`.

#![allow(dead_code)]

use crate::env::{self, EnvId, EnvState};
use crate::mm::{self, PageFlags, VirtAddr};

/// Call selectors, matching `original_source/inc/syscall.h`'s `SYS_*`
/// ordering.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Cputs = 0,
    Cgetc = 1,
    GetEnvId = 2,
    EnvDestroy = 3,
    Yield = 4,
    Exofork = 5,
    EnvSetStatus = 6,
    EnvSetPgfaultUpcall = 7,
    PageAlloc = 8,
    PageMap = 9,
    PageUnmap = 10,
    IpcTrySend = 11,
    IpcRecv = 12,
}

impl Syscall {
    fn from_selector(v: u64) -> Option<Self> {
        Some(match v {
            0 => Self::Cputs,
            1 => Self::Cgetc,
            2 => Self::GetEnvId,
            3 => Self::EnvDestroy,
            4 => Self::Yield,
            5 => Self::Exofork,
            6 => Self::EnvSetStatus,
            7 => Self::EnvSetPgfaultUpcall,
            8 => Self::PageAlloc,
            9 => Self::PageMap,
            10 => Self::PageUnmap,
            11 => Self::IpcTrySend,
            12 => Self::IpcRecv,
            _ => return None,
        })
    }
}

/// Negative error codes returned in `rax`, matching
/// `original_source/inc/error.h`'s `-E_*` convention.
const E_BAD_ENV: u64 = (-1i64) as u64;
const E_INVAL: u64 = (-2i64) as u64;
const E_NO_MEM: u64 = (-3i64) as u64;
const E_NOT_RECV: u64 = (-4i64) as u64;
const E_NO_SYS: u64 = (-5i64) as u64;

/// Checks a user-supplied `[ptr, ptr+len)` region for readability (and,
/// if `need_write`, writability) by the calling environment. Spec.md's
/// uniform bad-user-buffer policy (Open Question D.1): every handler that
/// touches a user pointer validates it through this function and, on
/// failure, destroys the calling environment via [`destroy_caller`] rather
/// than returning a soft error code.
fn validate_user_range(caller: EnvId, ptr: u64, len: u64, need_write: bool) -> bool {
    if len == 0 {
        return true;
    }
    let Some(end) = ptr.checked_add(len) else {
        return false;
    };
    if end > mm::UTOP {
        return false;
    }
    let Ok(env) = env::get_mut(caller) else {
        return false;
    };
    let start_page = ptr & !(mm::PAGE_SIZE - 1);
    let end_page = (end - 1) & !(mm::PAGE_SIZE - 1);
    let mut va = start_page;
    while va <= end_page {
        match mm::paging::lookup(env.root, VirtAddr::new(va)) {
            Some((_, perm)) if perm.contains(PageFlags::USER) => {
                if need_write && !perm.contains(PageFlags::WRITABLE) {
                    return false;
                }
            }
            _ => return false,
        }
        va += mm::PAGE_SIZE;
    }
    true
}

/// Uniform bad-user-buffer policy (spec.md §4.9/§4.6): the offending
/// environment is destroyed and the CPU falls straight into the scheduler.
fn destroy_caller(caller: EnvId) -> u64 {
    log::warn!("syscall: env {:#x} passed a bad buffer, destroying", caller.0);
    env::destroy(caller);
    crate::sched::yield_cpu();
}

/// Centralised permission-mask policy (spec.md §4.9, last paragraph).
fn validate_perm(perm: u64) -> Option<PageFlags> {
    PageFlags::validate_user_perm(perm).ok()
}

pub fn dispatch(selector: u64, arg1: u64, arg2: u64, arg3: u64, arg4: u64, arg5: u64) -> u64 {
    let Some(caller) = env::current() else {
        panic!("syscall dispatch with no current environment");
    };

    let Some(call) = Syscall::from_selector(selector) else {
        return E_NO_SYS;
    };

    match call {
        Syscall::Cputs => sys_cputs(caller, arg1, arg2),
        Syscall::Cgetc => sys_cgetc(),
        Syscall::GetEnvId => caller.0 as u64,
        Syscall::EnvDestroy => sys_env_destroy(EnvId(arg1 as u32), caller),
        Syscall::Yield => crate::sched::yield_cpu(),
        Syscall::Exofork => sys_exofork(caller),
        Syscall::EnvSetStatus => sys_env_set_status(EnvId(arg1 as u32), arg2),
        Syscall::EnvSetPgfaultUpcall => sys_env_set_pgfault_upcall(EnvId(arg1 as u32), arg2),
        Syscall::PageAlloc => sys_page_alloc(EnvId(arg1 as u32), arg2, arg3),
        Syscall::PageMap => {
            sys_page_map(EnvId(arg1 as u32), arg2, EnvId(arg3 as u32), arg4, arg5)
        }
        Syscall::PageUnmap => sys_page_unmap(EnvId(arg1 as u32), arg2),
        Syscall::IpcTrySend => sys_ipc_try_send(caller, EnvId(arg1 as u32), arg2, arg3, arg4),
        Syscall::IpcRecv => sys_ipc_recv(caller, arg1),
    }
}

fn sys_cputs(caller: EnvId, ptr: u64, len: u64) -> u64 {
    if !validate_user_range(caller, ptr, len, false) {
        return destroy_caller(caller);
    }
    // SAFETY: `validate_user_range` just verified `[ptr, ptr+len)` is mapped
    // user-readable in the caller's currently-active address space.
    let bytes = unsafe { core::slice::from_raw_parts(ptr as *const u8, len as usize) };
    for &b in bytes {
        crate::arch::x86_64::serial::write_byte(b);
    }
    0
}

fn sys_cgetc() -> u64 {
    crate::arch::x86_64::serial::try_read_byte()
        .map(|b| b as u64)
        .unwrap_or(0)
}

fn sys_env_destroy(target: EnvId, caller: EnvId) -> u64 {
    match env::id_lookup(target, true) {
        Ok(id) => {
            env::destroy(id);
            if id == caller {
                crate::sched::yield_cpu();
            }
            0
        }
        Err(_) => E_BAD_ENV,
    }
}

/// `exofork()` (spec.md §4.9): clone the caller's trap frame into a fresh
/// NOT_RUNNABLE child, zero its return register so it sees 0 when later
/// scheduled.
fn sys_exofork(caller: EnvId) -> u64 {
    let child = match env::alloc(caller) {
        Ok(id) => id,
        Err(_) => return E_NO_MEM,
    };
    let mut frame = env::get_mut(caller).expect("caller vanished").saved_frame;
    frame.regs.rax = 0;
    env::set_saved_frame(child, frame);
    env::set_state(child, EnvState::NotRunnable);
    child.0 as u64
}

fn sys_env_set_status(target: EnvId, status: u64) -> u64 {
    let new_state = match status {
        0 => EnvState::Runnable,
        1 => EnvState::NotRunnable,
        _ => return E_INVAL,
    };
    match env::id_lookup(target, true) {
        Ok(id) => {
            env::set_state(id, new_state);
            0
        }
        Err(_) => E_BAD_ENV,
    }
}

fn sys_env_set_pgfault_upcall(target: EnvId, upcall: u64) -> u64 {
    match env::id_lookup(target, true) {
        Ok(id) => {
            if let Ok(env) = env::get_mut(id) {
                env.pgfault_upcall = upcall;
            }
            0
        }
        Err(_) => E_BAD_ENV,
    }
}

fn sys_page_alloc(target: EnvId, va: u64, perm: u64) -> u64 {
    let Ok(id) = env::id_lookup(target, true) else {
        return E_BAD_ENV;
    };
    if va >= mm::ULIM || !VirtAddr::new(va).is_aligned() {
        return E_INVAL;
    }
    let Some(flags) = validate_perm(perm) else {
        return E_INVAL;
    };
    let frame = match mm::FRAME_ALLOCATOR.alloc(true) {
        Ok(f) => f,
        Err(_) => return E_NO_MEM,
    };
    let root = env::get_mut(id).expect("env vanished").root;
    match mm::paging::map(root, VirtAddr::new(va), frame, flags) {
        Ok(()) => 0,
        Err(_) => {
            let _ = mm::FRAME_ALLOCATOR.free(frame);
            E_NO_MEM
        }
    }
}

fn sys_page_map(src_id: EnvId, src_va: u64, dst_id: EnvId, dst_va: u64, perm: u64) -> u64 {
    let Ok(src) = env::id_lookup(src_id, true) else {
        return E_BAD_ENV;
    };
    let Ok(dst) = env::id_lookup(dst_id, true) else {
        return E_BAD_ENV;
    };
    if dst_va >= mm::ULIM
        || !VirtAddr::new(dst_va).is_aligned()
        || !VirtAddr::new(src_va).is_aligned()
    {
        return E_INVAL;
    }
    let Some(flags) = validate_perm(perm) else {
        return E_INVAL;
    };
    let src_root = env::get_mut(src).expect("env vanished").root;
    let Some((frame, src_perm)) = mm::paging::lookup(src_root, VirtAddr::new(src_va)) else {
        return E_INVAL;
    };
    if flags.contains(PageFlags::WRITABLE) && !src_perm.contains(PageFlags::WRITABLE) {
        return E_INVAL;
    }
    let dst_root = env::get_mut(dst).expect("env vanished").root;
    match mm::paging::map(dst_root, VirtAddr::new(dst_va), frame, flags) {
        Ok(()) => 0,
        Err(_) => E_NO_MEM,
    }
}

fn sys_page_unmap(target: EnvId, va: u64) -> u64 {
    let Ok(id) = env::id_lookup(target, true) else {
        return E_BAD_ENV;
    };
    if !VirtAddr::new(va).is_aligned() {
        return E_INVAL;
    }
    let root = env::get_mut(id).expect("env vanished").root;
    mm::paging::unmap(root, VirtAddr::new(va));
    0
}

/// `ipc_try_send` (spec.md §4.9).
fn sys_ipc_try_send(caller: EnvId, dst_id: EnvId, value: u64, src_va: u64, perm: u64) -> u64 {
    let Ok(dst) = env::id_lookup(dst_id, false) else {
        return E_BAD_ENV;
    };
    if !env::get_mut(dst).expect("env vanished").ipc_recving {
        return E_NOT_RECV;
    }

    let dst_dstva = env::get_mut(dst).expect("env vanished").ipc_dstva;
    let granted_perm = if src_va < mm::ULIM && dst_dstva < mm::ULIM {
        if !VirtAddr::new(src_va).is_aligned() {
            return E_INVAL;
        }
        let Some(flags) = validate_perm(perm) else {
            return E_INVAL;
        };
        if !validate_user_range(caller, src_va, mm::PAGE_SIZE, flags.contains(PageFlags::WRITABLE)) {
            return destroy_caller(caller);
        }
        let caller_root = env::get_mut(caller).expect("caller vanished").root;
        // `validate_user_range` just confirmed this page is present with at
        // least the requested permissions, so this lookup cannot fail.
        let (frame, _) = mm::paging::lookup(caller_root, VirtAddr::new(src_va))
            .expect("validate_user_range confirmed this page is mapped");
        let dst_root = env::get_mut(dst).expect("env vanished").root;
        if mm::paging::map(dst_root, VirtAddr::new(dst_dstva), frame, flags).is_err() {
            return E_NO_MEM;
        }
        flags.bits()
    } else {
        0
    };

    let dst_env = env::get_mut(dst).expect("env vanished");
    dst_env.ipc_value = value;
    dst_env.ipc_from = caller;
    dst_env.ipc_perm = granted_perm;
    dst_env.ipc_recving = false;
    env::sync(dst);
    env::set_state(dst, EnvState::Runnable);
    0
}

/// `ipc_recv` (spec.md §4.9): blocks by yielding with state NOT_RUNNABLE;
/// the saved return register reads 0 until a sender overwrites it via the
/// resumed trap frame.
fn sys_ipc_recv(caller: EnvId, dst_va: u64) -> u64 {
    if dst_va < mm::ULIM && !VirtAddr::new(dst_va).is_aligned() {
        return E_INVAL;
    }
    let env = env::get_mut(caller).expect("caller vanished");
    env.ipc_recving = true;
    env.ipc_dstva = dst_va;
    env.saved_frame.regs.rax = 0;
    env::sync(caller);
    env::set_state(caller, EnvState::NotRunnable);
    crate::sched::yield_cpu();
}
