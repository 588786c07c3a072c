//! Raw system-call wrappers (C9).
//!
//! One `int $T_SYSCALL` per call, selector in `rax`, up to five arguments
//! in `rdx, rcx, rbx, rdi, rsi`, return value read back from `rax` --
//! matching `arch::x86_64::trap::dispatch`'s `T_SYSCALL` arm exactly, so
//! these wrappers have to stay in lock-step with that file and with
//! `syscall::Syscall`'s selector ordering.

use core::arch::asm;

const T_SYSCALL: u8 = 48;

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

const E_BAD_ENV: i64 = -1;
const E_INVAL: i64 = -2;
const E_NO_MEM: i64 = -3;
const E_NOT_RECV: i64 = -4;
const E_NO_SYS: i64 = -5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysError {
    BadEnv,
    Invalid,
    NoMem,
    NoFreeEnv,
    NotRecv,
    NoSys,
    Unknown(i64),
}

pub type Result<T> = core::result::Result<T, SysError>;

fn check(ret: u64) -> Result<u64> {
    let signed = ret as i64;
    if signed >= 0 {
        return Ok(ret);
    }
    Err(match signed {
        E_BAD_ENV => SysError::BadEnv,
        E_INVAL => SysError::Invalid,
        E_NO_MEM => SysError::NoMem,
        E_NOT_RECV => SysError::NotRecv,
        E_NO_SYS => SysError::NoSys,
        other => SysError::Unknown(other),
    })
}

/// # Safety
/// `args` must be meaningful for `call` per the syscall table (spec §4.9);
/// callers pass user pointers the kernel will validate against the
/// currently-mapped address space before dereferencing them.
#[inline(always)]
unsafe fn raw(call: Syscall, arg1: u64, arg2: u64, arg3: u64, arg4: u64, arg5: u64) -> u64 {
    let ret: u64;
    unsafe {
        asm!(
            "int {vector}",
            vector = const T_SYSCALL,
            inout("rax") call as u64 => ret,
            in("rdx") arg1,
            in("rcx") arg2,
            in("rbx") arg3,
            in("rdi") arg4,
            in("rsi") arg5,
        );
    }
    ret
}

pub fn cputs(s: &[u8]) {
    // SAFETY: `s` is a valid Rust slice in this environment's own address
    // space; the kernel re-checks mapping and permission before reading it.
    unsafe {
        raw(Syscall::Cputs, s.as_ptr() as u64, s.len() as u64, 0, 0, 0);
    }
}

pub fn cgetc() -> u8 {
    // SAFETY: no pointer arguments.
    unsafe { raw(Syscall::Cgetc, 0, 0, 0, 0, 0) as u8 }
}

pub fn get_env_id() -> u32 {
    // SAFETY: no pointer arguments.
    unsafe { raw(Syscall::GetEnvId, 0, 0, 0, 0, 0) as u32 }
}

pub fn env_destroy(id: u32) -> Result<()> {
    // SAFETY: no pointer arguments.
    check(unsafe { raw(Syscall::EnvDestroy, id as u64, 0, 0, 0, 0) }).map(|_| ())
}

/// Never observed to return in the caller that yields away, but the
/// selector itself is not `-> !`: the kernel resumes this same environment
/// here on its next scheduling turn.
pub fn sys_yield() {
    // SAFETY: no pointer arguments.
    unsafe {
        raw(Syscall::Yield, 0, 0, 0, 0, 0);
    }
}

pub fn exofork() -> Result<u32> {
    // SAFETY: no pointer arguments.
    check(unsafe { raw(Syscall::Exofork, 0, 0, 0, 0, 0) }).map(|v| v as u32)
}

pub const ENV_RUNNABLE: u64 = 0;
pub const ENV_NOT_RUNNABLE: u64 = 1;

pub fn env_set_status(id: u32, status: u64) -> Result<()> {
    // SAFETY: no pointer arguments.
    check(unsafe { raw(Syscall::EnvSetStatus, id as u64, status, 0, 0, 0) }).map(|_| ())
}

pub fn env_set_pgfault_upcall(id: u32, upcall: u64) -> Result<()> {
    // SAFETY: `upcall` is a user code address validated by the kernel only
    // at fault-delivery time, not here (spec §4.9's `EnvSetPgfaultUpcall`).
    unsafe { check(raw(Syscall::EnvSetPgfaultUpcall, id as u64, upcall, 0, 0, 0)).map(|_| ()) }
}

pub fn page_alloc(id: u32, va: u64, perm: u64) -> Result<()> {
    // SAFETY: `va` is validated by the kernel against the target's address
    // space before any mapping happens.
    check(unsafe { raw(Syscall::PageAlloc, id as u64, va, perm, 0, 0) }).map(|_| ())
}

pub fn page_map(src_id: u32, src_va: u64, dst_id: u32, dst_va: u64, perm: u64) -> Result<()> {
    // SAFETY: both virtual addresses are validated by the kernel.
    check(unsafe {
        raw(
            Syscall::PageMap,
            src_id as u64,
            src_va,
            dst_id as u64,
            dst_va,
            perm,
        )
    })
    .map(|_| ())
}

pub fn page_unmap(id: u32, va: u64) -> Result<()> {
    // SAFETY: `va` is validated by the kernel.
    check(unsafe { raw(Syscall::PageUnmap, id as u64, va, 0, 0, 0) }).map(|_| ())
}

pub fn ipc_try_send(dst: u32, value: u64, src_va: u64, perm: u64) -> Result<()> {
    // SAFETY: `src_va` is re-validated by the kernel against the caller's
    // own address space before any page is transferred.
    check(unsafe { raw(Syscall::IpcTrySend, dst as u64, value, src_va, perm, 0) }).map(|_| ())
}

pub fn ipc_recv(dst_va: u64) {
    // SAFETY: `dst_va` is re-validated by the kernel; this call never
    // returns a pointer, only blocks until a sender completes.
    unsafe {
        raw(Syscall::IpcRecv, dst_va, 0, 0, 0, 0);
    }
}
