//! Minimal user-mode runtime (C10): the library every environment's
//! `_start` links against to get `fork`, the page-fault upcall trampoline,
//! and the IPC wrappers described by `original_source/lib/{fork,pfentry,ipc}.c`.
//!
//! Distinct from the rest of `userland/`: those trees target a POSIX-style
//! ABI this kernel does not implement. This crate speaks only the 13-call
//! `int $T_SYSCALL` ABI in [`sys`].

#![no_std]

pub mod fork;
pub mod ipc;
pub mod pfentry;
pub mod pgtbl;
pub mod sys;

/// Page size, mirroring `mm::PAGE_SIZE`.
pub const PAGE_SIZE: u64 = 4096;

/// Top of the one-page user stack, mirroring `mm::USTACKTOP`.
pub const USTACKTOP: u64 = 0x0000_0000_8000_0000;

/// Top of the one-page exception stack, mirroring `mm::UXSTACKTOP`.
pub const UXSTACKTOP: u64 = USTACKTOP + 2 * PAGE_SIZE;

/// Top of user-writable memory, mirroring `mm::UTOP`.
pub const UTOP: u64 = 0x0000_7F00_0000_0000;

/// Base of the read-only environment snapshot table, mirroring `mm::UENVS`.
pub const UENVS: u64 = UTOP;

/// Base of the read-only frame descriptor table, mirroring `mm::UPAGES`.
pub const UPAGES: u64 = UENVS + 16 * 1024 * 1024;

/// PML4 slot of the read-only recursive page-table self-map, mirroring
/// `mm::UVPT_L4_INDEX`.
pub const UVPT_L4_INDEX: u64 = 253;

/// One `UserEnv` slot, byte-for-byte as `env::UserEnv` lays it out.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct UserEnv {
    pub id: u32,
    pub parent_id: u32,
    pub state: u32,
    pub ipc_recving: u32,
    pub ipc_from: u32,
    pub ipc_perm: u32,
    pub ipc_value: u64,
}

/// Read this environment's own `UENVS` slot.
pub fn this_env() -> UserEnv {
    let id = sys::get_env_id();
    let index = (id as usize) & (1024 - 1);
    let ptr = (UENVS as *const UserEnv).wrapping_add(index);
    // SAFETY: `UENVS` is mapped read-only for every environment over
    // `NENV` contiguous `UserEnv` slots; `index` is masked into range.
    unsafe { *ptr }
}
