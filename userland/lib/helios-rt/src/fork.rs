//! `fork` (C10): copy-on-write process duplication built entirely out of
//! `exofork` + `page_map`/`page_alloc` + the page-fault upcall, with no
//! kernel-side fork syscall at all. Grounded on
//! `original_source/lib/fork.c`'s `fork`/`duppage`.

use crate::pfentry::ensure_upcall_registered;
use crate::pgtbl::{self, COW, SHARE, WRITABLE};
use crate::sys::{self, ENV_RUNNABLE};
use crate::{PAGE_SIZE, USTACKTOP, UXSTACKTOP};

/// Copy or share one page from the caller into `child`, per spec.md's
/// three-way rule: `SHARE`-marked pages map straight through; writable or
/// `COW`-marked pages map `COW` into *both* copies (parent loses direct
/// write access the moment the child shares the frame); anything else
/// (already read-only, not `COW`) maps straight through unchanged.
fn duppage(child: u32, va: u64, perm: u64) -> sys::Result<()> {
    if perm & SHARE != 0 {
        return sys::page_map(0, va, child, va, perm);
    }

    if perm & (WRITABLE | COW) != 0 {
        let cow_perm = (perm | COW) & !WRITABLE;
        sys::page_map(0, va, child, va, cow_perm)?;
        // Re-map the parent's own mapping COW too: the two copies must
        // agree, or a write through the parent after this point would
        // silently diverge from what the child was promised at fork time.
        sys::page_map(0, va, 0, va, cow_perm)?;
        return Ok(());
    }

    sys::page_map(0, va, child, va, perm)
}

/// Fork the caller into a new environment. On success in the parent,
/// returns the child's environment id; the child observes `fork` return
/// `Ok(0)` (mirroring `fork(2)`'s 0-in-the-child convention) because it
/// resumes execution at the same call site with its own registers.
pub fn fork() -> sys::Result<u32> {
    ensure_upcall_registered();

    let child = sys::exofork()?;

    let mut va = 0u64;
    while va < USTACKTOP {
        if let Some(perm) = pgtbl::mapped_perm(va) {
            duppage(child, va, perm)?;
        }
        va += PAGE_SIZE;
    }

    // The exception stack itself is never shared or copy-on-write: each
    // environment's page-fault handling must work even when the fault
    // that triggered it happened on a COW write, so the child gets a
    // fresh, private page here rather than a mapping of the parent's.
    sys::page_alloc(child, UXSTACKTOP - PAGE_SIZE, WRITABLE | pgtbl::PRESENT | pgtbl::USER)?;

    sys::env_set_pgfault_upcall(child, crate::pfentry::upcall_entry_addr())?;
    sys::env_set_status(child, ENV_RUNNABLE)?;

    Ok(child)
}
