//! Address-space builder (C3).
//!
//! Every environment's top-level table shares one thing with every other:
//! the kernel window above [`UTOP`](super::UTOP), copied verbatim from the
//! boot address space at creation time. Below that boundary each
//! environment's mappings are its own.

use spin::Once;

use super::{
    frame::{self, FRAME_ALLOCATOR},
    paging::{self, PageFlags, PageTable},
    phys_to_virt, FrameNumber, PhysAddr, VirtAddr, ENTRIES_PER_TABLE, KERNBASE_L4_INDEX,
    PAGE_SIZE, SELF_MAP_L4_INDEX, ULIM, UENVS, UPAGES, UVPT_L4_INDEX,
};
use crate::env;

/// The address space the bootstrap CPU builds before any environment
/// exists; every other address space's kernel-half entries are copied from
/// this one, and it is what a CPU switches to before freeing the address
/// space it was just running (so it never runs on a root about to be
/// torn down).
static BOOT_ROOT: Once<PhysAddr> = Once::new();

pub fn boot_root() -> PhysAddr {
    *BOOT_ROOT.get().expect("mm::vas::init not called yet")
}

fn l4_index_of(va: u64) -> usize {
    ((va >> 39) & 0x1FF) as usize
}

/// Build the boot address space: one fresh top-level table whose entries
/// above the user/kernel boundary are populated by `bulk_map` calls the
/// caller makes afterward (identity map of physical RAM, MMIO window,
/// per-CPU kernel stacks), plus the self-map slot installed here since
/// every address space needs it identically.
pub fn init_boot_space() -> PhysAddr {
    let frame = FRAME_ALLOCATOR
        .alloc(true)
        .expect("out of memory building the boot address space");
    FRAME_ALLOCATOR.incref(frame);
    let root = frame.addr();
    install_self_map(root, frame);
    BOOT_ROOT.call_once(|| root);
    root
}

/// Map the `UENVS`/`UPAGES` windows into the boot address space. Split out
/// of [`init_boot_space`] because it runs after [`frame::init`] and
/// [`env::init`] have built the tables it maps, unlike the self-map install
/// above which has no such dependency.
pub fn init_boot_views() -> Result<(), paging::PagingError> {
    map_user_views(boot_root())
}

/// Install the recursive self-map entry: PML4 slot `SELF_MAP_L4_INDEX`
/// points back at the table's own frame (I5). Also installs the read-only,
/// user-accessible `UVPT` recursive slot user code walks to inspect its own
/// page-table permissions (C10).
fn install_self_map(root: PhysAddr, root_frame: FrameNumber) {
    let table = unsafe { &mut *(phys_to_virt(root).as_u64() as *mut PageTable) };
    FRAME_ALLOCATOR.incref(root_frame);
    table[SELF_MAP_L4_INDEX as usize].set(root_frame, PageFlags::PRESENT | PageFlags::WRITABLE);
    FRAME_ALLOCATOR.incref(root_frame);
    table[UVPT_L4_INDEX as usize].set(root_frame, PageFlags::PRESENT | PageFlags::USER);
}

/// `new_space() → root` (spec.md §4.3): fresh top-level table, every entry
/// at or above the user/kernel boundary copied from the boot table, plus
/// its own self-map slot pointing at itself (not at the boot table).
pub fn new_space() -> Result<PhysAddr, paging::PagingError> {
    let frame = FRAME_ALLOCATOR
        .alloc(true)
        .map_err(|_| paging::PagingError::NoMem)?;
    FRAME_ALLOCATOR.incref(frame);
    let root = frame.addr();

    let boot = boot_root();
    let boot_table = unsafe { &*(phys_to_virt(boot).as_u64() as *const PageTable) };
    let new_table = unsafe { &mut *(phys_to_virt(root).as_u64() as *mut PageTable) };

    let kernel_start = l4_index_of(KERNBASE_L4_INDEX << 39);
    for i in kernel_start..ENTRIES_PER_TABLE as usize {
        if i == SELF_MAP_L4_INDEX as usize {
            continue;
        }
        let entry = &boot_table[i];
        if let Some(f) = entry.frame() {
            FRAME_ALLOCATOR.incref(f);
            new_table[i].set(f, entry.flags());
        }
    }

    install_self_map(root, frame);
    map_user_views(root)?;
    Ok(root)
}

/// Map the `UENVS`/`UPAGES` read-only windows (spec.md §4.10): every
/// environment gets the same kernel-maintained snapshot tables mapped
/// read-only and user-accessible, so `ipc_recv`'s wrapper and process
/// inspection tools can read them without a syscall.
fn map_user_views(root: PhysAddr) -> Result<(), paging::PagingError> {
    map_readonly_window(root, UENVS, env::user_table_phys_addr(), env::user_table_byte_len())?;
    map_readonly_window(root, UPAGES, frame::table_phys_addr(), frame::table_byte_len())?;
    Ok(())
}

fn map_readonly_window(
    root: PhysAddr,
    base_va: u64,
    base_pa: PhysAddr,
    byte_len: usize,
) -> Result<(), paging::PagingError> {
    let pages = (byte_len as u64).div_ceil(PAGE_SIZE);
    for i in 0..pages {
        let va = VirtAddr::new(base_va + i * PAGE_SIZE);
        let frame = PhysAddr::new(base_pa.as_u64() + i * PAGE_SIZE).frame();
        paging::map(root, va, frame, PageFlags::PRESENT | PageFlags::USER)?;
    }
    Ok(())
}

/// `free_space(root)` (spec.md §4.3): walk every level below the
/// user/kernel boundary, decref each leaf frame, then each intermediate
/// table, then the top-level table itself. The kernel-shared half above
/// `ULIM` is never touched — it is owned by the boot address space, not by
/// this one.
pub fn free_space(root: PhysAddr) {
    let l4 = unsafe { &mut *(phys_to_virt(root).as_u64() as *mut PageTable) };
    let user_l4_limit = l4_index_of(ULIM);

    for l4i in 0..user_l4_limit {
        // These two slots point back at the root table's own frame
        // (installed by `install_self_map`), not at an ordinary L3 table;
        // walking into either would alias and corrupt the root itself
        // (shared with every other environment) instead of tearing down a
        // per-environment subtree. Their extra refs on the root are dropped
        // separately below.
        if l4i == UVPT_L4_INDEX as usize || l4i == SELF_MAP_L4_INDEX as usize {
            continue;
        }
        let Some(l3_frame) = l4[l4i].frame() else {
            continue;
        };
        let l3_phys = l3_frame.addr();
        let l3 = unsafe { &mut *(phys_to_virt(l3_phys).as_u64() as *mut PageTable) };
        for l3i in 0..ENTRIES_PER_TABLE as usize {
            let Some(l2_frame) = l3[l3i].frame() else {
                continue;
            };
            if l3[l3i].flags().contains(PageFlags::HUGE) {
                FRAME_ALLOCATOR.decref(l2_frame);
                l3[l3i].clear();
                continue;
            }
            let l2_phys = l2_frame.addr();
            let l2 = unsafe { &mut *(phys_to_virt(l2_phys).as_u64() as *mut PageTable) };
            for l2i in 0..ENTRIES_PER_TABLE as usize {
                let Some(l1_frame) = l2[l2i].frame() else {
                    continue;
                };
                if l2[l2i].flags().contains(PageFlags::HUGE) {
                    FRAME_ALLOCATOR.decref(l1_frame);
                    l2[l2i].clear();
                    continue;
                }
                let l1_phys = l1_frame.addr();
                let l1 = unsafe { &mut *(phys_to_virt(l1_phys).as_u64() as *mut PageTable) };
                for l1i in 0..ENTRIES_PER_TABLE as usize {
                    if let Some(leaf) = l1[l1i].frame() {
                        FRAME_ALLOCATOR.decref(leaf);
                        l1[l1i].clear();
                    }
                }
                FRAME_ALLOCATOR.decref(l1_frame);
                l2[l2i].clear();
            }
            FRAME_ALLOCATOR.decref(l2_frame);
            l3[l3i].clear();
        }
        FRAME_ALLOCATOR.decref(l3_frame);
        l4[l4i].clear();
    }

    // The self-map and UVPT slots each hold one extra ref on the root
    // (installed by `install_self_map`); drop both before the root itself.
    FRAME_ALLOCATOR.decref(root.frame());
    FRAME_ALLOCATOR.decref(root.frame());
    FRAME_ALLOCATOR.decref(root.frame());
}

/// Make `root` the active address space on this CPU.
///
/// # Safety
/// `root` must be a live address space built by [`new_space`] or
/// [`init_boot_space`] (shares the kernel window, has a self-map).
pub unsafe fn activate(root: PhysAddr) {
    // SAFETY: caller upholds the contract above.
    unsafe {
        crate::arch::x86_64::mmu::write_cr3(root);
    }
}

/// Switch to the boot address space. Called before freeing the address
/// space the CPU is currently running on, so it is never executing out of
/// a root that is about to be torn down (spec.md §4.3, last sentence).
pub fn activate_boot() {
    // SAFETY: the boot root is always live for the kernel's lifetime.
    unsafe { activate(boot_root()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l4_index_of_matches_manual_shift() {
        assert_eq!(l4_index_of(super::super::SELF_MAP), 255);
        assert_eq!(l4_index_of(super::super::KERNBASE), 256);
    }
}
