//! Four-level page-table engine (C2).
//!
//! Every intermediate table (PML4, PDPT, PD) is walked through the kernel's
//! direct physical map (`phys_to_virt`), never through the self-map — the
//! self-map exists purely as a *user-visible* read window (spec.md
//! address-space map, `SELF_MAP`). Kept close to the teacher's
//! `mm/page_table.rs` (`PageTableEntry`, `PageTable`, `PageTableIndex`,
//! `VirtualAddressBreakdown`) but reworked so `map`/`unmap` own frame
//! ref-counting rather than leaving it to callers.

#![allow(dead_code)]

use core::ops::{Index, IndexMut};
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use super::{frame::FRAME_ALLOCATOR, phys_to_virt, FrameNumber, PhysAddr, VirtAddr, PAGE_SIZE};

bitflags! {
    /// Page-table entry flags. The three software-available bits (9-11)
    /// are this kernel's own: COW, SHARE, and a reserved bit kept free for
    /// `ALLOWED` to stay a single contiguous mask users can and the kernel
    /// validates.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT        = 1 << 0;
        const WRITABLE       = 1 << 1;
        const USER           = 1 << 2;
        const WRITE_THROUGH  = 1 << 3;
        const NO_CACHE       = 1 << 4;
        const ACCESSED       = 1 << 5;
        const DIRTY          = 1 << 6;
        const HUGE           = 1 << 7;
        const GLOBAL         = 1 << 8;
        /// Copy-on-write leaf: never set together with `WRITABLE` (I3).
        const COW            = 1 << 9;
        /// Shared leaf: `fork` maps it straight through, never COW.
        const SHARE           = 1 << 10;
        const NO_EXECUTE     = 1 << 63;
    }
}

impl PageFlags {
    /// Bits a syscall-supplied `perm` must carry (spec.md §4.9).
    pub const MUST: Self = Self::USER.union(Self::PRESENT);
    /// Bits a syscall-supplied `perm` may carry; anything else is rejected.
    pub const ALLOWED: Self = Self::USER
        .union(Self::PRESENT)
        .union(Self::WRITABLE)
        .union(Self::COW)
        .union(Self::SHARE);

    /// Centralised permission-mask policy (spec.md §4.9, last paragraph).
    pub fn validate_user_perm(perm: u64) -> Result<Self, PagingError> {
        let flags = Self::from_bits_truncate(perm);
        if flags.bits() != perm {
            return Err(PagingError::InvalidPerm);
        }
        if !flags.contains(Self::MUST) || !Self::ALLOWED.contains(flags) {
            return Err(PagingError::InvalidPerm);
        }
        Ok(flags)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    NoMem,
    NotMapped,
    InvalidPerm,
    MmioWindowFull,
}

pub const ENTRIES: usize = 512;

#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_present(self) -> bool {
        self.0 & PageFlags::PRESENT.bits() != 0
    }

    pub fn frame(self) -> Option<FrameNumber> {
        self.is_present()
            .then(|| FrameNumber::new((self.0 & 0x000F_FFFF_FFFF_F000) >> 12))
    }

    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0 & 0xFFF)
    }

    pub fn set(&mut self, frame: FrameNumber, flags: PageFlags) {
        self.0 = (frame.as_u64() << 12) | flags.bits();
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES],
}

impl PageTable {
    pub const fn new() -> Self {
        Self {
            entries: [PageTableEntry::empty(); ENTRIES],
        }
    }

    pub fn zero(&mut self) {
        for e in &mut self.entries {
            e.clear();
        }
    }
}

impl Index<usize> for PageTable {
    type Output = PageTableEntry;
    fn index(&self, i: usize) -> &PageTableEntry {
        &self.entries[i]
    }
}

impl IndexMut<usize> for PageTable {
    fn index_mut(&mut self, i: usize) -> &mut PageTableEntry {
        &mut self.entries[i]
    }
}

/// Virtual address split into the four table indices plus page offset.
#[derive(Debug, Clone, Copy)]
pub struct VaIndices {
    pub l4: usize,
    pub l3: usize,
    pub l2: usize,
    pub l1: usize,
}

impl VaIndices {
    pub fn new(va: VirtAddr) -> Self {
        let a = va.as_u64();
        Self {
            l4: ((a >> 39) & 0x1FF) as usize,
            l3: ((a >> 30) & 0x1FF) as usize,
            l2: ((a >> 21) & 0x1FF) as usize,
            l1: ((a >> 12) & 0x1FF) as usize,
        }
    }
}

fn table_at(phys: PhysAddr) -> *mut PageTable {
    phys_to_virt(phys).as_u64() as *mut PageTable
}

/// Walk one non-leaf level: return the physical address of the next
/// level's table, creating it (as a zeroed, present+writable+user frame)
/// if `create` is set and the slot is empty.
fn step(table: &mut PageTable, index: usize, create: bool) -> Option<PhysAddr> {
    let entry = &mut table[index];
    if entry.is_present() {
        return entry.frame().map(FrameNumber::addr);
    }
    if !create {
        return None;
    }
    let frame = FRAME_ALLOCATOR.alloc(true).ok()?;
    FRAME_ALLOCATOR.incref(frame);
    entry.set(
        frame,
        PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
    );
    Some(frame.addr())
}

/// `walk(root, va, create) → leaf_pte | ∅` (spec.md §4.2).
///
/// On a failure partway down when `create` is set, every intermediate
/// table allocated by *this* call is torn back down via [`unwind`] before
/// returning `None`: both the frame and the parent-level PTE that was made
/// to point at it are cleared, so a failed walk never leaks frames and never
/// leaves a dangling `PRESENT` entry pointing at a frame the allocator has
/// taken back (`original_source/kern/pmap.c`'s `pdpe_walk`/`pgdir_walk` zero
/// the entry on the same failure path before returning).
pub fn walk(root: PhysAddr, va: VirtAddr, create: bool) -> Option<*mut PageTableEntry> {
    let idx = VaIndices::new(va);
    let mut created: [Option<(*mut PageTableEntry, FrameNumber)>; 3] = [None; 3];

    let l4 = unsafe { &mut *table_at(root) };
    let had_l4 = l4[idx.l4].is_present();
    let l3_phys = step(l4, idx.l4, create)?;
    if create && !had_l4 {
        created[0] = l4[idx.l4]
            .frame()
            .map(|f| (core::ptr::addr_of_mut!(l4[idx.l4]), f));
    }

    let l3 = unsafe { &mut *table_at(l3_phys) };
    let had_l3 = l3[idx.l3].is_present();
    let l2_phys = match step(l3, idx.l3, create) {
        Some(p) => p,
        None => {
            unwind(&created);
            return None;
        }
    };
    if create && !had_l3 {
        created[1] = l3[idx.l3]
            .frame()
            .map(|f| (core::ptr::addr_of_mut!(l3[idx.l3]), f));
    }

    let l2 = unsafe { &mut *table_at(l2_phys) };
    let had_l2 = l2[idx.l2].is_present();
    let l1_phys = match step(l2, idx.l2, create) {
        Some(p) => p,
        None => {
            unwind(&created);
            return None;
        }
    };
    if create && !had_l2 {
        created[2] = l2[idx.l2]
            .frame()
            .map(|f| (core::ptr::addr_of_mut!(l2[idx.l2]), f));
    }

    let l1 = unsafe { &mut *table_at(l1_phys) };
    Some(core::ptr::addr_of_mut!(l1[idx.l1]))
}

/// Tear down every level `walk` created before the failure, in any order:
/// clear the parent PTE first so nothing can observe it `PRESENT` while the
/// frame behind it is handed back to the allocator, then `decref` the frame.
fn unwind(created: &[Option<(*mut PageTableEntry, FrameNumber)>; 3]) {
    for entry in created.iter().flatten() {
        let (pte, frame) = *entry;
        // SAFETY: `pte` points into a table level `walk` is still holding a
        // `&mut` borrow of the root for; no other caller can be mutating it
        // concurrently (the big kernel lock is held for the whole trap).
        unsafe { &mut *pte }.clear();
        FRAME_ALLOCATOR.decref(frame);
    }
}

/// `map(root, va, frame, perm)` (spec.md §4.2). Increments the frame's
/// ref-count *before* walking, so re-mapping a page onto the same frame
/// (permission update) never transiently drops its count to zero.
pub fn map(root: PhysAddr, va: VirtAddr, frame: FrameNumber, perm: PageFlags) -> Result<(), PagingError> {
    FRAME_ALLOCATOR.incref(frame);
    let Some(pte) = walk(root, va, true) else {
        FRAME_ALLOCATOR.decref(frame);
        return Err(PagingError::NoMem);
    };
    // SAFETY: `walk` returned a pointer into a live, mapped leaf table.
    let entry = unsafe { &mut *pte };
    let had_old = entry.frame().is_some();
    if let Some(old) = entry.frame() {
        FRAME_ALLOCATOR.decref(old);
    }
    let flags = if perm.contains(PageFlags::COW) {
        (perm | PageFlags::PRESENT) & !PageFlags::WRITABLE
    } else {
        perm | PageFlags::PRESENT
    };
    entry.set(frame, flags);
    if had_old && root == active_root() {
        invlpg(va);
    }
    Ok(())
}

/// `unmap(root, va)` (spec.md §4.2).
pub fn unmap(root: PhysAddr, va: VirtAddr) {
    let Some(pte) = walk(root, va, false) else {
        return;
    };
    // SAFETY: `walk` returned a pointer into a live, mapped leaf table.
    let entry = unsafe { &mut *pte };
    if let Some(frame) = entry.frame() {
        FRAME_ALLOCATOR.decref(frame);
        entry.clear();
        if root == active_root() {
            invlpg(va);
        }
    }
}

/// `lookup(root, va) → (frame, perm) | ∅` (spec.md §4.2).
pub fn lookup(root: PhysAddr, va: VirtAddr) -> Option<(FrameNumber, PageFlags)> {
    let pte = walk(root, va, false)?;
    // SAFETY: `walk` returned a pointer into a live, mapped leaf table.
    let entry = unsafe { &*pte };
    entry.frame().map(|f| (f, entry.flags()))
}

/// `bulk_map(root, va_range, pa_range, perm)` (spec.md §4.2): page-aligned,
/// idempotent, used only above the user/kernel boundary. Does not touch
/// ref counts — the kernel window is shared by every address space and
/// lives as long as the kernel does.
pub fn bulk_map(root: PhysAddr, va_start: VirtAddr, pa_start: PhysAddr, len: u64, perm: PageFlags) {
    debug_assert!(va_start.is_aligned() && pa_start.is_aligned() && len % PAGE_SIZE == 0);
    let pages = len / PAGE_SIZE;
    for i in 0..pages {
        let va = VirtAddr(va_start.as_u64() + i * PAGE_SIZE);
        let pa = PhysAddr(pa_start.as_u64() + i * PAGE_SIZE);
        if let Some(pte) = walk(root, va, true) {
            // SAFETY: `walk` returned a pointer into a live, mapped leaf table.
            unsafe { &mut *pte }.set(pa.frame(), perm | PageFlags::PRESENT);
        }
    }
}

static MMIO_NEXT: AtomicU64 = AtomicU64::new(super::MMIO_BASE);

/// `mmio_map(pa, size)` (spec.md §4.2): bump-allocates the next slot in the
/// dedicated MMIO window and maps it cache-disabled, write-through,
/// writable, kernel-only.
pub fn mmio_map(root: PhysAddr, pa: PhysAddr, size: u64) -> Result<VirtAddr, PagingError> {
    let len = (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
    let base_pa = PhysAddr(pa.as_u64() & !(PAGE_SIZE - 1));
    let va = MMIO_NEXT.fetch_add(len, Ordering::SeqCst);
    if va + len > super::MMIO_LIM {
        return Err(PagingError::MmioWindowFull);
    }
    bulk_map(
        root,
        VirtAddr(va),
        base_pa,
        len,
        PageFlags::WRITABLE | PageFlags::NO_CACHE | PageFlags::WRITE_THROUGH,
    );
    Ok(VirtAddr(va + (pa.as_u64() - base_pa.as_u64())))
}

fn active_root() -> PhysAddr {
    #[cfg(target_arch = "x86_64")]
    {
        crate::arch::x86_64::mmu::read_cr3()
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        PhysAddr(0)
    }
}

fn invlpg(va: VirtAddr) {
    #[cfg(target_arch = "x86_64")]
    {
        crate::arch::x86_64::mmu::invlpg(va.as_u64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn va_indices_roundtrip() {
        let va = VirtAddr(0x0000_7F00_0012_3000);
        let idx = VaIndices::new(va);
        let rebuilt =
            ((idx.l4 as u64) << 39) | ((idx.l3 as u64) << 30) | ((idx.l2 as u64) << 21) | ((idx.l1 as u64) << 12);
        assert_eq!(rebuilt, va.as_u64());
    }

    #[test]
    fn perm_policy_rejects_extra_bits() {
        assert!(PageFlags::validate_user_perm(
            (PageFlags::USER | PageFlags::PRESENT).bits()
        )
        .is_ok());
        assert!(PageFlags::validate_user_perm(
            (PageFlags::USER | PageFlags::PRESENT | PageFlags::WRITABLE).bits()
        )
        .is_ok());
        assert_eq!(
            PageFlags::validate_user_perm(PageFlags::PRESENT.bits()),
            Err(PagingError::InvalidPerm)
        );
        assert_eq!(
            PageFlags::validate_user_perm((PageFlags::USER | PageFlags::PRESENT | PageFlags::GLOBAL).bits()),
            Err(PagingError::InvalidPerm)
        );
    }
}
