//! Memory management.
//!
//! Owns the physical frame allocator (`frame`), the four-level page-table
//! engine (`paging`), and the per-environment address-space builder (`vas`).
//! Everything above this module reaches physical memory only through these
//! three, never through raw `cr3`/pointer arithmetic.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, Ordering};

pub mod frame;
pub mod heap;
pub mod paging;
pub mod vas;

pub use frame::{FrameAllocatorError, FrameNumber, FRAME_ALLOCATOR};
pub use paging::{PageFlags, PageTable, PagingError};

/// Page size on x86-64: every frame, mapping and allocator unit is this size.
pub const PAGE_SIZE: u64 = 4096;
pub const PAGE_SHIFT: u64 = 12;

/// Entries per page-table level (PML4, PDPT, PD, PT all have 512 slots).
pub const ENTRIES_PER_TABLE: u64 = 512;

/// Bytes spanned by one leaf page-table (512 * 4 KiB).
pub const PT_COVERAGE: u64 = PAGE_SIZE * ENTRIES_PER_TABLE;
/// Bytes spanned by one page directory (512 * 2 MiB).
pub const PD_COVERAGE: u64 = PT_COVERAGE * ENTRIES_PER_TABLE;
/// Bytes spanned by one page-directory-pointer table, i.e. one PML4 slot
/// (512 * 1 GiB = 512 GiB).
pub const PDPT_COVERAGE: u64 = PD_COVERAGE * ENTRIES_PER_TABLE;

/// A physical memory address. Never dereferenced directly; go through
/// [`phys_to_virt`] first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(pub u64);

impl PhysAddr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn is_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    pub const fn frame(self) -> FrameNumber {
        FrameNumber::new(self.0 >> PAGE_SHIFT)
    }
}

/// A virtual memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(pub u64);

impl VirtAddr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn is_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    pub const fn align_down(self) -> Self {
        Self(self.0 & !(PAGE_SIZE - 1))
    }

    pub const fn align_up(self) -> Self {
        Self((self.0 + PAGE_SIZE - 1) & !(PAGE_SIZE - 1))
    }

    pub const fn offset(self) -> u64 {
        self.0 & (PAGE_SIZE - 1)
    }

    /// Is this address canonical (sign-extended bits 63:47) and below the
    /// user/kernel boundary [`UTOP`]? Every syscall argument that names a
    /// user buffer is checked with this before use.
    pub const fn is_user(self) -> bool {
        self.0 < UTOP
    }
}

impl core::ops::Add<u64> for VirtAddr {
    type Output = VirtAddr;
    fn add(self, rhs: u64) -> VirtAddr {
        VirtAddr(self.0 + rhs)
    }
}

impl core::ops::Sub<u64> for VirtAddr {
    type Output = VirtAddr;
    fn sub(self, rhs: u64) -> VirtAddr {
        VirtAddr(self.0 - rhs)
    }
}

// ---------------------------------------------------------------------
// Address-space map.
//
// PML4 index 255 ([`SELF_MAP`..`ULIM`)) is reserved for the recursive
// self-map and is never touched by the user/kernel text, stack or heap
// regions below it. Index 256 is the canonical-half boundary: everything
// at or above it is only ever mapped with the kernel-only (no USER) bit.
// ---------------------------------------------------------------------

/// Lowest usable user address; page 0 stays unmapped so a null dereference
/// always faults.
pub const UTEXT: u64 = 0x0000_0000_0040_0000;

/// Top of the environment's single user-mode stack. The stack's one page
/// lives at `[USTACKTOP - PAGE_SIZE, USTACKTOP)`.
pub const USTACKTOP: u64 = 0x0000_0000_8000_0000;

/// One unmapped guard page directly above the user stack.
pub const USTACK_GUARD: u64 = USTACKTOP;

/// Top of the one-page user exception stack, used by the page-fault upcall
/// trampoline. Its single page lives at `[USTACKTOP + PAGE_SIZE,
/// UXSTACKTOP)`.
pub const UXSTACKTOP: u64 = USTACKTOP + 2 * PAGE_SIZE;

/// Top of user-writable memory. Above this, mappings are read-only to both
/// rings (environment table, frame table, self-map) or kernel-only.
pub const UTOP: u64 = 0x0000_7F00_0000_0000;

/// Environment descriptor array, mapped read-only into every address space.
pub const UENVS: u64 = UTOP;
pub const UENVS_SIZE: u64 = 16 * 1024 * 1024;

/// Physical-frame descriptor array, mapped read-only into every address
/// space (lets user code implement `fork`'s page-sharing decisions without
/// a syscall per frame).
pub const UPAGES: u64 = UENVS + UENVS_SIZE;
pub const UPAGES_SIZE: u64 = 64 * 1024 * 1024;

/// Start of a second, read-only recursive self-map dedicated to user-mode
/// page-table introspection (C10's `fork`, walking its own mappings to
/// decide SHARE/COW/plain-copy per page): the same recursive trick as
/// [`SELF_MAP`], one dedicated PML4 slot, but `USER`-accessible and never
/// `WRITABLE`, so reading a PTE through it cannot be turned into writing
/// one. Placed in the slot directly below [`UTOP`], clear of both the
/// ordinary sub-`UTOP` user mappings (this kernel's programs never reach
/// anywhere near this high) and the `UENVS`/`UPAGES` windows that start at
/// `UTOP` itself.
pub const UVPT_L4_INDEX: u64 = 253;
pub const UVPT: u64 = UVPT_L4_INDEX << 39;

const _: () = assert!(UVPT + PDPT_COVERAGE == UTOP);

/// Start of the recursive self-map: one full PML4 slot (512 GiB of virtual
/// space) whose 512 entries, read through the self-reference, present the
/// running address space's own PML4/PDPT/PD/PT arrays as ordinary memory.
pub const SELF_MAP: u64 = 0x0000_7F80_0000_0000;
pub const SELF_MAP_L4_INDEX: u64 = SELF_MAP >> 39;

/// Top of the read-only shared window and the canonical low/high split.
pub const ULIM: u64 = 0x0000_8000_0000_0000;

const _: () = assert!(ULIM == SELF_MAP + PDPT_COVERAGE);
const _: () = assert!(SELF_MAP_L4_INDEX == 255);

/// Kernel direct physical-memory map: `KERNBASE + p` is always mapped to
/// physical address `p` for every frame the allocator knows about. One
/// PML4 slot (512 GiB) reserved, comfortably more than any machine this
/// kernel targets has installed.
pub const KERNBASE: u64 = 0xFFFF_8000_0000_0000;
pub const KERNBASE_L4_INDEX: u64 = KERNBASE >> 39;

/// Bump-allocated MMIO window (LAPIC, I/O APIC, anything else device code
/// maps by physical address rather than through the direct map).
pub const MMIO_BASE: u64 = 0xFFFF_8080_0000_0000;
pub const MMIO_LIM: u64 = MMIO_BASE + 1024 * 1024 * 1024;

/// Per-CPU kernel stacks, each `KSTKSIZE` with a one-page unmapped guard
/// below it so a kernel stack overflow faults instead of corrupting the
/// next CPU's stack.
pub const KSTACKS_BASE: u64 = 0xFFFF_8081_0000_0000;
pub const KSTKSIZE: u64 = 8 * PAGE_SIZE;
pub const KSTKGAP: u64 = PAGE_SIZE;

/// Fixed low physical page the AP trampoline is copied to (must be below
/// 1 MiB: real-mode code runs here).
pub const AP_TRAMPOLINE_PHYS: u64 = 0x8000;

const _: () = assert!(AP_TRAMPOLINE_PHYS < 0x10_0000);

/// Offset added to every physical address to reach its direct-mapped
/// virtual alias. Set once by [`init`] from the bootloader's memory map and
/// read by every later `phys_to_virt` call.
static PHYS_MEM_OFFSET: AtomicU64 = AtomicU64::new(KERNBASE);

/// Translate a physical address to the kernel's direct-mapped virtual
/// alias for it. The kernel itself never walks page tables through raw
/// physical pointers; every table access goes through this.
pub fn phys_to_virt(addr: PhysAddr) -> VirtAddr {
    VirtAddr(PHYS_MEM_OFFSET.load(Ordering::Acquire) + addr.0)
}

pub fn phys_mem_offset() -> u64 {
    PHYS_MEM_OFFSET.load(Ordering::Acquire)
}

/// Bring up C1 (frame allocator) and the kernel heap. Called once by the
/// bootstrap CPU before any environment exists. `usable_ranges` comes
/// straight from the bootloader's memory map; `kernel_end` is the highest
/// physical address the kernel image itself occupies, so those frames are
/// never handed out.
pub fn init(
    phys_mem_offset_hint: u64,
    usable_ranges: &[(PhysAddr, PhysAddr)],
    kernel_reserved: &[(PhysAddr, PhysAddr)],
) {
    PHYS_MEM_OFFSET.store(phys_mem_offset_hint, Ordering::Release);
    frame::init(usable_ranges, kernel_reserved);
    heap::init();
    log::info!("mm: frame allocator and kernel heap ready");
}
