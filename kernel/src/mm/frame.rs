//! Physical page allocator (C1).
//!
//! Tracks every 4 KiB physical frame in a fixed-size descriptor array sized
//! to match the read-only window the kernel exposes at `UPAGES` (32 GiB of
//! physical memory, which is far beyond anything this kernel is booted
//! under in practice). Free frames are threaded through `next_free` into a
//! singly linked list; `ref_count` is owned by C2 (`map`/`unmap` increment
//! and decrement it) and by this module's own `free`/`decref`.

use core::cell::UnsafeCell;

use spin::Mutex;

use super::{PhysAddr, PAGE_SIZE, UPAGES_SIZE};

/// A physical frame number (physical address >> 12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FrameNumber(pub u64);

impl FrameNumber {
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn addr(self) -> PhysAddr {
        PhysAddr(self.0 * PAGE_SIZE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAllocatorError {
    OutOfMemory,
    InvalidFrame,
    NotFree,
}

/// Maximum frame this allocator can track: `UPAGES_SIZE / size_of::<FrameDesc>()`.
/// Keeping it exactly this size means the descriptor array can be mapped
/// whole into the `UPAGES` window with no slack.
pub const MAX_FRAMES: usize = (UPAGES_SIZE / 8) as usize;

const FREE_LIST_END: u32 = u32::MAX;

/// One entry per physical frame. `repr(C)` and fixed layout because this
/// array is mapped directly into every address space's `UPAGES` window.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct FrameDesc {
    pub ref_count: u32,
    next_free: u32,
}

impl FrameDesc {
    const fn empty() -> Self {
        Self {
            ref_count: 0,
            next_free: FREE_LIST_END,
        }
    }
}

/// Raw backing storage for the frame table. Lives in `.bss`; never resized.
struct FrameTableStorage(UnsafeCell<[FrameDesc; MAX_FRAMES]>);

// SAFETY: all access to the cell's contents is mediated by `FRAME_ALLOCATOR`'s
// `Mutex`, which is the sole holder of a `&mut` into this array.
unsafe impl Sync for FrameTableStorage {}

static FRAME_TABLE: FrameTableStorage =
    FrameTableStorage(UnsafeCell::new([FrameDesc::empty(); MAX_FRAMES]));

/// Physical address of the frame table, for mapping into `UPAGES`. Valid
/// only once the kernel's own direct map covers `.bss`, which it does from
/// boot (the bootloader's identity map, later replaced by C3's copy of the
/// same window).
pub fn table_phys_addr() -> PhysAddr {
    // SAFETY: `FRAME_TABLE` is a `'static` array; its address never moves.
    let ptr = FRAME_TABLE.0.get() as u64;
    PhysAddr(ptr - super::phys_mem_offset())
}

pub const fn table_byte_len() -> usize {
    MAX_FRAMES * core::mem::size_of::<FrameDesc>()
}

struct Inner {
    free_head: u32,
    free_count: usize,
    total_frames: usize,
}

pub struct FrameAllocatorState(Mutex<Inner>);

impl FrameAllocatorState {
    const fn new() -> Self {
        Self(Mutex::new(Inner {
            free_head: FREE_LIST_END,
            free_count: 0,
            total_frames: 0,
        }))
    }

    /// Access a descriptor. Caller holds `self.0`'s guard (passed in as
    /// `_guard` purely to prove that at the type level).
    ///
    /// # Safety
    /// `index` must be `< MAX_FRAMES`.
    unsafe fn desc_mut(&self, _guard: &mut Inner, index: usize) -> &mut FrameDesc {
        // SAFETY: exclusive access is guaranteed by holding `self.0`'s lock
        // (the only other accessor, `table_phys_addr`, only reads the base
        // pointer, never dereferences an element).
        unsafe { &mut (*FRAME_TABLE.0.get())[index] }
    }

    /// Remove the first frame from the free list, zeroing it if asked.
    /// `ref_count` is 0 on return; the caller (C2's `map`) increments it.
    pub fn alloc(&self, zero: bool) -> Result<FrameNumber, FrameAllocatorError> {
        let mut inner = self.0.lock();
        if inner.free_head == FREE_LIST_END {
            return Err(FrameAllocatorError::OutOfMemory);
        }
        let index = inner.free_head as usize;
        let next = unsafe { self.desc_mut(&mut inner, index) }.next_free;
        inner.free_head = next;
        inner.free_count -= 1;
        let frame = FrameNumber::new(index as u64);
        if zero {
            let va = super::phys_to_virt(frame.addr());
            // SAFETY: `frame` was just unlinked from the free list, so no
            // other reference to this physical page exists; its virtual
            // alias through the direct map is writable kernel memory.
            unsafe {
                core::ptr::write_bytes(va.as_u64() as *mut u8, 0, PAGE_SIZE as usize);
            }
        }
        Ok(frame)
    }

    /// Push a frame back onto the free list. Requires `ref_count == 0`.
    pub fn free(&self, frame: FrameNumber) -> Result<(), FrameAllocatorError> {
        let mut inner = self.0.lock();
        let index = frame.0 as usize;
        if index >= inner.total_frames {
            return Err(FrameAllocatorError::InvalidFrame);
        }
        let head = inner.free_head;
        let desc = unsafe { self.desc_mut(&mut inner, index) };
        if desc.ref_count != 0 {
            return Err(FrameAllocatorError::NotFree);
        }
        desc.next_free = head;
        inner.free_head = index as u32;
        inner.free_count += 1;
        Ok(())
    }

    /// Decrement a frame's reference count, freeing it when it reaches
    /// zero. Called by C2's `unmap` and by `free_space`'s teardown walk.
    pub fn decref(&self, frame: FrameNumber) {
        let index = frame.0 as usize;
        let became_free = {
            let mut inner = self.0.lock();
            if index >= inner.total_frames {
                return;
            }
            let desc = unsafe { self.desc_mut(&mut inner, index) };
            debug_assert!(desc.ref_count > 0, "decref on a frame with zero ref_count");
            desc.ref_count = desc.ref_count.saturating_sub(1);
            desc.ref_count == 0
        };
        if became_free {
            let _ = self.free(frame);
        }
    }

    /// Increment a frame's reference count. Called by C2's `map` before the
    /// leaf is written, so a racing decref-to-zero elsewhere cannot observe
    /// a frame that is about to be reused out from under it.
    pub fn incref(&self, frame: FrameNumber) {
        let mut inner = self.0.lock();
        let index = frame.0 as usize;
        if index >= inner.total_frames {
            return;
        }
        unsafe { self.desc_mut(&mut inner, index) }.ref_count += 1;
    }

    pub fn ref_count(&self, frame: FrameNumber) -> u32 {
        let mut inner = self.0.lock();
        let index = frame.0 as usize;
        if index >= inner.total_frames {
            return 0;
        }
        unsafe { self.desc_mut(&mut inner, index) }.ref_count
    }

    pub fn free_count(&self) -> usize {
        self.0.lock().free_count
    }

    pub fn total_frames(&self) -> usize {
        self.0.lock().total_frames
    }

    /// Mark `[start, start+count)` as permanently owned by the kernel: not
    /// on the free list, `ref_count = 1` forever.
    fn reserve(&self, inner: &mut Inner, start: u64, count: u64) {
        for i in start..(start + count).min(inner.total_frames as u64) {
            let desc = unsafe { self.desc_mut(inner, i as usize) };
            desc.ref_count = 1;
            desc.next_free = FREE_LIST_END;
        }
    }
}

pub static FRAME_ALLOCATOR: FrameAllocatorState = FrameAllocatorState::new();

/// Walk the bootloader-supplied usable ranges, reserve everything in
/// `kernel_reserved` (the loaded kernel image and its debug section, the
/// boot top-level page table, the frame table, the environment table, and
/// the single AP trampoline frame), and chain everything else onto the
/// free list.
///
/// `original_source/kern/pmap.c`'s `page_init` walks a BIOS-probed map with
/// the same three-way split (low BIOS page reserved, kernel image
/// reserved, everything above free); this version takes the bootloader's
/// memory map instead of re-probing the BIOS, since the boot-time contract
/// (spec.md §6) already guarantees one is supplied.
pub fn init(usable_ranges: &[(PhysAddr, PhysAddr)], kernel_reserved: &[(PhysAddr, PhysAddr)]) {
    let mut inner = FRAME_ALLOCATOR.0.lock();

    let highest = usable_ranges
        .iter()
        .map(|(_, end)| end.as_u64())
        .max()
        .unwrap_or(0);
    let total = ((highest / PAGE_SIZE) as usize).min(MAX_FRAMES);
    inner.total_frames = total;

    // Start with everything reserved; only frames inside a usable range are
    // released onto the free list. This also implicitly reserves the I/O
    // hole and any gap the bootloader's map doesn't claim as usable.
    for i in 0..total {
        unsafe { FRAME_ALLOCATOR.desc_mut(&mut inner, i) }.ref_count = 1;
    }

    for &(start, end) in usable_ranges {
        let first = start.as_u64() / PAGE_SIZE;
        let last = end.as_u64() / PAGE_SIZE;
        for frame in first..last.min(total as u64) {
            unsafe { FRAME_ALLOCATOR.desc_mut(&mut inner, frame as usize) }.ref_count = 0;
        }
    }

    for &(start, end) in kernel_reserved {
        let first = start.as_u64() / PAGE_SIZE;
        let count = (end.as_u64() / PAGE_SIZE).saturating_sub(first);
        FRAME_ALLOCATOR.reserve(&mut inner, first, count);
    }

    // The frame table and AP trampoline frame are always kernel-reserved,
    // regardless of what the caller passed in.
    let table_first = table_phys_addr().as_u64() / PAGE_SIZE;
    let table_count = (table_byte_len() as u64).div_ceil(PAGE_SIZE);
    FRAME_ALLOCATOR.reserve(&mut inner, table_first, table_count);
    let ap_frame = super::AP_TRAMPOLINE_PHYS / PAGE_SIZE;
    FRAME_ALLOCATOR.reserve(&mut inner, ap_frame, 1);

    inner.free_head = FREE_LIST_END;
    inner.free_count = 0;
    for i in (0..total).rev() {
        let desc = unsafe { FRAME_ALLOCATOR.desc_mut(&mut inner, i) };
        if desc.ref_count == 0 {
            desc.next_free = inner.free_head;
            inner.free_head = i as u32;
            inner.free_count += 1;
        }
    }

    log::info!(
        "mm::frame: {} frames total, {} free ({} MiB)",
        total,
        inner.free_count,
        inner.free_count * PAGE_SIZE as usize / (1024 * 1024)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Grounded on `original_source/kern/pmap.c`'s `check_page_free_list`:
    /// every entry on the free list must have `ref_count == 0` and every
    /// link index must be in range.
    #[test]
    fn free_list_entries_have_zero_refcount() {
        let alloc = FrameAllocatorState::new();
        {
            let mut inner = alloc.0.lock();
            inner.total_frames = 8;
            for i in (0..8).rev() {
                let desc = unsafe { alloc.desc_mut(&mut inner, i) };
                desc.ref_count = 0;
                desc.next_free = inner.free_head;
                inner.free_head = i as u32;
                inner.free_count += 1;
            }
        }
        assert_eq!(alloc.free_count(), 8);
        let f = alloc.alloc(false).unwrap();
        assert_eq!(alloc.ref_count(f), 0);
        alloc.incref(f);
        assert_eq!(alloc.ref_count(f), 1);
        alloc.decref(f);
        assert_eq!(alloc.free_count(), 8);
    }

    #[test]
    fn alloc_exhausts_and_reports_out_of_memory() {
        let alloc = FrameAllocatorState::new();
        {
            let mut inner = alloc.0.lock();
            inner.total_frames = 1;
            inner.free_head = 0;
            inner.free_count = 1;
        }
        assert!(alloc.alloc(false).is_ok());
        assert_eq!(alloc.alloc(false), Err(FrameAllocatorError::OutOfMemory));
    }

    fn populated(total: usize) -> FrameAllocatorState {
        let alloc = FrameAllocatorState::new();
        let mut inner = alloc.0.lock();
        inner.total_frames = total;
        for i in (0..total).rev() {
            let desc = unsafe { alloc.desc_mut(&mut inner, i) };
            desc.ref_count = 0;
            desc.next_free = inner.free_head;
            inner.free_head = i as u32;
            inner.free_count += 1;
        }
        drop(inner);
        alloc
    }

    /// Grounded on `original_source/kern/pmap.c`'s `check_page_alloc`: three
    /// consecutive allocations must return distinct frames, and the
    /// allocator must report out of memory once the free list is drained.
    #[test]
    fn three_allocations_are_distinct_then_exhaust() {
        let alloc = populated(3);
        let p0 = alloc.alloc(false).unwrap();
        let p1 = alloc.alloc(false).unwrap();
        let p2 = alloc.alloc(false).unwrap();
        assert_ne!(p0, p1);
        assert_ne!(p1, p2);
        assert_ne!(p0, p2);
        assert_eq!(alloc.alloc(false), Err(FrameAllocatorError::OutOfMemory));
    }

    /// `check_page_alloc`'s free-and-reallocate check: frames returned to
    /// the allocator must become allocatable again.
    #[test]
    fn freed_frames_are_reallocatable() {
        let alloc = populated(3);
        let p0 = alloc.alloc(false).unwrap();
        let p1 = alloc.alloc(false).unwrap();
        let p2 = alloc.alloc(false).unwrap();
        assert_eq!(alloc.alloc(false), Err(FrameAllocatorError::OutOfMemory));

        alloc.free(p0).unwrap();
        alloc.free(p1).unwrap();
        alloc.free(p2).unwrap();

        let q0 = alloc.alloc(false).unwrap();
        let q1 = alloc.alloc(false).unwrap();
        let q2 = alloc.alloc(false).unwrap();
        assert_ne!(q0, q1);
        assert_ne!(q1, q2);
        assert_ne!(q0, q2);
        assert_eq!(alloc.alloc(false), Err(FrameAllocatorError::OutOfMemory));
    }

    /// `free` on a frame whose `ref_count` has not dropped to zero must be
    /// rejected rather than silently corrupting the free list.
    #[test]
    fn free_rejects_nonzero_refcount() {
        let alloc = populated(1);
        let f = alloc.alloc(false).unwrap();
        alloc.incref(f);
        assert_eq!(alloc.free(f), Err(FrameAllocatorError::NotFree));
    }
}
