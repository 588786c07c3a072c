//! Kernel heap.
//!
//! Backs `alloc::{Box, Vec, BTreeMap, ...}` for kernel-side code (the
//! environment table's auxiliary bookkeeping, the scheduler's ready
//! queues). A fixed `.bss` array handed to `linked_list_allocator`,
//! exactly the teacher's original approach, just without the upper bound
//! on non-x86_64 targets this kernel no longer builds for.

pub const HEAP_SIZE: usize = 4 * 1024 * 1024;

static mut HEAP_MEMORY: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

/// Initialize the global allocator. Must run once, after the frame
/// allocator but before any `alloc`-using code (the environment table,
/// logger ring buffer).
pub fn init() {
    // SAFETY: `HEAP_MEMORY` is `'static` and this function runs exactly
    // once, before any other code observes the allocator as initialized.
    unsafe {
        let start = core::ptr::addr_of_mut!(HEAP_MEMORY) as *mut u8;
        crate::get_allocator().lock().init(start, HEAP_SIZE);
    }
    log::info!("mm::heap: {} KiB kernel heap ready", HEAP_SIZE / 1024);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use alloc::{boxed::Box, vec::Vec};

    #[test]
    fn heap_allocation_works() {
        let x = Box::new(42);
        assert_eq!(*x, 42);
        let mut v = Vec::new();
        for i in 0..100 {
            v.push(i);
        }
        assert_eq!(v.len(), 100);
    }
}
