//! x86_64 architecture support.
//!
//! Hardware initialization (GDT, IDT, APIC), interrupt control, serial I/O
//! (COM1 at 0x3F8), and I/O port primitives for the x86_64 platform.

#![allow(clippy::missing_safety_doc)]

use crate::{env, mm};

pub mod apic;
pub mod boot;
pub mod early_serial;
pub mod gdt;
pub mod mmu;
pub mod msr;
pub mod serial;
pub mod smp;
pub mod trap;

/// Per-CPU kernel stack top, in the reserved region above
/// [`mm::KSTACKS_BASE`], each stack separated by one unmapped guard page
/// (spec.md's "CPU record" / C8).
fn kstack_top_for(cpu_id: usize) -> u64 {
    let base = mm::KSTACKS_BASE + cpu_id as u64 * (mm::KSTKSIZE + mm::KSTKGAP);
    base + mm::KSTKSIZE
}

/// Map every CPU's kernel stack into `root` up front, so an AP's trampoline
/// handoff can hand out an address that is already valid once it loads
/// `root` into CR3.
fn map_kernel_stacks(root: crate::mm::PhysAddr) {
    use crate::mm::{paging, PageFlags, VirtAddr, FRAME_ALLOCATOR};

    for cpu_id in 0..smp::MAX_CPUS {
        let base = mm::KSTACKS_BASE + cpu_id as u64 * (mm::KSTKSIZE + mm::KSTKGAP);
        let pages = mm::KSTKSIZE / mm::PAGE_SIZE;
        for i in 0..pages {
            let frame = FRAME_ALLOCATOR
                .alloc(true)
                .expect("out of memory mapping kernel stacks");
            paging::map(
                root,
                VirtAddr::new(base + i * mm::PAGE_SIZE),
                frame,
                PageFlags::WRITABLE,
            )
            .expect("failed to map kernel stack page");
        }
    }
}

/// Boot-processor entry from [`boot::kernel_main`]: builds the boot address
/// space (C3), brings up paging-dependent subsystems (C1/C2), the trap/IDT
/// layer (C5), discovers and releases APs (C8), then falls into the
/// scheduler (C7) and never returns.
pub fn boot_main(
    phys_mem_offset: u64,
    usable_ranges: &[(mm::PhysAddr, mm::PhysAddr)],
    kernel_reserved: &[(mm::PhysAddr, mm::PhysAddr)],
) -> ! {
    // SAFETY: runs once, before interrupts are enabled.
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack));
    }

    early_serial::init();
    println!("[BOOT] helios-kernel v{}", env!("CARGO_PKG_VERSION"));
    crate::klog::init();

    mm::init(phys_mem_offset, usable_ranges, kernel_reserved);

    let boot_root = mm::vas::init_boot_space();
    let phys_top = usable_ranges
        .iter()
        .map(|(_, end)| end.as_u64())
        .max()
        .unwrap_or(0)
        .next_multiple_of(mm::PAGE_SIZE);
    mm::paging::bulk_map(
        boot_root,
        mm::VirtAddr::new(mm::KERNBASE),
        mm::PhysAddr::new(0),
        phys_top,
        mm::PageFlags::WRITABLE,
    );
    map_kernel_stacks(boot_root);
    // SAFETY: `boot_root` was just fully built above.
    unsafe {
        mm::vas::activate(boot_root);
    }

    gdt::init(0, kstack_top_for(0), kstack_top_for(0));
    trap::init();

    env::init();
    mm::vas::init_boot_views().expect("mapping UENVS/UPAGES into the boot address space");

    let _ = apic::init();
    smp::discover();

    #[cfg(feature = "smp")]
    smp::start_aps(boot_root, kstack_top_for);

    x86_64::instructions::interrupts::enable();
    println!("[BOOT] entering scheduler");
    crate::sched::enter(0)
}

/// Halt the CPU. Used by panic/shutdown paths.
#[allow(dead_code)]
pub fn halt() -> ! {
    use x86_64::instructions::hlt;
    interrupts::disable();
    loop {
        hlt();
    }
}

/// Enable hardware interrupts. Will be used once interrupt handlers are fully
/// configured.
#[allow(dead_code)]
pub fn enable_interrupts() {
    x86_64::instructions::interrupts::enable();
}

pub fn disable_interrupts() -> impl Drop {
    struct InterruptGuard {
        was_enabled: bool,
    }

    impl Drop for InterruptGuard {
        fn drop(&mut self) {
            if self.was_enabled {
                x86_64::instructions::interrupts::enable();
            }
        }
    }

    let was_enabled = x86_64::instructions::interrupts::are_enabled();
    x86_64::instructions::interrupts::disable();
    InterruptGuard { was_enabled }
}

pub fn idle() {
    x86_64::instructions::hlt();
}

/// Speculation barrier to mitigate Spectre-style attacks.
/// Uses LFENCE which serializes instruction execution on Intel/AMD.
#[inline(always)]
pub fn speculation_barrier() {
    // SAFETY: lfence is a serializing instruction that prevents speculative
    // execution of subsequent instructions until all prior instructions
    // complete. No side effects beyond pipeline serialization.
    unsafe {
        core::arch::asm!("lfence", options(nostack, nomem, preserves_flags));
    }
}

pub fn serial_init() -> uart_16550::SerialPort {
    // SAFETY: SerialPort::new(0x3F8) creates a serial port handle for COM1
    // at the standard I/O base address. The address is well-known and the
    // port is initialized immediately after construction.
    let mut serial_port = unsafe { uart_16550::SerialPort::new(0x3F8) };
    serial_port.init();
    serial_port
}

/// Basic I/O port functions -- used by PCI, console, and storage drivers.
#[allow(dead_code)]
pub unsafe fn outb(port: u16, value: u8) {
    x86_64::instructions::port::Port::new(port).write(value);
}

#[allow(dead_code)]
pub unsafe fn inb(port: u16) -> u8 {
    x86_64::instructions::port::Port::new(port).read()
}

#[allow(dead_code)]
pub unsafe fn outw(port: u16, value: u16) {
    x86_64::instructions::port::Port::new(port).write(value);
}

#[allow(dead_code)]
pub unsafe fn inw(port: u16) -> u16 {
    x86_64::instructions::port::Port::new(port).read()
}

#[allow(dead_code)]
pub unsafe fn outl(port: u16, value: u32) {
    x86_64::instructions::port::Port::new(port).write(value);
}

#[allow(dead_code)]
pub unsafe fn inl(port: u16) -> u32 {
    x86_64::instructions::port::Port::new(port).read()
}

/// Kernel heap start address (mapped by bootloader 0.9)
pub const HEAP_START: usize = 0x444444440000;

/// Flush TLB for a specific virtual address.
#[allow(dead_code)]
pub fn tlb_flush_address(addr: u64) {
    // SAFETY: `invlpg` invalidates the TLB entry for the page containing the
    // given virtual address. Privileged, no side effects beyond TLB.
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) addr);
    }
}

/// Flush entire TLB.
#[allow(dead_code)]
pub fn tlb_flush_all() {
    // SAFETY: Reloading CR3 with its current value flushes all non-global TLB
    // entries. Privileged, no memory side effects.
    unsafe {
        let cr3: u64;
        core::arch::asm!("mov {}, cr3", out(reg) cr3);
        core::arch::asm!("mov cr3, {}", in(reg) cr3);
    }
}

mod interrupts {
    /// Enable interrupts. Will be called once interrupt handlers are
    /// registered.
    #[allow(dead_code)]
    pub unsafe fn enable() {
        x86_64::instructions::interrupts::enable();
    }

    #[allow(dead_code)]
    pub fn disable() {
        x86_64::instructions::interrupts::disable();
    }
}
