//! Boot entry point for x86_64 (`bootloader_api` contract, spec.md §6).
//!
//! The bootloader hands us a fully set-up long-mode environment: a page
//! table mapping the kernel image, a stack, and a physical-memory window
//! at a bootloader-chosen virtual offset. `kernel_main` turns that into
//! the boot address space C1-C3 expect, then falls into [`crate::_start`].

use bootloader_api::config::{BootloaderConfig, Mapping};
use bootloader_api::info::MemoryRegionKind;
use bootloader_api::{entry_point, BootInfo};

use crate::mm::PhysAddr;

pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

/// Upper bound on usable memory regions this boots with; `bootloader_api`
/// itself caps `memory_regions` well below this, so a fixed stack array
/// avoids needing the heap (not initialized yet) to collect them.
const MAX_REGIONS: usize = 64;

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    let phys_mem_offset = boot_info
        .physical_memory_offset
        .into_option()
        .expect("bootloader did not map physical memory");

    let mut ranges = [(PhysAddr::new(0), PhysAddr::new(0)); MAX_REGIONS];
    let mut n = 0;
    for region in boot_info.memory_regions.iter() {
        if region.kind == MemoryRegionKind::Usable && n < MAX_REGIONS {
            ranges[n] = (PhysAddr::new(region.start), PhysAddr::new(region.end));
            n += 1;
        }
    }

    // `kernel_addr`/`kernel_len` are the bootloader-reported physical load
    // extent of the kernel ELF image; unlike the `__kernel_start`/`_end`
    // linker symbols this needs no assumption about how that image is
    // mapped into virtual memory.
    let kernel_reserved = [(
        PhysAddr::new(boot_info.kernel_addr),
        PhysAddr::new(boot_info.kernel_addr + boot_info.kernel_len),
    )];

    crate::arch::x86_64::boot_main(phys_mem_offset, &ranges[..n], &kernel_reserved)
}