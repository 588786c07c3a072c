//! Multiprocessor bring-up (C8).
//!
//! `mp` parses the firmware's MP-configuration structure (ported from
//! `original_source/kern/mpconfig.c`'s `mpsearch`/`mpconfig`/`mp_init`,
//! there is no separate ACPI path in the original) to learn how many CPUs
//! exist and each one's Local APIC id. [`start_aps`] then walks every
//! non-boot CPU through the INIT + STARTUP(x2) sequence described in
//! spec.md §4.8, using a 16-bit real-mode trampoline relocated to a fixed
//! low physical page (`original_source/kern/lapic.c`'s `lapic_startap`).

#![allow(dead_code)]

use core::arch::global_asm;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::arch::x86_64::{apic, gdt};
use crate::mm::{self, paging, PageFlags, PhysAddr, VirtAddr};

/// Upper bound on CPUs this kernel tracks, matching the original's `NCPU`.
pub const MAX_CPUS: usize = 8;

/// CPU 0 is always the boot processor; `CPUS[1..ncpu())` are APs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CpuStatus {
    Unused = 0,
    Started = 1,
    Halted = 2,
}

pub struct CpuRecord {
    /// Local APIC id (the IPI destination), not the kernel-assigned index.
    /// `0xFF` marks a slot no CPU occupies.
    lapic_id: AtomicU8,
    status: AtomicU8,
}

impl CpuRecord {
    const fn empty() -> Self {
        Self {
            lapic_id: AtomicU8::new(0xFF),
            status: AtomicU8::new(CpuStatus::Unused as u8),
        }
    }

    pub fn lapic_id(&self) -> u8 {
        self.lapic_id.load(Ordering::Acquire)
    }

    pub fn status(&self) -> CpuStatus {
        match self.status.load(Ordering::Acquire) {
            1 => CpuStatus::Started,
            2 => CpuStatus::Halted,
            _ => CpuStatus::Unused,
        }
    }

    pub fn set_status(&self, s: CpuStatus) {
        self.status.store(s as u8, Ordering::Release);
    }
}

static CPUS: [CpuRecord; MAX_CPUS] = [const { CpuRecord::empty() }; MAX_CPUS];
static NCPU: AtomicU32 = AtomicU32::new(1);

pub fn ncpu() -> usize {
    NCPU.load(Ordering::Acquire) as usize
}

pub fn cpu(i: usize) -> &'static CpuRecord {
    &CPUS[i]
}

/// This CPU's kernel-assigned index (0 = boot processor), found by matching
/// its Local APIC id against [`CPUS`]. Cheap enough to call on every kernel
/// entry: `ncpu()` is at most [`MAX_CPUS`].
pub fn current_cpu_id() -> usize {
    let Some(id) = apic::read_id() else {
        return 0;
    };
    (0..ncpu()).find(|&i| CPUS[i].lapic_id() == id).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// MP-configuration table (MultiProcessor Specification 1.4)
// ---------------------------------------------------------------------------

mod mp {
    use core::mem::size_of;

    use crate::mm::{phys_to_virt, PhysAddr};

    #[repr(C, packed)]
    struct FloatingPointer {
        signature: [u8; 4],
        phys_addr: u32,
        length: u8,
        spec_rev: u8,
        checksum: u8,
        feature: [u8; 5],
    }

    #[repr(C, packed)]
    struct ConfigHeader {
        signature: [u8; 4],
        length: u16,
        version: u8,
        checksum: u8,
        product: [u8; 20],
        oem_table: u32,
        oem_length: u16,
        entry_count: u16,
        lapic_addr: u32,
        ext_length: u16,
        ext_checksum: u8,
        reserved: u8,
    }

    #[repr(C, packed)]
    struct ProcessorEntry {
        entry_type: u8,
        lapic_id: u8,
        lapic_version: u8,
        flags: u8,
        signature: [u8; 4],
        feature: u32,
        reserved: [u8; 8],
    }

    const ENTRY_PROCESSOR: u8 = 0;
    const PROC_FLAG_ENABLED: u8 = 0x01;
    const PROC_FLAG_BOOT: u8 = 0x02;

    fn checksum(bytes: &[u8]) -> u8 {
        bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
    }

    fn scan(start: u64, len: usize) -> Option<PhysAddr> {
        let base = phys_to_virt(PhysAddr::new(start)).as_u64() as *const u8;
        let step = size_of::<FloatingPointer>();
        let mut off = 0usize;
        while off + step <= len {
            // SAFETY: `start..start+len` is always identity-available
            // through the kernel's direct map (low physical RAM).
            let bytes = unsafe { core::slice::from_raw_parts(base.add(off), step) };
            if &bytes[0..4] == b"_MP_" && checksum(bytes) == 0 {
                return Some(PhysAddr::new(start + off as u64));
            }
            off += 16;
        }
        None
    }

    /// MP 4: the EBDA's first KiB, else base memory's last KiB, else the
    /// BIOS ROM range.
    fn search() -> Option<PhysAddr> {
        let bda = phys_to_virt(PhysAddr::new(0x400)).as_u64() as *const u8;
        // SAFETY: the BIOS data area at physical 0x400 is always populated
        // and mapped by the direct map before the kernel runs.
        let ebda_seg = unsafe { core::ptr::read_unaligned(bda.add(0x0E) as *const u16) };
        if ebda_seg != 0 {
            if let Some(p) = scan((ebda_seg as u64) << 4, 1024) {
                return Some(p);
            }
        } else {
            let base_kb = unsafe { core::ptr::read_unaligned(bda.add(0x13) as *const u16) };
            let base_top = (base_kb as u64) * 1024;
            if base_top >= 1024 {
                if let Some(p) = scan(base_top - 1024, 1024) {
                    return Some(p);
                }
            }
        }
        scan(0xF_0000, 0x1_0000)
    }

    /// Discovered Local APIC MMIO base plus one `(apic_id, is_boot)` pair
    /// per enabled processor entry.
    pub fn discover() -> Option<(PhysAddr, alloc::vec::Vec<(u8, bool)>)> {
        let fp_addr = search()?;
        let fp = unsafe { &*(phys_to_virt(fp_addr).as_u64() as *const FloatingPointer) };
        let conf_phys = { fp.phys_addr };
        if conf_phys == 0 {
            log::warn!("smp: MP default configurations not supported");
            return None;
        }

        let conf_virt = phys_to_virt(PhysAddr::new(conf_phys as u64)).as_u64() as *const u8;
        let header = unsafe { &*(conf_virt as *const ConfigHeader) };
        if &header.signature != b"PCMP" {
            log::warn!("smp: bad MP configuration table signature");
            return None;
        }
        let total_len = { header.length } as usize;
        // SAFETY: `total_len` came from the table's own header field and is
        // bounded by the MP spec to a few KiB.
        let whole = unsafe { core::slice::from_raw_parts(conf_virt, total_len) };
        if checksum(whole) != 0 {
            log::warn!("smp: bad MP configuration checksum");
            return None;
        }
        let version = { header.version };
        if version != 1 && version != 4 {
            log::warn!("smp: unsupported MP version {}", version);
            return None;
        }

        let entry_count = { header.entry_count };
        let lapic_addr = { header.lapic_addr };
        let mut procs = alloc::vec::Vec::new();
        let mut p = unsafe { conf_virt.add(size_of::<ConfigHeader>()) };
        for _ in 0..entry_count {
            let entry_type = unsafe { *p };
            match entry_type {
                ENTRY_PROCESSOR => {
                    let proc = unsafe { &*(p as *const ProcessorEntry) };
                    let flags = { proc.flags };
                    if flags & PROC_FLAG_ENABLED != 0 {
                        procs.push(({ proc.lapic_id }, flags & PROC_FLAG_BOOT != 0));
                    }
                    p = unsafe { p.add(size_of::<ProcessorEntry>()) };
                }
                1 | 2 | 3 | 4 => p = unsafe { p.add(8) },
                other => {
                    log::warn!("smp: unknown MP config entry type {:#x}", other);
                    return None;
                }
            }
        }
        Some((PhysAddr::new(lapic_addr as u64), procs))
    }
}

extern crate alloc;

/// Parse the MP-configuration table and populate [`CPUS`]. CPU 0 is always
/// the boot processor; every other enabled entry becomes an AP, in table
/// order. Falls back to a one-CPU system if no table is found (spec.md
/// §4.8 assumes a table exists, but the original degrades the same way).
pub fn discover() {
    CPUS[0].set_status(CpuStatus::Started);

    let Some((_lapic_phys, procs)) = mp::discover() else {
        NCPU.store(1, Ordering::Release);
        log::warn!("smp: no MP configuration table, running single-CPU");
        return;
    };

    let mut next = 1usize;
    for (apic_id, is_boot) in procs {
        if is_boot {
            CPUS[0].lapic_id.store(apic_id, Ordering::Release);
            continue;
        }
        if next >= MAX_CPUS {
            log::warn!("smp: too many CPUs reported, ignoring APIC id {}", apic_id);
            continue;
        }
        CPUS[next].lapic_id.store(apic_id, Ordering::Release);
        next += 1;
    }
    NCPU.store(next as u32, Ordering::Release);
    log::info!("smp: {} CPU(s) found", next);
}

// ---------------------------------------------------------------------------
// AP trampoline
// ---------------------------------------------------------------------------

const TRAMPOLINE_PHYS: u64 = mm::AP_TRAMPOLINE_PHYS;
/// Handoff words live at the tail of the same reserved page as the
/// trampoline code itself (`frame::init` reserves exactly one frame for
/// `AP_TRAMPOLINE_PHYS`); the code above is a few dozen bytes, nowhere near
/// this offset.
const BOOT_DATA_OFFSET: u64 = 0xF00;
const BOOT_DATA_PHYS: u64 = TRAMPOLINE_PHYS + BOOT_DATA_OFFSET;

unsafe extern "C" {
    static ap_trampoline_start: u8;
    static ap_trampoline_end: u8;
}

/// Copy the relocatable trampoline blob to its fixed physical home.
fn install_trampoline() {
    let start = &raw const ap_trampoline_start as *const u8;
    let end = &raw const ap_trampoline_end as *const u8;
    let len = end as usize - start as usize;
    let dst = mm::phys_to_virt(PhysAddr::new(TRAMPOLINE_PHYS)).as_u64() as *mut u8;
    // SAFETY: `dst` is the direct-mapped alias of the frame `frame::init`
    // permanently reserves for this purpose; `len` is the linker's true
    // size of the blob between the two symbols above.
    unsafe { core::ptr::copy_nonoverlapping(start, dst, len) };
}

/// Write the per-AP handoff words the trampoline reads once it reaches
/// 64-bit mode: the root table to load, this AP's kernel-stack top, the
/// Rust entry point's *linked* address (read back as an absolute jump
/// target, since the trampoline itself executes relocated and cannot use
/// rip-relative addressing to reach it), and the kernel-assigned CPU index.
fn write_handoff(boot_root: PhysAddr, stack_top: u64, cpu_id: u64) {
    let base = mm::phys_to_virt(PhysAddr::new(BOOT_DATA_PHYS)).as_u64() as *mut u64;
    // SAFETY: the trampoline only reads these words after it has loaded
    // `boot_root` into CR3, by which point this thread (the BSP, or a
    // previously-started AP serialized by `start_aps`'s wait-for-STARTED
    // loop) is the sole writer.
    unsafe {
        base.add(0).write_volatile(boot_root.as_u64());
        base.add(1).write_volatile(stack_top);
        base.add(2).write_volatile(ap_rust_entry as usize as u64);
        base.add(3).write_volatile(cpu_id);
    }
}

/// Identity-map the trampoline's page in `boot_root` so the AP can keep
/// fetching instructions from the same physical/virtual address across the
/// `mov cr0` that turns paging on. Never undone: the page is permanently
/// reserved in the frame allocator, so leaving it mapped costs nothing and
/// avoids the ref-counting mismatch a `bulk_map`/`unmap` pair would hit (C2's
/// `unmap` expects a frame `map` incremented; `bulk_map` never touches
/// ref-counts at all).
fn identity_map_trampoline(boot_root: PhysAddr) {
    let page = VirtAddr::new(TRAMPOLINE_PHYS & !(mm::PAGE_SIZE - 1));
    paging::bulk_map(
        boot_root,
        page,
        PhysAddr::new(page.as_u64()),
        mm::PAGE_SIZE,
        PageFlags::WRITABLE,
    );
}

fn spin_delay(iterations: u64) {
    for _ in 0..iterations {
        core::hint::spin_loop();
    }
}

/// Drive every discovered AP through INIT + STARTUP(x2) (spec.md §4.8),
/// waiting for each to signal `Started` before releasing the next.
/// `stack_top_for(cpu_id)` must return a virtual address already mapped in
/// `boot_root`'s per-CPU kernel-stack region.
pub fn start_aps(boot_root: PhysAddr, stack_top_for: impl Fn(usize) -> u64) {
    if ncpu() <= 1 {
        return;
    }
    identity_map_trampoline(boot_root);
    install_trampoline();

    let startup_vector = (TRAMPOLINE_PHYS >> 12) as u8;
    for idx in 1..ncpu() {
        let apic_id = CPUS[idx].lapic_id();
        write_handoff(boot_root, stack_top_for(idx), idx as u64);

        let _ = apic::send_ipi_raw(apic_id, 0, 0b101, true);
        spin_delay(200_000);
        let _ = apic::send_ipi_raw(apic_id, 0, 0b101, false);
        spin_delay(100_000);

        for _ in 0..2 {
            let _ = apic::send_ipi_raw(apic_id, startup_vector, 0b110, false);
            spin_delay(200_000);
        }

        let mut waited = 0u64;
        const MAX_WAIT: u64 = 50_000_000;
        while CPUS[idx].status() != CpuStatus::Started && waited < MAX_WAIT {
            core::hint::spin_loop();
            waited += 1;
        }
        if CPUS[idx].status() == CpuStatus::Started {
            log::info!("smp: CPU {} (APIC id {}) online", idx, apic_id);
        } else {
            log::warn!("smp: CPU {} (APIC id {}) never signaled STARTED", idx, apic_id);
        }
    }
}

/// Where every AP lands in Rust: on the boot root table, in long mode, on
/// its own kernel stack, interrupts still off. `stack_top` is the same
/// value the trampoline already loaded into RSP (handoff word 1); `gdt::init`
/// still needs it to set this CPU's TSS RSP0; `get_kernel_stack` can't be
/// used here since this CPU's slot hasn't been initialized yet. Brings up
/// this core's own Local APIC, GDT/TSS and IDT, signals `Started`, then
/// joins the big lock and the scheduler exactly as the boot processor does
/// after C5/C8.
#[unsafe(no_mangle)]
extern "C" fn ap_rust_entry(cpu_id: u64, stack_top: u64) -> ! {
    let cpu_id = cpu_id as usize;
    let _ = apic::init_ap();
    gdt::init(cpu_id, stack_top, stack_top);
    super::trap::init();
    CPUS[cpu_id].set_status(CpuStatus::Started);
    log::info!("smp: CPU {} running", cpu_id);
    crate::sync::KERNEL_LOCK.lock();
    crate::sched::enter(cpu_id)
}

global_asm!(
    ".code16",
    ".global ap_trampoline_start",
    "ap_trampoline_start:",
    "cli",
    "cld",
    "xorw %ax, %ax",
    "movw %ax, %ds",
    "movw %ax, %es",
    "movw %ax, %ss",
    "lgdt (ap_gdt_ptr - ap_trampoline_start + {trampoline_phys})",
    "movl %cr0, %eax",
    "orl $1, %eax",
    "movl %eax, %cr0",
    "ljmp $0x08, $(ap_trampoline32 - ap_trampoline_start + {trampoline_phys})",
    ".code32",
    "ap_trampoline32:",
    "movw $0x10, %ax",
    "movw %ax, %ds",
    "movw %ax, %es",
    "movw %ax, %ss",
    "movl %cr4, %eax",
    "orl $0x20, %eax",
    "movl %eax, %cr4",
    "movl ${boot_data_phys}, %ebx",
    "movl (%ebx), %eax",
    "movl %eax, %cr3",
    "movl $0xC0000080, %ecx",
    "rdmsr",
    "orl $0x100, %eax",
    "wrmsr",
    "movl %cr0, %eax",
    "orl $0x80000000, %eax",
    "movl %eax, %cr0",
    "ljmp $0x18, $(ap_trampoline64 - ap_trampoline_start + {trampoline_phys})",
    ".code64",
    "ap_trampoline64:",
    "movw $0x10, %ax",
    "movw %ax, %ds",
    "movw %ax, %es",
    "movw %ax, %ss",
    "movl ${boot_data_phys}, %ebx",
    "movq 8(%rbx), %rsp",
    "movq 24(%rbx), %rdi",
    "movq 8(%rbx), %rsi",
    "movq 16(%rbx), %rax",
    "jmp *%rax",
    ".align 16",
    "ap_gdt:",
    ".quad 0x0000000000000000",
    ".quad 0x00cf9a000000ffff",
    ".quad 0x00cf92000000ffff",
    ".quad 0x00af9a000000ffff",
    "ap_gdt_end:",
    "ap_gdt_ptr:",
    ".word ap_gdt_end - ap_gdt - 1",
    ".long ap_gdt - ap_trampoline_start + {trampoline_phys}",
    ".global ap_trampoline_end",
    "ap_trampoline_end:",
    ".code64",
    trampoline_phys = const TRAMPOLINE_PHYS,
    boot_data_phys = const BOOT_DATA_PHYS,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_cpu_starts_out_started() {
        assert_eq!(CPUS[0].status(), CpuStatus::Started);
    }

    #[test]
    fn unused_slot_has_no_apic_id() {
        assert_eq!(CPUS[MAX_CPUS - 1].lapic_id(), 0xFF);
    }
}
