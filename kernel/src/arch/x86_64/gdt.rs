//! Per-CPU GDT/TSS (C5, C8).
//!
//! Each CPU gets its own `GlobalDescriptorTable` and `TaskStateSegment` —
//! the TSS holds that CPU's kernel-stack top (RSP0), loaded fresh on every
//! trap from user mode, so two CPUs never race over a shared RSP0. Layout
//! mirrors the teacher's original single-CPU table exactly (selector
//! values are identical across CPUs; only the TSS *contents* differ),
//! which keeps SYSRET's `STAR`-derived selector arithmetic CPU-independent.

use core::cell::UnsafeCell;

use x86_64::{
    instructions::{
        segmentation::{Segment, CS, DS},
        tables::load_tss,
    },
    structures::{
        gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector},
        tss::TaskStateSegment,
    },
    VirtAddr,
};

use crate::arch::x86_64::smp::MAX_CPUS;

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

/// Selector layout, identical on every CPU:
/// - 0x00 null, 0x08 kernel code, 0x10 kernel data
/// - 0x18 TSS (2 entries, 0x18-0x28)
/// - 0x28 user data (RPL 3 = 0x2B), 0x30 user code (RPL 3 = 0x33)
///
/// User data/code order matches SYSRET: `SS = STAR[63:48]+8`,
/// `CS = STAR[63:48]+16`.
#[derive(Clone, Copy)]
pub struct Selectors {
    pub code_selector: SegmentSelector,
    pub data_selector: SegmentSelector,
    pub tss_selector: SegmentSelector,
    pub user_data_selector: SegmentSelector,
    pub user_code_selector: SegmentSelector,
}

struct CpuTables {
    tss: TaskStateSegment,
    gdt: Option<GlobalDescriptorTable>,
    selectors: Option<Selectors>,
}

impl CpuTables {
    const fn empty() -> Self {
        Self {
            tss: TaskStateSegment::new(),
            gdt: None,
            selectors: None,
        }
    }
}

struct PerCpu(UnsafeCell<[CpuTables; MAX_CPUS]>);

// SAFETY: each index is written exactly once, by the CPU it belongs to,
// during that CPU's own bring-up (`init`); afterward only that same CPU
// calls `set_kernel_stack`/`get_kernel_stack`/`selectors` on its own index.
unsafe impl Sync for PerCpu {}

static TABLES: PerCpu = PerCpu(UnsafeCell::new([const { CpuTables::empty() }; MAX_CPUS]));

fn slot(cpu_id: usize) -> &'static mut CpuTables {
    // SAFETY: see `PerCpu`'s `Sync` impl above.
    unsafe { &mut (*TABLES.0.get())[cpu_id] }
}

/// Double-fault and privilege-change kernel stacks are carved out of the
/// per-CPU kernel-stack region (`mm::KSTACKS_BASE`); `kstack_top` and
/// `ist_top` are virtual addresses already mapped there by `mm::vas`'s
/// boot-space `bulk_map` calls.
pub fn init(cpu_id: usize, kstack_top: u64, ist_top: u64) {
    let entry = slot(cpu_id);
    entry.tss.privilege_stack_table[0] = VirtAddr::new(kstack_top);
    entry.tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] = VirtAddr::new(ist_top);

    let mut gdt = GlobalDescriptorTable::new();
    let code_selector = gdt.append(Descriptor::kernel_code_segment());
    let data_selector = gdt.append(Descriptor::kernel_data_segment());
    // SAFETY: `entry.tss` outlives the GDT built here — both live in the
    // `'static` `TABLES` array and are never moved or freed.
    let tss_selector = gdt.append(Descriptor::tss_segment(unsafe {
        &*(&entry.tss as *const TaskStateSegment)
    }));
    let user_data_selector = gdt.append(Descriptor::user_data_segment());
    let user_code_selector = gdt.append(Descriptor::user_code_segment());

    entry.selectors = Some(Selectors {
        code_selector,
        data_selector,
        tss_selector,
        user_data_selector,
        user_code_selector,
    });
    entry.gdt = Some(gdt);

    entry.gdt.as_ref().unwrap().load();
    // SAFETY: segment registers must be reloaded immediately after `lgdt`
    // so the CPU stops using descriptors from the table it just replaced;
    // the selectors above were computed from the table just loaded.
    unsafe {
        CS::set_reg(code_selector);
        DS::set_reg(data_selector);
        load_tss(tss_selector);
    }
}

pub fn selectors(cpu_id: usize) -> Selectors {
    slot(cpu_id).selectors.expect("gdt::init not called for this CPU")
}

/// Update RSP0 on this CPU's TSS. Called by the scheduler before resuming
/// an environment, with the big lock held so no trap races the write.
pub fn set_kernel_stack(cpu_id: usize, stack_top: u64) {
    slot(cpu_id).tss.privilege_stack_table[0] = VirtAddr::new(stack_top);
}

pub fn get_kernel_stack(cpu_id: usize) -> u64 {
    slot(cpu_id).tss.privilege_stack_table[0].as_u64()
}
