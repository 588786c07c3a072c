//! Environment table (C4).
//!
//! An environment is this kernel's unit of execution: one address space,
//! one saved trap frame, one state machine. The table is a fixed-size
//! array (`NENV` slots) threaded into a free list exactly like
//! `mm::frame`'s frame table, guarded by the same `Mutex<Inner>` shape —
//! normally uncontended since every caller already holds the big kernel
//! lock, but kept explicit rather than relying on that as an invariant.
//! Grounded on `original_source/kern/env.c`'s `envs`/`env_free_list` and
//! `struct Env`.

#![allow(dead_code)]

pub mod pagefault;

use core::cell::UnsafeCell;

use spin::Mutex;

use crate::arch::x86_64::trap::TrapFrame;
use crate::error::{KernelError, KernelResult};
use crate::mm::{self, vas, PhysAddr, VirtAddr};

/// Environment table size, matching `original_source/inc/env.h`'s `NENV`.
pub const NENV: usize = 1024;
const LOG2NENV: u32 = 10;
const _: () = assert!(1 << LOG2NENV == NENV);

/// `0` is never assigned to a real environment; `id_lookup` treats it as
/// "the caller".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EnvId(pub u32);

impl EnvId {
    pub const NONE: EnvId = EnvId(0);

    pub fn index(self) -> usize {
        (self.0 as usize) & (NENV - 1)
    }

    pub fn generation(self) -> u32 {
        self.0 >> LOG2NENV
    }

    fn make(generation: u32, index: usize) -> Self {
        Self((generation << LOG2NENV) | index as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvState {
    Free,
    Runnable,
    Running,
    NotRunnable,
    Dying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvType {
    Normal,
    /// Gets I/O-privilege bits set in its saved flags (spec.md §4.4).
    Fs,
}

#[derive(Debug, Clone, Copy)]
pub struct Env {
    pub id: EnvId,
    pub parent_id: EnvId,
    pub state: EnvState,
    pub env_type: EnvType,
    pub runs: u64,
    pub root: PhysAddr,
    pub saved_frame: TrapFrame,
    /// Virtual address of the user page-fault upcall trampoline; 0 means
    /// none registered.
    pub pgfault_upcall: u64,
    pub ipc_recving: bool,
    pub ipc_from: EnvId,
    pub ipc_value: u64,
    pub ipc_dstva: u64,
    pub ipc_perm: u64,
    /// CPU this environment is RUNNING on, if any; read by `destroy` to
    /// decide between an immediate free and a deferred DYING mark
    /// (spec.md §4.4).
    pub running_on: Option<usize>,
    next_free: u32,
}

impl Env {
    const fn empty(index: usize) -> Self {
        Self {
            id: EnvId(0),
            parent_id: EnvId(0),
            state: EnvState::Free,
            env_type: EnvType::Normal,
            runs: 0,
            root: PhysAddr::new(0),
            saved_frame: TrapFrame::zeroed(),
            pgfault_upcall: 0,
            ipc_recving: false,
            ipc_from: EnvId(0),
            ipc_value: 0,
            ipc_dstva: 0,
            ipc_perm: 0,
            running_on: None,
            next_free: (index as u32).wrapping_add(1),
        }
    }
}

/// Read-only view of one environment, mapped at `UENVS` (spec.md §4.10):
/// `ipc_recv`'s user-side wrapper reads its own slot here instead of
/// syscalling to learn the value, sender and permissions a completed send
/// delivered. Kept separate from [`Env`] (rather than mapping that struct
/// directly) so its layout is a deliberate, stable, user-facing ABI.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct UserEnv {
    pub id: u32,
    pub parent_id: u32,
    pub state: u32,
    pub ipc_recving: u32,
    pub ipc_from: u32,
    pub ipc_perm: u32,
    pub ipc_value: u64,
}

impl UserEnv {
    const fn empty() -> Self {
        Self {
            id: 0,
            parent_id: 0,
            state: 0,
            ipc_recving: 0,
            ipc_from: 0,
            ipc_perm: 0,
            ipc_value: 0,
        }
    }
}

struct UserEnvStorage(UnsafeCell<[UserEnv; NENV]>);

// SAFETY: every write happens with `TABLE`'s guard (or during single-CPU
// `env::init`), mirroring `EnvTableStorage`'s invariant.
unsafe impl Sync for UserEnvStorage {}

static USER_ENVS: UserEnvStorage =
    UserEnvStorage(UnsafeCell::new([const { UserEnv::empty() }; NENV]));

/// Physical address of the `UserEnv` snapshot table, for mapping read-only
/// into `UENVS`. Mirrors `mm::frame::table_phys_addr`'s direct-map
/// assumption.
pub fn user_table_phys_addr() -> PhysAddr {
    // SAFETY: `USER_ENVS` is a `'static` array; its address never moves.
    let ptr = USER_ENVS.0.get() as u64;
    PhysAddr::new(ptr - mm::phys_mem_offset())
}

pub const fn user_table_byte_len() -> usize {
    NENV * core::mem::size_of::<UserEnv>()
}

/// Refresh `index`'s `UENVS` snapshot from the authoritative `Env` slot.
/// Called by every function that changes a field `UserEnv` mirrors.
fn sync_user_view(index: usize) {
    let env = slot(index);
    let snapshot = UserEnv {
        id: env.id.0,
        parent_id: env.parent_id.0,
        state: env.state as u32,
        ipc_recving: env.ipc_recving as u32,
        ipc_from: env.ipc_from.0,
        ipc_perm: env.ipc_perm as u32,
        ipc_value: env.ipc_value,
    };
    // SAFETY: `sync_user_view` is only ever called by a caller already
    // holding `TABLE`'s guard (or `env::init`, single-CPU, pre-scheduler).
    unsafe {
        (*USER_ENVS.0.get())[index] = snapshot;
    }
}

const FREE_LIST_END: u32 = u32::MAX;

struct EnvTableStorage(UnsafeCell<[Env; NENV]>);

// SAFETY: every access goes through `TABLE`'s `Mutex`.
unsafe impl Sync for EnvTableStorage {}

static STORAGE: EnvTableStorage = EnvTableStorage(UnsafeCell::new(
    [const { Env::empty(0) }; NENV],
));

struct Inner {
    free_head: u32,
}

static TABLE: Mutex<Inner> = Mutex::new(Inner {
    free_head: FREE_LIST_END,
});

/// Per-CPU "currently running environment", indexed by
/// `arch::x86_64::smp::current_cpu_id()`. Only the owning CPU ever writes
/// its own slot.
static CURRENT: [core::sync::atomic::AtomicU32; crate::arch::x86_64::smp::MAX_CPUS] =
    [const { core::sync::atomic::AtomicU32::new(0) }; crate::arch::x86_64::smp::MAX_CPUS];

/// Build the free list in index order, like `original_source/kern/env.c`'s
/// `env_init` (index order so the earliest-allocated environment reuses
/// the lowest slot, which keeps `UENVS` mappings stable across a long
/// boot).
pub fn init() {
    let mut inner = TABLE.lock();
    // SAFETY: sole holder of `TABLE`'s guard.
    let envs = unsafe { &mut *STORAGE.0.get() };
    for i in (0..NENV).rev() {
        envs[i] = Env::empty(i);
        envs[i].next_free = inner.free_head;
        inner.free_head = i as u32;
    }
    // SAFETY: sole holder of `TABLE`'s guard, `envs` no longer borrowed.
    for i in 0..NENV {
        sync_user_view(i);
    }
    log::info!("env: {} environment slots ready", NENV);
}

fn slot(index: usize) -> &'static mut Env {
    // SAFETY: caller holds `TABLE`'s guard (every function below that calls
    // this takes the lock first).
    unsafe { &mut (*STORAGE.0.get())[index] }
}

/// `alloc(parent_id) → env | ∅` (spec.md §4.4).
pub fn alloc(parent_id: EnvId) -> KernelResult<EnvId> {
    let mut inner = TABLE.lock();
    if inner.free_head == FREE_LIST_END {
        return Err(KernelError::ResourceExhausted {
            resource: "environment table",
        });
    }
    let index = inner.free_head as usize;
    let root = vas::new_space().map_err(|_| KernelError::OutOfMemory {
        requested: mm::PAGE_SIZE as usize,
        available: 0,
    })?;

    let generation = slot(index).id.generation().wrapping_add(1);
    let id = EnvId::make(generation, index);

    let cpu_id = crate::arch::x86_64::smp::current_cpu_id();
    let env = slot(index);
    inner.free_head = env.next_free;
    *env = Env {
        id,
        parent_id,
        state: EnvState::Runnable,
        env_type: EnvType::Normal,
        runs: 0,
        root,
        saved_frame: TrapFrame::new_user(cpu_id),
        pgfault_upcall: 0,
        ipc_recving: false,
        ipc_from: EnvId(0),
        ipc_value: 0,
        ipc_dstva: 0,
        ipc_perm: 0,
        running_on: None,
        next_free: FREE_LIST_END,
    };
    sync_user_view(index);
    Ok(id)
}

/// `create(image_bytes, type)` (spec.md §4.4): allocate, load the ELF
/// image's loadable segments into the new address space, map one user
/// stack page, set the entry point.
pub fn create(image: &[u8], env_type: EnvType) -> KernelResult<EnvId> {
    let id = alloc(current().unwrap_or(EnvId::NONE))?;
    let root = get(id)?.root;

    let entry = crate::elf::load_into(image, root).map_err(|_| KernelError::InvalidArgument {
        name: "image",
        value: "malformed ELF image",
    })?;

    let stack_frame = crate::mm::frame::FRAME_ALLOCATOR
        .alloc(true)
        .map_err(|_| KernelError::OutOfMemory {
            requested: mm::PAGE_SIZE as usize,
            available: 0,
        })?;
    crate::mm::paging::map(
        root,
        VirtAddr::new(mm::USTACKTOP - mm::PAGE_SIZE),
        stack_frame,
        crate::mm::PageFlags::USER | crate::mm::PageFlags::WRITABLE,
    )
    .map_err(|_| KernelError::OutOfMemory {
        requested: mm::PAGE_SIZE as usize,
        available: 0,
    })?;

    let _guard = TABLE.lock();
    let env = slot(id.index());
    env.saved_frame.rip = entry;
    if matches!(env_type, EnvType::Fs) {
        env.saved_frame.rflags |= 3 << 12; // IOPL = 3
    }
    env.env_type = env_type;
    Ok(id)
}

/// `free(env)` (spec.md §4.4): tear down the address space, push the slot
/// back on the free list with state FREE. If the freed environment is the
/// local CPU's current one, the caller is responsible for entering the
/// scheduler afterward (spec.md says so explicitly; this function only
/// does the bookkeeping).
pub fn free(id: EnvId) {
    let index = id.index();
    vas::free_space(slot(index).root);

    let mut inner = TABLE.lock();
    let env = slot(index);
    env.state = EnvState::Free;
    env.next_free = inner.free_head;
    inner.free_head = index as u32;
    sync_user_view(index);

    let cpu_id = crate::arch::x86_64::smp::current_cpu_id();
    if CURRENT[cpu_id].load(core::sync::atomic::Ordering::Relaxed) == id.0 {
        CURRENT[cpu_id].store(0, core::sync::atomic::Ordering::Relaxed);
    }
}

/// `destroy(env)` (spec.md §4.4).
pub fn destroy(id: EnvId) {
    let index = id.index();
    if let Some(cpu) = slot(index).running_on {
        if cpu != crate::arch::x86_64::smp::current_cpu_id() {
            slot(index).state = EnvState::Dying;
            return;
        }
    }
    free(id);
}

/// `id_lookup(id, check_perm) → env | -BadEnv` (spec.md §4.4).
pub fn id_lookup(id: EnvId, check_perm: bool) -> KernelResult<EnvId> {
    if id == EnvId::NONE {
        return current().ok_or(KernelError::NotFound {
            resource: "environment",
            id: 0,
        });
    }
    let index = id.index();
    if index >= NENV {
        return Err(KernelError::NotFound {
            resource: "environment",
            id: id.0 as u64,
        });
    }
    let env = slot(index);
    if env.id.generation() != id.generation() || env.state == EnvState::Free {
        return Err(KernelError::NotFound {
            resource: "environment",
            id: id.0 as u64,
        });
    }
    if check_perm {
        let caller = current().ok_or(KernelError::NotFound {
            resource: "environment",
            id: 0,
        })?;
        if env.id != caller && env.parent_id != caller {
            return Err(KernelError::PermissionDenied {
                operation: "id_lookup",
            });
        }
    }
    Ok(env.id)
}

fn get(id: EnvId) -> KernelResult<&'static Env> {
    let index = id.index();
    let env = slot(index);
    if env.id != id {
        return Err(KernelError::NotFound {
            resource: "environment",
            id: id.0 as u64,
        });
    }
    Ok(env)
}

pub fn get_mut(id: EnvId) -> KernelResult<&'static mut Env> {
    let index = id.index();
    let env = slot(index);
    if env.id != id {
        return Err(KernelError::NotFound {
            resource: "environment",
            id: id.0 as u64,
        });
    }
    Ok(env)
}

pub fn state(id: EnvId) -> Option<EnvState> {
    get(id).ok().map(|e| e.state)
}

pub fn set_state(id: EnvId, s: EnvState) {
    if let Ok(env) = get_mut(id) {
        env.state = s;
        sync_user_view(id.index());
    }
}

/// Refresh `id`'s `UENVS` snapshot after a caller (the syscall layer's IPC
/// handlers) writes `ipc_*` fields directly rather than through
/// [`set_state`].
pub fn sync(id: EnvId) {
    sync_user_view(id.index());
}

pub fn set_saved_frame(id: EnvId, tf: TrapFrame) {
    if let Ok(env) = get_mut(id) {
        env.saved_frame = tf;
    }
}

/// This CPU's currently running environment, if any.
pub fn current() -> Option<EnvId> {
    let cpu_id = crate::arch::x86_64::smp::current_cpu_id();
    let raw = CURRENT[cpu_id].load(core::sync::atomic::Ordering::Relaxed);
    (raw != 0).then_some(EnvId(raw))
}

/// Mark `id` as RUNNING on this CPU. Called by the scheduler just before
/// resuming it.
pub fn set_current(id: EnvId) {
    let cpu_id = crate::arch::x86_64::smp::current_cpu_id();
    CURRENT[cpu_id].store(id.0, core::sync::atomic::Ordering::Relaxed);
    if let Ok(env) = get_mut(id) {
        env.state = EnvState::Running;
        env.running_on = Some(cpu_id);
        env.runs += 1;
    }
}

/// Iterate every non-free slot starting just after `after` (exclusive),
/// wrapping once. Used by the scheduler's round-robin scan (spec.md §4.7).
pub fn iter_from(after: usize) -> impl Iterator<Item = usize> {
    (1..=NENV).map(move |i| (after + i) % NENV)
}

pub fn env_at(index: usize) -> Option<&'static Env> {
    let env = slot(index);
    (env.state != EnvState::Free).then_some(&*env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_id_round_trips_generation_and_index() {
        let id = EnvId::make(7, 42);
        assert_eq!(id.generation(), 7);
        assert_eq!(id.index(), 42);
    }
}
