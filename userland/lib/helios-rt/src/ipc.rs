//! `ipc_send`/`ipc_recv` wrappers (C10), built on the raw `IpcTrySend`/
//! `IpcRecv` syscalls plus the read-only `UENVS` snapshot of this
//! environment's own record. Grounded on `original_source/lib/ipc.c`.

use crate::sys::{self, SysError};
use crate::this_env;

/// Retry `ipc_try_send` until the receiver is ready, yielding the CPU
/// between attempts rather than busy-spinning.
pub fn ipc_send(dst: u32, value: u64, src_va: u64, perm: u64) -> sys::Result<()> {
    loop {
        match sys::ipc_try_send(dst, value, src_va, perm) {
            Ok(()) => return Ok(()),
            Err(SysError::NotRecv) => sys::sys_yield(),
            Err(e) => return Err(e),
        }
    }
}

pub struct Received {
    pub value: u64,
    pub from: u32,
    pub perm: u32,
}

/// Block until a value arrives, then read it back out of this
/// environment's own `UENVS` slot (no syscall needed for that part: the
/// kernel already wrote it there before waking this environment up).
pub fn ipc_recv(dst_va: u64) -> Received {
    sys::ipc_recv(dst_va);
    let env = this_env();
    Received {
        value: env.ipc_value,
        from: env.ipc_from,
        perm: env.ipc_perm,
    }
}
