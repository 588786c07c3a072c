//! Scheduler bookkeeping smoke test.
//!
//! `sched::yield_cpu` itself needs a live environment table and address
//! space to resume into, so it is covered by the `#[cfg(test)]` unit test
//! next to it; this binary checks the per-CPU state it starts from.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use helios_kernel::{exit_qemu, serial_println, test_panic_handler, EnvId, QemuExitCode};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("Starting scheduler_yield tests...");

    test_env_ids_distinguish_index_from_generation();

    serial_println!("All tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

fn test_env_ids_distinguish_index_from_generation() {
    // Circular rescans in `yield_cpu` key off `EnvId::index`; two ids at
    // the same slot from different generations must never compare equal.
    let first_tenant = EnvId(1024); // index 0, generation 1
    let second_tenant = EnvId(2048); // index 0, generation 2
    assert_eq!(first_tenant.index(), second_tenant.index());
    assert_ne!(first_tenant, second_tenant);
}
