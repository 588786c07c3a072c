//! IPC send/receive handshake smoke test.
//!
//! Exercises the permission-mask plumbing the `ipc_try_send`/`ipc_recv`
//! syscalls share with `page_map` (spec.md's IPC section), at the level
//! reachable before `mm::init` runs -- see `cow_fork.rs` for why the
//! standalone test binaries stop there.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use helios_kernel::mm::PageFlags;
use helios_kernel::{exit_qemu, serial_println, test_panic_handler, EnvId, QemuExitCode};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("Starting ipc_ping_pong tests...");

    test_zero_perm_means_no_page_transfer();
    test_shared_page_perm_round_trips();
    test_not_receiving_target_is_distinct_id();

    serial_println!("All tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

fn test_zero_perm_means_no_page_transfer() {
    // `ipc_try_send`'s value-only path signals "no page attached" with
    // perm == 0; that must not validate as a real mapping permission.
    assert!(PageFlags::validate_user_perm(0).is_err());
}

fn test_shared_page_perm_round_trips() {
    let sent = PageFlags::USER | PageFlags::PRESENT | PageFlags::WRITABLE;
    let got = PageFlags::validate_user_perm(sent.bits()).expect("sender's perm was valid");
    assert_eq!(got, sent);
}

fn test_not_receiving_target_is_distinct_id() {
    let sender = EnvId(5);
    let receiver = EnvId(6);
    assert_ne!(sender, receiver);
}
