//! x86_64 serial port driver for kernel debugging output.
//!
//! Uses the `uart_16550` crate to interface with COM1 at I/O port 0x3F8.
//! Provides `serial_print!` and `serial_println!` macros for formatted output.

use lazy_static::lazy_static;
use spin::Mutex;
use uart_16550::SerialPort;

lazy_static! {
    pub static ref SERIAL1: Mutex<SerialPort> = {
        let mut serial_port = unsafe { SerialPort::new(0x3F8) };
        serial_port.init();
        Mutex::new(serial_port)
    };
}

#[doc(hidden)]
pub fn _print(args: ::core::fmt::Arguments) {
    use core::fmt::Write;

    use x86_64::instructions::interrupts;

    interrupts::without_interrupts(|| {
        SERIAL1
            .lock()
            .write_fmt(args)
            .expect("Printing to serial failed");
    });
}

// Alias for compatibility
#[doc(hidden)]
pub fn _serial_print(args: ::core::fmt::Arguments) {
    _print(args);
}

const COM1_BASE: u16 = 0x3F8;
const LSR_OFFSET: u16 = 5;
const LSR_DATA_READY: u8 = 1 << 0;

/// Write one byte to the console, blocking until the UART accepts it.
/// Backs `sys_cputs` (spec.md §4.9).
pub fn write_byte(byte: u8) {
    use x86_64::instructions::interrupts;
    interrupts::without_interrupts(|| {
        SERIAL1.lock().send(byte);
    });
}

/// Non-blocking console read; `None` if nothing is waiting. Backs
/// `sys_cgetc`.
pub fn try_read_byte() -> Option<u8> {
    use x86_64::instructions::{interrupts, port::Port};

    interrupts::without_interrupts(|| {
        // SAFETY: polling the standard COM1 line-status and data registers;
        // both are read-only status/data ports, no side effect beyond
        // consuming one pending byte.
        unsafe {
            let mut lsr = Port::<u8>::new(COM1_BASE + LSR_OFFSET);
            if lsr.read() & LSR_DATA_READY == 0 {
                return None;
            }
            let mut data = Port::<u8>::new(COM1_BASE);
            Some(data.read())
        }
    })
}
