//! Hardware timestamp source, used by the test/bench harness for cycle-to-ns
//! conversions (`test_framework::read_timestamp`).

/// Read the CPU's Time Stamp Counter.
#[inline]
pub fn read_timestamp() -> u64 {
    // SAFETY: RDTSC is always available on x86_64 and returns the current
    // cycle count as u64.
    unsafe { core::arch::x86_64::_rdtsc() }
}
