pub mod x86_64;

pub use x86_64::*;

// Common timestamp source (RDTSC), used by the test/bench harness.
pub mod entropy;
