//! Synchronization Primitives
//!
//! Safe synchronization and global state management for Rust 2024 edition.

pub mod big_lock;
pub mod once_lock;

pub use big_lock::{BigKernelLock, KERNEL_LOCK};
pub use once_lock::{GlobalState, LazyLock, OnceLock};
