//! Kernel-wide error type, used at the boundary between a subsystem's own
//! narrow error enum (`mm::paging::PagingError`, `mm::frame::FrameAllocatorError`,
//! ...) and a caller that needs one uniform type to propagate with `?`.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    OutOfMemory {
        requested: usize,
        available: usize,
    },
    ResourceExhausted {
        resource: &'static str,
    },
    InvalidArgument {
        name: &'static str,
        value: &'static str,
    },
    PermissionDenied {
        operation: &'static str,
    },
    AlreadyExists {
        resource: &'static str,
        id: u64,
    },
    NotFound {
        resource: &'static str,
        id: u64,
    },
    NotInitialized {
        subsystem: &'static str,
    },
    Timeout {
        operation: &'static str,
        duration_ms: u64,
    },
}

pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "out of memory: requested {} bytes, {} available",
                requested, available
            ),
            Self::ResourceExhausted { resource } => write!(f, "resource exhausted: {}", resource),
            Self::InvalidArgument { name, value } => {
                write!(f, "invalid argument '{}': {}", name, value)
            }
            Self::PermissionDenied { operation } => {
                write!(f, "permission denied for operation: {}", operation)
            }
            Self::AlreadyExists { resource, id } => {
                write!(f, "{} with id {} already exists", resource, id)
            }
            Self::NotFound { resource, id } => write!(f, "{} with id {} not found", resource, id),
            Self::NotInitialized { subsystem } => {
                write!(f, "subsystem not initialized: {}", subsystem)
            }
            Self::Timeout {
                operation,
                duration_ms,
            } => write!(f, "timeout during {}: {} ms", operation, duration_ms),
        }
    }
}
