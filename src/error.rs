//! Error types for firmware memory and DMA channel operations.

use std::io;

use thiserror::Error;

/// DMA operation result type
pub type Result<T> = core::result::Result<T, DmaError>;

/// Failures raised by the memory-acquisition and channel-control paths.
///
/// Allocation-path errors propagate to the caller; there is no retry
/// policy anywhere in this crate. Firmware memory exhaustion and physical
/// mapping failure are not transient conditions.
#[derive(Debug, Error)]
pub enum DmaError {
    /// A privileged device file could not be opened
    #[error("failed to open {path}: {source}")]
    DeviceOpen {
        /// Device file path
        path: &'static str,
        /// Underlying errno
        #[source]
        source: io::Error,
    },
    /// The mailbox ioctl returned a negative status
    #[error("mailbox property call failed with status {status}")]
    ControlCall {
        /// Raw ioctl return value
        status: i32,
    },
    /// Firmware returned a zero handle for an allocation request
    #[error("firmware refused to allocate {size} bytes")]
    AllocationFailed {
        /// Requested size in bytes (page-rounded)
        size: u32,
    },
    /// Firmware returned a zero bus address when locking a handle
    #[error("firmware refused to lock memory handle {handle:#x}")]
    LockFailed {
        /// Firmware memory handle
        handle: u32,
    },
    /// mmap of a physical range failed
    #[error("mmap of physical range {base:#010x}+{len:#x} failed: {source}")]
    Map {
        /// Physical base address of the attempted mapping
        base: u64,
        /// Requested length in bytes
        len: usize,
        /// Underlying errno
        #[source]
        source: io::Error,
    },
    /// A property-list request exceeded the fixed word capacity
    #[error("property list request exceeds buffer capacity")]
    PropertyOverflow,
    /// An indexed slot access fell outside its region
    #[error("region of {len} bytes cannot hold {required} bytes")]
    RegionTooSmall {
        /// Region length in bytes
        len: usize,
        /// Bytes required by the access
        required: usize,
    },
    /// A control-block region violated the hardware alignment rule
    #[error("bus address {addr:#010x} is not {align}-byte aligned")]
    Misaligned {
        /// Offending bus address
        addr: u32,
        /// Required alignment
        align: usize,
    },
    /// A ring of zero control blocks was requested
    #[error("ring must contain at least one control block")]
    EmptyRing,
    /// A channel index outside the controller's range
    #[error("DMA channel {channel} out of range")]
    InvalidChannel {
        /// Requested channel index
        channel: u8,
    },
}
