//! Virtual mappings of physical address ranges via `/dev/mem`.

use std::io;
use std::ptr;

use crate::error::{DmaError, Result};

use super::page_offset;

const MEM_DEVICE: &str = "/dev/mem";

/// A live virtual mapping of a physical address range.
///
/// `/dev/mem` mappings must start on a page boundary, so the requested
/// base is aligned down and the mapping padded by the page offset; the
/// pointer handed back is adjusted so it lines up with the caller's
/// logical base. Dropping the mapping recomputes the same offset from the
/// stored pointer and unmaps exactly the padded range.
pub struct PhysMapping {
    ptr: *mut u8,
    len: usize,
}

impl PhysMapping {
    /// Map `len` bytes of physical memory starting at `phys_base`.
    ///
    /// `phys_base` does not need to be page-aligned. The returned mapping
    /// is read-write and shared, with `O_SYNC` semantics so peripheral
    /// registers behave as device memory.
    pub fn map(phys_base: u64, len: usize) -> Result<Self> {
        let offset = page_offset(phys_base as usize);
        let map_base = phys_base - offset as u64;
        let map_len = len + offset;

        let fd = unsafe { libc::open(c"/dev/mem".as_ptr(), libc::O_RDWR | libc::O_SYNC) };
        if fd < 0 {
            return Err(DmaError::DeviceOpen {
                path: MEM_DEVICE,
                source: io::Error::last_os_error(),
            });
        }

        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                map_base as libc::off_t,
            )
        };
        let mmap_err = io::Error::last_os_error();
        unsafe { libc::close(fd) };

        if mem == libc::MAP_FAILED {
            return Err(DmaError::Map {
                base: phys_base,
                len,
                source: mmap_err,
            });
        }

        log::debug!(
            "mapped phys {phys_base:#010x}+{len:#x} at {mem:p} (page offset {offset})"
        );
        // SAFETY: mmap returned map_len >= offset bytes starting at mem
        let ptr = unsafe { mem.cast::<u8>().add(offset) };
        Ok(Self { ptr, len })
    }

    /// CPU-visible pointer to the start of the requested range.
    ///
    /// Valid only for the lifetime of the mapping.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Length of the requested range in bytes (excluding alignment padding).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping covers zero bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for PhysMapping {
    fn drop(&mut self) {
        let offset = page_offset(self.ptr as usize);
        // SAFETY: ptr - offset is the page-aligned address mmap returned,
        // and len + offset is the exact length that was mapped
        let base = unsafe { self.ptr.sub(offset) };
        let rc = unsafe { libc::munmap(base.cast(), self.len + offset) };
        if rc != 0 {
            // Continuing with a half-released DMA-visible mapping risks
            // corrupting unrelated physical memory; treat as unrecoverable.
            log::error!(
                "munmap of {base:p}+{:#x} failed: {}",
                self.len + offset,
                io::Error::last_os_error()
            );
            std::process::abort();
        }
    }
}
