//! VideoCore firmware mailbox property channel.
//!
//! The firmware owns a pool of physically contiguous, DMA-capable memory.
//! Four property operations manage it: allocate returns an opaque handle,
//! lock pins the allocation and returns its bus address, unlock and
//! release undo those steps. Each operation is a flat little-endian
//! 32-bit-word request sent over a single ioctl to `/dev/vcio`; the
//! firmware overwrites the buffer in place and the operation's result
//! sits at a fixed word offset in the reply.
//!
//! Reference: <https://github.com/raspberrypi/firmware/wiki/Mailbox-property-interface>

use std::io;
use std::os::unix::io::RawFd;

use bitflags::bitflags;

use crate::error::{DmaError, Result};

const VCIO_DEVICE: &str = "/dev/vcio";

/// Character-device major number of the mailbox driver.
const VCIO_MAJOR: u64 = 100;

/// ioctl request for a property call: `_IOWR(VCIO_MAJOR, 0, char *)`.
///
/// The size field encodes the width of `char *`, so the value differs
/// between 32-bit and 64-bit userlands; computing it from the host
/// pointer width keeps both Raspberry Pi OS variants working.
const MBOX_PROPERTY: u64 = {
    const IOC_WRITE: u64 = 1;
    const IOC_READ: u64 = 2;
    ((IOC_READ | IOC_WRITE) << 30)
        | ((core::mem::size_of::<*mut libc::c_char>() as u64) << 16)
        | (VCIO_MAJOR << 8)
};

/// Property tag: allocate contiguous memory, returns a handle.
const TAG_ALLOCATE: u32 = 0x3000c;
/// Property tag: lock a handle in place, returns its bus address.
const TAG_LOCK: u32 = 0x3000d;
/// Property tag: unlock a locked handle.
const TAG_UNLOCK: u32 = 0x3000e;
/// Property tag: release an allocation.
const TAG_RELEASE: u32 = 0x3000f;

/// Marker word identifying an outbound request.
const PROCESS_REQUEST: u32 = 0;
/// Terminator for the tag sequence.
const END_TAG: u32 = 0;
/// Word index of the operation result in the firmware's reply.
const RESULT_WORD: usize = 5;

/// Capacity of a property request, in 32-bit words.
const PROPERTY_WORDS: usize = 32;

const WORD_BYTES: usize = core::mem::size_of::<u32>();

bitflags! {
    /// Allocation flags for firmware memory.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemFlags: u32 {
        /// Allocation appears at the 0xC... uncached bus alias.
        const DIRECT = 1 << 2;
        /// Allocation appears at the 0x8... non-allocating bus alias.
        const COHERENT = 2 << 2;
        /// Uncached from the ARM side, L1 non-allocating from the GPU side.
        /// The right choice for buffers a DMA engine writes behind the
        /// CPU's back.
        const L1_NONALLOCATING = Self::DIRECT.bits() | Self::COHERENT.bits();
    }
}

/// One encoded property-list request.
///
/// The wire framing is `[total_size, request_code, tag, value_len,
/// request_len, ...args.., end_tag]`; the total byte size is patched into
/// word 0 once the list is complete. Capacity is checked on every push,
/// so an oversized request fails at construction rather than smashing a
/// stack buffer.
#[derive(Debug)]
struct PropertyList {
    words: heapless::Vec<u32, PROPERTY_WORDS>,
}

impl PropertyList {
    fn request(tag: u32, args: &[u32]) -> Result<Self> {
        let mut list = Self {
            words: heapless::Vec::new(),
        };
        let arg_bytes = (args.len() * WORD_BYTES) as u32;
        list.push(0)?; // total size, patched below
        list.push(PROCESS_REQUEST)?;
        list.push(tag)?;
        list.push(arg_bytes)?; // value buffer size
        list.push(arg_bytes)?; // request data size
        for &arg in args {
            list.push(arg)?;
        }
        list.push(END_TAG)?;
        list.words[0] = (list.words.len() * WORD_BYTES) as u32;
        Ok(list)
    }

    fn push(&mut self, word: u32) -> Result<()> {
        self.words
            .push(word)
            .map_err(|_| DmaError::PropertyOverflow)
    }

    /// Operation result from the firmware's in-place reply.
    fn result(&self) -> u32 {
        self.words[RESULT_WORD]
    }

    fn as_mut_ptr(&mut self) -> *mut u32 {
        self.words.as_mut_ptr()
    }

    fn trace_dump(&self) {
        if log::log_enabled!(log::Level::Trace) {
            for (i, word) in self.words.iter().enumerate() {
                log::trace!("{:04x}: {word:#010x}", i * WORD_BYTES);
            }
        }
    }
}

/// An open property channel to the VideoCore firmware.
///
/// One channel is opened per [`DmaSampler`](crate::DmaSampler) and reused
/// for every memory operation in the process; each call blocks
/// synchronously on the firmware round-trip.
pub struct Mailbox {
    fd: RawFd,
}

impl Mailbox {
    /// Open the mailbox character device.
    pub fn open() -> Result<Self> {
        let fd = unsafe { libc::open(c"/dev/vcio".as_ptr(), libc::O_RDONLY) };
        if fd < 0 {
            return Err(DmaError::DeviceOpen {
                path: VCIO_DEVICE,
                source: io::Error::last_os_error(),
            });
        }
        Ok(Self { fd })
    }

    /// Allocate `size` bytes of contiguous firmware memory.
    ///
    /// Returns the opaque handle. The memory is not bus-addressable until
    /// [`lock`](Self::lock) pins it.
    pub fn alloc(&self, size: u32, align: u32, flags: MemFlags) -> Result<u32> {
        let handle = self.property_call(TAG_ALLOCATE, &[size, align, flags.bits()])?;
        if handle == 0 {
            return Err(DmaError::AllocationFailed { size });
        }
        Ok(handle)
    }

    /// Pin an allocation and return its bus address.
    pub fn lock(&self, handle: u32) -> Result<u32> {
        let bus = self.property_call(TAG_LOCK, &[handle])?;
        if bus == 0 {
            return Err(DmaError::LockFailed { handle });
        }
        Ok(bus)
    }

    /// Unpin a locked allocation. Returns the firmware status word
    /// (zero on success).
    pub fn unlock(&self, handle: u32) -> Result<u32> {
        self.property_call(TAG_UNLOCK, &[handle])
    }

    /// Return an allocation to the firmware pool. Returns the firmware
    /// status word (zero on success).
    pub fn release(&self, handle: u32) -> Result<u32> {
        self.property_call(TAG_RELEASE, &[handle])
    }

    fn property_call(&self, tag: u32, args: &[u32]) -> Result<u32> {
        let mut list = PropertyList::request(tag, args)?;
        // SAFETY: fd is the open mailbox device and the buffer holds a
        // complete property list with its true byte length in word 0
        let rc = unsafe { libc::ioctl(self.fd, MBOX_PROPERTY as _, list.as_mut_ptr()) };
        if rc < 0 {
            log::warn!(
                "mailbox ioctl for tag {tag:#x} failed: {} (status {rc})",
                io::Error::last_os_error()
            );
            return Err(DmaError::ControlCall { status: rc });
        }
        list.trace_dump();
        Ok(list.result())
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_request_framing() {
        let list = PropertyList::request(TAG_ALLOCATE, &[4096, 4096, 0xC]).unwrap();
        let words = &list.words;
        assert_eq!(words.len(), 9);
        assert_eq!(words[0], 36); // total byte size
        assert_eq!(words[1], PROCESS_REQUEST);
        assert_eq!(words[2], TAG_ALLOCATE);
        assert_eq!(words[3], 12); // three argument words
        assert_eq!(words[4], 12);
        assert_eq!(words[5], 4096);
        assert_eq!(words[6], 4096);
        assert_eq!(words[7], 0xC);
        assert_eq!(words[8], END_TAG);
    }

    #[test]
    fn result_reads_first_argument_slot() {
        let mut list = PropertyList::request(TAG_LOCK, &[0x1000]).unwrap();
        assert_eq!(list.words.len(), 7);
        assert_eq!(list.words[0], 28);
        // the reply overwrites the buffer in place; the result occupies
        // the first argument slot
        list.words[RESULT_WORD] = 0x4000_0000;
        assert_eq!(list.result(), 0x4000_0000);
    }

    #[test]
    fn oversized_request_is_rejected() {
        let args = [0u32; PROPERTY_WORDS];
        let err = PropertyList::request(TAG_ALLOCATE, &args).unwrap_err();
        assert!(matches!(err, DmaError::PropertyOverflow));
    }

    #[test]
    fn ioctl_request_encoding() {
        // _IOWR(100, 0, char *): dir=3, type=100, nr=0, size=sizeof(char *)
        let expected = 0xC000_6400u64 | ((core::mem::size_of::<usize>() as u64) << 16);
        assert_eq!(MBOX_PROPERTY, expected);
    }

    #[test]
    fn mem_flag_values() {
        assert_eq!(MemFlags::DIRECT.bits(), 0x4);
        assert_eq!(MemFlags::COHERENT.bits(), 0x8);
        assert_eq!(MemFlags::L1_NONALLOCATING.bits(), 0xC);
    }
}
