//! Firmware-backed DMA memory regions.

use core::marker::PhantomData;
use core::mem;
use core::ptr;

use crate::error::{DmaError, Result};
use crate::mailbox::{Mailbox, MemFlags};

use super::{bus_to_phys, page_align, PhysMapping, PAGE_SIZE};

/// A physically contiguous, DMA-capable memory region.
///
/// A region carries three mutually consistent address coordinates for the
/// same pages: the firmware handle that owns them, the bus address the
/// DMA engine uses, and the virtual pointer the CPU uses. It is created
/// allocate→lock→map and destroyed in the exact reverse order.
pub struct DmaRegion {
    mapping: Option<PhysMapping>,
    bus: u32,
    handle: u32,
    len: usize,
}

impl DmaRegion {
    /// Acquire a region of at least `size` bytes from the firmware.
    ///
    /// The size is rounded up to the page granularity before the
    /// allocation request. On any failure the firmware side is unwound
    /// (nothing stays locked or allocated) and no region value exists, so
    /// a partially initialized region is never observable.
    pub fn allocate(mbox: &Mailbox, size: usize, flags: MemFlags) -> Result<Self> {
        let len = page_align(size);
        let handle = mbox.alloc(len as u32, PAGE_SIZE as u32, flags)?;

        let bus = match mbox.lock(handle) {
            Ok(bus) => bus,
            Err(err) => {
                let _ = mbox.release(handle);
                return Err(err);
            }
        };

        let mapping = match PhysMapping::map(bus_to_phys(bus) as u64, len) {
            Ok(mapping) => mapping,
            Err(err) => {
                let _ = mbox.unlock(handle);
                let _ = mbox.release(handle);
                return Err(err);
            }
        };

        log::debug!(
            "firmware region: {len} bytes, handle {handle:#x}, bus {bus:#010x}, virt {:p}",
            mapping.as_ptr()
        );
        Ok(Self {
            mapping: Some(mapping),
            bus,
            handle,
            len,
        })
    }

    /// Release the region: unmap, unlock, then return the pages to the
    /// firmware pool.
    ///
    /// Calling `free` on an already-freed region is a no-op. Firmware
    /// errors during teardown are logged and skipped; teardown never
    /// retries and never stops halfway.
    pub fn free(&mut self, mbox: &Mailbox) {
        let Some(mapping) = self.mapping.take() else {
            return;
        };
        // Unmap while the pages are still in the firmware's books.
        drop(mapping);

        match mbox.unlock(self.handle) {
            Ok(0) => {}
            Ok(status) => log::warn!("unlock of handle {:#x} returned {status}", self.handle),
            Err(err) => log::warn!("unlock of handle {:#x} failed: {err}", self.handle),
        }
        match mbox.release(self.handle) {
            Ok(0) => {}
            Ok(status) => log::warn!("release of handle {:#x} returned {status}", self.handle),
            Err(err) => log::warn!("release of handle {:#x} failed: {err}", self.handle),
        }
        log::debug!("released firmware region, handle {:#x}", self.handle);
    }

    /// Whether the region currently owns live memory.
    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.mapping.is_some()
    }

    /// Bus address of the first byte, as seen by the DMA engine.
    #[inline]
    pub fn bus_addr(&self) -> u32 {
        self.bus
    }

    /// Region length in bytes (page-rounded).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region covers zero bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrow a bounds-checked view for indexed slot access.
    ///
    /// # Panics
    ///
    /// Panics if the region has been freed.
    pub fn view(&self) -> RegionView<'_> {
        let mapping = self
            .mapping
            .as_ref()
            .expect("view of freed region");
        RegionView {
            ptr: mapping.as_ptr(),
            bus: self.bus,
            len: self.len,
            _lifetime: PhantomData,
        }
    }
}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        if self.mapping.is_some() {
            log::warn!(
                "region with handle {:#x} dropped while still locked by firmware",
                self.handle
            );
        }
    }
}

/// Borrowed view of a region's memory with indexed, bounds-checked slot
/// access.
///
/// Slot addresses — virtual for CPU writes, bus for descriptor links —
/// are derived from an element index rather than raw pointer arithmetic,
/// so an out-of-range descriptor write is an error instead of a stray
/// store into neighboring pages.
#[derive(Clone, Copy)]
pub struct RegionView<'a> {
    ptr: *mut u8,
    bus: u32,
    len: usize,
    _lifetime: PhantomData<&'a ()>,
}

impl<'a> RegionView<'a> {
    /// Build a view over caller-owned memory.
    ///
    /// The normal path is [`DmaRegion::view`]; this constructor exists
    /// for layouts staged in ordinary memory.
    ///
    /// # Safety
    ///
    /// `ptr..ptr + len` must be readable and writable for `'a`, aligned
    /// for every slot type used through the view, and `bus` must be the
    /// hardware-visible address of `ptr` if descriptors derived from this
    /// view are ever handed to the DMA engine.
    pub unsafe fn from_raw_parts(ptr: *mut u8, bus: u32, len: usize) -> Self {
        Self {
            ptr,
            bus,
            len,
            _lifetime: PhantomData,
        }
    }

    /// Bus address of the first byte.
    #[inline]
    pub fn bus_addr(&self) -> u32 {
        self.bus
    }

    /// View length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the view covers zero bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of `T`-sized slots the view holds.
    #[inline]
    pub fn slot_count<T>(&self) -> usize {
        self.len / mem::size_of::<T>()
    }

    /// Byte offset of slot `index`, verified to lie inside the view.
    fn slot_offset<T>(&self, index: usize) -> Result<usize> {
        let size = mem::size_of::<T>();
        let offset = index
            .checked_mul(size)
            .ok_or(DmaError::RegionTooSmall {
                len: self.len,
                required: usize::MAX,
            })?;
        let end = offset + size;
        if end > self.len {
            return Err(DmaError::RegionTooSmall {
                len: self.len,
                required: end,
            });
        }
        Ok(offset)
    }

    /// Bus address of slot `index`.
    pub fn slot_bus_addr<T>(&self, index: usize) -> Result<u32> {
        Ok(self.bus + self.slot_offset::<T>(index)? as u32)
    }

    /// Write `value` into slot `index`.
    ///
    /// The store is volatile: slots live in memory the DMA engine reads
    /// behind the compiler's back.
    pub fn write_slot<T>(&self, index: usize, value: T) -> Result<()> {
        let offset = self.slot_offset::<T>(index)?;
        // SAFETY: offset + size_of::<T>() <= len, and the view's
        // constructor guarantees the range is writable and aligned
        unsafe { ptr::write_volatile(self.ptr.add(offset).cast::<T>(), value) };
        Ok(())
    }

    /// Read slot `index`.
    pub fn read_slot<T: Copy>(&self, index: usize) -> Result<T> {
        let offset = self.slot_offset::<T>(index)?;
        // SAFETY: offset + size_of::<T>() <= len, readable and aligned
        // per the constructor contract
        Ok(unsafe { ptr::read_volatile(self.ptr.add(offset).cast::<T>()) })
    }

    /// Read the first `count` `T`-slots into a vector.
    pub fn read_slots<T: Copy>(&self, count: usize) -> Result<Vec<T>> {
        (0..count).map(|i| self.read_slot(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_view(backing: &mut [u32], bus: u32) -> RegionView<'_> {
        let len = backing.len() * 4;
        // SAFETY: backing is live and writable for the borrow, u32-aligned
        unsafe { RegionView::from_raw_parts(backing.as_mut_ptr().cast(), bus, len) }
    }

    #[test]
    fn slot_addresses_scale_by_element_size() {
        let mut backing = [0u32; 16];
        let view = fake_view(&mut backing, 0x4000_0000);
        assert_eq!(view.slot_bus_addr::<u32>(0).unwrap(), 0x4000_0000);
        assert_eq!(view.slot_bus_addr::<u32>(3).unwrap(), 0x4000_000C);
        assert_eq!(view.slot_count::<u32>(), 16);
    }

    #[test]
    fn out_of_range_slot_is_rejected() {
        let mut backing = [0u32; 4];
        let view = fake_view(&mut backing, 0x4000_0000);
        assert!(view.slot_bus_addr::<u32>(3).is_ok());
        let err = view.slot_bus_addr::<u32>(4).unwrap_err();
        assert!(matches!(
            err,
            DmaError::RegionTooSmall {
                len: 16,
                required: 20
            }
        ));
        assert!(view.write_slot(4, 0u32).is_err());
    }

    #[test]
    fn slot_write_read_round_trip() {
        let mut backing = [0u32; 8];
        let view = fake_view(&mut backing, 0x4000_0000);
        view.write_slot(2, 0xDEAD_BEEFu32).unwrap();
        assert_eq!(view.read_slot::<u32>(2).unwrap(), 0xDEAD_BEEF);
        assert_eq!(backing[2], 0xDEAD_BEEF);
    }

    #[test]
    fn read_slots_collects_in_order() {
        let mut backing = [10u32, 20, 30, 40];
        let view = fake_view(&mut backing, 0);
        assert_eq!(view.read_slots::<u32>(3).unwrap(), vec![10, 20, 30]);
        assert!(view.read_slots::<u32>(5).is_err());
    }
}
