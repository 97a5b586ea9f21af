//! Control blocks and the sampler ring layout.

use core::sync::atomic::{fence, Ordering};

use crate::error::{DmaError, Result};
use crate::mem::RegionView;

use super::{TransferInfo, SYST_CLO_BUS};

/// One DMA transfer descriptor.
///
/// BCM2711 datasheet Table 34. The engine fetches the block at
/// CONBLK_AD, performs the transfer it describes, then loads the block
/// at `next`; a zero `next` terminates the chain. The hardware requires
/// 32-byte alignment of every block's bus address.
#[repr(C, align(32))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlBlock {
    /// Transfer information bitfield
    pub ti: u32,
    /// Source bus address
    pub src: u32,
    /// Destination bus address
    pub dest: u32,
    /// Transfer length in bytes
    pub len: u32,
    /// 2D stride (unused in linear transfers)
    pub stride: u32,
    /// Bus address of the next control block, 32-byte aligned
    pub next: u32,
    _pad: [u32; 2],
}

impl ControlBlock {
    /// Required alignment of a block's bus address.
    pub const BUS_ALIGN: usize = 32;

    /// An all-zero block.
    pub const fn zeroed() -> Self {
        Self {
            ti: 0,
            src: 0,
            dest: 0,
            len: 0,
            stride: 0,
            next: 0,
            _pad: [0; 2],
        }
    }
}

// Table 34: eight 32-bit words, 32-byte aligned
const _: () = assert!(core::mem::size_of::<ControlBlock>() == 32);
const _: () = assert!(core::mem::align_of::<ControlBlock>() == 32);

/// Lay out `count` control blocks in `cbs` that continuously sample the
/// system timer low word into consecutive `u32` slots of `ticks`.
///
/// Block `i` copies 4 bytes from the timer register to tick slot `i` and
/// links to block `(i + 1) % count`, so the `next` fields form exactly
/// one cycle covering every block: once started, the engine laps the
/// ring forever with no CPU involvement.
///
/// Reading a live, frequently-changing register needs `WAIT_RESP` (no
/// overlapped reads of a moving target) and `NO_WIDE_BURSTS`; both are
/// set on every block.
///
/// This is a pure layout operation on already-mapped memory: both views
/// must be large enough for `count` elements and the control-block view
/// must satisfy the hardware alignment rule, otherwise nothing is
/// written.
pub fn build_sampler_ring(cbs: RegionView<'_>, ticks: RegionView<'_>, count: usize) -> Result<()> {
    if count == 0 {
        return Err(DmaError::EmptyRing);
    }
    if cbs.bus_addr() as usize % ControlBlock::BUS_ALIGN != 0 {
        return Err(DmaError::Misaligned {
            addr: cbs.bus_addr(),
            align: ControlBlock::BUS_ALIGN,
        });
    }
    // Validate both layouts up front so a partial ring is never written.
    cbs.slot_bus_addr::<ControlBlock>(count - 1)?;
    ticks.slot_bus_addr::<u32>(count - 1)?;

    let ti = TransferInfo::NO_WIDE_BURSTS | TransferInfo::WAIT_RESP;
    for i in 0..count {
        let block = ControlBlock {
            ti: ti.bits(),
            src: SYST_CLO_BUS,
            dest: ticks.slot_bus_addr::<u32>(i)?,
            len: 4,
            stride: 0,
            next: cbs.slot_bus_addr::<ControlBlock>((i + 1) % count)?,
            _pad: [0; 2],
        };
        cbs.write_slot(i, block)?;
    }
    // Publish the ring before any CONBLK_AD write hands it to hardware.
    fence(Ordering::Release);
    log::debug!("sampler ring built: {count} control blocks");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::RegionView;

    const CB_BUS: u32 = 0x4000_0000;
    const TICK_BUS: u32 = 0x4001_0000;

    fn views<'a>(
        cbs: &'a mut Vec<ControlBlock>,
        ticks: &'a mut Vec<u32>,
    ) -> (RegionView<'a>, RegionView<'a>) {
        let cb_len = cbs.len() * core::mem::size_of::<ControlBlock>();
        let tick_len = ticks.len() * 4;
        // SAFETY: both vectors are live and writable for the borrow;
        // ControlBlock's own alignment aligns the backing allocation
        unsafe {
            (
                RegionView::from_raw_parts(cbs.as_mut_ptr().cast(), CB_BUS, cb_len),
                RegionView::from_raw_parts(ticks.as_mut_ptr().cast(), TICK_BUS, tick_len),
            )
        }
    }

    #[test]
    fn ring_links_form_one_full_cycle() {
        const N: usize = 10;
        let mut cbs = vec![ControlBlock::zeroed(); N];
        let mut ticks = vec![0u32; N];
        let (cb_view, tick_view) = views(&mut cbs, &mut ticks);
        build_sampler_ring(cb_view, tick_view, N).unwrap();

        // follow `next` N times from block 0: back at block 0, every
        // block visited exactly once
        let mut visited = [false; N];
        let mut bus = CB_BUS;
        for _ in 0..N {
            let index = (bus - CB_BUS) as usize / 32;
            assert!(!visited[index], "block {index} linked twice");
            visited[index] = true;
            bus = cbs[index].next;
        }
        assert_eq!(bus, CB_BUS);
        assert!(visited.iter().all(|&v| v));
    }

    #[test]
    fn blocks_sample_timer_into_tick_slots() {
        const N: usize = 10;
        let mut cbs = vec![ControlBlock::zeroed(); N];
        let mut ticks = vec![0u32; N];
        let (cb_view, tick_view) = views(&mut cbs, &mut ticks);
        build_sampler_ring(cb_view, tick_view, N).unwrap();

        let ti = (TransferInfo::NO_WIDE_BURSTS | TransferInfo::WAIT_RESP).bits();
        for (i, cb) in cbs.iter().enumerate() {
            assert_eq!(cb.ti, ti);
            assert_eq!(cb.src, SYST_CLO_BUS);
            assert_eq!(cb.dest, TICK_BUS + (i as u32) * 4);
            assert_eq!(cb.len, 4);
            assert_eq!(cb.stride, 0);
        }
    }

    #[test]
    fn single_block_ring_links_to_itself() {
        let mut cbs = vec![ControlBlock::zeroed(); 1];
        let mut ticks = vec![0u32; 1];
        let (cb_view, tick_view) = views(&mut cbs, &mut ticks);
        build_sampler_ring(cb_view, tick_view, 1).unwrap();
        assert_eq!(cbs[0].next, CB_BUS);
    }

    #[test]
    fn empty_ring_is_rejected() {
        let mut cbs = vec![ControlBlock::zeroed(); 1];
        let mut ticks = vec![0u32; 1];
        let (cb_view, tick_view) = views(&mut cbs, &mut ticks);
        assert!(matches!(
            build_sampler_ring(cb_view, tick_view, 0),
            Err(DmaError::EmptyRing)
        ));
    }

    #[test]
    fn undersized_regions_leave_memory_untouched() {
        let mut cbs = vec![ControlBlock::zeroed(); 4];
        let mut ticks = vec![0u32; 4];
        {
            let (cb_view, tick_view) = views(&mut cbs, &mut ticks);
            assert!(matches!(
                build_sampler_ring(cb_view, tick_view, 5),
                Err(DmaError::RegionTooSmall { .. })
            ));
        }
        assert!(cbs.iter().all(|cb| *cb == ControlBlock::zeroed()));
    }

    #[test]
    fn misaligned_control_block_region_is_rejected() {
        let mut cbs = vec![ControlBlock::zeroed(); 2];
        let mut ticks = vec![0u32; 2];
        let cb_len = cbs.len() * 32;
        // bus address off the 32-byte grid
        let cb_view = unsafe {
            RegionView::from_raw_parts(cbs.as_mut_ptr().cast(), CB_BUS + 4, cb_len)
        };
        let tick_view =
            unsafe { RegionView::from_raw_parts(ticks.as_mut_ptr().cast(), TICK_BUS, 8) };
        assert!(matches!(
            build_sampler_ring(cb_view, tick_view, 2),
            Err(DmaError::Misaligned { addr, align: 32 }) if addr == CB_BUS + 4
        ));
    }
}
