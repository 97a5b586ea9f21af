//! Hardware-independent checks of the public sampler surface.
//!
//! Everything that touches `/dev/mem` or `/dev/vcio` is exercised by the
//! `timer_sampler` demo on a real board; these tests pin down the layout
//! and translation contracts that must hold before the hardware is ever
//! touched.

use bcm2711_dma::dma::{self, ControlBlock, ControlStatus, DmaChannel, TransferInfo};
use bcm2711_dma::mem;
use bcm2711_dma::{DmaError, MemFlags};

#[test]
fn control_block_matches_hardware_layout() {
    // Table 34: eight words, 32-byte aligned for the CONBLK_AD/next fields
    assert_eq!(core::mem::size_of::<ControlBlock>(), 32);
    assert_eq!(core::mem::align_of::<ControlBlock>(), 32);
    assert_eq!(ControlBlock::BUS_ALIGN, 32);
}

#[test]
fn sampler_transfer_flags() {
    let ti = TransferInfo::NO_WIDE_BURSTS | TransferInfo::WAIT_RESP;
    assert_eq!(ti.bits(), (1 << 26) | (1 << 3));
}

#[test]
fn engine_control_bits() {
    assert_eq!(ControlStatus::RESET.bits(), 1 << 31);
    assert_eq!(ControlStatus::ABORT.bits(), 1 << 30);
    assert_eq!(ControlStatus::DISDEBUG.bits(), 1 << 29);
    assert_eq!(ControlStatus::WAIT_FOR_OUTSTANDING_WRITES.bits(), 1 << 28);
    assert_eq!(ControlStatus::INT.bits(), 1 << 2);
    assert_eq!(ControlStatus::END.bits(), 1 << 1);
    assert_eq!(ControlStatus::ACTIVE.bits(), 1 << 0);
}

#[test]
fn timer_source_is_fixed_bus_address() {
    assert_eq!(dma::SYST_CLO_BUS, 0x7E00_3004);
    assert_eq!(dma::PERI_PHYS_BASE + dma::DMA_BASE_OFFSET, 0xFE00_7000);
}

#[test]
fn page_rounding_covers_descriptor_rings() {
    // a 10-block ring plus its tick buffer each fit one page
    assert_eq!(mem::page_align(10 * core::mem::size_of::<ControlBlock>()), 4096);
    assert_eq!(mem::page_align(10 * 4), 4096);
    assert_eq!(mem::page_align(4096), 4096);
}

#[test]
fn bus_physical_translation_is_a_mask() {
    assert_eq!(mem::bus_to_phys(0xC000_1000), 0x0000_1000);
    let bus = 0x4000_0000u32;
    let alias = bus & !mem::BUS_ALIAS_MASK;
    assert_eq!(mem::bus_to_phys(bus) | alias, bus);
}

#[test]
fn channel_range_is_enforced() {
    assert!(DmaChannel::new(6).is_ok());
    assert!(matches!(
        DmaChannel::new(DmaChannel::COUNT),
        Err(DmaError::InvalidChannel { .. })
    ));
}

#[test]
fn allocation_flags_match_firmware_interface() {
    assert_eq!(MemFlags::L1_NONALLOCATING.bits(), 0xC);
    assert!(MemFlags::L1_NONALLOCATING.contains(MemFlags::DIRECT));
    assert!(MemFlags::L1_NONALLOCATING.contains(MemFlags::COHERENT));
}

#[test]
fn errors_identify_their_stage() {
    let err = DmaError::RegionTooSmall {
        len: 4096,
        required: 4128,
    };
    assert_eq!(err.to_string(), "region of 4096 bytes cannot hold 4128 bytes");
    let err = DmaError::LockFailed { handle: 0x1000 };
    assert!(err.to_string().contains("0x1000"));
}
