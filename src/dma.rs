//! BCM2711 DMA controller interface.
//!
//! Register blocks and bit definitions for the DMA engine, plus the ring
//! builder and the channel controller driving it.
//!
//! The register catalogs follow the BCM2711 peripheral datasheet:
//! - Chapter 4, Table 40 (transfer information) and the per-channel
//!   CS / CONBLK_AD registers
//! - Table 34 (control block layout)
//!
//! Addresses handed to the engine are always **bus** addresses; the CPU
//! reaches the same registers through the physical alias mapped from
//! `/dev/mem`.

pub mod engine;
pub mod register;
pub mod ring;

pub use engine::{Active, DmaSampler, Idle, SamplerBuilder};
pub use register::{ChannelRegisters, Register};
pub use ring::{build_sampler_ring, ControlBlock};

use bitflags::bitflags;

use crate::error::{DmaError, Result};

/// Low-peripheral physical base on the BCM2711.
pub const PERI_PHYS_BASE: u32 = 0xFE00_0000;

/// Peripheral base as seen on the VideoCore bus.
pub const PERI_BUS_BASE: u32 = 0x7E00_0000;

/// DMA controller offset into the peripheral block.
pub const DMA_BASE_OFFSET: u32 = 0x0000_7000;

/// Byte stride between consecutive channel register blocks.
pub const DMA_CHANNEL_STRIDE: usize = 0x100;

/// System timer low word (CLO), free-running at 1 MHz. Bus address; the
/// timer block sits at peripheral offset 0x3000 and CLO at +0x04.
pub const SYST_CLO_BUS: u32 = PERI_BUS_BASE + 0x3004;

/// Type-safe DMA channel index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaChannel(u8);

impl DmaChannel {
    /// Number of channels in the controller block.
    pub const COUNT: u8 = 16;

    /// Create a new channel index, validating range
    pub const fn new(channel: u8) -> Result<Self> {
        if channel >= Self::COUNT {
            Err(DmaError::InvalidChannel { channel })
        } else {
            Ok(Self(channel))
        }
    }

    /// Channel index as usize for offset math
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw channel number
    #[inline(always)]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Byte offset of this channel's register block from the DMA base.
    #[inline(always)]
    pub const fn register_offset(self) -> usize {
        self.index() * DMA_CHANNEL_STRIDE
    }
}

bitflags! {
    /// Control/status register (CS) bit definitions
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlStatus: u32 {
        /// Channel reset; self-clears when the reset completes - Bit 31
        const RESET = 1 << 31;
        /// Abort the current control block; self-clears - Bit 30
        const ABORT = 1 << 30;
        /// Ignore the debug pause signal - Bit 29
        const DISDEBUG = 1 << 29;
        /// Hold end-of-transfer until all outstanding AXI writes have
        /// been acknowledged - Bit 28
        const WAIT_FOR_OUTSTANDING_WRITES = 1 << 28;
        /// Channel is paused waiting for outstanding writes - Bit 6
        const WAITING_FOR_OUTSTANDING_WRITES = 1 << 6;
        /// Channel is paused by DREQ - Bit 5
        const DREQ_STOPS_DMA = 1 << 5;
        /// Channel is paused - Bit 4
        const PAUSED = 1 << 4;
        /// Interrupt status; write 1 to clear - Bit 2
        const INT = 1 << 2;
        /// Transfer-complete flag; write 1 to clear - Bit 1
        const END = 1 << 1;
        /// Activate the channel; the engine fetches the control block at
        /// CONBLK_AD and runs until the chain terminates - Bit 0
        const ACTIVE = 1 << 0;
    }
}

impl ControlStatus {
    /// AXI priority of normal transactions - Bits [19:16]
    pub const fn priority(level: u8) -> Self {
        Self::from_bits_retain(((level & 0xF) as u32) << 16)
    }

    /// AXI priority of panicking transactions - Bits [23:20]
    pub const fn panic_priority(level: u8) -> Self {
        Self::from_bits_retain(((level & 0xF) as u32) << 20)
    }
}

bitflags! {
    /// Transfer information (TI) field bit definitions
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransferInfo: u32 {
        /// Never generate bursts wider than the bus - Bit 26
        const NO_WIDE_BURSTS = 1 << 26;
        /// Gate source reads on the mapped peripheral's DREQ - Bit 10
        const SRC_DREQ = 1 << 10;
        /// Increment source address per read - Bit 8
        const SRC_INC = 1 << 8;
        /// Gate destination writes on the mapped peripheral's DREQ - Bit 6
        const DEST_DREQ = 1 << 6;
        /// Increment destination address per write - Bit 4
        const DEST_INC = 1 << 4;
        /// Wait for the AXI write response before continuing - Bit 3
        const WAIT_RESP = 1 << 3;
        /// Interrupt when the transfer described by this block completes - Bit 0
        const INTEN = 1 << 0;
    }
}

impl TransferInfo {
    /// Peripheral number steering the DREQ signals - Bits [20:16]
    pub const fn peri_map(peripheral: u8) -> Self {
        Self::from_bits_retain(((peripheral & 0x1F) as u32) << 16)
    }

    /// Burst length in words - Bits [15:12]
    pub const fn burst_length(words: u8) -> Self {
        Self::from_bits_retain(((words & 0xF) as u32) << 12)
    }
}

/// Hardware settle intervals.
///
/// These are conservative empirical delays, not documented protocol
/// deadlines; re-tune them if the target board misbehaves.
pub mod settle {
    use core::time::Duration;

    /// Wait after asserting ABORT or RESET before relying on the
    /// channel's new state.
    pub const CHANNEL_HALT: Duration = Duration::from_millis(500);

    /// Wait after start for the engine to lap the ring at least once
    /// before sampling it.
    pub const RING_FILL: Duration = Duration::from_millis(500);
}
