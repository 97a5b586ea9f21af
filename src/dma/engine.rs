//! The DMA channel controller and sampler context.
//!
//! [`DmaSampler`] owns everything the sampling protocol needs: the
//! mailbox channel, the control-block and tick regions, and the mapped
//! channel register pair. The allocate→build→start→stop protocol is
//! enforced at compile time: a sampler only exists once its ring is
//! built, and only an [`Active`] sampler can be stopped, so the engine
//! can never be pointed at an unset control block.

use core::marker::PhantomData;
use core::mem;
use core::time::Duration;
use std::thread;

use crate::error::{DmaError, Result};
use crate::mailbox::{Mailbox, MemFlags};
use crate::mem::{DmaRegion, PhysMapping, PAGE_SIZE};

use super::register::ChannelRegisters;
use super::ring::{build_sampler_ring, ControlBlock};
use super::{settle, ControlStatus, DmaChannel, DMA_BASE_OFFSET, PERI_PHYS_BASE};

/// Sampler lifecycle states for compile-time state tracking
pub struct Idle;
/// The engine is walking the ring; the tick buffer is owned by hardware.
pub struct Active;

/// AXI priority programmed for sampler transfers.
const AXI_PRIORITY: u8 = 8;

const DEFAULT_SLOTS: usize = 10;
const DEFAULT_CHANNEL: DmaChannel = DmaChannel(6);

/// Configuration for a [`DmaSampler`].
pub struct SamplerBuilder {
    channel: DmaChannel,
    slots: usize,
    flags: MemFlags,
    settle: Duration,
}

impl SamplerBuilder {
    /// New builder: channel 6, 10 ring slots, L1-non-allocating memory,
    /// nominal settle interval.
    pub const fn new() -> Self {
        Self {
            channel: DEFAULT_CHANNEL,
            slots: DEFAULT_SLOTS,
            flags: MemFlags::L1_NONALLOCATING,
            settle: settle::CHANNEL_HALT,
        }
    }

    /// Select the DMA channel to drive.
    pub const fn channel(mut self, channel: DmaChannel) -> Self {
        self.channel = channel;
        self
    }

    /// Number of control blocks (and tick slots) in the ring.
    pub const fn slots(mut self, slots: usize) -> Self {
        self.slots = slots;
        self
    }

    /// Firmware allocation flags for both regions.
    pub const fn mem_flags(mut self, flags: MemFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Settle interval applied after halt-sequence register writes.
    pub const fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Acquire firmware memory, map the channel registers, and lay out
    /// the sampler ring.
    ///
    /// Requires access to `/dev/mem` and `/dev/vcio`. On failure every
    /// acquired resource is released before the error is returned.
    pub fn build(self) -> Result<DmaSampler<Idle>> {
        if self.slots == 0 {
            return Err(DmaError::EmptyRing);
        }
        let mbox = Mailbox::open()?;

        let periph = PhysMapping::map((PERI_PHYS_BASE + DMA_BASE_OFFSET) as u64, PAGE_SIZE)?;
        // SAFETY: the mapping covers the full DMA register block and the
        // channel offset is validated to lie inside it
        let regs = unsafe {
            ChannelRegisters::new(periph.as_ptr().add(self.channel.register_offset()).cast())
        };

        let mut cbs = DmaRegion::allocate(
            &mbox,
            self.slots * mem::size_of::<ControlBlock>(),
            self.flags,
        )?;
        let mut ticks = match DmaRegion::allocate(&mbox, self.slots * 4, self.flags) {
            Ok(region) => region,
            Err(err) => {
                cbs.free(&mbox);
                return Err(err);
            }
        };

        if let Err(err) = build_sampler_ring(cbs.view(), ticks.view(), self.slots) {
            ticks.free(&mbox);
            cbs.free(&mbox);
            return Err(err);
        }

        log::info!(
            "sampler ready: {} blocks on channel {}",
            self.slots,
            self.channel.value()
        );
        Ok(DmaSampler {
            mbox,
            regs,
            _periph: periph,
            cbs,
            ticks,
            slots: self.slots,
            settle: self.settle,
            _state: PhantomData,
        })
    }
}

impl Default for SamplerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured DMA timer sampler.
///
/// Owns the firmware channel, both memory regions, and the channel
/// register pair for its whole lifetime; the type parameter tracks
/// whether the hardware engine is walking the ring.
pub struct DmaSampler<State = Idle> {
    mbox: Mailbox,
    regs: ChannelRegisters,
    _periph: PhysMapping,
    cbs: DmaRegion,
    ticks: DmaRegion,
    slots: usize,
    settle: Duration,
    _state: PhantomData<State>,
}

impl DmaSampler<Idle> {
    /// Number of ring slots.
    #[inline]
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Reset the channel, attach it to the ring, and set it running.
    ///
    /// After the final register write the hardware walks the ring
    /// autonomously; no further CPU action sustains transfers. These are
    /// direct register pokes with no recoverable failure.
    pub fn start(self) -> DmaSampler<Active> {
        program_start(&self.regs, self.cbs.bus_addr());
        log::info!("channel active at control block {:#010x}", self.cbs.bus_addr());
        DmaSampler {
            mbox: self.mbox,
            regs: self.regs,
            _periph: self._periph,
            cbs: self.cbs,
            ticks: self.ticks,
            slots: self.slots,
            settle: self.settle,
            _state: PhantomData,
        }
    }
}

impl DmaSampler<Active> {
    /// Current control/status word of the channel.
    pub fn status(&self) -> ControlStatus {
        ControlStatus::from_bits_truncate(self.regs.cs().read())
    }

    /// Abort the channel, then collect the sampled ticks and tear down.
    ///
    /// The destination ring must not be read while the engine is live,
    /// so the samples are only captured here, after the abort sequence
    /// and its settle intervals have quiesced the hardware. Teardown
    /// releases the tick region first, then the control-block region,
    /// and finally closes the firmware channel.
    pub fn stop(self) -> Result<Vec<u32>> {
        program_halt(&self.regs, self.settle);

        let DmaSampler {
            mbox,
            mut cbs,
            mut ticks,
            slots,
            ..
        } = self;
        let samples = ticks.view().read_slots::<u32>(slots)?;
        ticks.free(&mbox);
        cbs.free(&mbox);
        log::info!("channel stopped, {} samples captured", samples.len());
        Ok(samples)
        // mbox closes on drop
    }
}

/// Channel start sequence.
///
/// Order matters: abort whatever ran before, clear and reset the
/// channel, drop any stale block pointer and latched status flags, and
/// only then attach the ring and go.
fn program_start(regs: &ChannelRegisters, first_block: u32) {
    let cs = regs.cs();
    cs.write(ControlStatus::ABORT.bits());
    cs.write(0);
    cs.write(ControlStatus::RESET.bits());
    regs.conblk_ad().write(0);
    // write-1-to-clear latched interrupt/end flags
    cs.write((ControlStatus::INT | ControlStatus::END).bits());

    regs.conblk_ad().write(first_block);
    cs.write(
        (ControlStatus::priority(AXI_PRIORITY)
            | ControlStatus::panic_priority(AXI_PRIORITY)
            | ControlStatus::DISDEBUG)
            .bits(),
    );
    cs.set_bits((ControlStatus::WAIT_FOR_OUTSTANDING_WRITES | ControlStatus::ACTIVE).bits());
}

/// Channel abort sequence.
///
/// Without this the channel keeps walking the ring after the process
/// exits. The settle waits give the engine time to observe ABORT and
/// RESET before memory behind it goes away.
fn program_halt(regs: &ChannelRegisters, settle: Duration) {
    let cs = regs.cs();
    cs.set_bits(ControlStatus::ABORT.bits());
    thread::sleep(settle);
    cs.clear_bits(ControlStatus::ACTIVE.bits());
    cs.set_bits(ControlStatus::RESET.bits());
    thread::sleep(settle);
}
