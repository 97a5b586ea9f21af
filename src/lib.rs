#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

//! Firmware-backed DMA memory and continuous register sampling for the
//! BCM2711 (Raspberry Pi 4 family), from Linux userspace.
//!
//! The crate acquires physically contiguous, DMA-capable memory from the
//! VideoCore firmware, lays out a circular chain of DMA control blocks
//! inside it, and drives one channel of the SoC DMA engine so it
//! autonomously copies the system-timer low word into a ring buffer —
//! zero CPU involvement per transfer.
//!
//! # Core Components
//!
//! - [`mem`] - physical mappings and firmware-backed memory regions
//! - [`mailbox`] - VideoCore property channel (allocate/lock/unlock/release)
//! - [`dma`] - register catalogs, the control-block ring builder, and the
//!   channel controller
//! - [`error`] - error types for every failure stage
//!
//! # Protocol
//!
//! Allocate → build → start → stop, enforced by the [`DmaSampler`]
//! typestate: building the ring is part of [`SamplerBuilder::build`], and
//! the tick buffer can only be read back from [`DmaSampler::stop`], after
//! the engine has quiesced.
//!
//! ```no_run
//! use bcm2711_dma::SamplerBuilder;
//!
//! # fn main() -> bcm2711_dma::Result<()> {
//! let sampler = SamplerBuilder::new().slots(10).build()?;
//! let sampler = sampler.start();
//! std::thread::sleep(bcm2711_dma::dma::settle::RING_FILL);
//! for (i, tick) in sampler.stop()?.iter().enumerate() {
//!     println!("DMA {i}: {tick}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Privileges
//!
//! Every path through this crate needs `/dev/mem` and `/dev/vcio`, i.e.
//! root on a stock Raspberry Pi OS. A wrong bus address corrupts
//! arbitrary physical memory; treat the demo as the reference for safe
//! call ordering.

pub mod dma;
pub mod error;
pub mod mailbox;
pub mod mem;

pub use dma::{DmaChannel, DmaSampler, SamplerBuilder};
pub use error::{DmaError, Result};
pub use mailbox::{Mailbox, MemFlags};
pub use mem::{DmaRegion, PhysMapping, RegionView};
