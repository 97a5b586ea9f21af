//! Continuous system-timer sampling over DMA.
//!
//! Builds a 10-slot sampler ring on channel 6, lets the engine lap it,
//! then prints the captured timer ticks. Needs root (or equivalent
//! access to `/dev/mem` and `/dev/vcio`).
//!
//! Run with `RUST_LOG=debug` for the allocation and register trail.

use std::process::ExitCode;
use std::thread;

use bcm2711_dma::dma::settle;
use bcm2711_dma::{DmaChannel, SamplerBuilder};

const SLOTS: usize = 10;

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("dma sampler failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> bcm2711_dma::Result<()> {
    let channel = DmaChannel::new(6)?;
    let sampler = SamplerBuilder::new()
        .channel(channel)
        .slots(SLOTS)
        .build()?;

    let sampler = sampler.start();
    thread::sleep(settle::RING_FILL);

    let ticks = sampler.stop()?;
    for (i, tick) in ticks.iter().enumerate() {
        println!("DMA {i}: {tick}");
    }
    Ok(())
}
