//! A small single-board computer: a clock, the accumulator sequencer running
//! from ROM, an output latch and a toggle flip-flop dividing the clock.
//!
//! The default program counts down from a start value, writing every value
//! to the output latch, then halts.

use tracing::info;

use crate::component::ComponentDescriptor;
use crate::components::cpu::{assemble, Instruction};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::types::ComponentId;

pub const ROM_SIZE: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoBoard {
    pub clock: ComponentId,
    pub cpu: ComponentId,
    pub rom: ComponentId,
    pub latch: ComponentId,
    pub divider: ComponentId,
}

/// `start, start - 1, ..., 0` on the output latch, then halt.
pub fn countdown_program(start: u8) -> Vec<u8> {
    assemble(&[
        Instruction::Ldi(start),
        Instruction::Out,
        Instruction::Subi(1),
        Instruction::Jnz(1),
        Instruction::Out,
        Instruction::Hlt,
    ])
}

/// Wire the board into `engine` with `program` in ROM.
pub fn build(engine: &mut Engine, program: &[u8]) -> Result<DemoBoard, EngineError> {
    let clock = engine.create_component(
        ComponentDescriptor::new("CLOCK", "clock").with_property("period", 2),
    )?;
    let cpu = engine.create_component(ComponentDescriptor::new("CPU", "sequencer"))?;
    let rom = engine.create_component(
        ComponentDescriptor::new("ROM", "rom")
            .with_property("size", ROM_SIZE)
            .with_property("image", program.to_vec()),
    )?;
    let latch = engine.create_component(ComponentDescriptor::new("LATCH", "output_latch"))?;
    let divider = engine.create_component(ComponentDescriptor::new("DIVIDER", "toggle_flip_flop"))?;

    engine.connect_by_name((clock, "CLK"), (cpu, "CLK"))?;
    engine.connect_by_name((clock, "CLK"), (divider, "CLK"))?;
    engine.connect_by_name((cpu, "ADDR"), (rom, "ADDR"))?;
    engine.connect_by_name((rom, "DATA"), (cpu, "DATA"))?;
    engine.connect_by_name((cpu, "OUT"), (latch, "DATA"))?;
    engine.connect_by_name((cpu, "STB"), (latch, "STB"))?;

    info!(program = program.len(), "built demo board");
    Ok(DemoBoard {
        clock,
        cpu,
        rom,
        latch,
        divider,
    })
}
