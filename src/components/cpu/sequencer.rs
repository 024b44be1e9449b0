//! A minimal accumulator machine.
//!
//! The sequencer fetches one byte per rising clock edge from whatever is
//! wired to `DATA`, using the address it put on `ADDR` at the previous edge.
//! Instructions are one byte: the high nibble is the opcode and the low
//! nibble its operand.
//!
//! | byte  | mnemonic | effect                                   |
//! |-------|----------|------------------------------------------|
//! | `0x0_`| NOP      |                                          |
//! | `0x1n`| LDI n    | `acc = n`                                |
//! | `0x2n`| ADDI n   | `acc = acc + n`                          |
//! | `0x3_`| OUT      | drive `acc` on `OUT`, pulse `STB`        |
//! | `0x4n`| JMP n    | `pc = n`                                 |
//! | `0x5n`| JNZ n    | `pc = n` when `acc != 0`                 |
//! | `0x6n`| SUBI n   | `acc = acc - n`                          |
//! | `0xF_`| HLT      | stop and raise `HALT`                    |
//!
//! Any other opcode, or a floating data bus at fetch, is a component fault.

use std::collections::BTreeMap;

use crate::component::{
    Activation, ComponentDescriptor, ComponentKind, ComponentLogic, Inputs, StateBlob, StepResult,
};
use crate::error::{ComponentFault, LibraryError};
use crate::pin::{PinSpec, PinValue, SignalClass};
use crate::types::Tick;

const PC: usize = 0;
const ACC: usize = 1;
const HALTED: usize = 2;
const PRIMED: usize = 3;
const RETIRED: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    Ldi(u8),
    Addi(u8),
    Out,
    Jmp(u8),
    Jnz(u8),
    Subi(u8),
    Hlt,
}

impl Instruction {
    pub fn decode(byte: u8) -> Option<Self> {
        let operand = byte & 0x0F;
        match byte >> 4 {
            0x0 => Some(Instruction::Nop),
            0x1 => Some(Instruction::Ldi(operand)),
            0x2 => Some(Instruction::Addi(operand)),
            0x3 => Some(Instruction::Out),
            0x4 => Some(Instruction::Jmp(operand)),
            0x5 => Some(Instruction::Jnz(operand)),
            0x6 => Some(Instruction::Subi(operand)),
            0xF => Some(Instruction::Hlt),
            _ => None,
        }
    }

    pub fn encode(&self) -> u8 {
        match self {
            Instruction::Nop => 0x00,
            Instruction::Ldi(n) => 0x10 | (n & 0x0F),
            Instruction::Addi(n) => 0x20 | (n & 0x0F),
            Instruction::Out => 0x30,
            Instruction::Jmp(n) => 0x40 | (n & 0x0F),
            Instruction::Jnz(n) => 0x50 | (n & 0x0F),
            Instruction::Subi(n) => 0x60 | (n & 0x0F),
            Instruction::Hlt => 0xF0,
        }
    }
}

/// Assemble a program into ROM bytes.
pub fn assemble(program: &[Instruction]) -> Vec<u8> {
    program.iter().map(Instruction::encode).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sequencer;

impl Sequencer {
    pub fn from_descriptor(_descriptor: &ComponentDescriptor) -> Result<Self, LibraryError> {
        Ok(Sequencer)
    }

    pub fn pc(state: &StateBlob) -> u8 {
        state.byte(PC)
    }

    pub fn acc(state: &StateBlob) -> u8 {
        state.byte(ACC)
    }

    pub fn is_halted(state: &StateBlob) -> bool {
        state.flag(HALTED)
    }

    pub fn retired(state: &StateBlob) -> u64 {
        state.word(RETIRED, 8)
    }

    fn restart(&self) -> StepResult {
        let mut state = self.power_on_state();
        state.set_flag(PRIMED, true);
        StepResult {
            outputs: self.power_on_outputs(&state),
            next_state: None,
        }
        .drive("ADDR", PinValue::Driven(0))
        .with_state(state)
    }
}

impl ComponentLogic for Sequencer {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Processor
    }

    fn pins(&self) -> Vec<PinSpec> {
        vec![
            PinSpec::input("CLK", 1, SignalClass::Clock),
            PinSpec::input("RESET", 1, SignalClass::Control),
            PinSpec::output("ADDR", 8, SignalClass::Address),
            PinSpec::input("DATA", 8, SignalClass::Data),
            PinSpec::output("OUT", 8, SignalClass::Data),
            PinSpec::output("STB", 1, SignalClass::Control),
            PinSpec::output("HALT", 1, SignalClass::Control),
        ]
    }

    fn activation(&self) -> Activation {
        Activation::rising("CLK")
    }

    fn power_on_state(&self) -> StateBlob {
        StateBlob::zeroed(12)
    }

    fn power_on_outputs(&self, _state: &StateBlob) -> BTreeMap<String, PinValue> {
        BTreeMap::from([
            ("OUT".to_string(), PinValue::Driven(0)),
            ("STB".to_string(), PinValue::LOW),
            ("HALT".to_string(), PinValue::LOW),
        ])
    }

    fn step(&self, _tick: Tick, inputs: &Inputs, state: &StateBlob) -> Result<StepResult, ComponentFault> {
        if inputs.is_high("RESET") {
            return Ok(self.restart());
        }
        if state.flag(HALTED) {
            return Ok(StepResult::hold());
        }

        let mut next = state.clone();
        if !state.flag(PRIMED) {
            next.set_flag(PRIMED, true);
            return Ok(StepResult::hold()
                .drive("ADDR", PinValue::Driven(state.byte(PC) as u64))
                .with_state(next));
        }

        let pc = state.byte(PC);
        let byte = inputs.bits("DATA").ok_or_else(|| {
            ComponentFault::new(format!("data bus floating at fetch from {:#04x}", pc))
        })? as u8;
        let instruction = Instruction::decode(byte).ok_or_else(|| {
            ComponentFault::new(format!("invalid opcode {:#04x} at {:#04x}", byte, pc))
        })?;

        let acc = state.byte(ACC);
        let mut result = StepResult::hold().drive("STB", PinValue::LOW);
        let mut next_pc = pc.wrapping_add(1);
        match instruction {
            Instruction::Nop => {}
            Instruction::Ldi(n) => next.set_byte(ACC, n),
            Instruction::Addi(n) => next.set_byte(ACC, acc.wrapping_add(n)),
            Instruction::Subi(n) => next.set_byte(ACC, acc.wrapping_sub(n)),
            Instruction::Out => {
                result = result
                    .drive("OUT", PinValue::Driven(acc as u64))
                    .drive("STB", PinValue::HIGH);
            }
            Instruction::Jmp(n) => next_pc = n,
            Instruction::Jnz(n) => {
                if acc != 0 {
                    next_pc = n;
                }
            }
            Instruction::Hlt => {
                next_pc = pc;
                next.set_flag(HALTED, true);
                result = result.drive("HALT", PinValue::HIGH);
            }
        }

        next.set_byte(PC, next_pc);
        next.set_word(RETIRED, 8, Self::retired(state).wrapping_add(1));
        Ok(result
            .drive("ADDR", PinValue::Driven(next_pc as u64))
            .with_state(next))
    }

    fn describe(&self, state: &StateBlob) -> String {
        format!(
            "PC={:02X} ACC={:02X}{} retired={}",
            Self::pc(state),
            Self::acc(state),
            if Self::is_halted(state) { " HALTED" } else { "" },
            Self::retired(state)
        )
    }
}
