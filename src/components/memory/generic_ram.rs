use std::collections::BTreeMap;

use crate::component::{
    Activation, ComponentDescriptor, ComponentKind, ComponentLogic, Inputs, StateBlob, StepResult,
};
use crate::error::{ComponentFault, LibraryError};
use crate::pin::{PinSpec, PinValue, SignalClass};
use crate::types::{width_mask, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RamOperation {
    Read,
    Write,
    Idle,
}

/// Synchronous static RAM sampled on the rising edge of `CLK`.
///
/// With `CS` high (or floating): `WE` high stores `DATA`, otherwise `OE`
/// high (or floating) drives the addressed word onto `DATA` until the next
/// edge. Deselected or idle, `DATA` is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericRam {
    size: usize,
    address_width: u8,
    data_width: u8,
}

impl GenericRam {
    pub fn new(size: usize, address_width: u8, data_width: u8) -> Result<Self, LibraryError> {
        if size == 0 || size > 1 << 16 {
            return Err(LibraryError::invalid("ram", "size must be between 1 and 65536 words"));
        }
        if data_width == 0 || data_width > 8 {
            return Err(LibraryError::invalid("ram", "data width must be between 1 and 8 bits"));
        }
        Ok(GenericRam {
            size,
            address_width,
            data_width,
        })
    }

    pub fn from_descriptor(descriptor: &ComponentDescriptor) -> Result<Self, LibraryError> {
        let address_width = descriptor.width_or("address_width", 8)?;
        let data_width = descriptor.width_or("data_width", 8)?;
        let size = descriptor.u64_or("size", 1u64 << address_width.min(16))? as usize;
        Self::new(size, address_width, data_width)
            .map_err(|err| LibraryError::invalid(&descriptor.name, err.to_string()))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn operation(inputs: &Inputs) -> RamOperation {
        let selected = inputs.get("CS").to_bool().unwrap_or(true);
        let write = inputs.is_high("WE");
        let output = inputs.get("OE").to_bool().unwrap_or(true);
        match (selected, write, output) {
            (false, _, _) => RamOperation::Idle,
            (true, true, _) => RamOperation::Write,
            (true, false, true) => RamOperation::Read,
            (true, false, false) => RamOperation::Idle,
        }
    }
}

impl ComponentLogic for GenericRam {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Memory
    }

    fn pins(&self) -> Vec<PinSpec> {
        vec![
            PinSpec::input("CLK", 1, SignalClass::Clock),
            PinSpec::input("ADDR", self.address_width, SignalClass::Address),
            PinSpec::bidirectional("DATA", self.data_width, SignalClass::Data),
            PinSpec::input("CS", 1, SignalClass::Control),
            PinSpec::input("WE", 1, SignalClass::Control),
            PinSpec::input("OE", 1, SignalClass::Control),
        ]
    }

    fn activation(&self) -> Activation {
        Activation::rising("CLK")
    }

    fn power_on_state(&self) -> StateBlob {
        StateBlob::zeroed(self.size)
    }

    fn power_on_outputs(&self, _state: &StateBlob) -> BTreeMap<String, PinValue> {
        BTreeMap::from([("DATA".to_string(), PinValue::HighZ)])
    }

    fn step(&self, tick: Tick, inputs: &Inputs, state: &StateBlob) -> Result<StepResult, ComponentFault> {
        let operation = Self::operation(inputs);
        if operation == RamOperation::Idle {
            return Ok(StepResult::hold().drive("DATA", PinValue::HighZ));
        }

        let address = inputs.bits("ADDR").ok_or_else(|| {
            ComponentFault::new(format!("address bus floating during access at tick {}", tick))
        })? as usize
            % self.size;

        match operation {
            RamOperation::Write => {
                let value = inputs.bits("DATA").ok_or_else(|| {
                    ComponentFault::new(format!("write of floating data bus to {:#06x}", address))
                })?;
                let mut next = state.clone();
                next.set_byte(address, (value & width_mask(self.data_width)) as u8);
                Ok(StepResult::hold()
                    .drive("DATA", PinValue::HighZ)
                    .with_state(next))
            }
            _ => Ok(StepResult::hold().drive("DATA", PinValue::Driven(state.byte(address) as u64))),
        }
    }

    fn describe(&self, state: &StateBlob) -> String {
        let used = state.as_bytes().iter().filter(|b| **b != 0).count();
        format!("{} bytes, {} non-zero", state.len(), used)
    }
}
