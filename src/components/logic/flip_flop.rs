use std::collections::BTreeMap;

use crate::component::{
    Activation, ComponentDescriptor, ComponentKind, ComponentLogic, Inputs, StateBlob, StepResult,
};
use crate::error::{ComponentFault, LibraryError};
use crate::pin::{PinSpec, PinValue, SignalClass};
use crate::types::{width_mask, Tick};

/// Output inverts on every rising edge of `CLK`. Powers on with `Q` low.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToggleFlipFlop;

impl ComponentLogic for ToggleFlipFlop {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Custom
    }

    fn pins(&self) -> Vec<PinSpec> {
        vec![
            PinSpec::input("CLK", 1, SignalClass::Clock),
            PinSpec::output("Q", 1, SignalClass::Wire),
            PinSpec::output("QN", 1, SignalClass::Wire),
        ]
    }

    fn activation(&self) -> Activation {
        Activation::rising("CLK")
    }

    fn power_on_state(&self) -> StateBlob {
        StateBlob::zeroed(1)
    }

    fn power_on_outputs(&self, state: &StateBlob) -> BTreeMap<String, PinValue> {
        outputs(state.flag(0))
    }

    fn step(&self, _tick: Tick, _inputs: &Inputs, state: &StateBlob) -> Result<StepResult, ComponentFault> {
        let q = !state.flag(0);
        let mut next = state.clone();
        next.set_flag(0, q);
        Ok(StepResult {
            outputs: outputs(q),
            next_state: Some(next),
        })
    }

    fn describe(&self, state: &StateBlob) -> String {
        format!("Q={}", state.byte(0))
    }
}

fn outputs(q: bool) -> BTreeMap<String, PinValue> {
    BTreeMap::from([
        ("Q".to_string(), PinValue::from_bool(q)),
        ("QN".to_string(), PinValue::from_bool(!q)),
    ])
}

/// Edge-triggered D register of configurable width. A floating `D` holds
/// the stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DFlipFlop {
    width: u8,
}

impl DFlipFlop {
    pub fn new(width: u8) -> Self {
        DFlipFlop { width }
    }

    pub fn from_descriptor(descriptor: &ComponentDescriptor) -> Result<Self, LibraryError> {
        Ok(DFlipFlop::new(descriptor.width_or("width", 1)?))
    }

    fn outputs(&self, q: u64) -> StepResult {
        let mask = width_mask(self.width);
        StepResult::hold()
            .drive("Q", PinValue::Driven(q & mask))
            .drive("QN", PinValue::Driven(!q & mask))
    }
}

impl ComponentLogic for DFlipFlop {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Custom
    }

    fn pins(&self) -> Vec<PinSpec> {
        vec![
            PinSpec::input("CLK", 1, SignalClass::Clock),
            PinSpec::input("D", self.width, SignalClass::Wire),
            PinSpec::output("Q", self.width, SignalClass::Wire),
            PinSpec::output("QN", self.width, SignalClass::Wire),
        ]
    }

    fn activation(&self) -> Activation {
        Activation::rising("CLK")
    }

    fn power_on_state(&self) -> StateBlob {
        StateBlob::zeroed(8)
    }

    fn power_on_outputs(&self, state: &StateBlob) -> BTreeMap<String, PinValue> {
        self.outputs(state.word(0, 8)).outputs
    }

    fn step(&self, _tick: Tick, inputs: &Inputs, state: &StateBlob) -> Result<StepResult, ComponentFault> {
        let q = inputs.bits("D").unwrap_or_else(|| state.word(0, 8));
        let mut next = state.clone();
        next.set_word(0, 8, q);
        Ok(self.outputs(q).with_state(next))
    }

    fn describe(&self, state: &StateBlob) -> String {
        format!("Q={:X}", state.word(0, 8))
    }
}
