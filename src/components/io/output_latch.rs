use std::collections::BTreeMap;

use crate::component::{
    Activation, ComponentDescriptor, ComponentKind, ComponentLogic, Inputs, StateBlob, StepResult,
};
use crate::error::{ComponentFault, LibraryError};
use crate::pin::{PinSpec, PinValue, SignalClass};
use crate::types::{width_mask, Tick};

const VALUE: usize = 0;
const WRITES: usize = 8;

/// Output port: captures `DATA` on each rising edge of `STB` and holds it on `Q`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLatch {
    width: u8,
}

impl OutputLatch {
    pub fn new(width: u8) -> Self {
        OutputLatch { width }
    }

    pub fn from_descriptor(descriptor: &ComponentDescriptor) -> Result<Self, LibraryError> {
        Ok(OutputLatch::new(descriptor.width_or("width", 8)?))
    }

    pub fn value(state: &StateBlob) -> u64 {
        state.word(VALUE, 8)
    }

    pub fn writes(state: &StateBlob) -> u64 {
        state.word(WRITES, 8)
    }
}

impl ComponentLogic for OutputLatch {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Io
    }

    fn pins(&self) -> Vec<PinSpec> {
        vec![
            PinSpec::input("STB", 1, SignalClass::Control),
            PinSpec::input("DATA", self.width, SignalClass::Data),
            PinSpec::output("Q", self.width, SignalClass::Data),
        ]
    }

    fn activation(&self) -> Activation {
        Activation::rising("STB")
    }

    fn power_on_state(&self) -> StateBlob {
        StateBlob::zeroed(16)
    }

    fn power_on_outputs(&self, state: &StateBlob) -> BTreeMap<String, PinValue> {
        BTreeMap::from([("Q".to_string(), PinValue::Driven(Self::value(state)))])
    }

    fn step(&self, _tick: Tick, inputs: &Inputs, state: &StateBlob) -> Result<StepResult, ComponentFault> {
        let value = inputs.bits("DATA").unwrap_or(0) & width_mask(self.width);
        let mut next = state.clone();
        next.set_word(VALUE, 8, value);
        next.set_word(WRITES, 8, Self::writes(state).wrapping_add(1));
        Ok(StepResult::hold()
            .drive("Q", PinValue::Driven(value))
            .with_state(next))
    }

    fn describe(&self, state: &StateBlob) -> String {
        format!("Q={:02X} writes={}", Self::value(state), Self::writes(state))
    }
}
