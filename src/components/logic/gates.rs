use crate::component::{
    Activation, ComponentDescriptor, ComponentKind, ComponentLogic, Inputs, StateBlob, StepResult,
};
use crate::error::{ComponentFault, LibraryError};
use crate::pin::{PinSpec, PinValue, SignalClass};
use crate::types::{width_mask, Tick};

const INPUT_NAMES: [&str; 8] = ["A", "B", "C", "D", "E", "F", "G", "H"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateFunction {
    And,
    Or,
    Xor,
    Nand,
    Nor,
    Not,
    Buf,
}

impl GateFunction {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "and" => Some(GateFunction::And),
            "or" => Some(GateFunction::Or),
            "xor" => Some(GateFunction::Xor),
            "nand" => Some(GateFunction::Nand),
            "nor" => Some(GateFunction::Nor),
            "not" => Some(GateFunction::Not),
            "buf" => Some(GateFunction::Buf),
            _ => None,
        }
    }

    fn is_unary(&self) -> bool {
        matches!(self, GateFunction::Not | GateFunction::Buf)
    }

    fn apply(&self, values: &[u64], mask: u64) -> u64 {
        let and = values.iter().fold(mask, |acc, v| acc & v);
        let or = values.iter().fold(0, |acc, v| acc | v);
        let xor = values.iter().fold(0, |acc, v| acc ^ v);
        let result = match self {
            GateFunction::And => and,
            GateFunction::Or => or,
            GateFunction::Xor => xor,
            GateFunction::Nand => !and,
            GateFunction::Nor => !or,
            GateFunction::Not => !values.first().copied().unwrap_or(0),
            GateFunction::Buf => values.first().copied().unwrap_or(0),
        };
        result & mask
    }
}

/// Bitwise combinational gate with inputs `A`, `B`, ... and output `Y`.
/// Any floating input floats the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gate {
    function: GateFunction,
    inputs: usize,
    width: u8,
}

impl Gate {
    pub fn new(function: GateFunction, inputs: usize, width: u8) -> Result<Self, LibraryError> {
        let inputs = if function.is_unary() { 1 } else { inputs };
        if inputs == 0 || inputs > INPUT_NAMES.len() {
            return Err(LibraryError::invalid("gate", "a gate takes between 1 and 8 inputs"));
        }
        Ok(Gate {
            function,
            inputs,
            width,
        })
    }

    pub fn from_descriptor(descriptor: &ComponentDescriptor) -> Result<Self, LibraryError> {
        let name = descriptor.str_property("function")?.unwrap_or("and");
        let function = GateFunction::parse(name)
            .ok_or_else(|| LibraryError::invalid(&descriptor.name, format!("unknown gate function '{}'", name)))?;
        let inputs = descriptor.u64_or("inputs", 2)? as usize;
        let width = descriptor.width_or("width", 1)?;
        Self::new(function, inputs, width).map_err(|err| LibraryError::invalid(&descriptor.name, err.to_string()))
    }
}

impl ComponentLogic for Gate {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Custom
    }

    fn pins(&self) -> Vec<PinSpec> {
        let mut pins: Vec<PinSpec> = INPUT_NAMES[..self.inputs]
            .iter()
            .map(|name| PinSpec::input(name, self.width, SignalClass::Wire))
            .collect();
        pins.push(PinSpec::output("Y", self.width, SignalClass::Wire));
        pins
    }

    fn activation(&self) -> Activation {
        Activation::Combinational
    }

    fn power_on_state(&self) -> StateBlob {
        StateBlob::default()
    }

    fn step(&self, _tick: Tick, inputs: &Inputs, _state: &StateBlob) -> Result<StepResult, ComponentFault> {
        let values: Option<Vec<u64>> = INPUT_NAMES[..self.inputs]
            .iter()
            .map(|name| inputs.bits(name))
            .collect();
        let output = match values {
            Some(values) => PinValue::Driven(self.function.apply(&values, width_mask(self.width))),
            None => PinValue::HighZ,
        };
        Ok(StepResult::hold().drive("Y", output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(gate: &Gate, a: u64, b: u64) -> PinValue {
        let inputs = Inputs::default()
            .with("A", PinValue::Driven(a))
            .with("B", PinValue::Driven(b));
        gate.step(0, &inputs, &StateBlob::default()).unwrap().outputs["Y"]
    }

    #[test]
    fn test_truth_tables() {
        let cases = [
            (GateFunction::And, [0, 0, 0, 1]),
            (GateFunction::Or, [0, 1, 1, 1]),
            (GateFunction::Xor, [0, 1, 1, 0]),
            (GateFunction::Nand, [1, 1, 1, 0]),
            (GateFunction::Nor, [1, 0, 0, 0]),
        ];
        for (function, expected) in cases {
            let gate = Gate::new(function, 2, 1).unwrap();
            let got: Vec<u64> = [(0, 0), (0, 1), (1, 0), (1, 1)]
                .iter()
                .map(|(a, b)| eval(&gate, *a, *b).bits_or_zero())
                .collect();
            assert_eq!(got, expected, "{:?}", function);
        }
    }

    #[test]
    fn test_not_is_unary() {
        let gate = Gate::new(GateFunction::Not, 4, 4).unwrap();
        assert_eq!(gate.pins().len(), 2);
        let inputs = Inputs::default().with("A", PinValue::Driven(0b1010));
        let out = gate.step(0, &inputs, &StateBlob::default()).unwrap();
        assert_eq!(out.outputs["Y"], PinValue::Driven(0b0101));
    }

    #[test]
    fn test_floating_input_floats_output() {
        let gate = Gate::new(GateFunction::And, 2, 1).unwrap();
        let inputs = Inputs::default().with("A", PinValue::HIGH);
        let out = gate.step(0, &inputs, &StateBlob::default()).unwrap();
        assert_eq!(out.outputs["Y"], PinValue::HighZ);
    }

    #[test]
    fn test_descriptor() {
        let desc = ComponentDescriptor::new("u1", "gate")
            .with_property("function", "nor")
            .with_property("inputs", 3);
        let gate = Gate::from_descriptor(&desc).unwrap();
        assert_eq!(gate.pins().len(), 4);

        let bad = ComponentDescriptor::new("u2", "gate").with_property("function", "mux");
        assert!(Gate::from_descriptor(&bad).is_err());
    }
}
