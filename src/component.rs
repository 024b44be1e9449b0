//! The component contract.
//!
//! Component behaviour is a pure transition function over an opaque state
//! blob: `step(tick, inputs, state) -> (outputs, next_state)`. Logic objects
//! are immutable and never see the connection system; the engine marshals
//! every pin read and write on their behalf.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ComponentFault, LibraryError};
use crate::pin::{PinDirection, PinSpec, PinValue};
use crate::types::{ComponentId, PinId, Tick};

/// Closed set of component variants known to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Processor,
    Memory,
    Clock,
    Custom,
    Io,
}

impl ComponentKind {
    pub fn to_str(&self) -> &'static str {
        match self {
            ComponentKind::Processor => "processor",
            ComponentKind::Memory => "memory",
            ComponentKind::Clock => "clock",
            ComponentKind::Custom => "custom",
            ComponentKind::Io => "io",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockEdge {
    Rising,
    Falling,
}

impl ClockEdge {
    /// Whether moving from `previous` to `current` level is this edge.
    pub fn detect(&self, previous: bool, current: bool) -> bool {
        match self {
            ClockEdge::Rising => !previous && current,
            ClockEdge::Falling => previous && !current,
        }
    }
}

/// When the engine steps a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// Stepped first thing every tick, before any other component reads.
    Source,
    /// Sequential: stepped only on `edge` of the clock input `pin`.
    Clocked { pin: String, edge: ClockEdge },
    /// Stepped whenever an input changed since its last evaluation.
    Combinational,
}

impl Activation {
    pub fn rising(pin: &str) -> Self {
        Activation::Clocked {
            pin: pin.to_string(),
            edge: ClockEdge::Rising,
        }
    }

    pub fn is_combinational(&self) -> bool {
        matches!(self, Activation::Combinational)
    }
}

/// Opaque internal state of a component instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateBlob(Vec<u8>);

impl StateBlob {
    pub fn new(bytes: Vec<u8>) -> Self {
        StateBlob(bytes)
    }

    pub fn zeroed(len: usize) -> Self {
        StateBlob(vec![0; len])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Byte at `index`, zero when out of range.
    pub fn byte(&self, index: usize) -> u8 {
        self.0.get(index).copied().unwrap_or(0)
    }

    /// Set a byte, growing the blob if needed.
    pub fn set_byte(&mut self, index: usize, value: u8) {
        if index >= self.0.len() {
            self.0.resize(index + 1, 0);
        }
        self.0[index] = value;
    }

    /// Little-endian word of `len` bytes (at most 8) starting at `index`.
    pub fn word(&self, index: usize, len: usize) -> u64 {
        (0..len.min(8)).fold(0u64, |acc, i| acc | (self.byte(index + i) as u64) << (8 * i))
    }

    pub fn set_word(&mut self, index: usize, len: usize, value: u64) {
        for i in 0..len.min(8) {
            self.set_byte(index + i, (value >> (8 * i)) as u8);
        }
    }

    pub fn flag(&self, index: usize) -> bool {
        self.byte(index) != 0
    }

    pub fn set_flag(&mut self, index: usize, value: bool) {
        self.set_byte(index, value as u8);
    }
}

impl fmt::Display for StateBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SHOWN: usize = 16;
        for (i, byte) in self.0.iter().take(SHOWN).enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        if self.0.len() > SHOWN {
            write!(f, " .. ({} bytes)", self.0.len())?;
        }
        Ok(())
    }
}

/// Values on a component's readable pins as of the tick's snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inputs {
    values: BTreeMap<String, PinValue>,
}

impl Inputs {
    pub fn new(values: BTreeMap<String, PinValue>) -> Self {
        Inputs { values }
    }

    pub fn with(mut self, name: &str, value: PinValue) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    /// Value on a pin; unknown pins read as floating.
    pub fn get(&self, name: &str) -> PinValue {
        self.values.get(name).copied().unwrap_or(PinValue::HighZ)
    }

    pub fn bits(&self, name: &str) -> Option<u64> {
        self.get(name).bits()
    }

    pub fn is_high(&self, name: &str) -> bool {
        self.get(name).is_high()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PinValue)> {
        self.values.iter()
    }
}

/// What a step produced. Pins not mentioned in `outputs` keep their
/// previous drive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepResult {
    pub outputs: BTreeMap<String, PinValue>,
    pub next_state: Option<StateBlob>,
}

impl StepResult {
    pub fn hold() -> Self {
        StepResult::default()
    }

    pub fn drive(mut self, pin: &str, value: PinValue) -> Self {
        self.outputs.insert(pin.to_string(), value);
        self
    }

    pub fn with_state(mut self, state: StateBlob) -> Self {
        self.next_state = Some(state);
        self
    }
}

/// Behaviour of one component model.
pub trait ComponentLogic: Send + Sync {
    fn kind(&self) -> ComponentKind;

    /// Pins this logic expects, used when a descriptor declares none.
    fn pins(&self) -> Vec<PinSpec>;

    fn activation(&self) -> Activation;

    /// Documented power-on state.
    fn power_on_state(&self) -> StateBlob;

    /// Outputs driven immediately after power-on or reset.
    fn power_on_outputs(&self, _state: &StateBlob) -> BTreeMap<String, PinValue> {
        BTreeMap::new()
    }

    fn step(&self, tick: Tick, inputs: &Inputs, state: &StateBlob) -> Result<StepResult, ComponentFault>;

    /// Short human readable view of the state, for monitors.
    fn describe(&self, state: &StateBlob) -> String {
        state.to_string()
    }
}

/// Serializable description of a component instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    pub name: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ComponentKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pins: Vec<PinSpec>,
    #[serde(default)]
    pub delay: Tick,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<StateBlob>,
}

impl ComponentDescriptor {
    pub fn new(name: &str, model: &str) -> Self {
        ComponentDescriptor {
            name: name.to_string(),
            model: model.to_string(),
            kind: None,
            pins: Vec::new(),
            delay: 0,
            properties: BTreeMap::new(),
            initial_state: None,
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn with_kind(mut self, kind: ComponentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_pins(mut self, pins: Vec<PinSpec>) -> Self {
        self.pins = pins;
        self
    }

    pub fn with_delay(mut self, delay: Tick) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_initial_state(mut self, state: StateBlob) -> Self {
        self.initial_state = Some(state);
        self
    }

    pub fn u64_property(&self, key: &str) -> Result<Option<u64>, LibraryError> {
        match self.properties.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| LibraryError::invalid(&self.name, format!("'{}' must be an unsigned integer", key))),
        }
    }

    pub fn u64_or(&self, key: &str, default: u64) -> Result<u64, LibraryError> {
        Ok(self.u64_property(key)?.unwrap_or(default))
    }

    pub fn str_property(&self, key: &str) -> Result<Option<&str>, LibraryError> {
        match self.properties.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_str()
                .map(Some)
                .ok_or_else(|| LibraryError::invalid(&self.name, format!("'{}' must be a string", key))),
        }
    }

    /// A byte array property, given as a JSON array of numbers.
    pub fn bytes_property(&self, key: &str) -> Result<Option<Vec<u8>>, LibraryError> {
        let Some(value) = self.properties.get(key) else {
            return Ok(None);
        };
        let invalid = || LibraryError::invalid(&self.name, format!("'{}' must be an array of bytes", key));
        let items = value.as_array().ok_or_else(invalid)?;
        items
            .iter()
            .map(|item| {
                item.as_u64()
                    .filter(|b| *b <= u8::MAX as u64)
                    .map(|b| b as u8)
                    .ok_or_else(invalid)
            })
            .collect::<Result<Vec<u8>, _>>()
            .map(Some)
    }

    /// Width property bounded to 1..=64 bits.
    pub fn width_or(&self, key: &str, default: u8) -> Result<u8, LibraryError> {
        let width = self.u64_or(key, default as u64)?;
        if width == 0 || width > 64 {
            return Err(LibraryError::invalid(
                &self.name,
                format!("'{}' must be between 1 and 64 bits", key),
            ));
        }
        Ok(width as u8)
    }
}

/// A component instance registered with the engine.
pub struct Component {
    pub id: ComponentId,
    pub descriptor: ComponentDescriptor,
    logic: Box<dyn ComponentLogic>,
    pins: Vec<(String, PinId)>,
    activation: Activation,
    pub(crate) clock: Option<(PinId, ClockEdge)>,
    pub(crate) state: StateBlob,
    pub(crate) last_clock: bool,
    pub(crate) last_inputs: Option<BTreeMap<String, PinValue>>,
    pub(crate) evaluations: u64,
}

impl Component {
    pub(crate) fn new(
        id: ComponentId,
        descriptor: ComponentDescriptor,
        logic: Box<dyn ComponentLogic>,
        pins: Vec<(String, PinId)>,
    ) -> Self {
        let activation = logic.activation();
        let clock = match &activation {
            Activation::Clocked { pin, edge } => pins
                .iter()
                .find(|(name, _)| name == pin)
                .map(|(_, id)| (*id, *edge)),
            _ => None,
        };
        let mut component = Component {
            id,
            descriptor,
            logic,
            pins,
            activation,
            clock,
            state: StateBlob::default(),
            last_clock: false,
            last_inputs: None,
            evaluations: 0,
        };
        component.reset();
        component
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn kind(&self) -> ComponentKind {
        self.logic.kind()
    }

    pub fn delay(&self) -> Tick {
        self.descriptor.delay
    }

    pub fn activation(&self) -> &Activation {
        &self.activation
    }

    pub fn logic(&self) -> &dyn ComponentLogic {
        self.logic.as_ref()
    }

    /// Pins in declaration order.
    pub fn pins(&self) -> impl Iterator<Item = (&str, PinId)> {
        self.pins.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn pin(&self, name: &str) -> Option<PinId> {
        self.pins.iter().find(|(n, _)| n == name).map(|(_, id)| *id)
    }

    pub fn state(&self) -> &StateBlob {
        &self.state
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    pub fn power_on_state(&self) -> StateBlob {
        self.descriptor
            .initial_state
            .clone()
            .unwrap_or_else(|| self.logic.power_on_state())
    }

    /// Restore the power-on state and forget edge and input history.
    pub fn reset(&mut self) {
        self.state = self.power_on_state();
        self.last_clock = false;
        self.last_inputs = None;
        self.evaluations = 0;
    }

    pub fn describe(&self) -> String {
        self.logic.describe(&self.state)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id)
            .field("name", &self.descriptor.name)
            .field("model", &self.descriptor.model)
            .field("activation", &self.activation)
            .field("state", &self.state)
            .finish()
    }
}

/// Check that the pins a descriptor declares cover what the logic needs.
pub(crate) fn check_pins(
    descriptor: &ComponentDescriptor,
    required: &[PinSpec],
) -> Result<Vec<PinSpec>, LibraryError> {
    if descriptor.pins.is_empty() {
        return Ok(required.to_vec());
    }
    for need in required {
        let Some(declared) = descriptor.pins.iter().find(|p| p.name == need.name) else {
            return Err(LibraryError::invalid(
                &descriptor.name,
                format!("missing pin '{}'", need.name),
            ));
        };
        let direction_ok = declared.direction == need.direction
            || declared.direction == PinDirection::Bidirectional;
        if declared.width != need.width || !direction_ok {
            return Err(LibraryError::invalid(
                &descriptor.name,
                format!("pin '{}' does not match the model", need.name),
            ));
        }
    }
    for (i, pin) in descriptor.pins.iter().enumerate() {
        if pin.width == 0 || pin.width > 64 {
            return Err(LibraryError::invalid(
                &descriptor.name,
                format!("pin '{}' has width {}", pin.name, pin.width),
            ));
        }
        if descriptor.pins[..i].iter().any(|p| p.name == pin.name) {
            return Err(LibraryError::invalid(
                &descriptor.name,
                format!("duplicate pin '{}'", pin.name),
            ));
        }
    }
    Ok(descriptor.pins.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin::SignalClass;

    struct Inverter;

    impl ComponentLogic for Inverter {
        fn kind(&self) -> ComponentKind {
            ComponentKind::Custom
        }

        fn pins(&self) -> Vec<PinSpec> {
            vec![
                PinSpec::input("A", 1, SignalClass::Wire),
                PinSpec::output("Y", 1, SignalClass::Wire),
            ]
        }

        fn activation(&self) -> Activation {
            Activation::Combinational
        }

        fn power_on_state(&self) -> StateBlob {
            StateBlob::zeroed(1)
        }

        fn step(&self, _tick: Tick, inputs: &Inputs, state: &StateBlob) -> Result<StepResult, ComponentFault> {
            let mut next = state.clone();
            next.set_byte(0, state.byte(0).wrapping_add(1));
            let out = match inputs.get("A").to_bool() {
                Some(a) => PinValue::from_bool(!a),
                None => PinValue::HighZ,
            };
            Ok(StepResult::hold().drive("Y", out).with_state(next))
        }
    }

    #[test]
    fn test_step_is_pure() {
        let logic = Inverter;
        let state = logic.power_on_state();
        let inputs = Inputs::default().with("A", PinValue::LOW);

        let first = logic.step(0, &inputs, &state).unwrap();
        let second = logic.step(0, &inputs, &state).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.outputs["Y"], PinValue::HIGH);
        assert_eq!(state.byte(0), 0);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let pins = vec![("A".to_string(), PinId::new(0)), ("Y".to_string(), PinId::new(1))];
        let mut component = Component::new(
            ComponentId::new(0),
            ComponentDescriptor::new("inv", "inverter"),
            Box::new(Inverter),
            pins,
        );
        component.state.set_byte(0, 9);
        component.last_clock = true;

        component.reset();
        let once = component.state.clone();
        component.reset();
        assert_eq!(component.state, once);
        assert_eq!(once, StateBlob::zeroed(1));
        assert!(!component.last_clock);
    }

    #[test]
    fn test_state_blob_words() {
        let mut blob = StateBlob::zeroed(2);
        blob.set_word(1, 2, 0xBEEF);
        assert_eq!(blob.len(), 3);
        assert_eq!(blob.word(1, 2), 0xBEEF);
        assert_eq!(blob.byte(10), 0);
        assert_eq!(blob.to_string(), "00 EF BE");
    }

    #[test]
    fn test_edge_detection() {
        assert!(ClockEdge::Rising.detect(false, true));
        assert!(!ClockEdge::Rising.detect(true, true));
        assert!(ClockEdge::Falling.detect(true, false));
    }

    #[test]
    fn test_descriptor_properties() {
        let desc = ComponentDescriptor::new("rom", "rom")
            .with_property("size", 16)
            .with_property("image", vec![1, 2, 300]);
        assert_eq!(desc.u64_or("size", 0).unwrap(), 16);
        assert_eq!(desc.u64_or("missing", 4).unwrap(), 4);
        assert!(desc.bytes_property("image").is_err());
        assert!(desc.str_property("size").is_err());
    }

    #[test]
    fn test_declared_pins_must_cover_model() {
        let logic = Inverter;
        let desc = ComponentDescriptor::new("inv", "inverter")
            .with_pins(vec![PinSpec::input("A", 1, SignalClass::Wire)]);
        assert!(check_pins(&desc, &logic.pins()).is_err());

        let desc = ComponentDescriptor::new("inv", "inverter");
        assert_eq!(check_pins(&desc, &logic.pins()).unwrap().len(), 2);
    }
}
