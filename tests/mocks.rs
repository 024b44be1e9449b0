//! Mock component logic and observers shared by the integration tests.

#![allow(dead_code)]

use rusty_board::component::{
    Activation, ComponentDescriptor, ComponentKind, ComponentLogic, Inputs, StateBlob, StepResult,
};
use rusty_board::debug::{Snapshot, TickObserver, Watch};
use rusty_board::engine::{Engine, EngineConfig};
use rusty_board::error::ComponentFault;
use rusty_board::pin::{PinSpec, PinValue, SignalClass};
use rusty_board::types::{ComponentId, Tick};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Source that drives `OUT` from a script, one entry per tick. The last
/// entry repeats once the script runs out.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    pub width: u8,
    pub script: Vec<PinValue>,
}

impl ScriptedSource {
    pub fn constant(width: u8, value: u64) -> Self {
        ScriptedSource {
            width,
            script: vec![PinValue::Driven(value)],
        }
    }
}

impl ComponentLogic for ScriptedSource {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Custom
    }

    fn pins(&self) -> Vec<PinSpec> {
        vec![PinSpec::output("OUT", self.width, SignalClass::Wire)]
    }

    fn activation(&self) -> Activation {
        Activation::Source
    }

    fn power_on_state(&self) -> StateBlob {
        StateBlob::default()
    }

    fn step(&self, tick: Tick, _inputs: &Inputs, _state: &StateBlob) -> Result<StepResult, ComponentFault> {
        let index = (tick as usize).min(self.script.len().saturating_sub(1));
        let value = self.script.get(index).copied().unwrap_or(PinValue::HighZ);
        Ok(StepResult::hold().drive("OUT", value))
    }
}

/// Combinational `Y = !A`, floating input read as low.
#[derive(Debug, Clone, Copy)]
pub struct MockInverter;

impl ComponentLogic for MockInverter {
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
        StateBlob::default()
    }

    fn step(&self, _tick: Tick, inputs: &Inputs, _state: &StateBlob) -> Result<StepResult, ComponentFault> {
        Ok(StepResult::hold().drive("Y", PinValue::from_bool(!inputs.is_high("A"))))
    }
}

/// Combinational `Y = A`.
#[derive(Debug, Clone, Copy)]
pub struct MockBuffer;

impl ComponentLogic for MockBuffer {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Custom
    }

    fn pins(&self) -> Vec<PinSpec> {
        vec![
            PinSpec::input("A", 8, SignalClass::Wire),
            PinSpec::output("Y", 8, SignalClass::Wire),
        ]
    }

    fn activation(&self) -> Activation {
        Activation::Combinational
    }

    fn power_on_state(&self) -> StateBlob {
        StateBlob::default()
    }

    fn step(&self, _tick: Tick, inputs: &Inputs, _state: &StateBlob) -> Result<StepResult, ComponentFault> {
        Ok(StepResult::hold().drive("Y", inputs.get("A")))
    }
}

/// Counts rising edges of `CLK` and drives the count on `COUNT`. Faults
/// once the count would pass `limit`.
#[derive(Debug, Clone, Copy)]
pub struct MockCounter {
    pub limit: Option<u64>,
}

impl MockCounter {
    pub fn count(state: &StateBlob) -> u64 {
        state.word(0, 8)
    }
}

impl ComponentLogic for MockCounter {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Custom
    }

    fn pins(&self) -> Vec<PinSpec> {
        vec![
            PinSpec::input("CLK", 1, SignalClass::Clock),
            PinSpec::output("COUNT", 8, SignalClass::Data),
        ]
    }

    fn activation(&self) -> Activation {
        Activation::rising("CLK")
    }

    fn power_on_state(&self) -> StateBlob {
        StateBlob::zeroed(8)
    }

    fn power_on_outputs(&self, _state: &StateBlob) -> BTreeMap<String, PinValue> {
        BTreeMap::from([("COUNT".to_string(), PinValue::Driven(0))])
    }

    fn step(&self, _tick: Tick, _inputs: &Inputs, state: &StateBlob) -> Result<StepResult, ComponentFault> {
        let next_count = Self::count(state) + 1;
        if self.limit.is_some_and(|limit| next_count > limit) {
            return Err(ComponentFault::new(format!("counter overflow at {}", next_count)));
        }
        let mut next = state.clone();
        next.set_word(0, 8, next_count);
        Ok(StepResult::hold()
            .drive("COUNT", PinValue::Driven(next_count & 0xFF))
            .with_state(next))
    }
}

/// Keeps every snapshot it is shown. Asks the run to stop at `break_at`.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub snapshots: Vec<Arc<Snapshot>>,
    pub resets: usize,
    pub break_at: Option<Tick>,
}

impl RecordingObserver {
    pub fn ticks(&self) -> Vec<Tick> {
        self.snapshots.iter().map(|s| s.tick).collect()
    }
}

impl TickObserver for RecordingObserver {
    fn on_tick(&mut self, snapshot: &Arc<Snapshot>) -> Watch {
        self.snapshots.push(Arc::clone(snapshot));
        match self.break_at {
            Some(tick) if snapshot.tick == tick => Watch::Break(format!("reached tick {}", tick)),
            _ => Watch::Continue,
        }
    }

    fn on_reset(&mut self) {
        self.resets += 1;
        self.snapshots.clear();
    }
}

pub fn add(engine: &mut Engine, name: &str, logic: impl ComponentLogic + 'static) -> ComponentId {
    engine
        .add_component(ComponentDescriptor::new(name, "mock"), Box::new(logic))
        .unwrap()
}

/// A period-2 clock driving a toggle flip-flop.
pub fn toggle_board() -> (Engine, ComponentId, ComponentId) {
    toggle_board_with(EngineConfig::default())
}

pub fn toggle_board_with(config: EngineConfig) -> (Engine, ComponentId, ComponentId) {
    let mut engine = Engine::new(config);
    let clock = engine
        .create_component(ComponentDescriptor::new("CLOCK", "clock").with_property("period", 2))
        .unwrap();
    let ff = engine
        .create_component(ComponentDescriptor::new("FF", "toggle_flip_flop"))
        .unwrap();
    engine.connect_by_name((clock, "CLK"), (ff, "CLK")).unwrap();
    (engine, clock, ff)
}
