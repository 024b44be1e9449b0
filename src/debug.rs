//! Passive inspection of a running board.
//!
//! Observers subscribe to the engine and receive an immutable [`Snapshot`]
//! after every tick. They can ask the run to stop but never touch engine or
//! component state. [`Debugger`] is the stock observer: a snapshot ring,
//! edge-triggered breakpoints and a trace of watched pins.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::component::StateBlob;
use crate::engine::{Engine, EngineState, ObserverId, RunSummary};
use crate::error::{EngineError, SimulationFault};
use crate::pin::PinValue;
use crate::types::{ComponentId, PinId, Tick};

/// Committed pin values and component states at a tick boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Ticks completed so far.
    pub tick: Tick,
    pub state: EngineState,
    pub pins: BTreeMap<PinId, PinValue>,
    pub states: BTreeMap<ComponentId, StateBlob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<SimulationFault>,
}

impl Snapshot {
    pub fn pin(&self, pin: PinId) -> PinValue {
        self.pins.get(&pin).copied().unwrap_or_default()
    }

    pub fn state_of(&self, component: ComponentId) -> Option<&StateBlob> {
        self.states.get(&component)
    }
}

/// What an observer wants the run to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Watch {
    Continue,
    Break(String),
}

/// A per-tick notification sink.
pub trait TickObserver {
    fn on_tick(&mut self, snapshot: &Arc<Snapshot>) -> Watch;

    fn on_reset(&mut self) {}
}

/// Conditions checked against every snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Breakpoint {
    PinEquals { pin: PinId, value: PinValue },
    PinChanged { pin: PinId },
    TickReached { tick: Tick },
    EngineHalted,
    ComponentFaulted { component: ComponentId },
    StateByteEquals { component: ComponentId, index: usize, value: u8 },
}

impl Breakpoint {
    fn holds(&self, snapshot: &Snapshot, previous: Option<&Snapshot>) -> bool {
        match self {
            Breakpoint::PinEquals { pin, value } => snapshot.pin(*pin) == *value,
            Breakpoint::PinChanged { pin } => {
                previous.is_some_and(|prev| prev.pin(*pin) != snapshot.pin(*pin))
            }
            Breakpoint::TickReached { tick } => snapshot.tick >= *tick,
            Breakpoint::EngineHalted => snapshot.state == EngineState::Halted,
            Breakpoint::ComponentFaulted { component } => snapshot
                .fault
                .as_ref()
                .is_some_and(|fault| fault.components().contains(component)),
            Breakpoint::StateByteEquals { component, index, value } => snapshot
                .state_of(*component)
                .is_some_and(|state| state.byte(*index) == *value),
        }
    }

    /// Breakpoints fire when their condition becomes true, not on every tick
    /// it stays true.
    fn triggered(&self, snapshot: &Snapshot, previous: Option<&Snapshot>) -> bool {
        if !self.holds(snapshot, previous) {
            return false;
        }
        match self {
            Breakpoint::PinChanged { .. } => true,
            _ => !previous.is_some_and(|prev| self.holds(prev, None)),
        }
    }
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Breakpoint::PinEquals { pin, value } => write!(f, "{} == {}", pin, value),
            Breakpoint::PinChanged { pin } => write!(f, "{} changed", pin),
            Breakpoint::TickReached { tick } => write!(f, "tick {}", tick),
            Breakpoint::EngineHalted => write!(f, "engine halted"),
            Breakpoint::ComponentFaulted { component } => write!(f, "{} faulted", component),
            Breakpoint::StateByteEquals { component, index, value } => {
                write!(f, "{}[{}] == {:#04x}", component, index, value)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BreakpointId(pub u32);

impl fmt::Display for BreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakpointHit {
    pub id: BreakpointId,
    pub tick: Tick,
    pub condition: Breakpoint,
}

/// A value change on a watched pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    pub tick: Tick,
    pub pin: PinId,
    pub from: Option<PinValue>,
    pub to: PinValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Snapshots kept in the history ring.
    pub history: usize,
    /// Keep every n-th tick's snapshot.
    pub interval: u64,
    pub trace_capacity: usize,
}

impl Default for DebugConfig {
    fn default() -> Self {
        DebugConfig {
            history: 64,
            interval: 1,
            trace_capacity: 1024,
        }
    }
}

#[derive(Debug, Default)]
pub struct Debugger {
    config: DebugConfig,
    history: VecDeque<Arc<Snapshot>>,
    previous: Option<Arc<Snapshot>>,
    breakpoints: BTreeMap<BreakpointId, Breakpoint>,
    next_breakpoint: u32,
    hits: Vec<BreakpointHit>,
    watches: BTreeSet<PinId>,
    trace: VecDeque<TraceEntry>,
    ticks_seen: u64,
    /// Record hits without asking the run to stop.
    pass_through: bool,
}

impl Debugger {
    pub fn new(config: DebugConfig) -> Self {
        Debugger {
            config,
            ..Debugger::default()
        }
    }

    pub fn set_breakpoint(&mut self, condition: Breakpoint) -> BreakpointId {
        let id = BreakpointId(self.next_breakpoint);
        self.next_breakpoint += 1;
        self.breakpoints.insert(id, condition);
        id
    }

    pub fn remove_breakpoint(&mut self, id: BreakpointId) -> Option<Breakpoint> {
        self.breakpoints.remove(&id)
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = (BreakpointId, &Breakpoint)> {
        self.breakpoints.iter().map(|(id, bp)| (*id, bp))
    }

    pub fn hits(&self) -> &[BreakpointHit] {
        &self.hits
    }

    pub fn watch(&mut self, pin: PinId) {
        self.watches.insert(pin);
    }

    pub fn unwatch(&mut self, pin: PinId) -> bool {
        self.watches.remove(&pin)
    }

    /// The last `n` trace entries, oldest first.
    pub fn recent_traces(&self, n: usize) -> Vec<TraceEntry> {
        let skip = self.trace.len().saturating_sub(n);
        self.trace.iter().skip(skip).cloned().collect()
    }

    pub fn history(&self) -> impl Iterator<Item = &Arc<Snapshot>> {
        self.history.iter()
    }

    pub fn latest(&self) -> Option<&Arc<Snapshot>> {
        self.previous.as_ref()
    }

    /// Snapshot kept for the given tick, if it is still in the ring.
    pub fn at_tick(&self, tick: Tick) -> Option<&Arc<Snapshot>> {
        self.history.iter().rev().find(|s| s.tick == tick)
    }

    pub fn ticks_seen(&self) -> u64 {
        self.ticks_seen
    }

    pub fn set_pass_through(&mut self, pass_through: bool) {
        self.pass_through = pass_through;
    }

    fn record_history(&mut self, snapshot: &Arc<Snapshot>) {
        if self.config.history == 0 || snapshot.tick % self.config.interval.max(1) != 0 {
            return;
        }
        if self.history.len() >= self.config.history {
            self.history.pop_front();
        }
        self.history.push_back(Arc::clone(snapshot));
    }

    fn record_trace(&mut self, snapshot: &Snapshot) {
        for pin in &self.watches {
            let to = snapshot.pin(*pin);
            let from = self.previous.as_ref().map(|prev| prev.pin(*pin));
            if from == Some(to) {
                continue;
            }
            if self.config.trace_capacity == 0 {
                break;
            }
            if self.trace.len() >= self.config.trace_capacity {
                self.trace.pop_front();
            }
            self.trace.push_back(TraceEntry {
                tick: snapshot.tick,
                pin: *pin,
                from,
                to,
            });
        }
    }
}

impl TickObserver for Debugger {
    fn on_tick(&mut self, snapshot: &Arc<Snapshot>) -> Watch {
        self.ticks_seen += 1;
        self.record_history(snapshot);
        self.record_trace(snapshot);

        let previous = self.previous.as_deref();
        let fired: Vec<(BreakpointId, Breakpoint)> = self
            .breakpoints
            .iter()
            .filter(|(_, bp)| bp.triggered(snapshot, previous))
            .map(|(id, bp)| (*id, bp.clone()))
            .collect();
        self.previous = Some(Arc::clone(snapshot));

        let Some((first, condition)) = fired.first().cloned() else {
            return Watch::Continue;
        };
        for (id, condition) in fired {
            info!(breakpoint = %id, tick = snapshot.tick, %condition, "breakpoint hit");
            self.hits.push(BreakpointHit {
                id,
                tick: snapshot.tick,
                condition,
            });
        }
        if self.pass_through {
            return Watch::Continue;
        }
        Watch::Break(format!("breakpoint {} ({})", first, condition))
    }

    fn on_reset(&mut self) {
        self.history.clear();
        self.previous = None;
        self.trace.clear();
        self.ticks_seen = 0;
    }
}

/// A [`Debugger`] attached to an engine.
#[derive(Debug, Clone)]
pub struct DebugSession {
    debugger: Arc<Mutex<Debugger>>,
    observer: ObserverId,
}

impl DebugSession {
    pub fn attach(engine: &mut Engine, config: DebugConfig) -> Self {
        let debugger = Arc::new(Mutex::new(Debugger::new(config)));
        let observer = engine.subscribe(debugger.clone());
        DebugSession { debugger, observer }
    }

    pub fn detach(self, engine: &mut Engine) -> bool {
        engine.unsubscribe(self.observer)
    }

    pub fn debugger(&self) -> parking_lot::MutexGuard<'_, Debugger> {
        self.debugger.lock()
    }

    pub fn set_breakpoint(&self, condition: Breakpoint) -> BreakpointId {
        self.debugger.lock().set_breakpoint(condition)
    }

    pub fn remove_breakpoint(&self, id: BreakpointId) -> Option<Breakpoint> {
        self.debugger.lock().remove_breakpoint(id)
    }

    pub fn watch(&self, pin: PinId) {
        self.debugger.lock().watch(pin);
    }

    /// Advance up to `n` ticks, evaluating breakpoints after each one. Stops
    /// after the first tick on which a breakpoint fires; the summary's
    /// reason says which.
    pub fn step_over(&self, engine: &mut Engine, n: u64) -> Result<RunSummary, EngineError> {
        engine.step(n)
    }

    /// Advance exactly `n` ticks, recording every breakpoint hit on the way
    /// without stopping. Other observers can still end the run early.
    pub fn step_through(&self, engine: &mut Engine, n: u64) -> Result<RunSummary, EngineError> {
        let previous = std::mem::replace(&mut self.debugger.lock().pass_through, true);
        let result = engine.step(n);
        self.debugger.lock().pass_through = previous;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(tick: Tick, pin: u64) -> Arc<Snapshot> {
        Arc::new(Snapshot {
            tick,
            state: EngineState::Running,
            pins: BTreeMap::from([(PinId::new(0), PinValue::Driven(pin))]),
            states: BTreeMap::new(),
            fault: None,
        })
    }

    #[test]
    fn test_breakpoint_fires_on_rising_condition() {
        let mut debugger = Debugger::default();
        let id = debugger.set_breakpoint(Breakpoint::PinEquals {
            pin: PinId::new(0),
            value: PinValue::HIGH,
        });

        assert_eq!(debugger.on_tick(&snapshot(1, 0)), Watch::Continue);
        assert!(matches!(debugger.on_tick(&snapshot(2, 1)), Watch::Break(_)));
        assert_eq!(debugger.on_tick(&snapshot(3, 1)), Watch::Continue);
        assert_eq!(debugger.on_tick(&snapshot(4, 0)), Watch::Continue);
        assert!(matches!(debugger.on_tick(&snapshot(5, 1)), Watch::Break(_)));

        let ticks: Vec<Tick> = debugger.hits().iter().map(|h| h.tick).collect();
        assert_eq!(ticks, vec![2, 5]);
        assert_eq!(debugger.hits()[0].id, id);
    }

    #[test]
    fn test_removed_breakpoint_never_fires() {
        let mut debugger = Debugger::default();
        let id = debugger.set_breakpoint(Breakpoint::TickReached { tick: 2 });
        assert!(debugger.remove_breakpoint(id).is_some());
        assert_eq!(debugger.on_tick(&snapshot(2, 0)), Watch::Continue);
        assert!(debugger.hits().is_empty());
    }

    #[test]
    fn test_history_ring_and_interval() {
        let mut debugger = Debugger::new(DebugConfig {
            history: 2,
            interval: 2,
            trace_capacity: 8,
        });
        for tick in 1..=6 {
            debugger.on_tick(&snapshot(tick, tick));
        }
        let kept: Vec<Tick> = debugger.history().map(|s| s.tick).collect();
        assert_eq!(kept, vec![4, 6]);
        assert!(debugger.at_tick(4).is_some());
        assert!(debugger.at_tick(5).is_none());
        assert_eq!(debugger.latest().map(|s| s.tick), Some(6));
    }

    #[test]
    fn test_watch_records_changes_only() {
        let mut debugger = Debugger::default();
        debugger.watch(PinId::new(0));
        for (tick, value) in [(1, 0), (2, 0), (3, 1), (4, 1), (5, 0)] {
            debugger.on_tick(&snapshot(tick, value));
        }
        let traces = debugger.recent_traces(10);
        let ticks: Vec<Tick> = traces.iter().map(|t| t.tick).collect();
        assert_eq!(ticks, vec![1, 3, 5]);
        assert_eq!(traces[0].from, None);
        assert_eq!(traces[1].from, Some(PinValue::LOW));
        assert_eq!(debugger.recent_traces(1)[0].to, PinValue::LOW);
    }

    #[test]
    fn test_reset_clears_history_but_keeps_breakpoints() {
        let mut debugger = Debugger::default();
        debugger.set_breakpoint(Breakpoint::EngineHalted);
        debugger.on_tick(&snapshot(1, 0));
        debugger.on_reset();
        assert_eq!(debugger.history().count(), 0);
        assert_eq!(debugger.ticks_seen(), 0);
        assert_eq!(debugger.breakpoints().count(), 1);
    }

    #[test]
    fn test_pass_through_records_without_breaking() {
        let mut debugger = Debugger::default();
        debugger.set_pass_through(true);
        debugger.set_breakpoint(Breakpoint::PinChanged { pin: PinId::new(0) });

        for (tick, value) in [(1, 0), (2, 1), (3, 0)] {
            assert_eq!(debugger.on_tick(&snapshot(tick, value)), Watch::Continue);
        }
        let ticks: Vec<Tick> = debugger.hits().iter().map(|h| h.tick).collect();
        assert_eq!(ticks, vec![2, 3]);
    }

    #[test]
    fn test_breakpoint_display() {
        let bp = Breakpoint::StateByteEquals {
            component: ComponentId::new(2),
            index: 1,
            value: 0x0F,
        };
        assert_eq!(bp.to_string(), "C2[1] == 0x0f");
    }
}
