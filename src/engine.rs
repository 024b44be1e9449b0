//! The simulation engine.
//!
//! Owns the components and the connection system and advances logical time.
//! Every tick runs in fixed phases:
//!
//! 1. clock phase: due delayed writes and every `Source` component are
//!    committed first, so clock edges are visible to the rest of the tick;
//! 2. sequential components whose clock saw their active edge, plus
//!    combinational components whose inputs changed, step against the
//!    committed values;
//! 3. all outputs are committed at once;
//! 4. combinational components re-step until no input changes, bounded by
//!    the settle-iteration cap;
//! 5. next states are applied, the tick counter advances and observers are
//!    notified.
//!
//! A fault in any phase rewinds the tick: committed values, clock edge
//! memory and queued delayed writes return to the tick boundary, so a halted
//! engine shows the last consistent state.
//!
//! Components are always visited in registration (id) order and the
//! parallel compute phase merges results in that same order, so runs over
//! the same board and stimuli are identical.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

use crate::bus::NetPolicy;
use crate::component::{
    check_pins, Activation, Component, ComponentDescriptor, ComponentLogic, Inputs, StateBlob, StepResult,
};
use crate::connection::{ConnectionStats, ConnectionSystem, DriveState};
use crate::debug::{Snapshot, TickObserver, Watch};
use crate::error::{ComponentFault, DriveConflict, EngineError, GraphError, LibraryError, SimulationFault};
use crate::library::ComponentLibrary;
use crate::pin::{PinValue, SignalClass};
use crate::types::{ComponentId, NetId, PinId, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Running,
    Paused,
    Halted,
}

/// Engine tuning. Every field has a working default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum combinational passes per tick. `None` means the number of
    /// combinational components plus one.
    pub settle_iteration_cap: Option<usize>,
    /// `run()` pauses once the tick counter reaches this value.
    pub tick_limit: Option<Tick>,
    /// Number of recent non-fatal drive conflicts kept for inspection.
    pub warning_capacity: usize,
    /// Step independent components on worker threads.
    pub parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            settle_iteration_cap: None,
            tick_limit: None,
            warning_capacity: 256,
            parallel: false,
        }
    }
}

/// Pause and cancel requests, honoured at the next tick boundary.
#[derive(Debug, Clone, Default)]
pub struct ControlHandle {
    pause: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl ControlHandle {
    pub fn pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn take_pause(&self) -> bool {
        self.pause.swap(false, Ordering::SeqCst)
    }

    fn take_cancel(&self) -> bool {
        self.cancel.swap(false, Ordering::SeqCst)
    }

    fn clear(&self) {
        self.pause.store(false, Ordering::SeqCst);
        self.cancel.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The requested number of ticks ran.
    Completed,
    Paused,
    Cancelled,
    TickLimit,
    /// An observer asked to stop.
    Breakpoint(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub tick: Tick,
    pub reason: StopReason,
}

/// A non-fatal drive conflict, kept in a bounded log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineWarning {
    pub tick: Tick,
    pub conflict: DriveConflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub tick: Tick,
    pub state: EngineState,
    pub components: usize,
    pub combinational: usize,
    pub evaluations: u64,
    pub last_settle_iterations: usize,
    pub warnings: u64,
    pub delayed_writes: usize,
    pub connections: ConnectionStats,
}

/// A construction problem found by [`Engine::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub component: ComponentId,
    pub pin: PinId,
    pub message: String,
}

pub type SharedObserver = Arc<Mutex<dyn TickObserver + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

struct Job<'a> {
    logic: &'a dyn ComponentLogic,
    inputs: Inputs,
    state: &'a StateBlob,
}

pub struct Engine {
    config: EngineConfig,
    library: ComponentLibrary,
    connections: ConnectionSystem,
    components: BTreeMap<ComponentId, Component>,
    next_component: u32,
    state: EngineState,
    tick: Tick,
    fault: Option<SimulationFault>,
    delayed: BTreeMap<Tick, Vec<(PinId, PinValue)>>,
    observers: Vec<(ObserverId, SharedObserver)>,
    next_observer: u64,
    control: ControlHandle,
    warnings: VecDeque<EngineWarning>,
    warning_total: u64,
    evaluations: u64,
    last_settle_iterations: usize,
    undo: Option<TickUndo>,
}

/// Engine state as it was at the start of the tick in progress.
#[derive(Debug, Default)]
struct TickUndo {
    drives: DriveState,
    delayed: BTreeMap<Tick, Vec<(PinId, PinValue)>>,
    clocks: BTreeMap<ComponentId, bool>,
    inputs: BTreeMap<ComponentId, Option<BTreeMap<String, PinValue>>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("tick", &self.tick)
            .field("components", &self.components.len())
            .field("observers", &self.observers.len())
            .field("fault", &self.fault)
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_library(config, ComponentLibrary::new())
    }

    pub fn with_library(config: EngineConfig, library: ComponentLibrary) -> Self {
        Engine {
            config,
            library,
            connections: ConnectionSystem::new(),
            components: BTreeMap::new(),
            next_component: 0,
            state: EngineState::Idle,
            tick: 0,
            fault: None,
            delayed: BTreeMap::new(),
            observers: Vec::new(),
            next_observer: 0,
            control: ControlHandle::default(),
            warnings: VecDeque::new(),
            warning_total: 0,
            evaluations: 0,
            last_settle_iterations: 0,
            undo: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn library(&self) -> &ComponentLibrary {
        &self.library
    }

    pub fn library_mut(&mut self) -> &mut ComponentLibrary {
        &mut self.library
    }

    // ---- construction ----------------------------------------------------

    /// Build a component from the library and register it.
    pub fn create_component(&mut self, descriptor: ComponentDescriptor) -> Result<ComponentId, EngineError> {
        let logic = self.library.build(&descriptor)?;
        self.add_component(descriptor, logic)
    }

    /// Register a component with caller-supplied logic.
    pub fn add_component(
        &mut self,
        descriptor: ComponentDescriptor,
        logic: Box<dyn ComponentLogic>,
    ) -> Result<ComponentId, EngineError> {
        let id = ComponentId::new(self.next_component);
        self.insert_component(id, descriptor, logic, None)?;
        Ok(id)
    }

    pub(crate) fn insert_component(
        &mut self,
        id: ComponentId,
        descriptor: ComponentDescriptor,
        logic: Box<dyn ComponentLogic>,
        pin_ids: Option<&[PinId]>,
    ) -> Result<(), EngineError> {
        if self.components.contains_key(&id) {
            return Err(LibraryError::invalid(&descriptor.name, format!("component id {} is taken", id)).into());
        }
        let specs = check_pins(&descriptor, &logic.pins())?;
        let activation = logic.activation();
        if activation.is_combinational() && descriptor.delay > 0 {
            return Err(LibraryError::invalid(&descriptor.name, "combinational components must have delay 0").into());
        }
        if let Activation::Clocked { pin, .. } = &activation {
            let readable = specs.iter().any(|s| &s.name == pin && s.direction.can_read());
            if !readable {
                return Err(LibraryError::invalid(&descriptor.name, format!("clock input '{}' is not declared", pin)).into());
            }
        }

        let ids = match pin_ids {
            Some(ids) if ids.len() == specs.len() => {
                for (pin, spec) in ids.iter().zip(&specs) {
                    if self.connections.pin(*pin).is_some() {
                        return Err(LibraryError::invalid(&descriptor.name, format!("pin id {} is taken", pin)).into());
                    }
                    self.connections.insert_pin(*pin, id, spec);
                }
                ids.to_vec()
            }
            Some(_) => {
                return Err(LibraryError::invalid(&descriptor.name, "saved pin list does not match the model").into())
            }
            None => self.connections.register_pins(id, &specs),
        };

        let pins = specs.iter().map(|s| s.name.clone()).zip(ids).collect();
        info!(component = %id, name = %descriptor.name, model = %descriptor.model, "created component");
        let component = Component::new(id, descriptor, logic, pins);
        self.components.insert(id, component);
        self.next_component = self.next_component.max(id.value() + 1);
        self.drive_power_on(id)?;
        Ok(())
    }

    fn drive_power_on(&mut self, id: ComponentId) -> Result<(), EngineError> {
        let Some(component) = self.components.get(&id) else {
            return Err(GraphError::UnknownComponent(id).into());
        };
        let outputs = component.logic().power_on_outputs(component.state());
        for (name, value) in outputs {
            let pin = component.pin(&name).ok_or_else(|| GraphError::UnknownPinName {
                component: id,
                name: name.clone(),
            })?;
            self.connections.write(pin, value)?;
        }
        Ok(())
    }

    /// Remove a component, its pins and every connection touching them.
    pub fn remove_component(&mut self, id: ComponentId) -> Result<(), EngineError> {
        let component = self
            .components
            .remove(&id)
            .ok_or(GraphError::UnknownComponent(id))?;
        let pins: Vec<PinId> = component.pins().map(|(_, pin)| pin).collect();
        for writes in self.delayed.values_mut() {
            writes.retain(|(pin, _)| !pins.contains(pin));
        }
        self.delayed.retain(|_, writes| !writes.is_empty());
        self.connections.remove_component(id);
        info!(component = %id, name = component.name(), "removed component");
        Ok(())
    }

    pub fn connect(&mut self, a: PinId, b: PinId, policy: Option<NetPolicy>) -> Result<NetId, EngineError> {
        Ok(self.connections.connect(a, b, policy)?)
    }

    pub fn connect_mapped(
        &mut self,
        wide: PinId,
        narrow: PinId,
        offset: u8,
        policy: Option<NetPolicy>,
    ) -> Result<NetId, EngineError> {
        Ok(self.connections.connect_mapped(wide, narrow, offset, policy)?)
    }

    /// Connect two pins given as `(component, pin name)`.
    pub fn connect_by_name(
        &mut self,
        a: (ComponentId, &str),
        b: (ComponentId, &str),
    ) -> Result<NetId, EngineError> {
        let a = self.pin_id(a.0, a.1)?;
        let b = self.pin_id(b.0, b.1)?;
        self.connect(a, b, None)
    }

    pub fn disconnect(&mut self, a: PinId, b: PinId) -> Result<(), EngineError> {
        Ok(self.connections.disconnect(a, b)?)
    }

    /// Drive a pin's line from outside the board, starting next tick.
    pub fn stimulate(&mut self, pin: PinId, value: PinValue) -> Result<(), EngineError> {
        Ok(self.connections.stimulate(pin, value)?)
    }

    pub fn release(&mut self, pin: PinId) -> Result<(), EngineError> {
        Ok(self.connections.release(pin)?)
    }

    // ---- observers -------------------------------------------------------

    pub fn subscribe(&mut self, observer: SharedObserver) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, observer));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer, _)| *observer != id);
        self.observers.len() != before
    }

    fn notify(&self) -> Option<String> {
        if self.observers.is_empty() {
            return None;
        }
        let snapshot = Arc::new(self.snapshot());
        let mut stop = None;
        for (_, observer) in &self.observers {
            if let Watch::Break(reason) = observer.lock().on_tick(&snapshot) {
                stop.get_or_insert(reason);
            }
        }
        stop
    }

    // ---- control ---------------------------------------------------------

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn fault(&self) -> Option<&SimulationFault> {
        self.fault.as_ref()
    }

    /// Handle for pausing or cancelling a run from another thread.
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    fn begin(&mut self, operation: &'static str) -> Result<(), EngineError> {
        if let Some(fault) = &self.fault {
            return Err(EngineError::Halted(fault.clone()));
        }
        if self.state != EngineState::Running {
            info!(operation, tick = self.tick, from = ?self.state, "engine running");
            self.state = EngineState::Running;
        }
        Ok(())
    }

    /// Advance exactly `n` ticks, stopping early on a breakpoint. Leaves the
    /// engine `Paused`.
    pub fn step(&mut self, n: u64) -> Result<RunSummary, EngineError> {
        self.begin("step")?;
        let start = self.tick;
        let mut reason = StopReason::Completed;
        for _ in 0..n {
            if let Some(why) = self.advance()? {
                reason = StopReason::Breakpoint(why);
                break;
            }
        }
        self.state = EngineState::Paused;
        Ok(RunSummary {
            ticks: self.tick - start,
            tick: self.tick,
            reason,
        })
    }

    /// Run until paused, cancelled, halted, stopped by an observer or the
    /// configured tick limit.
    pub fn run(&mut self) -> Result<RunSummary, EngineError> {
        self.run_loop(None)
    }

    /// Like [`Engine::run`] but returns after at most `max_ticks`, leaving the
    /// engine `Running` so the caller can continue with another batch.
    pub fn run_batch(&mut self, max_ticks: u64) -> Result<RunSummary, EngineError> {
        self.run_loop(Some(max_ticks))
    }

    fn run_loop(&mut self, batch: Option<u64>) -> Result<RunSummary, EngineError> {
        self.begin("run")?;
        let start = self.tick;
        let reason = loop {
            if self.control.take_cancel() {
                info!(tick = self.tick, "run cancelled");
                self.state = EngineState::Idle;
                break StopReason::Cancelled;
            }
            if self.control.take_pause() {
                info!(tick = self.tick, "run paused");
                self.state = EngineState::Paused;
                break StopReason::Paused;
            }
            if self.config.tick_limit.is_some_and(|limit| self.tick >= limit) {
                self.state = EngineState::Paused;
                break StopReason::TickLimit;
            }
            if batch.is_some_and(|max| self.tick - start >= max) {
                break StopReason::Completed;
            }
            if let Some(why) = self.advance()? {
                info!(tick = self.tick, reason = %why, "run stopped by observer");
                self.state = EngineState::Paused;
                break StopReason::Breakpoint(why);
            }
        };
        Ok(RunSummary {
            ticks: self.tick - start,
            tick: self.tick,
            reason,
        })
    }

    /// Suspend at the current tick boundary.
    pub fn pause(&mut self) -> Result<(), EngineError> {
        match self.state {
            EngineState::Running => {
                self.control.pause();
                Ok(())
            }
            EngineState::Paused => Ok(()),
            EngineState::Halted => Err(self.halted_error()),
            EngineState::Idle => Err(EngineError::InvalidTransition {
                operation: "pause",
                state: self.state,
            }),
        }
    }

    /// Stop the simulation, keeping all state. Running again continues from
    /// the current tick.
    pub fn stop(&mut self) -> Result<(), EngineError> {
        if self.state == EngineState::Halted {
            return Err(self.halted_error());
        }
        self.state = EngineState::Idle;
        Ok(())
    }

    fn halted_error(&self) -> EngineError {
        match &self.fault {
            Some(fault) => EngineError::Halted(fault.clone()),
            None => EngineError::InvalidTransition {
                operation: "continue",
                state: self.state,
            },
        }
    }

    /// Return to power-on: tick 0, all drives released, every component in
    /// its power-on state, any fault cleared.
    pub fn reset(&mut self) {
        self.connections.clear_drives();
        self.delayed.clear();
        self.warnings.clear();
        self.warning_total = 0;
        self.evaluations = 0;
        self.last_settle_iterations = 0;
        self.fault = None;
        self.tick = 0;
        self.control.clear();
        for component in self.components.values_mut() {
            component.reset();
        }
        let ids: Vec<ComponentId> = self.components.keys().copied().collect();
        for id in ids {
            if let Err(err) = self.drive_power_on(id) {
                warn!(component = %id, error = %err, "power-on outputs rejected");
            }
        }
        for (_, observer) in &self.observers {
            observer.lock().on_reset();
        }
        self.state = EngineState::Idle;
        info!("engine reset");
    }

    // ---- the tick --------------------------------------------------------

    fn settle_cap(&self) -> usize {
        let combinational = self
            .components
            .values()
            .filter(|c| c.activation().is_combinational())
            .count();
        self.config
            .settle_iteration_cap
            .unwrap_or(combinational + 1)
            .max(1)
    }

    /// Run one tick. Returns an observer's break reason, if any.
    fn advance(&mut self) -> Result<Option<String>, EngineError> {
        let tick = self.tick;
        let mut next_states = BTreeMap::new();
        self.undo = Some(TickUndo {
            drives: self.connections.drive_state(),
            delayed: self.delayed.clone(),
            clocks: self
                .components
                .values()
                .filter(|c| c.clock.is_some())
                .map(|c| (c.id, c.last_clock))
                .collect(),
            inputs: BTreeMap::new(),
        });

        if let Some(writes) = self.delayed.remove(&tick) {
            for (pin, value) in writes {
                if let Err(err) = self.connections.write(pin, value) {
                    warn!(tick, %pin, error = %err, "dropped delayed write");
                }
            }
        }
        let sources: Vec<ComponentId> = self
            .components
            .values()
            .filter(|c| matches!(c.activation(), Activation::Source))
            .map(|c| c.id)
            .collect();
        if let Err(fault) = self.evaluate(&sources, &mut next_states) {
            return Err(self.halt(fault));
        }
        if let Err(fault) = self.commit() {
            return Err(self.halt(fault));
        }

        let mut first = Vec::new();
        for component in self.components.values_mut() {
            if let Some((pin, edge)) = component.clock {
                let level = self
                    .connections
                    .read_pin(pin)
                    .map(|value| value.is_high())
                    .unwrap_or(false);
                let fire = edge.detect(component.last_clock, level);
                component.last_clock = level;
                if fire {
                    first.push(component.id);
                }
            } else if component.activation().is_combinational()
                && component.last_inputs.as_ref() != Some(&gather_inputs(&self.connections, component))
            {
                first.push(component.id);
            }
        }

        let mut settle = usize::from(first.iter().any(|id| self.is_combinational(*id)));
        if let Err(fault) = self.evaluate(&first, &mut next_states) {
            return Err(self.halt(fault));
        }
        if let Err(fault) = self.commit() {
            return Err(self.halt(fault));
        }

        let cap = self.settle_cap();
        loop {
            let pending: Vec<ComponentId> = self
                .components
                .values()
                .filter(|c| c.activation().is_combinational())
                .filter(|c| c.last_inputs.as_ref() != Some(&gather_inputs(&self.connections, c)))
                .map(|c| c.id)
                .collect();
            if pending.is_empty() {
                break;
            }
            if settle >= cap {
                return Err(self.halt(SimulationFault::CombinationalLoop {
                    tick,
                    iterations: settle,
                    components: pending,
                }));
            }
            if let Err(fault) = self.evaluate(&pending, &mut next_states) {
                return Err(self.halt(fault));
            }
            if let Err(fault) = self.commit() {
                return Err(self.halt(fault));
            }
            settle += 1;
        }

        self.last_settle_iterations = settle;
        self.apply_states(&mut next_states);
        self.undo = None;
        self.tick += 1;
        debug!(tick = self.tick, settle, "tick complete");
        Ok(self.notify())
    }

    fn is_combinational(&self, id: ComponentId) -> bool {
        self.components
            .get(&id)
            .is_some_and(|c| c.activation().is_combinational())
    }

    /// Step the given components against committed values and queue their
    /// outputs. Next states are collected, not applied.
    fn evaluate(
        &mut self,
        ids: &[ComponentId],
        next_states: &mut BTreeMap<ComponentId, StateBlob>,
    ) -> Result<(), SimulationFault> {
        if ids.is_empty() {
            return Ok(());
        }
        let tick = self.tick;

        let inputs: Vec<Inputs> = ids
            .iter()
            .filter_map(|id| self.components.get(id))
            .map(|c| Inputs::new(gather_inputs(&self.connections, c)))
            .collect();
        for (id, inputs) in ids.iter().zip(&inputs) {
            if let Some(component) = self.components.get_mut(id) {
                if component.activation().is_combinational() {
                    if let Some(undo) = self.undo.as_mut() {
                        undo.inputs
                            .entry(*id)
                            .or_insert_with(|| component.last_inputs.clone());
                    }
                    component.last_inputs = Some(inputs.iter().map(|(k, v)| (k.clone(), *v)).collect());
                }
            }
        }

        let results = {
            let jobs: Vec<Job<'_>> = ids
                .iter()
                .filter_map(|id| self.components.get(id))
                .zip(inputs)
                .map(|(c, inputs)| Job {
                    logic: c.logic(),
                    inputs,
                    state: next_states.get(&c.id).unwrap_or(c.state()),
                })
                .collect();
            compute(tick, &jobs, self.config.parallel)
        };

        for (id, result) in ids.iter().zip(results) {
            let step = result.map_err(|fault| SimulationFault::ComponentFault {
                tick,
                component: *id,
                message: fault.message,
            })?;
            self.queue_outputs(*id, step, next_states)
                .map_err(|message| SimulationFault::ComponentFault {
                    tick,
                    component: *id,
                    message,
                })?;
        }
        Ok(())
    }

    fn queue_outputs(
        &mut self,
        id: ComponentId,
        step: StepResult,
        next_states: &mut BTreeMap<ComponentId, StateBlob>,
    ) -> Result<(), String> {
        let Some(component) = self.components.get_mut(&id) else {
            return Ok(());
        };
        component.evaluations += 1;
        self.evaluations += 1;

        let delay = component.delay();
        for (name, value) in step.outputs {
            let pin = component
                .pin(&name)
                .ok_or_else(|| format!("drove unknown pin '{}'", name))?;
            if delay == 0 {
                self.connections.write(pin, value).map_err(|err| err.to_string())?;
            } else {
                let drivable = self
                    .connections
                    .pin(pin)
                    .is_some_and(|p| p.direction.can_drive());
                if !drivable {
                    return Err(format!("drove input pin '{}'", name));
                }
                self.delayed.entry(self.tick + delay).or_default().push((pin, value));
            }
        }
        if let Some(state) = step.next_state {
            next_states.insert(id, state);
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SimulationFault> {
        match self.connections.commit() {
            Ok(report) => {
                for conflict in report.warnings {
                    self.record_warning(conflict);
                }
                Ok(())
            }
            Err(conflicts) => {
                let mut conflicts = conflicts.into_iter();
                let Some(conflict) = conflicts.next() else {
                    return Ok(());
                };
                for extra in conflicts {
                    error!(tick = self.tick, conflict = %extra, "additional fatal drive conflict");
                }
                Err(SimulationFault::DriveConflict {
                    tick: self.tick,
                    conflict,
                })
            }
        }
    }

    fn record_warning(&mut self, conflict: DriveConflict) {
        self.warning_total += 1;
        if self.config.warning_capacity == 0 {
            return;
        }
        if self.warnings.len() >= self.config.warning_capacity {
            self.warnings.pop_front();
        }
        self.warnings.push_back(EngineWarning {
            tick: self.tick,
            conflict,
        });
    }

    fn apply_states(&mut self, next_states: &mut BTreeMap<ComponentId, StateBlob>) {
        for (id, state) in std::mem::take(next_states) {
            if let Some(component) = self.components.get_mut(&id) {
                component.state = state;
            }
        }
    }

    fn halt(&mut self, fault: SimulationFault) -> EngineError {
        if let Some(undo) = self.undo.take() {
            self.rewind(undo);
        }
        self.connections.discard_pending();
        error!(tick = fault.tick(), %fault, "simulation halted");
        self.fault = Some(fault.clone());
        self.state = EngineState::Halted;
        self.notify();
        EngineError::Halted(fault)
    }

    /// Return to the boundary of the tick that failed. Next states were
    /// never applied, so only drives, delayed writes and change detection
    /// need restoring.
    fn rewind(&mut self, mut undo: TickUndo) {
        if let Err(err) = self.connections.restore_drive_state(&undo.drives) {
            warn!(tick = self.tick, error = %err, "could not rewind drive state");
        }
        self.delayed = undo.delayed;
        for component in self.components.values_mut() {
            if let Some(level) = undo.clocks.get(&component.id) {
                component.last_clock = *level;
            }
            if let Some(inputs) = undo.inputs.remove(&component.id) {
                component.last_inputs = inputs;
            }
        }
        debug!(tick = self.tick, "rewound failed tick");
    }

    // ---- inspection ------------------------------------------------------

    pub fn connections(&self) -> &ConnectionSystem {
        &self.connections
    }

    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(&id)
    }

    /// Components in registration order.
    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    pub fn find_component(&self, name: &str) -> Option<ComponentId> {
        self.components
            .values()
            .find(|c| c.name() == name)
            .map(|c| c.id)
    }

    pub fn component_state(&self, id: ComponentId) -> Option<&StateBlob> {
        self.components.get(&id).map(|c| c.state())
    }

    pub fn pin_id(&self, component: ComponentId, name: &str) -> Result<PinId, GraphError> {
        let c = self
            .components
            .get(&component)
            .ok_or(GraphError::UnknownComponent(component))?;
        c.pin(name).ok_or_else(|| GraphError::UnknownPinName {
            component,
            name: name.to_string(),
        })
    }

    pub fn read_pin(&self, pin: PinId) -> Result<PinValue, GraphError> {
        self.connections.read_pin(pin)
    }

    /// Committed value on a component's pin, by name.
    pub fn read(&self, component: ComponentId, name: &str) -> Result<PinValue, GraphError> {
        self.read_pin(self.pin_id(component, name)?)
    }

    pub fn nets_of(&self, component: ComponentId) -> Vec<NetId> {
        self.connections.nets_of(component)
    }

    pub fn is_connected(&self, a: PinId, b: PinId) -> bool {
        self.connections.is_connected(a, b)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            tick: self.tick,
            state: self.state,
            pins: self
                .connections
                .pins()
                .map(|pin| (pin.id, self.connections.read_pin(pin.id).unwrap_or_default()))
                .collect(),
            states: self
                .components
                .values()
                .map(|c| (c.id, c.state().clone()))
                .collect(),
            fault: self.fault.clone(),
        }
    }

    pub fn warnings(&self) -> impl Iterator<Item = &EngineWarning> {
        self.warnings.iter()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            tick: self.tick,
            state: self.state,
            components: self.components.len(),
            combinational: self
                .components
                .values()
                .filter(|c| c.activation().is_combinational())
                .count(),
            evaluations: self.evaluations,
            last_settle_iterations: self.last_settle_iterations,
            warnings: self.warning_total,
            delayed_writes: self.delayed.values().map(Vec::len).sum(),
            connections: self.connections.stats(),
        }
    }

    /// Report power or ground pins left unconnected and clocked components
    /// whose clock input floats.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for component in self.components.values() {
            for (name, pin_id) in component.pins() {
                let Some(pin) = self.connections.pin(pin_id) else {
                    continue;
                };
                if pin.net().is_some() {
                    continue;
                }
                if matches!(pin.class, SignalClass::Power | SignalClass::Ground) {
                    issues.push(ValidationIssue {
                        component: component.id,
                        pin: pin_id,
                        message: format!("{} pin '{}' of '{}' is not connected", pin.class.to_str(), name, component.name()),
                    });
                } else if component.clock.is_some_and(|(clock, _)| clock == pin_id) {
                    issues.push(ValidationIssue {
                        component: component.id,
                        pin: pin_id,
                        message: format!("clock input '{}' of '{}' is not connected", name, component.name()),
                    });
                }
            }
        }
        issues
    }

    // ---- raw access for project save/restore -----------------------------

    pub(crate) fn connections_mut(&mut self) -> &mut ConnectionSystem {
        &mut self.connections
    }

    pub(crate) fn component_mut(&mut self, id: ComponentId) -> Option<&mut Component> {
        self.components.get_mut(&id)
    }

    pub(crate) fn delayed(&self) -> &BTreeMap<Tick, Vec<(PinId, PinValue)>> {
        &self.delayed
    }

    pub(crate) fn restore_timeline(
        &mut self,
        tick: Tick,
        state: EngineState,
        fault: Option<SimulationFault>,
        delayed: BTreeMap<Tick, Vec<(PinId, PinValue)>>,
    ) {
        self.tick = tick;
        self.state = match (state, &fault) {
            (_, Some(_)) => EngineState::Halted,
            (EngineState::Running, None) | (EngineState::Halted, None) => EngineState::Paused,
            (other, None) => other,
        };
        self.fault = fault;
        self.delayed = delayed;
    }

    /// Drop any pending writes queued by construction. Used before a saved
    /// drive state is laid over a freshly built board.
    pub(crate) fn clear_pending(&mut self) {
        self.connections.discard_pending();
    }
}

/// Values on every readable pin of a component.
fn gather_inputs(connections: &ConnectionSystem, component: &Component) -> BTreeMap<String, PinValue> {
    component
        .pins()
        .filter(|(_, id)| {
            connections
                .pin(*id)
                .is_some_and(|pin| pin.direction.can_read())
        })
        .map(|(name, id)| (name.to_string(), connections.read_pin(id).unwrap_or_default()))
        .collect()
}

/// Run the step functions of one phase, on worker threads when enabled.
/// Results come back in job order whatever the thread scheduling.
fn compute(tick: Tick, jobs: &[Job<'_>], parallel: bool) -> Vec<Result<StepResult, ComponentFault>> {
    let run = |job: &Job<'_>| job.logic.step(tick, &job.inputs, job.state);
    if !parallel || jobs.len() < 2 {
        return jobs.iter().map(run).collect();
    }

    let workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(jobs.len());
    let chunk = jobs.len().div_ceil(workers);
    thread::scope(|scope| {
        let handles: Vec<_> = jobs
            .chunks(chunk)
            .map(|part| scope.spawn(move || part.iter().map(run).collect::<Vec<_>>()))
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::NetPolicy;
    use crate::component::ComponentDescriptor;

    fn clock_and_toggle() -> (Engine, ComponentId, ComponentId) {
        let mut engine = Engine::default();
        let clock = engine
            .create_component(ComponentDescriptor::new("clk", "clock").with_property("period", 2))
            .unwrap();
        let ff = engine
            .create_component(ComponentDescriptor::new("ff", "toggle_flip_flop"))
            .unwrap();
        engine.connect_by_name((clock, "CLK"), (ff, "CLK")).unwrap();
        (engine, clock, ff)
    }

    #[test]
    fn test_initial_state() {
        let engine = Engine::default();
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.tick(), 0);
        assert!(engine.fault().is_none());
    }

    #[test]
    fn test_step_leaves_engine_paused() {
        let (mut engine, clock, ff) = clock_and_toggle();
        let summary = engine.step(3).unwrap();
        assert_eq!(summary.ticks, 3);
        assert_eq!(summary.reason, StopReason::Completed);
        assert_eq!(engine.state(), EngineState::Paused);
        assert_eq!(engine.read(clock, "CLK").unwrap(), PinValue::LOW);
        assert_eq!(engine.read(ff, "Q").unwrap(), PinValue::HIGH);
    }

    #[test]
    fn test_reset_returns_to_power_on() {
        let (mut engine, _, ff) = clock_and_toggle();
        engine.step(4).unwrap();
        engine.reset();
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.tick(), 0);
        assert_eq!(engine.component_state(ff), Some(&StateBlob::zeroed(1)));

        engine.step(2).unwrap();
        assert_eq!(engine.read(ff, "Q").unwrap(), PinValue::HIGH);
    }

    #[test]
    fn test_tick_limit_pauses_run() {
        let (mut engine, _, _) = clock_and_toggle();
        engine.config.tick_limit = Some(7);
        let summary = engine.run().unwrap();
        assert_eq!(summary.reason, StopReason::TickLimit);
        assert_eq!(engine.tick(), 7);
        assert_eq!(engine.state(), EngineState::Paused);
    }

    #[test]
    fn test_pause_and_cancel_requests() {
        let (mut engine, _, _) = clock_and_toggle();
        let control = engine.control();

        control.pause();
        let summary = engine.run().unwrap();
        assert_eq!(summary.reason, StopReason::Paused);
        assert_eq!(summary.ticks, 0);
        assert_eq!(engine.state(), EngineState::Paused);

        control.cancel();
        let summary = engine.run().unwrap();
        assert_eq!(summary.reason, StopReason::Cancelled);
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_run_batch_stays_running() {
        let (mut engine, _, _) = clock_and_toggle();
        let summary = engine.run_batch(5).unwrap();
        assert_eq!(summary.ticks, 5);
        assert_eq!(summary.reason, StopReason::Completed);
        assert_eq!(engine.state(), EngineState::Running);
    }

    #[test]
    fn test_pause_from_idle_is_rejected() {
        let mut engine = Engine::default();
        assert!(matches!(
            engine.pause(),
            Err(EngineError::InvalidTransition { operation: "pause", .. })
        ));
    }

    #[test]
    fn test_fatal_conflict_halts_until_reset() {
        let mut engine = Engine::default();
        let a = engine
            .create_component(ComponentDescriptor::new("a", "d_flip_flop"))
            .unwrap();
        let b = engine
            .create_component(ComponentDescriptor::new("b", "d_flip_flop"))
            .unwrap();
        let qa = engine.pin_id(a, "Q").unwrap();
        let qnb = engine.pin_id(b, "QN").unwrap();
        engine
            .connect(qa, qnb, Some(NetPolicy::error_on_conflict()))
            .unwrap();

        // Both registers power on at 0, so Q and QN disagree immediately.
        let err = engine.step(1).unwrap_err();
        assert!(matches!(err, EngineError::Halted(SimulationFault::DriveConflict { tick: 0, .. })));
        assert_eq!(engine.state(), EngineState::Halted);
        assert!(matches!(engine.step(1), Err(EngineError::Halted(_))));
        assert!(engine.stop().is_err());

        engine.reset();
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.fault().is_none());
    }

    #[test]
    fn test_combinational_delay_rejected() {
        let mut engine = Engine::default();
        let desc = ComponentDescriptor::new("g", "gate").with_delay(2);
        assert!(matches!(
            engine.create_component(desc),
            Err(EngineError::Library(LibraryError::InvalidDescriptor { .. }))
        ));
        assert_eq!(engine.components().count(), 0);
    }

    #[test]
    fn test_remove_component_drops_nets() {
        let (mut engine, clock, ff) = clock_and_toggle();
        assert_eq!(engine.nets_of(ff).len(), 1);
        engine.remove_component(clock).unwrap();
        assert!(engine.nets_of(ff).is_empty());
        assert!(engine.remove_component(clock).is_err());
    }

    #[test]
    fn test_validate_reports_floating_clock() {
        let mut engine = Engine::default();
        engine
            .create_component(ComponentDescriptor::new("ff", "toggle_flip_flop"))
            .unwrap();
        let issues = engine.validate();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("clock input"));
    }

    #[test]
    fn test_parallel_matches_serial() {
        let run = |parallel: bool| {
            let mut engine = Engine::new(EngineConfig {
                parallel,
                ..EngineConfig::default()
            });
            let clock = engine
                .create_component(ComponentDescriptor::new("clk", "clock"))
                .unwrap();
            for i in 0..4 {
                let ff = engine
                    .create_component(ComponentDescriptor::new(&format!("ff{}", i), "toggle_flip_flop"))
                    .unwrap();
                engine.connect_by_name((clock, "CLK"), (ff, "CLK")).unwrap();
            }
            engine.step(9).unwrap();
            engine.snapshot()
        };
        assert_eq!(run(false), run(true));
    }
}
