//! # JSON Project Files
//!
//! A project describes a board and, optionally, the exact state it was saved
//! in. Loading a project with a saved state reproduces the pin values, net
//! topology, component states and pending writes bit for bit, so a restored
//! board continues exactly where the saved one left off.
//!
//! Hand-written projects usually omit ids and the saved state and wire
//! components by name:
//!
//! ```json
//! {
//!   "name": "toggle",
//!   "components": [
//!     { "name": "CLOCK", "model": "clock", "properties": { "period": 2 } },
//!     { "name": "FF", "model": "toggle_flip_flop" }
//!   ],
//!   "connections": {
//!     "clock": {
//!       "source": { "component": "CLOCK", "pin": "CLK" },
//!       "targets": [{ "component": "FF", "pin": "CLK" }]
//!     }
//!   }
//! }
//! ```
//!
//! Saved projects list every net with its explicit edges instead.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::bus::NetPolicy;
use crate::component::{ComponentDescriptor, StateBlob};
use crate::connection::{DriveState, Edge};
use crate::engine::{Engine, EngineConfig, EngineState};
use crate::error::{EngineError, GraphError, ProjectError, SimulationFault};
use crate::library::ComponentLibrary;
use crate::pin::{PinValue, SignalClass};
use crate::types::{ComponentId, NetId, PinId, Tick};

fn default_version() -> String {
    "1.0".to_string()
}

/// Top-level project file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub engine: EngineConfig,
    pub components: Vec<ComponentConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nets: Vec<NetConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub connections: BTreeMap<String, ConnectionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved: Option<SavedState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ComponentId>,
    #[serde(flatten)]
    pub descriptor: ComponentDescriptor,
    /// Arena ids of the component's pins, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pin_ids: Vec<PinId>,
}

impl From<ComponentDescriptor> for ComponentConfig {
    fn from(descriptor: ComponentDescriptor) -> Self {
        ComponentConfig {
            id: None,
            descriptor,
            pin_ids: Vec::new(),
        }
    }
}

/// A saved net: its id, policy and the explicit edges joining its pins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetConfig {
    pub id: NetId,
    pub policy: NetPolicy,
    pub class: SignalClass,
    pub edges: Vec<Edge>,
}

/// One source pin wired to any number of targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub source: PinReference,
    pub targets: Vec<PinReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<NetPolicy>,
    /// Join each target onto this bit offset of the source instead of the
    /// whole width.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinReference {
    pub component: String,
    pub pin: String,
}

impl PinReference {
    pub fn new(component: &str, pin: &str) -> Self {
        PinReference {
            component: component.to_string(),
            pin: pin.to_string(),
        }
    }
}

/// Runtime state of one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRuntime {
    pub id: ComponentId,
    pub state: StateBlob,
    #[serde(default)]
    pub last_clock: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_inputs: Option<BTreeMap<String, PinValue>>,
    #[serde(default)]
    pub evaluations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayedWrite {
    pub tick: Tick,
    pub pin: PinId,
    pub value: PinValue,
}

/// Everything that changes while the board runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedState {
    pub tick: Tick,
    pub state: EngineState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<SimulationFault>,
    pub drives: DriveState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delayed: Vec<DelayedWrite>,
    pub components: Vec<ComponentRuntime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    pub name: String,
    pub description: String,
    pub component_count: usize,
    pub net_count: usize,
    pub connection_count: usize,
    pub saved_tick: Option<Tick>,
}

impl SystemConfig {
    pub fn new(name: &str) -> Self {
        SystemConfig {
            name: name.to_string(),
            description: String::new(),
            version: default_version(),
            metadata: BTreeMap::new(),
            engine: EngineConfig::default(),
            components: Vec::new(),
            nets: Vec::new(),
            connections: BTreeMap::new(),
            saved: None,
        }
    }

    /// Capture the complete board and its current state.
    pub fn capture(engine: &Engine, name: &str) -> Self {
        let connections = engine.connections();
        let components = engine
            .components()
            .map(|c| ComponentConfig {
                id: Some(c.id),
                descriptor: c.descriptor.clone(),
                pin_ids: c.pins().map(|(_, pin)| pin).collect(),
            })
            .collect();

        let nets = connections
            .nets()
            .map(|net| NetConfig {
                id: net.id,
                policy: net.policy,
                class: net.class,
                edges: connections
                    .edges()
                    .filter(|edge| connections.net_of(edge.wide) == Some(net.id))
                    .copied()
                    .collect(),
            })
            .collect();

        let saved = SavedState {
            tick: engine.tick(),
            state: engine.state(),
            fault: engine.fault().cloned(),
            drives: connections.drive_state(),
            delayed: engine
                .delayed()
                .iter()
                .flat_map(|(tick, writes)| {
                    writes.iter().map(move |(pin, value)| DelayedWrite {
                        tick: *tick,
                        pin: *pin,
                        value: *value,
                    })
                })
                .collect(),
            components: engine
                .components()
                .map(|c| ComponentRuntime {
                    id: c.id,
                    state: c.state.clone(),
                    last_clock: c.last_clock,
                    last_inputs: c.last_inputs.clone(),
                    evaluations: c.evaluations,
                })
                .collect(),
        };

        SystemConfig {
            engine: engine.config().clone(),
            components,
            nets,
            saved: Some(saved),
            ..SystemConfig::new(name)
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ProjectError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ProjectError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ProjectError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), ProjectError> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?).map_err(|source| ProjectError::Io {
            path: path.display().to_string(),
            source,
        })?;
        info!(path = %path.display(), project = %self.name, "saved project");
        Ok(())
    }

    pub fn info(&self) -> SystemInfo {
        SystemInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            component_count: self.components.len(),
            net_count: self.nets.len(),
            connection_count: self.connections.values().map(|c| c.targets.len()).sum(),
            saved_tick: self.saved.as_ref().map(|s| s.tick),
        }
    }
}

/// Builds engines from project files
#[derive(Debug, Clone, Default)]
pub struct SystemFactory {
    library: ComponentLibrary,
}

impl SystemFactory {
    pub fn new() -> Self {
        Self::with_library(ComponentLibrary::new())
    }

    pub fn with_library(library: ComponentLibrary) -> Self {
        SystemFactory { library }
    }

    pub fn library(&self) -> &ComponentLibrary {
        &self.library
    }

    pub fn create_from_json(&self, path: impl AsRef<Path>) -> Result<Engine, ProjectError> {
        let config = SystemConfig::load_json(path)?;
        self.create(&config)
    }

    pub fn create(&self, config: &SystemConfig) -> Result<Engine, ProjectError> {
        let mut engine = Engine::with_library(config.engine.clone(), self.library.clone());
        self.create_components(config, &mut engine)?;
        for net in &config.nets {
            engine
                .connections_mut()
                .restore_net(net.id, net.policy, net.class, &net.edges)?;
        }
        self.connect_components(config, &mut engine)?;
        if let Some(saved) = &config.saved {
            restore_state(&mut engine, saved)?;
        }
        info!(
            project = %config.name,
            components = engine.components().count(),
            nets = engine.connections().nets().count(),
            tick = engine.tick(),
            "created system"
        );
        Ok(engine)
    }

    fn create_components(&self, config: &SystemConfig, engine: &mut Engine) -> Result<(), ProjectError> {
        for component in &config.components {
            let descriptor = component.descriptor.clone();
            let logic = self.library.build(&descriptor).map_err(EngineError::from)?;
            let pin_ids = (!component.pin_ids.is_empty()).then_some(component.pin_ids.as_slice());
            match component.id {
                Some(id) => engine.insert_component(id, descriptor, logic, pin_ids)?,
                None => {
                    engine.add_component(descriptor, logic)?;
                }
            }
        }
        Ok(())
    }

    fn connect_components(&self, config: &SystemConfig, engine: &mut Engine) -> Result<(), ProjectError> {
        for (name, connection) in &config.connections {
            let source = resolve_reference(engine, &connection.source)?;
            for target in &connection.targets {
                let target = resolve_reference(engine, target)?;
                match connection.offset {
                    Some(offset) => engine.connect_mapped(source, target, offset, connection.policy)?,
                    None => engine.connect(source, target, connection.policy)?,
                };
            }
            debug!(connection = %name, targets = connection.targets.len(), "wired connection");
        }
        Ok(())
    }
}

fn resolve_reference(engine: &Engine, reference: &PinReference) -> Result<PinId, ProjectError> {
    let component = engine.find_component(&reference.component).ok_or_else(|| {
        ProjectError::Inconsistent(format!("no component named '{}'", reference.component))
    })?;
    Ok(engine.pin_id(component, &reference.pin)?)
}

fn restore_state(engine: &mut Engine, saved: &SavedState) -> Result<(), ProjectError> {
    engine.clear_pending();
    engine.connections_mut().restore_drive_state(&saved.drives)?;

    for runtime in &saved.components {
        let component = engine
            .component_mut(runtime.id)
            .ok_or(GraphError::UnknownComponent(runtime.id))?;
        component.state = runtime.state.clone();
        component.last_clock = runtime.last_clock;
        component.last_inputs = runtime.last_inputs.clone();
        component.evaluations = runtime.evaluations;
    }

    let mut delayed: BTreeMap<Tick, Vec<(PinId, PinValue)>> = BTreeMap::new();
    for write in &saved.delayed {
        if engine.connections().pin(write.pin).is_none() {
            return Err(GraphError::UnknownPin(write.pin).into());
        }
        delayed.entry(write.tick).or_default().push((write.pin, write.value));
    }
    engine.restore_timeline(saved.tick, saved.state, saved.fault.clone(), delayed);
    Ok(())
}
