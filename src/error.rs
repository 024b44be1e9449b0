//! Error taxonomy for the simulation kernel.
//!
//! Graph errors are ordinary call failures that leave the board untouched.
//! `SimulationFault`s are the conditions that halt a run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineState;
use crate::types::{ComponentId, NetId, PinId, Tick};

/// Rejected construction or topology edits. Always recoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Incompatible width: {a} is {a_width} bits, {b} is {b_width} bits")]
    IncompatibleWidth {
        a: PinId,
        a_width: u8,
        b: PinId,
        b_width: u8,
    },

    #[error("Direction conflict between {a} and {b}: {reason}")]
    DirectionConflict {
        a: PinId,
        b: PinId,
        reason: &'static str,
    },

    #[error("Pin {pin} already belongs to {net} whose policy forbids this connection")]
    AlreadyConnected { pin: PinId, net: NetId },

    #[error("No connection between {a} and {b}")]
    NotConnected { a: PinId, b: PinId },

    #[error("Signal class mismatch: {a} is {a_class}, {b} is {b_class}")]
    ClassMismatch {
        a: PinId,
        a_class: &'static str,
        b: PinId,
        b_class: &'static str,
    },

    #[error("Unknown pin: {0}")]
    UnknownPin(PinId),

    #[error("Unknown net: {0}")]
    UnknownNet(NetId),

    #[error("Unknown component: {0}")]
    UnknownComponent(ComponentId),

    #[error("Component {component} has no pin named '{name}'")]
    UnknownPinName { component: ComponentId, name: String },
}

/// Two or more active drivers disagreeing on a net.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("Drive conflict on {net} between pins {pins:?}")]
pub struct DriveConflict {
    pub net: NetId,
    pub pins: Vec<PinId>,
    pub fatal: bool,
}

/// Raised by component logic for internally detected invalid conditions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ComponentFault {
    pub message: String,
}

impl ComponentFault {
    pub fn new(message: impl Into<String>) -> Self {
        ComponentFault {
            message: message.into(),
        }
    }
}

/// Conditions that move the engine to `Halted`.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationFault {
    #[error("Tick {tick}: {conflict}")]
    DriveConflict { tick: Tick, conflict: DriveConflict },

    #[error("Tick {tick}: combinational loop did not settle after {iterations} iterations, involving {components:?}")]
    CombinationalLoop {
        tick: Tick,
        iterations: usize,
        components: Vec<ComponentId>,
    },

    #[error("Tick {tick}: component {component} faulted: {message}")]
    ComponentFault {
        tick: Tick,
        component: ComponentId,
        message: String,
    },
}

impl SimulationFault {
    pub fn tick(&self) -> Tick {
        match self {
            SimulationFault::DriveConflict { tick, .. }
            | SimulationFault::CombinationalLoop { tick, .. }
            | SimulationFault::ComponentFault { tick, .. } => *tick,
        }
    }

    /// Components implicated by the fault, if it names any.
    pub fn components(&self) -> Vec<ComponentId> {
        match self {
            SimulationFault::DriveConflict { .. } => Vec::new(),
            SimulationFault::CombinationalLoop { components, .. } => components.clone(),
            SimulationFault::ComponentFault { component, .. } => vec![*component],
        }
    }
}

/// Failures building component logic from a descriptor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LibraryError {
    #[error("Unknown component model: {0}")]
    UnknownModel(String),

    #[error("Invalid descriptor for '{name}': {reason}")]
    InvalidDescriptor { name: String, reason: String },
}

impl LibraryError {
    pub fn invalid(name: &str, reason: impl Into<String>) -> Self {
        LibraryError::InvalidDescriptor {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error("Engine is halted: {0}")]
    Halted(SimulationFault),

    #[error("Cannot {operation} while engine is {state:?}")]
    InvalidTransition {
        operation: &'static str,
        state: EngineState,
    },
}

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("Failed to access project file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse project JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Inconsistent project: {0}")]
    Inconsistent(String),
}
