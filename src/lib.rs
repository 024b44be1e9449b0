//! # Rusty Board
//!
//! A simulation kernel for retro computer boards.
//!
//! This library provides:
//! - A pin/net connection graph with per-bit drive resolution and
//!   configurable conflict policies
//! - A deterministic tick engine stepping clocked, combinational and source
//!   components through a deferred-write commit phase
//! - A component contract of pure step functions over opaque state, plus a
//!   library of built-in models
//! - Passive debug observers, JSON project files with exact state round-trip,
//!   a background runner and a terminal monitor

pub mod bus;
pub mod component;
pub mod components;
pub mod connection;
pub mod console;
pub mod debug;
pub mod engine;
pub mod error;
pub mod library;
pub mod pin;
pub mod runner;
pub mod system_config;
pub mod systems;
pub mod types;

// Re-export commonly used items for easier importing
pub use bus::{ConflictPolicy, NetPolicy};
pub use component::{
    Activation, ComponentDescriptor, ComponentKind, ComponentLogic, Inputs, StateBlob, StepResult,
};
pub use connection::ConnectionSystem;
pub use debug::{Breakpoint, DebugSession, Debugger, Snapshot, TickObserver, Watch};
pub use engine::{ControlHandle, Engine, EngineConfig, EngineState, RunSummary, StopReason};
pub use error::{ComponentFault, DriveConflict, EngineError, GraphError, SimulationFault};
pub use library::ComponentLibrary;
pub use pin::{PinDirection, PinSpec, PinValue, SignalClass};
pub use types::{ComponentId, NetId, PinId, Tick};
