//! Component library: builds component logic from descriptors by model name.

use std::collections::HashMap;

use crate::component::{ComponentDescriptor, ComponentLogic};
use crate::components::{
    DFlipFlop, Gate, GenericClock, GenericRam, GenericRom, OutputLatch, Sequencer, ToggleFlipFlop,
    TwoPhaseClock,
};
use crate::error::LibraryError;

pub type ComponentFactory = fn(&ComponentDescriptor) -> Result<Box<dyn ComponentLogic>, LibraryError>;

/// Registry of component models
#[derive(Debug, Clone)]
pub struct ComponentLibrary {
    registry: HashMap<String, ComponentFactory>,
}

impl Default for ComponentLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentLibrary {
    /// A library with every built-in model registered.
    pub fn new() -> Self {
        let mut library = Self::empty();
        library.register_default_components();
        library
    }

    pub fn empty() -> Self {
        ComponentLibrary {
            registry: HashMap::new(),
        }
    }

    fn register_default_components(&mut self) {
        self.register("clock", |desc| Ok(Box::new(GenericClock::from_descriptor(desc)?)));
        self.register("two_phase_clock", |desc| {
            Ok(Box::new(TwoPhaseClock::from_descriptor(desc)?))
        });
        self.register("gate", |desc| Ok(Box::new(Gate::from_descriptor(desc)?)));
        self.register("toggle_flip_flop", |_| Ok(Box::new(ToggleFlipFlop)));
        self.register("d_flip_flop", |desc| Ok(Box::new(DFlipFlop::from_descriptor(desc)?)));
        self.register("rom", |desc| Ok(Box::new(GenericRom::from_descriptor(desc)?)));
        self.register("ram", |desc| Ok(Box::new(GenericRam::from_descriptor(desc)?)));
        self.register("sequencer", |desc| Ok(Box::new(Sequencer::from_descriptor(desc)?)));
        self.register("output_latch", |desc| {
            Ok(Box::new(OutputLatch::from_descriptor(desc)?))
        });
    }

    /// Register (or replace) a model.
    pub fn register(&mut self, model: &str, factory: ComponentFactory) {
        self.registry.insert(model.to_string(), factory);
    }

    pub fn contains(&self, model: &str) -> bool {
        self.registry.contains_key(model)
    }

    /// Model names in sorted order.
    pub fn models(&self) -> Vec<&str> {
        let mut models: Vec<&str> = self.registry.keys().map(String::as_str).collect();
        models.sort_unstable();
        models
    }

    pub fn build(&self, descriptor: &ComponentDescriptor) -> Result<Box<dyn ComponentLogic>, LibraryError> {
        let factory = self
            .registry
            .get(&descriptor.model)
            .ok_or_else(|| LibraryError::UnknownModel(descriptor.model.clone()))?;
        let logic = factory(descriptor)?;

        if let Some(kind) = descriptor.kind {
            if kind != logic.kind() {
                return Err(LibraryError::invalid(
                    &descriptor.name,
                    format!(
                        "model '{}' is a {} component, not {}",
                        descriptor.model,
                        logic.kind().to_str(),
                        kind.to_str()
                    ),
                ));
            }
        }
        Ok(logic)
    }
}
