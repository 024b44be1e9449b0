use std::fs;
use std::path::Path;

use crate::component::{
    Activation, ComponentDescriptor, ComponentKind, ComponentLogic, Inputs, StateBlob, StepResult,
};
use crate::error::{ComponentFault, LibraryError};
use crate::pin::{PinSpec, PinValue, SignalClass};
use crate::types::{width_mask, Tick};

/// Asynchronous read-only memory. `DATA` follows `ADDR` combinationally
/// while `CS` is high or floating; addresses past the image wrap around.
///
/// The image lives in the state blob so snapshots and saved projects carry it.
/// It is loaded once at construction, from the `image` property or from the
/// file named by `image_file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericRom {
    image: Vec<u8>,
    address_width: u8,
    data_width: u8,
}

impl GenericRom {
    pub fn new(size: usize, address_width: u8, data_width: u8) -> Result<Self, LibraryError> {
        if size == 0 || size > 1 << 16 {
            return Err(LibraryError::invalid("rom", "size must be between 1 and 65536 words"));
        }
        if data_width == 0 || data_width > 8 {
            return Err(LibraryError::invalid("rom", "data width must be between 1 and 8 bits"));
        }
        Ok(GenericRom {
            image: vec![0; size],
            address_width,
            data_width,
        })
    }

    pub fn from_descriptor(descriptor: &ComponentDescriptor) -> Result<Self, LibraryError> {
        let address_width = descriptor.width_or("address_width", 8)?;
        let data_width = descriptor.width_or("data_width", 8)?;
        let default_size = 1u64 << address_width.min(16);
        let size = descriptor.u64_or("size", default_size)? as usize;
        let mut rom = Self::new(size, address_width, data_width)
            .map_err(|err| LibraryError::invalid(&descriptor.name, err.to_string()))?;

        if let Some(image) = descriptor.bytes_property("image")? {
            rom.load_data(&image)
                .map_err(|reason| LibraryError::invalid(&descriptor.name, reason))?;
        }
        if let Some(path) = descriptor.str_property("image_file")? {
            rom.load_file(Path::new(path))
                .map_err(|reason| LibraryError::invalid(&descriptor.name, reason))?;
        }
        Ok(rom)
    }

    pub fn size(&self) -> usize {
        self.image.len()
    }

    pub fn load_data(&mut self, data: &[u8]) -> Result<(), String> {
        if data.len() > self.image.len() {
            return Err(format!(
                "image of {} bytes exceeds ROM size {}",
                data.len(),
                self.image.len()
            ));
        }
        self.image[..data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn load_file(&mut self, path: &Path) -> Result<(), String> {
        let data = fs::read(path).map_err(|err| format!("cannot read {}: {}", path.display(), err))?;
        self.load_data(&data)
    }
}

impl ComponentLogic for GenericRom {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Memory
    }

    fn pins(&self) -> Vec<PinSpec> {
        vec![
            PinSpec::input("ADDR", self.address_width, SignalClass::Address),
            PinSpec::output("DATA", self.data_width, SignalClass::Data),
            PinSpec::input("CS", 1, SignalClass::Control),
        ]
    }

    fn activation(&self) -> Activation {
        Activation::Combinational
    }

    fn power_on_state(&self) -> StateBlob {
        StateBlob::new(self.image.clone())
    }

    fn step(&self, _tick: Tick, inputs: &Inputs, state: &StateBlob) -> Result<StepResult, ComponentFault> {
        let selected = inputs.get("CS").to_bool().unwrap_or(true);
        let data = match inputs.bits("ADDR") {
            Some(address) if selected && !state.is_empty() => {
                let word = state.byte(address as usize % state.len()) as u64;
                PinValue::Driven(word & width_mask(self.data_width))
            }
            _ => PinValue::HighZ,
        };
        Ok(StepResult::hold().drive("DATA", data))
    }

    fn describe(&self, state: &StateBlob) -> String {
        format!("{} bytes", state.len())
    }
}
