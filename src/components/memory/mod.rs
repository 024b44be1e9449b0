pub mod generic_ram;
pub mod generic_rom;

pub use generic_ram::GenericRam;
pub use generic_rom::GenericRom;
