// Discrete logic
pub mod flip_flop;
pub mod gates;

pub use flip_flop::{DFlipFlop, ToggleFlipFlop};
pub use gates::{Gate, GateFunction};
