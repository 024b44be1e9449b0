//! Built-in component models.

pub mod clock;
pub mod cpu;
pub mod io;
pub mod logic;
pub mod memory;

pub use clock::{GenericClock, TwoPhaseClock};
pub use cpu::{Instruction, Sequencer};
pub use io::OutputLatch;
pub use logic::{DFlipFlop, Gate, GateFunction, ToggleFlipFlop};
pub use memory::{GenericRam, GenericRom};
