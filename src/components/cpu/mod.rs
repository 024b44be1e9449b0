// CPU components module
pub mod sequencer;

pub use sequencer::{assemble, Instruction, Sequencer};
