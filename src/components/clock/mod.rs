// Clock sources
pub mod generic_clock;
pub mod two_phase_clock;

pub use generic_clock::GenericClock;
pub use two_phase_clock::TwoPhaseClock;
