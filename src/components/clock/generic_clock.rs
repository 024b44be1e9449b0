use crate::component::{
    Activation, ComponentDescriptor, ComponentKind, ComponentLogic, Inputs, StateBlob, StepResult,
};
use crate::error::{ComponentFault, LibraryError};
use crate::pin::{PinSpec, PinValue, SignalClass};
use crate::types::Tick;

const LEVEL: usize = 0;
const CYCLES: usize = 1;

/// Free-running square wave on `CLK`.
///
/// The level at tick `t` is high when `(t + phase) % period >= period - high`,
/// so a period-2 clock starting at phase 0 reads 0, 1, 0, 1, ...
/// Pulling `ENABLE` low holds the output low; a floating `ENABLE` counts as enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericClock {
    period: u64,
    high: u64,
    phase: u64,
}

impl GenericClock {
    pub fn new(period: u64) -> Result<Self, LibraryError> {
        Self::with_duty(period, period / 2, 0)
    }

    pub fn with_duty(period: u64, high: u64, phase: u64) -> Result<Self, LibraryError> {
        if period < 2 {
            return Err(LibraryError::invalid("clock", "period must be at least 2 ticks"));
        }
        if high == 0 || high >= period {
            return Err(LibraryError::invalid("clock", "high time must be within the period"));
        }
        Ok(GenericClock {
            period,
            high,
            phase: phase % period,
        })
    }

    pub fn from_descriptor(descriptor: &ComponentDescriptor) -> Result<Self, LibraryError> {
        let period = descriptor.u64_or("period", 2)?;
        let high = descriptor.u64_or("high", period / 2)?;
        let phase = descriptor.u64_or("phase", 0)?;
        Self::with_duty(period, high, phase)
            .map_err(|_| LibraryError::invalid(&descriptor.name, "period must be >= 2 with 0 < high < period"))
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    /// Level the clock drives at a tick.
    pub fn level_at(&self, tick: Tick) -> bool {
        (tick + self.phase) % self.period >= self.period - self.high
    }
}

impl ComponentLogic for GenericClock {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Clock
    }

    fn pins(&self) -> Vec<PinSpec> {
        vec![
            PinSpec::output("CLK", 1, SignalClass::Clock),
            PinSpec::input("ENABLE", 1, SignalClass::Control),
        ]
    }

    fn activation(&self) -> Activation {
        Activation::Source
    }

    fn power_on_state(&self) -> StateBlob {
        StateBlob::zeroed(9)
    }

    fn step(&self, tick: Tick, inputs: &Inputs, state: &StateBlob) -> Result<StepResult, ComponentFault> {
        let enabled = inputs.get("ENABLE").to_bool().unwrap_or(true);
        let level = enabled && self.level_at(tick);

        let mut next = state.clone();
        if level && !state.flag(LEVEL) {
            next.set_word(CYCLES, 8, state.word(CYCLES, 8).wrapping_add(1));
        }
        next.set_flag(LEVEL, level);

        Ok(StepResult::hold()
            .drive("CLK", PinValue::from_bool(level))
            .with_state(next))
    }

    fn describe(&self, state: &StateBlob) -> String {
        format!(
            "CLK={} cycles={}",
            state.byte(LEVEL),
            state.word(CYCLES, 8)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_creation() {
        let clock = GenericClock::new(4).unwrap();
        assert_eq!(clock.period(), 4);
        assert!(GenericClock::new(1).is_err());
        assert!(GenericClock::with_duty(4, 4, 0).is_err());
    }

    #[test]
    fn test_period_two_sequence() {
        let clock = GenericClock::new(2).unwrap();
        let levels: Vec<u8> = (0..10).map(|t| clock.level_at(t) as u8).collect();
        assert_eq!(levels, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_duty_and_phase() {
        let clock = GenericClock::with_duty(4, 1, 1).unwrap();
        let levels: Vec<u8> = (0..8).map(|t| clock.level_at(t) as u8).collect();
        assert_eq!(levels, vec![0, 0, 1, 0, 0, 0, 1, 0]);
    }

    #[test]
    fn test_enable_pin_holds_low() {
        let clock = GenericClock::new(2).unwrap();
        let state = clock.power_on_state();
        let inputs = Inputs::default().with("ENABLE", PinValue::LOW);
        let result = clock.step(1, &inputs, &state).unwrap();
        assert_eq!(result.outputs["CLK"], PinValue::LOW);
    }

    #[test]
    fn test_counts_cycles() {
        let clock = GenericClock::new(2).unwrap();
        let mut state = clock.power_on_state();
        for tick in 0..6 {
            state = clock
                .step(tick, &Inputs::default(), &state)
                .unwrap()
                .next_state
                .unwrap();
        }
        assert_eq!(state.word(CYCLES, 8), 3);
    }

    #[test]
    fn test_descriptor_properties() {
        let desc = ComponentDescriptor::new("clk", "clock").with_property("period", 8);
        let clock = GenericClock::from_descriptor(&desc).unwrap();
        assert_eq!(clock.period(), 8);
        assert!(clock.level_at(4));
        assert!(!clock.level_at(3));
    }
}
