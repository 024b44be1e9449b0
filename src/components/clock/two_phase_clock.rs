use crate::component::{
    Activation, ComponentDescriptor, ComponentKind, ComponentLogic, Inputs, StateBlob, StepResult,
};
use crate::error::{ComponentFault, LibraryError};
use crate::pin::{PinSpec, PinValue, SignalClass};
use crate::types::Tick;

/// Non-overlapping two-phase clock.
///
/// The period is split into quarters: PHI1 is high in the first, PHI2 in
/// the third, and both are low in the gaps between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoPhaseClock {
    period: u64,
    phase: u64,
}

impl TwoPhaseClock {
    pub fn new(period: u64) -> Result<Self, LibraryError> {
        if period < 4 || period % 4 != 0 {
            return Err(LibraryError::invalid(
                "two_phase_clock",
                "period must be a positive multiple of 4 ticks",
            ));
        }
        Ok(TwoPhaseClock { period, phase: 0 })
    }

    pub fn from_descriptor(descriptor: &ComponentDescriptor) -> Result<Self, LibraryError> {
        let mut clock = Self::new(descriptor.u64_or("period", 4)?)
            .map_err(|err| LibraryError::invalid(&descriptor.name, err.to_string()))?;
        clock.phase = descriptor.u64_or("phase", 0)? % clock.period;
        Ok(clock)
    }

    /// `(phi1, phi2)` levels at a tick.
    pub fn levels_at(&self, tick: Tick) -> (bool, bool) {
        let quarter = self.period / 4;
        let position = (tick + self.phase) % self.period;
        (position < quarter, position >= 2 * quarter && position < 3 * quarter)
    }
}

impl ComponentLogic for TwoPhaseClock {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Clock
    }

    fn pins(&self) -> Vec<PinSpec> {
        vec![
            PinSpec::output("PHI1", 1, SignalClass::Clock),
            PinSpec::output("PHI2", 1, SignalClass::Clock),
        ]
    }

    fn activation(&self) -> Activation {
        Activation::Source
    }

    fn power_on_state(&self) -> StateBlob {
        StateBlob::default()
    }

    fn step(&self, tick: Tick, _inputs: &Inputs, _state: &StateBlob) -> Result<StepResult, ComponentFault> {
        let (phi1, phi2) = self.levels_at(tick);
        Ok(StepResult::hold()
            .drive("PHI1", PinValue::from_bool(phi1))
            .drive("PHI2", PinValue::from_bool(phi2)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_never_overlap() {
        let clock = TwoPhaseClock::new(8).unwrap();
        for tick in 0..64 {
            let (phi1, phi2) = clock.levels_at(tick);
            assert!(!(phi1 && phi2), "overlap at tick {}", tick);
        }
    }

    #[test]
    fn test_phase_sequence() {
        let clock = TwoPhaseClock::new(4).unwrap();
        let seq: Vec<(bool, bool)> = (0..4).map(|t| clock.levels_at(t)).collect();
        assert_eq!(seq, vec![(true, false), (false, false), (false, true), (false, false)]);
    }

    #[test]
    fn test_invalid_period() {
        assert!(TwoPhaseClock::new(6).is_err());
        assert!(TwoPhaseClock::new(0).is_err());
    }
}
