use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{width_mask, ComponentId, NetId, PinId};

/// Value seen on a pin or net. `HighZ` is a floating (undriven) line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinValue {
    Driven(u64),
    HighZ, // Tri-state
}

impl PinValue {
    pub const LOW: PinValue = PinValue::Driven(0);
    pub const HIGH: PinValue = PinValue::Driven(1);

    pub fn from_bool(value: bool) -> Self {
        if value {
            PinValue::HIGH
        } else {
            PinValue::LOW
        }
    }

    /// Bit 0 of a driven value; `None` when floating.
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            PinValue::Driven(v) => Some(v & 1 == 1),
            PinValue::HighZ => None,
        }
    }

    pub fn is_high(&self) -> bool {
        self.to_bool() == Some(true)
    }

    pub fn is_driven(&self) -> bool {
        matches!(self, PinValue::Driven(_))
    }

    pub fn bits(&self) -> Option<u64> {
        match self {
            PinValue::Driven(v) => Some(*v),
            PinValue::HighZ => None,
        }
    }

    /// Bits of a driven value, with a floating line read as zero.
    pub fn bits_or_zero(&self) -> u64 {
        self.bits().unwrap_or(0)
    }

    pub fn masked(self, width: u8) -> Self {
        match self {
            PinValue::Driven(v) => PinValue::Driven(v & width_mask(width)),
            PinValue::HighZ => PinValue::HighZ,
        }
    }

    pub fn to_char(&self) -> char {
        match self {
            PinValue::Driven(v) if v & 1 == 1 => '1',
            PinValue::Driven(_) => '0',
            PinValue::HighZ => 'Z',
        }
    }

    /// Render a value for a line of the given width: single lines as 0/1/Z,
    /// buses as zero-padded hex.
    pub fn format_width(&self, width: u8) -> String {
        match self {
            PinValue::HighZ => "Z".repeat(if width <= 1 { 1 } else { hex_digits(width) }),
            PinValue::Driven(_) if width <= 1 => self.to_char().to_string(),
            PinValue::Driven(v) => format!("{:0digits$X}", v, digits = hex_digits(width)),
        }
    }
}

fn hex_digits(width: u8) -> usize {
    (width as usize).div_ceil(4)
}

impl Default for PinValue {
    fn default() -> Self {
        PinValue::HighZ
    }
}

impl fmt::Display for PinValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinValue::Driven(v) => write!(f, "{:X}", v),
            PinValue::HighZ => write!(f, "Z"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinDirection {
    Input,
    Output,
    Bidirectional,
}

impl PinDirection {
    pub fn can_drive(&self) -> bool {
        !matches!(self, PinDirection::Input)
    }

    pub fn can_read(&self) -> bool {
        !matches!(self, PinDirection::Output)
    }
}

/// Electrical role of a line. Drives the default conflict policy of the
/// nets it creates and the compatibility rules for power rails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalClass {
    Data,
    Address,
    Control,
    Clock,
    Power,
    Ground,
    Analog,
    Wire,
}

impl SignalClass {
    pub fn is_rail(&self) -> bool {
        matches!(self, SignalClass::Power | SignalClass::Ground)
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            SignalClass::Data => "data",
            SignalClass::Address => "address",
            SignalClass::Control => "control",
            SignalClass::Clock => "clock",
            SignalClass::Power => "power",
            SignalClass::Ground => "ground",
            SignalClass::Analog => "analog",
            SignalClass::Wire => "wire",
        }
    }
}

impl Default for SignalClass {
    fn default() -> Self {
        SignalClass::Wire
    }
}

/// Declaration of one pin in a component descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinSpec {
    pub name: String,
    pub direction: PinDirection,
    #[serde(default = "default_width")]
    pub width: u8,
    #[serde(default)]
    pub class: SignalClass,
}

fn default_width() -> u8 {
    1
}

impl PinSpec {
    pub fn new(name: &str, direction: PinDirection, width: u8, class: SignalClass) -> Self {
        PinSpec {
            name: name.to_string(),
            direction,
            width,
            class,
        }
    }

    pub fn input(name: &str, width: u8, class: SignalClass) -> Self {
        Self::new(name, PinDirection::Input, width, class)
    }

    pub fn output(name: &str, width: u8, class: SignalClass) -> Self {
        Self::new(name, PinDirection::Output, width, class)
    }

    pub fn bidirectional(name: &str, width: u8, class: SignalClass) -> Self {
        Self::new(name, PinDirection::Bidirectional, width, class)
    }
}

/// A committed drive on a pin: the value and the write sequence number
/// that ordered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drive {
    pub value: PinValue,
    pub seq: u64,
}

/// A registered pin in the connection system's arena.
#[derive(Debug, Clone)]
pub struct Pin {
    pub id: PinId,
    pub component: ComponentId,
    pub name: String,
    pub direction: PinDirection,
    pub width: u8,
    pub class: SignalClass,
    pub(crate) net: Option<NetId>,
    pub(crate) drive: Option<Drive>,
}

impl Pin {
    pub(crate) fn new(id: PinId, component: ComponentId, spec: &PinSpec) -> Self {
        Pin {
            id,
            component,
            name: spec.name.clone(),
            direction: spec.direction,
            width: spec.width,
            class: spec.class,
            net: None,
            drive: None,
        }
    }

    pub fn net(&self) -> Option<NetId> {
        self.net
    }

    /// The committed value this pin drives, if it is actively driving.
    pub fn driven_value(&self) -> Option<PinValue> {
        self.drive
            .map(|d| d.value)
            .filter(|value| value.is_driven())
    }

    pub fn is_driving(&self) -> bool {
        self.driven_value().is_some()
    }

    pub fn spec(&self) -> PinSpec {
        PinSpec::new(&self.name, self.direction, self.width, self.class)
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.name)?;
        if let Some(drive) = self.drive {
            write!(f, " [drives {}]", drive.value.format_width(self.width))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_value_bool_conversions() {
        assert_eq!(PinValue::from_bool(true), PinValue::HIGH);
        assert_eq!(PinValue::from_bool(false), PinValue::LOW);
        assert_eq!(PinValue::HighZ.to_bool(), None);
        assert!(PinValue::Driven(3).is_high());
        assert!(!PinValue::Driven(2).is_high());
    }

    #[test]
    fn test_pin_value_formatting() {
        assert_eq!(PinValue::HIGH.format_width(1), "1");
        assert_eq!(PinValue::HighZ.format_width(1), "Z");
        assert_eq!(PinValue::Driven(0x2A).format_width(8), "2A");
        assert_eq!(PinValue::Driven(0x5).format_width(12), "005");
        assert_eq!(PinValue::HighZ.format_width(8), "ZZ");
    }

    #[test]
    fn test_masking() {
        assert_eq!(PinValue::Driven(0x1FF).masked(8), PinValue::Driven(0xFF));
        assert_eq!(PinValue::HighZ.masked(8), PinValue::HighZ);
    }

    #[test]
    fn test_direction_capabilities() {
        assert!(!PinDirection::Input.can_drive());
        assert!(PinDirection::Output.can_drive());
        assert!(PinDirection::Bidirectional.can_drive());
        assert!(PinDirection::Bidirectional.can_read());
        assert!(!PinDirection::Output.can_read());
    }

    #[test]
    fn test_pin_driving_state() {
        let spec = PinSpec::output("Q", 1, SignalClass::Data);
        let mut pin = Pin::new(PinId::new(0), ComponentId::new(0), &spec);
        assert!(!pin.is_driving());

        pin.drive = Some(Drive {
            value: PinValue::HIGH,
            seq: 1,
        });
        assert_eq!(pin.driven_value(), Some(PinValue::HIGH));

        pin.drive = Some(Drive {
            value: PinValue::HighZ,
            seq: 2,
        });
        assert!(!pin.is_driving());
    }
}
