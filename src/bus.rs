//! Nets and drive-conflict resolution.
//!
//! A net is a set of pin taps sharing one logical value. Each tap sits at a
//! bit offset inside the net so a narrow pin can join a slice of a wide bus.
//! Resolution works per bit: drivers only conflict where their slices overlap.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pin::{PinValue, SignalClass};
use crate::types::{width_mask, NetId, PinId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The most recent write in tick order wins.
    LastWriter,
    /// Active drivers are OR-ed together.
    WiredOr,
    /// Disagreeing active drivers are a drive conflict.
    ErrorOnConflict,
}

/// Conflict policy of a net plus whether a conflict halts the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetPolicy {
    pub policy: ConflictPolicy,
    pub fatal: bool,
}

impl NetPolicy {
    pub fn last_writer() -> Self {
        NetPolicy {
            policy: ConflictPolicy::LastWriter,
            fatal: false,
        }
    }

    pub fn wired_or() -> Self {
        NetPolicy {
            policy: ConflictPolicy::WiredOr,
            fatal: false,
        }
    }

    /// Error-on-conflict, fatal unless downgraded with [`NetPolicy::as_warning`].
    pub fn error_on_conflict() -> Self {
        NetPolicy {
            policy: ConflictPolicy::ErrorOnConflict,
            fatal: true,
        }
    }

    pub fn as_warning(mut self) -> Self {
        self.fatal = false;
        self
    }

    /// Default policy for a net created by a pin of the given class.
    pub fn for_class(class: SignalClass) -> Self {
        match class {
            SignalClass::Power | SignalClass::Ground | SignalClass::Clock => {
                NetPolicy::error_on_conflict()
            }
            SignalClass::Data | SignalClass::Address => NetPolicy::error_on_conflict().as_warning(),
            SignalClass::Control => NetPolicy::wired_or(),
            SignalClass::Analog | SignalClass::Wire => NetPolicy::last_writer(),
        }
    }
}

/// An active driver as seen by the resolver: its value already sits at
/// `offset` bits inside the net.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Driver {
    pub pin: PinId,
    pub offset: u8,
    pub width: u8,
    pub value: u64,
    pub seq: u64,
}

impl Driver {
    fn mask(&self) -> u64 {
        width_mask(self.width) << self.offset
    }

    fn placed(&self) -> u64 {
        ((self.value & width_mask(self.width)) << self.offset) & self.mask()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(PinValue),
    /// Drivers disagreed. `fallback` is the last-writer value, used when the
    /// conflict is only a warning.
    Conflict {
        pins: Vec<PinId>,
        fallback: PinValue,
    },
}

/// Resolve the value of a `width`-bit net from its active drivers.
pub fn resolve_drivers(width: u8, policy: ConflictPolicy, drivers: &[Driver]) -> Resolution {
    if drivers.is_empty() {
        return Resolution::Resolved(PinValue::HighZ);
    }

    let mut ordered: Vec<&Driver> = drivers.iter().collect();
    ordered.sort_by_key(|d| (d.seq, d.pin));

    let net_mask = width_mask(width);
    let last_writer = ordered
        .iter()
        .fold(0u64, |acc, d| (acc & !d.mask()) | d.placed());
    let wired_or = ordered.iter().fold(0u64, |acc, d| acc | d.placed());

    match policy {
        ConflictPolicy::LastWriter => Resolution::Resolved(PinValue::Driven(last_writer & net_mask)),
        ConflictPolicy::WiredOr => Resolution::Resolved(PinValue::Driven(wired_or & net_mask)),
        ConflictPolicy::ErrorOnConflict => {
            let mut offenders = Vec::new();
            for (i, a) in ordered.iter().enumerate() {
                for b in &ordered[i + 1..] {
                    let overlap = a.mask() & b.mask();
                    if (a.placed() ^ b.placed()) & overlap != 0 {
                        offenders.push(a.pin);
                        offenders.push(b.pin);
                    }
                }
            }

            if offenders.is_empty() {
                Resolution::Resolved(PinValue::Driven(wired_or & net_mask))
            } else {
                offenders.sort();
                offenders.dedup();
                Resolution::Conflict {
                    pins: offenders,
                    fallback: PinValue::Driven(last_writer & net_mask),
                }
            }
        }
    }
}

/// A set of pins joined into one logical signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Net {
    pub id: NetId,
    pub width: u8,
    pub policy: NetPolicy,
    pub class: SignalClass,
    pub(crate) taps: BTreeMap<PinId, u8>,
    pub(crate) value: PinValue,
}

impl Net {
    pub(crate) fn new(id: NetId, width: u8, policy: NetPolicy, class: SignalClass) -> Self {
        Net {
            id,
            width,
            policy,
            class,
            taps: BTreeMap::new(),
            value: PinValue::HighZ,
        }
    }

    /// Participant pins in id order.
    pub fn pins(&self) -> impl Iterator<Item = PinId> + '_ {
        self.taps.keys().copied()
    }

    pub fn offset_of(&self, pin: PinId) -> Option<u8> {
        self.taps.get(&pin).copied()
    }

    pub fn contains(&self, pin: PinId) -> bool {
        self.taps.contains_key(&pin)
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    /// Last committed resolved value.
    pub fn value(&self) -> PinValue {
        self.value
    }

    /// The slice of the committed value visible to a tap.
    pub fn value_at(&self, offset: u8, width: u8) -> PinValue {
        slice_value(self.value, offset, width)
    }
}

pub(crate) fn slice_value(value: PinValue, offset: u8, width: u8) -> PinValue {
    match value {
        PinValue::Driven(v) => {
            let shifted = if offset >= 64 { 0 } else { v >> offset };
            PinValue::Driven(shifted & width_mask(width))
        }
        PinValue::HighZ => PinValue::HighZ,
    }
}
