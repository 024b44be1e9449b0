use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical simulation time. Not tied to wall-clock time.
pub type Tick = u64;

/// Widest signal a single pin or net can carry.
pub const MAX_WIDTH: u8 = 64;

/// Bit mask covering the low `width` bits.
pub fn width_mask(width: u8) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            pub fn new(index: u32) -> Self {
                $name(index)
            }

            pub fn index(&self) -> usize {
                self.0 as usize
            }

            pub fn value(&self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                $name(value)
            }
        }
    };
}

arena_id!(
    /// Stable identity of a component instance on the board.
    ComponentId,
    "C"
);
arena_id!(
    /// Stable index of a pin in the connection system's arena.
    PinId,
    "P"
);
arena_id!(
    /// Identity of a net. A net keeps its id across merges into it.
    NetId,
    "N"
);
