use std::fmt::{Display, Formatter};

/// Per-connection sequence number of a device write, echoed back by APNs in error
///  responses. Assigned when a frame is written, never when a notification is enqueued.
///
/// Identifiers wrap around at `u32::MAX`, so ordering is only meaningful between values that
///  are less than `2^31` apart.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct Identifier(u32);

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Identifier {
    /// Starting point of each connection: the first write gets `ZERO.next()`, i.e. 1
    pub const ZERO: Identifier = Identifier(0);

    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn next(&self) -> Identifier {
        Identifier(self.0.wrapping_add(1))
    }

    /// `true` if a write with this identifier happened at or before `acknowledged` in write
    ///  order
    pub fn is_covered_by(&self, acknowledged: Identifier) -> bool {
        (acknowledged.0.wrapping_sub(self.0) as i32) >= 0
    }
}
