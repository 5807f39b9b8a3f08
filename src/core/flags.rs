//! Bit-flag sets and their individual flags.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Lazy, ascending sequence of the set bits of a mask.
///
/// Yields each set bit as its own single-bit value, lowest first. The iterator is
/// `Copy`, so a saved copy restarts the sequence from wherever it was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndividualFlags {
    remaining: u32,
}

impl Iterator for IndividualFlags {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.remaining == 0 {
            return None;
        }
        let lowest = self.remaining & self.remaining.wrapping_neg();
        self.remaining &= !lowest;
        Some(lowest)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining.count_ones() as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for IndividualFlags {}

/// Split a mask into its individual set bits, in ascending bit order.
pub fn individual_flags(mask: u32) -> IndividualFlags {
    IndividualFlags { remaining: mask }
}

/// Protections a message requires or a binding element applied.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Protections(u32);

impl Protections {
    /// No protection.
    pub const NONE: Self = Self(0);
    /// Signature over the message.
    pub const TAMPER: Self = Self(0x01);
    /// Issue time is bounded.
    pub const EXPIRATION: Self = Self(0x02);
    /// Single-use nonce.
    pub const REPLAY: Self = Self(0x04);
    /// Every protection.
    pub const ALL: Self = Self(0x07);

    /// Raw mask.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Check if every flag of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check if no flag is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Flags set in `self` but not in `other`.
    pub fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Each set flag on its own, weakest bit first.
    pub fn iter(self) -> impl Iterator<Item = Protections> + Clone {
        individual_flags(self.0).map(Protections)
    }

    fn name(self) -> &'static str {
        match self {
            Self::TAMPER => "tamper",
            Self::EXPIRATION => "expiration",
            Self::REPLAY => "replay",
            _ => "unknown",
        }
    }
}

impl BitOr for Protections {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Protections {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Protections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(Protections::name)).finish()
    }
}

impl fmt::Display for Protections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.iter().map(Protections::name).collect();
        f.write_str(&names.join("|"))
    }
}
