//! Fractional positional identifiers for ordered sequences.
//!
//! A `Position` is a non-negative number with an arbitrary-precision
//! fraction, stored as base 2^32 digits: the first digit is the integer
//! part, the rest are fractional digits. Digits are kept normalized (no
//! trailing zero fraction digits), so derived lexicographic ordering matches
//! numeric ordering.
//!
//! New positions are produced by exact midpoint arithmetic, so there is
//! always room between two distinct positions and nothing is ever
//! renumbered.
//!
//! Complexity:
//! - compare: O(d) where d is the digit count
//! - between: O(d)

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use smallvec::SmallVec;
use smallvec::smallvec;

use super::id::OperationId;

const DIGIT_BITS: u32 = 32;
const DIGIT_MASK: u64 = 0xFFFF_FFFF;

type Digits = SmallVec<[u32; 4]>;

/// A fractional position in a sequence.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(Digits);

impl Position {
    /// The position for the element at `index` when seeding a sequence.
    pub fn from_index(index: usize) -> Position {
        let integer = u32::try_from(index + 1).unwrap_or(u32::MAX);
        return Position(smallvec![integer]);
    }

    /// Build a position from raw digits.
    pub fn from_digits(digits: &[u32]) -> Position {
        let mut position = Position(digits.iter().copied().collect());
        if position.0.is_empty() {
            position.0.push(0);
        }
        position.normalize();
        return position;
    }

    /// The raw digits, integer part first.
    pub fn digits(&self) -> &[u32] {
        return &self.0;
    }

    /// Generate a position strictly between `left` and `right`.
    ///
    /// `None` on the left means the start of the sequence (zero); `None` on
    /// the right means the end. If `left >= right` no such position exists;
    /// the result is then placed just after `left` and ties are left to the
    /// creator operation id.
    pub fn between(left: Option<&Position>, right: Option<&Position>) -> Position {
        return match (left, right) {
            (None, None) => Position::from_index(0),
            (Some(left), None) => left.successor(),
            (None, Some(right)) => Position::midpoint(&Position(smallvec![0]), right),
            (Some(left), Some(right)) => {
                if left < right {
                    Position::midpoint(left, right)
                } else {
                    left.successor()
                }
            }
        };
    }

    /// A position greater than `self`, preferring a short integer.
    fn successor(&self) -> Position {
        let integer = self.0[0];
        if integer < u32::MAX {
            return Position(smallvec![integer + 1]);
        }
        let mut digits = self.0.clone();
        digits.push(1);
        return Position(digits);
    }

    /// The exact midpoint `(a + b) / 2`.
    fn midpoint(a: &Position, b: &Position) -> Position {
        // One extra digit absorbs the remainder of the final halving.
        let len = a.0.len().max(b.0.len()) + 1;
        let digit = |p: &Position, i: usize| -> u64 { p.0.get(i).copied().unwrap_or(0) as u64 };

        let mut sum = vec![0u64; len];
        let mut carry = 0u64;
        for i in (1..len).rev() {
            let s = digit(a, i) + digit(b, i) + carry;
            sum[i] = s & DIGIT_MASK;
            carry = s >> DIGIT_BITS;
        }
        sum[0] = digit(a, 0) + digit(b, 0) + carry;

        let mut digits: Digits = SmallVec::with_capacity(len);
        let mut remainder = 0u64;
        for (i, s) in sum.iter().enumerate() {
            let current = if i == 0 { *s } else { (remainder << DIGIT_BITS) | *s };
            digits.push((current / 2) as u32);
            remainder = current % 2;
        }

        let mut position = Position(digits);
        position.normalize();
        return position;
    }

    fn normalize(&mut self) {
        while self.0.len() > 1 && self.0[self.0.len() - 1] == 0 {
            self.0.pop();
        }
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "Position({})", self);
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0[0])?;
        if self.0.len() > 1 {
            write!(f, ".")?;
            for (i, d) in self.0[1..].iter().enumerate() {
                if i > 0 {
                    write!(f, "_")?;
                }
                write!(f, "{:08x}", d)?;
            }
        }
        return Ok(());
    }
}

/// A stable identifier for one element of an LCS-diffed sequence.
///
/// Ordered by position first, then by the id of the operation that created
/// the element, so concurrent inserts at an identical position still land
/// in the same order everywhere.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionalIdentifier {
    pub position: Position,
    pub operation_id: OperationId,
}

impl PositionalIdentifier {
    pub fn new(position: Position, operation_id: OperationId) -> PositionalIdentifier {
        return PositionalIdentifier { position, operation_id };
    }
}
