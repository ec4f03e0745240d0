//! Dense LSEQ identifiers.
//!
//! An identifier is a path of `(digit, replica)` components compared
//! lexicographically; a shorter path that is a prefix of a longer one sorts
//! first. A fresh identifier between two neighbours is found by walking down
//! the levels until a level has a free gap between the bounds, so existing
//! identifiers never need to be renumbered.
//!
//! Every component carries the replica that chose it. Two replicas that
//! happen to pick the same digit for the same gap therefore still produce
//! distinct identifiers, ordered by replica id.
//!
//! The base doubles with depth (32, 64, 128, ...). Digits are drawn at
//! random from a window next to one of the bounds, alternating the bound per
//! level (boundary+ on even levels, boundary- on odd ones).

use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use smallvec::SmallVec;
use smallvec::smallvec;

use super::id::ReplicaId;

/// Width of the window a digit is drawn from.
const BOUNDARY: i64 = 10;

/// Base at depth 0.
const ROOT_BASE: i64 = 32;

/// One level of an LSEQ path.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LseqComponent {
    pub digit: u32,
    pub replica: ReplicaId,
}

/// A dense identifier for one sequence element.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LseqIdentifier(pub SmallVec<[LseqComponent; 2]>);

fn base(depth: usize) -> i64 {
    if depth >= 26 {
        return 1 << 31;
    }
    return ROOT_BASE << depth;
}

impl LseqIdentifier {
    /// The identifier assigned to the element at `index` when seeding.
    pub fn seed(index: usize) -> LseqIdentifier {
        let digit = u32::try_from(index + 1).unwrap_or(u32::MAX);
        return LseqIdentifier(smallvec![LseqComponent {
            digit,
            replica: ReplicaId::default(),
        }]);
    }

    /// Number of levels.
    pub fn depth(&self) -> usize {
        return self.0.len();
    }

    /// Allocate an identifier strictly between `left` and `right`.
    ///
    /// `None` bounds mean the start and end of the sequence. The caller must
    /// pass `left < right` when both are present.
    pub fn between<R: Rng + ?Sized>(
        left: Option<&LseqIdentifier>,
        right: Option<&LseqIdentifier>,
        replica: &ReplicaId,
        rng: &mut R,
    ) -> LseqIdentifier {
        let mut path: SmallVec<[LseqComponent; 2]> = SmallVec::new();
        // While true, `path` equals the prefix of `right` and `right` still
        // bounds the next digit.
        let mut bounded_by_right = right.is_some();
        // While true, `path` equals the prefix of `left`.
        let mut following_left = left.is_some();

        let mut depth = 0;
        loop {
            let left_component = if following_left { left.and_then(|l| l.0.get(depth)) } else { None };
            let right_component = if bounded_by_right { right.and_then(|r| r.0.get(depth)) } else { None };

            let low = left_component.map(|c| c.digit as i64).unwrap_or(0);
            let high = match right_component {
                Some(c) => c.digit as i64,
                None => base(depth),
            };

            if high - low > 1 {
                let digit = pick_digit(low, high, depth, rng);
                path.push(LseqComponent {
                    digit: digit as u32,
                    replica: replica.clone(),
                });
                return LseqIdentifier(path);
            }

            // No room at this level: descend beneath the left bound.
            let component = match (left_component, right_component) {
                (Some(c), _) => c.clone(),
                // Left is exhausted and the right digit sits on the floor, so
                // only the right component's own subtree stays below it.
                (None, Some(r)) if r.digit as i64 == low => r.clone(),
                (None, _) => LseqComponent {
                    digit: low as u32,
                    replica: replica.clone(),
                },
            };
            if left_component.is_none() {
                following_left = false;
            }
            match right_component {
                Some(r) if *r == component => {}
                _ => bounded_by_right = false,
            }
            path.push(component);
            depth += 1;
        }
    }
}

fn pick_digit<R: Rng + ?Sized>(low: i64, high: i64, depth: usize, rng: &mut R) -> i64 {
    let window = BOUNDARY.min(high - low - 1);
    if depth % 2 == 0 {
        return rng.gen_range(low + 1..=low + window);
    }
    return rng.gen_range(high - window..=high - 1);
}
