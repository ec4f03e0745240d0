//! Numeric helpers shared by counter and register strategies.
//!
//! Document values are JSON numbers, which are either integers or floats.
//! `Numeric` keeps integers exact and only falls back to floating point when
//! one side already is.

use std::cmp::Ordering;
use std::ops::Add;
use std::ops::Neg;
use std::ops::Sub;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// An integer or floating point number.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Int(i64),
    Float(f64),
}

impl Default for Numeric {
    fn default() -> Self {
        return Numeric::Int(0);
    }
}

impl Numeric {
    pub const ZERO: Numeric = Numeric::Int(0);

    /// Read a number out of a value. `Null` and non-numbers give `None`.
    pub fn from_value(value: &Value) -> Option<Numeric> {
        let Value::Number(number) = value else {
            return None;
        };
        if let Some(i) = number.as_i64() {
            return Some(Numeric::Int(i));
        }
        return number.as_f64().map(Numeric::Float);
    }

    /// Read a number, treating `Null` or a missing value as zero.
    pub fn from_value_or_zero(value: Option<&Value>) -> Option<Numeric> {
        return match value {
            None | Some(Value::Null) => Some(Numeric::ZERO),
            Some(v) => Numeric::from_value(v),
        };
    }

    /// Convert back to a value. Non-finite floats become `Null`.
    pub fn to_value(self) -> Value {
        return match self {
            Numeric::Int(i) => Value::from(i),
            Numeric::Float(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        };
    }

    pub fn as_f64(self) -> f64 {
        return match self {
            Numeric::Int(i) => i as f64,
            Numeric::Float(f) => f,
        };
    }

    pub fn is_zero(self) -> bool {
        return match self {
            Numeric::Int(i) => i == 0,
            Numeric::Float(f) => f == 0.0,
        };
    }

    pub fn is_negative(self) -> bool {
        return match self {
            Numeric::Int(i) => i < 0,
            Numeric::Float(f) => f < 0.0,
        };
    }

    /// Clamp into `[min, max]`.
    pub fn clamp(self, min: Numeric, max: Numeric) -> Numeric {
        if self < min {
            return min;
        }
        if self > max {
            return max;
        }
        return self;
    }
}

impl From<i32> for Numeric {
    fn from(value: i32) -> Self {
        return Numeric::Int(value as i64);
    }
}

impl From<i64> for Numeric {
    fn from(value: i64) -> Self {
        return Numeric::Int(value);
    }
}

impl From<f64> for Numeric {
    fn from(value: f64) -> Self {
        return Numeric::Float(value);
    }
}

impl Add for Numeric {
    type Output = Numeric;

    fn add(self, rhs: Numeric) -> Numeric {
        return match (self, rhs) {
            (Numeric::Int(a), Numeric::Int(b)) => Numeric::Int(a.saturating_add(b)),
            (a, b) => Numeric::Float(a.as_f64() + b.as_f64()),
        };
    }
}

impl Sub for Numeric {
    type Output = Numeric;

    fn sub(self, rhs: Numeric) -> Numeric {
        return match (self, rhs) {
            (Numeric::Int(a), Numeric::Int(b)) => Numeric::Int(a.saturating_sub(b)),
            (a, b) => Numeric::Float(a.as_f64() - b.as_f64()),
        };
    }
}

impl Neg for Numeric {
    type Output = Numeric;

    fn neg(self) -> Numeric {
        return match self {
            Numeric::Int(i) => Numeric::Int(i.saturating_neg()),
            Numeric::Float(f) => Numeric::Float(-f),
        };
    }
}

impl PartialOrd for Numeric {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        return match (self, other) {
            (Numeric::Int(a), Numeric::Int(b)) => Some(a.cmp(b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        };
    }
}

/// Order two scalar values of the same kind.
///
/// Numbers compare numerically, strings lexicographically, booleans with
/// `false < true`. Anything else, including mixed kinds, is unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    return match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            let a = Numeric::from_value(a)?;
            let b = Numeric::from_value(b)?;
            a.partial_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integers_stay_exact() {
        let a = Numeric::from_value(&json!(90)).unwrap();
        let b = Numeric::from_value(&json!(-5)).unwrap();
        assert_eq!(a + b, Numeric::Int(85));
        assert_eq!((a - b).to_value(), json!(95));
    }

    #[test]
    fn mixing_promotes_to_float() {
        let a = Numeric::Int(1);
        let b = Numeric::Float(0.5);
        assert_eq!(a + b, Numeric::Float(1.5));
    }

    #[test]
    fn null_reads_as_zero() {
        assert_eq!(Numeric::from_value_or_zero(None), Some(Numeric::ZERO));
        assert_eq!(Numeric::from_value_or_zero(Some(&Value::Null)), Some(Numeric::ZERO));
        assert_eq!(Numeric::from_value_or_zero(Some(&json!("x"))), None);
    }

    #[test]
    fn clamp_bounds() {
        let min = Numeric::Int(0);
        let max = Numeric::Int(100);
        assert_eq!(Numeric::Int(110).clamp(min, max), max);
        assert_eq!(Numeric::Int(-3).clamp(min, max), min);
        assert_eq!(Numeric::Int(42).clamp(min, max), Numeric::Int(42));
    }

    #[test]
    fn compare_scalars() {
        assert_eq!(compare_values(&json!(1), &json!(2.5)), Some(Ordering::Less));
        assert_eq!(compare_values(&json!("b"), &json!("a")), Some(Ordering::Greater));
        assert_eq!(compare_values(&json!(1), &json!("1")), None);
    }
}
