//! Duration values
//!
//! Lengths are exact rationals measured in quarter notes, so window
//! arithmetic (splitting, summing fragments back together) never drifts.

use num_rational::Rational64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

use crate::error::{Result, StreamError};

/// Re-export Rational for offset and duration calculations
pub type Rational = Rational64;

/// Immutable, non-negative length with optional notation metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "DurationRepr", into = "DurationRepr")]
pub struct Duration {
    /// Length in quarter notes (always >= 0)
    quarter_length: Rational,

    /// Number of augmentation dots the length was notated with
    dots: u8,

    /// Scaling factor for tuplets (e.g., 2/3 for triplet)
    tuplet: Option<Rational>,
}

/// Wire shape of [`Duration`], checked on the way in
#[derive(Serialize, Deserialize)]
struct DurationRepr {
    quarter_length: Rational,
    #[serde(default)]
    dots: u8,
    #[serde(default)]
    tuplet: Option<Rational>,
}

impl TryFrom<DurationRepr> for Duration {
    type Error = StreamError;

    fn try_from(repr: DurationRepr) -> Result<Self> {
        let base = Duration::new(repr.quarter_length)?;
        if let Some(factor) = repr.tuplet {
            if factor <= Rational::from_integer(0) {
                return Err(StreamError::InvalidDuration(format!("tuplet factor {}", factor)));
            }
        }
        Ok(Self {
            dots: repr.dots,
            tuplet: repr.tuplet,
            ..base
        })
    }
}

impl From<Duration> for DurationRepr {
    fn from(duration: Duration) -> Self {
        Self {
            quarter_length: duration.quarter_length,
            dots: duration.dots,
            tuplet: duration.tuplet,
        }
    }
}

impl Duration {
    /// Create a duration from a quarter-note length
    pub fn new(quarter_length: Rational) -> Result<Self> {
        if quarter_length < Rational::from_integer(0) {
            return Err(StreamError::InvalidDuration(quarter_length.to_string()));
        }
        Ok(Self {
            quarter_length,
            dots: 0,
            tuplet: None,
        })
    }

    /// Zero-length duration (markers, empty containers)
    pub fn zero() -> Self {
        Self {
            quarter_length: Rational::from_integer(0),
            dots: 0,
            tuplet: None,
        }
    }

    /// Whole-number quarter lengths
    pub fn quarters(count: u32) -> Self {
        Self {
            quarter_length: Rational::from_integer(count as i64),
            dots: 0,
            tuplet: None,
        }
    }

    /// Create a duration from a float quarter length
    pub fn from_f64(quarter_length: f64) -> Result<Self> {
        let ratio = to_rational(quarter_length)
            .ok_or_else(|| StreamError::InvalidDuration(quarter_length.to_string()))?;
        Self::new(ratio)
    }

    /// Create a duration from a notated type
    ///
    /// `log` is the logarithmic type (0=whole, 1=half, 2=quarter, 3=eighth, ...).
    /// A dotted value is `base * (2 - 1/2^dots)`; the tuplet factor scales the result.
    pub fn from_type(log: u8, dots: u8, tuplet: Option<Rational>) -> Result<Self> {
        if log > 10 || dots > 4 {
            return Err(StreamError::InvalidDuration(format!(
                "type log={} dots={}",
                log, dots
            )));
        }
        if let Some(factor) = tuplet {
            if factor <= Rational::from_integer(0) {
                return Err(StreamError::InvalidDuration(format!("tuplet factor {}", factor)));
            }
        }

        let base = Rational::new(4, 1 << log);
        let dot_multiplier = Rational::new((1 << (dots + 1)) - 1, 1 << dots);
        let scaled = base * dot_multiplier * tuplet.unwrap_or_else(|| Rational::from_integer(1));

        Ok(Self {
            quarter_length: scaled,
            dots,
            tuplet,
        })
    }

    /// Length in quarter notes
    pub fn quarter_length(&self) -> Rational {
        self.quarter_length
    }

    pub fn dots(&self) -> u8 {
        self.dots
    }

    pub fn tuplet(&self) -> Option<Rational> {
        self.tuplet
    }

    pub fn is_zero(&self) -> bool {
        self.quarter_length == Rational::from_integer(0)
    }

    /// Subtract another duration, clamping at zero
    pub fn saturating_sub(&self, other: &Duration) -> Duration {
        let diff = self.quarter_length - other.quarter_length;
        if diff < Rational::from_integer(0) {
            Duration::zero()
        } else {
            Duration {
                quarter_length: diff,
                dots: 0,
                tuplet: None,
            }
        }
    }

    /// Convert to floating point (for display and plotting)
    pub fn to_f64(&self) -> f64 {
        rational_to_f64(self.quarter_length)
    }
}

impl Default for Duration {
    fn default() -> Self {
        Duration::zero()
    }
}

impl Add for Duration {
    type Output = Duration;

    /// Notation metadata does not survive addition; the sum is a plain length.
    fn add(self, other: Duration) -> Duration {
        Duration {
            quarter_length: self.quarter_length + other.quarter_length,
            dots: 0,
            tuplet: None,
        }
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ql", self.quarter_length)
    }
}

/// Convert a finite float to an exact rational, rejecting NaN and infinities
pub fn to_rational(value: f64) -> Option<Rational> {
    if !value.is_finite() {
        return None;
    }
    Rational::approximate_float(value)
}

/// Convert a rational to floating point
pub fn rational_to_f64(value: Rational) -> f64 {
    *value.numer() as f64 / *value.denom() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_length_rejected() {
        assert!(Duration::new(Rational::from_integer(-1)).is_err());
        assert!(Duration::from_f64(f64::NAN).is_err());
        assert!(Duration::from_f64(f64::INFINITY).is_err());
    }

    #[test]
    fn test_from_type() {
        // Quarter note
        let q = Duration::from_type(2, 0, None).unwrap();
        assert_eq!(q.quarter_length(), Rational::from_integer(1));

        // Dotted half = 3 quarters
        let dh = Duration::from_type(1, 1, None).unwrap();
        assert_eq!(dh.quarter_length(), Rational::from_integer(3));
        assert_eq!(dh.dots(), 1);

        // Triplet eighth = 1/3
        let te = Duration::from_type(3, 0, Some(Rational::new(2, 3))).unwrap();
        assert_eq!(te.quarter_length(), Rational::new(1, 3));
    }

    #[test]
    fn test_saturating_sub_clamps() {
        let a = Duration::quarters(1);
        let b = Duration::quarters(3);
        assert!(a.saturating_sub(&b).is_zero());
        assert_eq!(b.saturating_sub(&a).quarter_length(), Rational::from_integer(2));
    }

    #[test]
    fn test_deserialize_rejects_negative_length() {
        let err = serde_json::from_str::<Duration>(
            r#"{"quarter_length":[-3,1],"dots":0,"tuplet":null}"#,
        );
        assert!(err.is_err());
        assert!(serde_json::from_str::<Duration>(r#"{"quarter_length":[1,1],"tuplet":[0,1]}"#).is_err());

        let dotted = Duration::from_type(1, 1, None).unwrap();
        let json = serde_json::to_string(&dotted).unwrap();
        let back: Duration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dotted);
        assert_eq!(back.dots(), 1);
    }

    #[test]
    fn test_from_f64_exact_for_binary_fractions() {
        let d = Duration::from_f64(1.5).unwrap();
        assert_eq!(d.quarter_length(), Rational::new(3, 2));
    }
}
