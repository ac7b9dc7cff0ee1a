//! Window-length markers
//!
//! A [`Meter`] is the ratio carried by window markers: `n/d` means each
//! window spans `n` beats of a `1/d` note, i.e. `4n/d` quarter notes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, StreamError};
use crate::models::duration::Rational;

/// Validated `n/d` pair; both parts are non-zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "MeterRepr", into = "MeterRepr")]
pub struct Meter {
    /// Beats per window
    numerator: u32,
    /// Beat unit (4 = quarter, 8 = eighth)
    denominator: u32,
}

/// Wire shape of [`Meter`]; only reaches the model through [`Meter::new`]
#[derive(Serialize, Deserialize)]
struct MeterRepr {
    numerator: u32,
    denominator: u32,
}

impl TryFrom<MeterRepr> for Meter {
    type Error = StreamError;

    fn try_from(repr: MeterRepr) -> Result<Self> {
        Meter::new(repr.numerator, repr.denominator)
    }
}

impl From<Meter> for MeterRepr {
    fn from(meter: Meter) -> Self {
        Self {
            numerator: meter.numerator,
            denominator: meter.denominator,
        }
    }
}

impl Meter {
    pub fn new(numerator: u32, denominator: u32) -> Result<Self> {
        if numerator == 0 || denominator == 0 {
            return Err(StreamError::InvalidMeter(format!(
                "{}/{}",
                numerator, denominator
            )));
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    /// Parse a meter string (e.g., "4/4" or "6/8")
    pub fn parse(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.split('/').collect();
        if parts.len() != 2 {
            return Err(StreamError::InvalidMeter(text.to_string()));
        }
        let numerator = parts[0]
            .trim()
            .parse::<u32>()
            .map_err(|_| StreamError::InvalidMeter(text.to_string()))?;
        let denominator = parts[1]
            .trim()
            .parse::<u32>()
            .map_err(|_| StreamError::InvalidMeter(text.to_string()))?;
        Self::new(numerator, denominator)
    }

    pub fn numerator(&self) -> u32 {
        self.numerator
    }

    pub fn denominator(&self) -> u32 {
        self.denominator
    }

    /// Window length in quarter notes
    pub fn bar_length(&self) -> Rational {
        Rational::new(4 * self.numerator as i64, self.denominator as i64)
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

impl fmt::Display for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}
