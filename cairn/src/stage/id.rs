//! Rational stage identifiers.
//!
//! Stage identifiers are exact rationals rather than integers so that a
//! sub-stage can always be inserted between two existing stages without
//! renumbering the sequence: stage 3, then 3.5, then 3.75, then 4.

use crate::errors::PipelineError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A totally ordered, dense stage identifier.
///
/// Stored as a normalized non-negative rational (`numer / denom`, with
/// `denom > 0` and gcd 1). Ordering compares cross products in wide
/// arithmetic, so equal values always compare equal regardless of how they
/// were constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawStageId", into = "RawStageId")]
pub struct StageId {
    numer: i64,
    denom: i64,
}

/// Wire representation used to re-validate deserialized identifiers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawStageId {
    numer: i64,
    denom: i64,
}

impl TryFrom<RawStageId> for StageId {
    type Error = String;

    fn try_from(raw: RawStageId) -> Result<Self, Self::Error> {
        Self::new(raw.numer, raw.denom).map_err(|e| e.to_string())
    }
}

impl From<StageId> for RawStageId {
    fn from(id: StageId) -> Self {
        Self {
            numer: id.numer,
            denom: id.denom,
        }
    }
}

fn gcd(mut a: i128, mut b: i128) -> i128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs()
}

impl StageId {
    /// Creates a stage identifier from a rational `numer / denom`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the denominator is zero or the value
    /// is negative.
    pub fn new(numer: i64, denom: i64) -> Result<Self, PipelineError> {
        if denom == 0 {
            return Err(PipelineError::Validation(
                "stage id denominator must be non-zero".to_string(),
            ));
        }
        let (mut numer, mut denom) = (i128::from(numer), i128::from(denom));
        if denom < 0 {
            numer = -numer;
            denom = -denom;
        }
        if numer < 0 {
            return Err(PipelineError::Validation(
                "stage ids must be non-negative".to_string(),
            ));
        }
        let g = gcd(numer, denom).max(1);
        let (numer, denom) = (numer / g, denom / g);
        let numer = i64::try_from(numer)
            .map_err(|_| PipelineError::Validation("stage id numerator overflow".to_string()))?;
        let denom = i64::try_from(denom)
            .map_err(|_| PipelineError::Validation("stage id denominator overflow".to_string()))?;
        Ok(Self { numer, denom })
    }

    /// Creates an integer stage identifier.
    #[must_use]
    pub const fn integer(n: u32) -> Self {
        Self {
            numer: n as i64,
            denom: 1,
        }
    }

    /// Returns the identifier exactly midway between `self` and `other`.
    ///
    /// This is the insertion primitive: the result sorts strictly between
    /// the two endpoints whenever they differ.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the midpoint cannot be represented
    /// without overflow.
    pub fn between(self, other: Self) -> Result<Self, PipelineError> {
        let numer = i128::from(self.numer) * i128::from(other.denom)
            + i128::from(other.numer) * i128::from(self.denom);
        let denom = 2 * i128::from(self.denom) * i128::from(other.denom);
        let g = gcd(numer, denom).max(1);
        let numer = i64::try_from(numer / g)
            .map_err(|_| PipelineError::Validation("stage id midpoint overflow".to_string()))?;
        let denom = i64::try_from(denom / g)
            .map_err(|_| PipelineError::Validation("stage id midpoint overflow".to_string()))?;
        Self::new(numer, denom)
    }

    /// Returns the value as a float for display and progress reporting.
    #[must_use]
    pub fn as_f64(self) -> f64 {
        self.numer as f64 / self.denom as f64
    }

    /// Returns a filesystem-safe rendering, e.g. `3` or `3_75` for 3.75.
    ///
    /// Derived from the exact rational, never from a float. Denominators
    /// whose decimal expansion does not terminate render as
    /// `{numer}_{denom}r` (`1_3r` for 1/3); the `r` suffix keeps them
    /// disjoint from terminating slugs like `1_3` for 1.3.
    #[must_use]
    pub fn slug(self) -> String {
        self.decimal('_')
            .unwrap_or_else(|| format!("{}_{}r", self.numer, self.denom))
    }

    /// Exact decimal expansion with `sep` between the integer and
    /// fractional digits. `None` when the expansion does not terminate,
    /// i.e. the reduced denominator has a prime factor other than 2 or 5.
    fn decimal(self, sep: char) -> Option<String> {
        let mut reduced = self.denom;
        while reduced % 2 == 0 {
            reduced /= 2;
        }
        while reduced % 5 == 0 {
            reduced /= 5;
        }
        if reduced != 1 {
            return None;
        }
        let den = i128::from(self.denom);
        let mut out = (i128::from(self.numer) / den).to_string();
        let mut rem = i128::from(self.numer) % den;
        if rem != 0 {
            out.push(sep);
        }
        while rem != 0 {
            rem *= 10;
            out.push_str(&(rem / den).to_string());
            rem %= den;
        }
        Some(out)
    }
}

impl PartialOrd for StageId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StageId {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = i128::from(self.numer) * i128::from(other.denom);
        let rhs = i128::from(other.numer) * i128::from(self.denom);
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decimal('.') {
            Some(rendered) => f.write_str(&rendered),
            None => write!(f, "{}/{}", self.numer, self.denom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_ids_order() {
        assert!(StageId::integer(1) < StageId::integer(2));
        assert_eq!(StageId::integer(3), StageId::new(6, 2).unwrap());
    }

    #[test]
    fn test_between_is_dense() {
        let three = StageId::integer(3);
        let four = StageId::integer(4);
        let mid = three.between(four).unwrap();
        assert!(three < mid && mid < four);
        assert_eq!(mid, StageId::new(7, 2).unwrap());

        let deeper = mid.between(four).unwrap();
        assert!(mid < deeper && deeper < four);
        assert_eq!(deeper, StageId::new(15, 4).unwrap());
    }

    #[test]
    fn test_negative_rejected() {
        assert!(StageId::new(-1, 2).is_err());
        assert!(StageId::new(1, 0).is_err());
    }

    #[test]
    fn test_normalization_sign() {
        // -3 / -2 normalizes to 3/2.
        let id = StageId::new(-3, -2).unwrap();
        assert_eq!(id, StageId::new(3, 2).unwrap());
    }

    #[test]
    fn test_slug() {
        assert_eq!(StageId::integer(3).slug(), "3");
        assert_eq!(StageId::new(7, 2).unwrap().slug(), "3_5");
        assert_eq!(StageId::new(15, 4).unwrap().slug(), "3_75");
        assert_eq!(StageId::new(13, 10).unwrap().slug(), "1_3");
    }

    #[test]
    fn test_slug_is_exact_for_deep_midpoints() {
        // 2^-20 denominators are where float formatting starts lying.
        let id = StageId::new(3 * (1 << 20) + 1, 1 << 20).unwrap();
        assert_eq!(id.slug(), "3_00000095367431640625");
    }

    #[test]
    fn test_slug_non_terminating_stays_distinct() {
        assert_eq!(StageId::new(1, 3).unwrap().slug(), "1_3r");
        assert_eq!(StageId::new(2, 3).unwrap().slug(), "2_3r");
        assert_eq!(StageId::new(1, 7).unwrap().slug(), "1_7r");
        // A third never collides with the terminating 1.3 stem.
        assert_ne!(
            StageId::new(1, 3).unwrap().slug(),
            StageId::new(13, 10).unwrap().slug()
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(StageId::integer(3).to_string(), "3");
        assert_eq!(StageId::new(15, 4).unwrap().to_string(), "3.75");
        assert_eq!(StageId::new(1, 3).unwrap().to_string(), "1/3");
    }

    #[test]
    fn test_serde_round_trip() {
        let id = StageId::new(15, 4).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        let back: StageId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn test_serde_rejects_invalid() {
        let result: Result<StageId, _> = serde_json::from_str(r#"{"numer": 1, "denom": 0}"#);
        assert!(result.is_err());
    }
}
