//! Fixed-point percentages with half-to-even rounding.

use serde::{Serialize, Serializer};

use std::fmt;

/// Percentage stored in hundredths of a percent point (`1234` is `12.34`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Percent(i64);

impl Percent {
    pub const ZERO: Percent = Percent(0);

    pub fn from_hundredths(value: i64) -> Self {
        Self(value)
    }

    pub fn hundredths(self) -> i64 {
        self.0
    }

    /// `samples * 100 / total`, rounded half-to-even to two decimals.
    /// `None` when `total` is zero.
    pub fn of(samples: u64, total: u64) -> Option<Self> {
        let q = div_half_even(u128::from(samples) * 10_000, u128::from(total))?;
        Some(Self(i64::try_from(q).unwrap_or(i64::MAX)))
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::Sub for Percent {
    type Output = Percent;

    fn sub(self, rhs: Percent) -> Percent {
        Percent(self.0 - rhs.0)
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Serialize for Percent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

/// Whether `samples / total`, rounded half-to-even to three decimals, exceeds `threshold`.
pub fn share_exceeds(samples: u64, total: u64, threshold: f64) -> bool {
    match div_half_even(u128::from(samples) * 1_000, u128::from(total)) {
        Some(thousandths) => thousandths as f64 / 1_000.0 > threshold,
        None => false,
    }
}

fn div_half_even(num: u128, den: u128) -> Option<u128> {
    if den == 0 {
        return None;
    }
    let q = num / den;
    let r = num % den;
    let twice = r * 2;
    let round_up = twice > den || (twice == den && q % 2 == 1);
    Some(if round_up { q + 1 } else { q })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_half_to_even() {
        // 1/8 = 12.5% exactly; 1/16 = 6.25%; 1/32 = 3.125% -> 3.12
        assert_eq!(Percent::of(1, 8).expect("pct").to_string(), "12.50");
        assert_eq!(Percent::of(1, 32).expect("pct").to_string(), "3.12");
        assert_eq!(Percent::of(3, 32).expect("pct").to_string(), "9.38");
        assert_eq!(Percent::of(1, 3).expect("pct").to_string(), "33.33");
        assert_eq!(Percent::of(10, 10).expect("pct").to_string(), "100.00");
    }

    #[test]
    fn zero_total_has_no_percent() {
        assert_eq!(Percent::of(5, 0), None);
        assert!(!share_exceeds(5, 0, 0.0));
    }

    #[test]
    fn negative_diff_displays_sign() {
        let diff = Percent::from_hundredths(25) - Percent::from_hundredths(175);
        assert_eq!(diff.to_string(), "-1.50");
        assert_eq!(serde_json::to_string(&diff).expect("json"), "-1.5");
    }

    #[test]
    fn share_threshold_uses_three_decimals() {
        assert!(!share_exceeds(5, 1000, 0.01));
        assert!(share_exceeds(11, 1000, 0.01));
        // 0.0105 rounds half-even to 0.010, which does not exceed 0.01
        assert!(!share_exceeds(105, 10_000, 0.01));
        assert!(share_exceeds(115, 10_000, 0.01));
    }
}
