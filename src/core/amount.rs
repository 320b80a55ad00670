//! Fixed-point monetary amounts
//!
//! Values are counted in 10^-8 units of an asset. All arithmetic is exact
//! and checked; nothing here ever goes through floating point.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of fractional decimal digits
pub const DECIMALS: u32 = 8;

/// Base units per whole unit
pub const ONE: i64 = 100_000_000;

/// Amount errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Amount overflow")]
    Overflow,
    #[error("Invalid amount '{0}'")]
    Parse(String),
    #[error("Too many decimal places in '{0}' (max 8)")]
    TooPrecise(String),
}

/// A fixed-point amount with 8 decimals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fixed8(i64);

impl Fixed8 {
    pub const ZERO: Fixed8 = Fixed8(0);
    pub const MAX: Fixed8 = Fixed8(i64::MAX);

    /// Create from raw base units
    pub const fn from_units(units: i64) -> Self {
        Fixed8(units)
    }

    /// Create from a whole number of units
    pub fn from_whole(whole: i64) -> Result<Self, AmountError> {
        whole.checked_mul(ONE).map(Fixed8).ok_or(AmountError::Overflow)
    }

    pub const fn units(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Fixed8) -> Result<Fixed8, AmountError> {
        self.0.checked_add(other.0).map(Fixed8).ok_or(AmountError::Overflow)
    }

    pub fn checked_sub(self, other: Fixed8) -> Result<Fixed8, AmountError> {
        self.0.checked_sub(other.0).map(Fixed8).ok_or(AmountError::Overflow)
    }

    /// Sum a sequence of amounts, failing on overflow
    pub fn checked_sum<I: IntoIterator<Item = Fixed8>>(iter: I) -> Result<Fixed8, AmountError> {
        iter.into_iter()
            .try_fold(Fixed8::ZERO, |acc, value| acc.checked_add(value))
    }
}

impl fmt::Display for Fixed8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / ONE as u64;
        let frac = abs % ONE as u64;

        if frac == 0 {
            write!(f, "{}{}", sign, whole)
        } else {
            let digits = format!("{:08}", frac);
            write!(f, "{}{}.{}", sign, whole, digits.trim_end_matches('0'))
        }
    }
}

impl FromStr for Fixed8 {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let parse_err = || AmountError::Parse(s.to_string());

        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };

        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };

        if whole.is_empty() && frac.is_empty() {
            return Err(parse_err());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(parse_err());
        }
        if frac.len() > DECIMALS as usize {
            return Err(AmountError::TooPrecise(s.to_string()));
        }

        let whole_units: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| AmountError::Overflow)?
        };
        let frac_units: i64 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<8}", frac);
            padded.parse().map_err(|_| parse_err())?
        };

        let units = whole_units
            .checked_mul(ONE)
            .and_then(|w| w.checked_add(frac_units))
            .ok_or(AmountError::Overflow)?;

        Ok(Fixed8(if negative { -units } else { units }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let amount: Fixed8 = "12.345".parse().unwrap();
        assert_eq!(amount.units(), 1_234_500_000);
        assert_eq!(amount.to_string(), "12.345");

        assert_eq!("10".parse::<Fixed8>().unwrap(), Fixed8::from_whole(10).unwrap());
        assert_eq!(".5".parse::<Fixed8>().unwrap().units(), 50_000_000);
        assert_eq!("-0.00000001".parse::<Fixed8>().unwrap().units(), -1);
        assert_eq!(Fixed8::from_units(-150_000_000).to_string(), "-1.5");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!("".parse::<Fixed8>(), Err(AmountError::Parse(_))));
        assert!(matches!("1.2.3".parse::<Fixed8>(), Err(AmountError::Parse(_))));
        assert!(matches!("abc".parse::<Fixed8>(), Err(AmountError::Parse(_))));
        assert!(matches!(
            "0.123456789".parse::<Fixed8>(),
            Err(AmountError::TooPrecise(_))
        ));
        assert!(matches!(
            "99999999999999999999".parse::<Fixed8>(),
            Err(AmountError::Overflow)
        ));
    }

    #[test]
    fn test_checked_arithmetic() {
        let a = Fixed8::from_whole(6).unwrap();
        let b = Fixed8::from_whole(4).unwrap();
        assert_eq!(a.checked_add(b).unwrap(), Fixed8::from_whole(10).unwrap());
        assert_eq!(a.checked_sub(b).unwrap(), Fixed8::from_whole(2).unwrap());
        assert_eq!(Fixed8::MAX.checked_add(Fixed8::from_units(1)), Err(AmountError::Overflow));
        assert_eq!(
            Fixed8::checked_sum(vec![Fixed8::MAX, Fixed8::from_units(1)]),
            Err(AmountError::Overflow)
        );
        assert!(Fixed8::from_whole(i64::MAX).is_err());
    }
}
