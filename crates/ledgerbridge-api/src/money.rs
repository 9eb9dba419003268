//! Fixed-point currency amounts.
//!
//! Amounts are held as integer cents so tax and rounding arithmetic is exact.
//! The remote API transmits amounts as decimal strings ("12.50"), which is
//! also the serialized form here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "MoneyRepr", into = "String")]
pub struct Money(i64);

#[derive(Deserialize)]
#[serde(untagged)]
enum MoneyRepr {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl TryFrom<MoneyRepr> for Money {
    type Error = String;

    fn try_from(value: MoneyRepr) -> Result<Self, Self::Error> {
        match value {
            MoneyRepr::Text(s) if s.trim().is_empty() => Ok(Money::ZERO),
            MoneyRepr::Text(s) => s.parse(),
            MoneyRepr::Integer(i) => Money::checked_units(i)
                .ok_or_else(|| format!("Amount {} is out of range", i)),
            MoneyRepr::Float(f) => Ok(Money::from_f64(f)),
        }
    }
}

impl From<Money> for String {
    fn from(value: Money) -> Self {
        value.to_string()
    }
}

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Whole currency units, saturating at the representable range.
    pub fn from_units(units: i64) -> Self {
        Money(units.saturating_mul(100))
    }

    pub fn checked_units(units: i64) -> Option<Self> {
        units.checked_mul(100).map(Money)
    }

    /// Rounds half away from zero to the nearest cent.
    pub fn from_f64(value: f64) -> Self {
        Money((value * 100.0).round() as i64)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn mul_qty(&self, qty: f64) -> Money {
        Money((self.0 as f64 * qty).round() as i64)
    }

    /// Divides by a quantity, rounding to the nearest cent. Division by a
    /// non-positive quantity yields the amount unchanged.
    pub fn div_qty(&self, qty: f64) -> Money {
        if qty <= 0.0 {
            return *self;
        }
        Money((self.0 as f64 / qty).round() as i64)
    }

    pub fn percent(&self, pct: f64) -> Money {
        Money((self.0 as f64 * pct / 100.0).round() as i64)
    }
}

impl FromStr for Money {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        let valid = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if (int_part.is_empty() && frac_part.is_empty()) || !valid(int_part) || !valid(frac_part)
        {
            return Err(format!("Invalid amount: '{}'", s));
        }

        let units: i64 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|e| format!("Invalid amount '{}': {}", s, e))?
        };
        let mut frac = frac_part.bytes().map(|b| (b - b'0') as i64);
        let tenths = frac.next().unwrap_or(0);
        let hundredths = frac.next().unwrap_or(0);
        let round_up = frac.next().map(|d| d >= 5).unwrap_or(false);

        let cents = units
            .checked_mul(100)
            .and_then(|c| c.checked_add(tenths * 10 + hundredths + i64::from(round_up)))
            .ok_or_else(|| format!("Amount '{}' is out of range", s))?;
        Ok(Money(if negative { -cents } else { cents }))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Money;
    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + *m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_and_display() {
        assert_eq!("12.50".parse::<Money>().unwrap(), Money::from_cents(1250));
        assert_eq!("12".parse::<Money>().unwrap(), Money::from_cents(1200));
        assert_eq!(".5".parse::<Money>().unwrap(), Money::from_cents(50));
        assert_eq!("-3.07".parse::<Money>().unwrap(), Money::from_cents(-307));
        assert_eq!(Money::from_cents(-307).to_string(), "-3.07");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
    }

    #[test]
    fn test_parse_rounds_third_decimal() {
        assert_eq!("1.005".parse::<Money>().unwrap(), Money::from_cents(101));
        assert_eq!("1.004".parse::<Money>().unwrap(), Money::from_cents(100));
        assert_eq!("-1.005".parse::<Money>().unwrap(), Money::from_cents(-101));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("abc".parse::<Money>().is_err());
        assert!("1.2.3".parse::<Money>().is_err());
        assert!("-".parse::<Money>().is_err());
    }

    #[test]
    fn test_out_of_range_amounts_are_rejected() {
        assert!("92233720368547759.00".parse::<Money>().is_err());
        assert!("92233720368547758.08".parse::<Money>().is_err());
        assert!("-92233720368547759".parse::<Money>().is_err());
        assert_eq!(
            "92233720368547758.07".parse::<Money>().unwrap(),
            Money::from_cents(i64::MAX)
        );
        assert!(serde_json::from_str::<Money>("92233720368547759").is_err());
        assert_eq!(Money::from_units(i64::MAX), Money::from_cents(i64::MAX));
    }

    #[test]
    fn test_deserialize_accepts_wire_shapes() {
        let from_str: Money = serde_json::from_str("\"19.99\"").unwrap();
        let from_empty: Money = serde_json::from_str("\"\"").unwrap();
        let from_int: Money = serde_json::from_str("7").unwrap();
        let from_float: Money = serde_json::from_str("2.5").unwrap();
        assert_eq!(from_str, Money::from_cents(1999));
        assert_eq!(from_empty, Money::ZERO);
        assert_eq!(from_int, Money::from_cents(700));
        assert_eq!(from_float, Money::from_cents(250));
        assert_eq!(serde_json::to_string(&from_str).unwrap(), "\"19.99\"");
    }

    #[test]
    fn test_qty_arithmetic() {
        let subtotal = Money::from_cents(1000);
        assert_eq!(subtotal.div_qty(3.0), Money::from_cents(333));
        assert_eq!(Money::from_cents(333).mul_qty(3.0), Money::from_cents(999));
        assert_eq!(subtotal.div_qty(0.0), subtotal);
        assert_eq!(subtotal.percent(15.0), Money::from_cents(150));
    }

    proptest! {
        #[test]
        fn prop_display_parse_is_identity(cents in -10_000_000i64..10_000_000i64) {
            let m = Money::from_cents(cents);
            prop_assert_eq!(m.to_string().parse::<Money>().unwrap(), m);
        }

        #[test]
        fn prop_sum_matches_cent_sum(values in proptest::collection::vec(-100_000i64..100_000i64, 0..20)) {
            let total: Money = values.iter().map(|c| Money::from_cents(*c)).sum();
            prop_assert_eq!(total.cents(), values.iter().sum::<i64>());
        }
    }
}
