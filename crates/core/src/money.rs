use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;
use thiserror::Error;

use super::statement::Direction;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid amount: '{0}'")]
pub struct AmountError(pub String);

/// A signed monetary amount. Outgoing funds are positive, incoming funds negative.
///
/// The full precision of the source value is kept: equality is numeric, so `50.0` and `50.00`
/// compare equal, while `Display` preserves the scale the value was parsed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(Decimal);

impl Amount {
    pub fn from_decimal(decimal: Decimal) -> Self {
        Amount(decimal)
    }

    pub fn from_cents(cents: i64) -> Self {
        Amount(Decimal::new(cents, 2))
    }

    pub fn zero() -> Self {
        Amount(Decimal::ZERO)
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_outgoing(self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    pub fn is_incoming(self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// `None` for zero amounts, which move no funds.
    pub fn direction(self) -> Option<Direction> {
        if self.is_outgoing() {
            Some(Direction::Outgoing)
        } else if self.is_incoming() {
            Some(Direction::Incoming)
        } else {
            None
        }
    }

    /// Scale-independent text form used in content signatures: `50.00`, `50.0` and `50` all
    /// render as `50`.
    pub fn canonical(self) -> String {
        self.0.normalize().to_string()
    }

    /// Parses the amount notations found in statement exports: plain decimals, a leading `$`,
    /// thousands separators, surrounding spaces and accounting parentheses for negatives.
    pub fn parse(s: &str) -> Result<Self, AmountError> {
        let trimmed = s.trim();
        let (negative, inner) = match trimmed
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(inner) => (true, inner),
            None => (false, trimmed),
        };
        let cleaned = inner.replace([',', '$', ' '], "");
        if cleaned.is_empty() {
            return Err(AmountError(s.to_string()));
        }
        let dec = Decimal::from_str(&cleaned)
            .or_else(|_| Decimal::from_scientific(&cleaned))
            .map_err(|_| AmountError(s.to_string()))?;
        Ok(Amount(if negative { -dec } else { dec }))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_zero() {
            // Never print a negative zero.
            return write!(f, "{}", self.0.abs());
        }
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse(s)
    }
}

impl Add for Amount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Amount(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Amount(self.0 - rhs.0)
    }
}

impl Neg for Amount {
    type Output = Self;
    fn neg(self) -> Self {
        Amount(-self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(serde_json::Number),
        }
        let raw = Raw::deserialize(deserializer)?;
        let text = match raw {
            Raw::Text(s) => s,
            Raw::Number(n) => n.to_string(),
        };
        Amount::parse(&text).map_err(serde::de::Error::custom)
    }
}
