use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::money::Amount;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Dates written before ISO dates were adopted, in ledgers and in override keys.
pub const LEGACY_DATE_FORMAT: &str = "%m/%d/%Y";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid content signature: '{0}'")]
pub struct SignatureError(pub String);

/// The `(date, description, amount)` key that identifies a transaction when no id is known.
///
/// Descriptions compare by exact string form; amounts compare numerically at full precision.
/// The text form is `YYYY-MM-DD_<description>_<amount>` with the amount scale-normalized.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentSignature {
    pub date: NaiveDate,
    pub description: String,
    pub amount: Amount,
}

impl ContentSignature {
    pub fn new(date: NaiveDate, description: &str, amount: Amount) -> Self {
        ContentSignature {
            date,
            description: description.to_string(),
            amount,
        }
    }
}

impl fmt::Display for ContentSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.date.format(DATE_FORMAT),
            self.description,
            self.amount.canonical()
        )
    }
}

impl FromStr for ContentSignature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || SignatureError(s.to_string());
        let (date, rest) = s.split_once('_').ok_or_else(err)?;
        let (description, amount) = rest.rsplit_once('_').ok_or_else(err)?;
        let date = NaiveDate::parse_from_str(date, DATE_FORMAT)
            .or_else(|_| NaiveDate::parse_from_str(date, LEGACY_DATE_FORMAT))
            .map_err(|_| err())?;
        let amount = Amount::parse(amount).map_err(|_| err())?;
        Ok(ContentSignature {
            date,
            description: description.to_string(),
            amount,
        })
    }
}

impl Serialize for ContentSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
