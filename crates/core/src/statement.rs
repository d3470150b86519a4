use serde::{Deserialize, Serialize};
use std::fmt;

/// The two account types whose statements run through independent pipeline instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementClass {
    Credit,
    Debit,
}

impl StatementClass {
    pub const ALL: [StatementClass; 2] = [StatementClass::Credit, StatementClass::Debit];

    pub fn as_str(self) -> &'static str {
        match self {
            StatementClass::Credit => "credit",
            StatementClass::Debit => "debit",
        }
    }
}

impl fmt::Display for StatementClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StatementClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "credit" => Ok(StatementClass::Credit),
            "debit" => Ok(StatementClass::Debit),
            other => Err(format!("Unknown statement class: '{other}'")),
        }
    }
}

/// Direction of funds for a single row, derived from the sign convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}
