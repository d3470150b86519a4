use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::statement::StatementClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub Uuid);

impl RuleId {
    pub fn new() -> Self {
        RuleId(Uuid::new_v4())
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RuleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(RuleId)
    }
}

/// Which statement class a rule is meant for. Outgoing-funds rules go with card statements,
/// incoming-funds rules with bank statements. The original `credit`/`debit` tags are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Applicability {
    #[serde(alias = "debit")]
    Incoming,
    #[serde(alias = "credit")]
    Outgoing,
    #[default]
    Both,
}

impl Applicability {
    pub fn for_class(class: StatementClass) -> Self {
        match class {
            StatementClass::Credit => Applicability::Outgoing,
            StatementClass::Debit => Applicability::Incoming,
        }
    }

    pub fn applies_to(self, class: StatementClass) -> bool {
        self == Applicability::Both || self == Applicability::for_class(class)
    }
}

impl fmt::Display for Applicability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Applicability::Incoming => write!(f, "incoming"),
            Applicability::Outgoing => write!(f, "outgoing"),
            Applicability::Both => write!(f, "both"),
        }
    }
}

impl std::str::FromStr for Applicability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "incoming" | "debit" => Ok(Applicability::Incoming),
            "outgoing" | "credit" => Ok(Applicability::Outgoing),
            "both" => Ok(Applicability::Both),
            other => Err(format!("Unknown rule applicability: '{other}'")),
        }
    }
}

/// A user-authored natural-language directive handed to the categorizer, e.g.
/// "Anything from COSTCO is Groceries" or "Delete transfers between my own accounts".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub content: String,
    #[serde(default)]
    pub applicability: Applicability,
}

impl Rule {
    pub fn new(content: impl Into<String>, applicability: Applicability) -> Self {
        Rule {
            id: RuleId::new(),
            content: content.into().trim().to_string(),
            applicability,
        }
    }
}
