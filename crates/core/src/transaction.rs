use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::category::UNCATEGORIZED;
use super::money::Amount;
use super::signature::ContentSignature;

/// Durable identifier assigned to a transaction the first time it is written to Silver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(TransactionId)
    }
}

/// A statement row after extraction, before categorization. Only lives for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub date: NaiveDate,
    pub description: String,
    pub amount: Amount,
}

impl CanonicalRecord {
    pub fn new(date: NaiveDate, description: impl Into<String>, amount: Amount) -> Self {
        CanonicalRecord {
            date,
            description: description.into(),
            amount,
        }
    }

    pub fn signature(&self) -> ContentSignature {
        ContentSignature::new(self.date, &self.description, self.amount)
    }
}

/// A Silver or Gold row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Option<TransactionId>,
    pub date: NaiveDate,
    pub description: String,
    pub category: String,
    pub amount: Amount,
    /// The description as extracted, set only when categorization renamed the row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_description: Option<String>,
}

impl Transaction {
    /// Builds a row from a canonical record. A blank category resolves to `Uncategorized`.
    pub fn from_record(record: CanonicalRecord, category: impl Into<String>) -> Self {
        let mut tx = Transaction {
            id: None,
            date: record.date,
            description: record.description,
            category: String::new(),
            amount: record.amount,
            source_description: None,
        };
        tx.set_category(category);
        tx
    }

    pub fn uncategorized(record: CanonicalRecord) -> Self {
        Self::from_record(record, UNCATEGORIZED)
    }

    pub fn set_category(&mut self, category: impl Into<String>) {
        let category = category.into();
        let trimmed = category.trim();
        self.category = if trimmed.is_empty() {
            UNCATEGORIZED.to_string()
        } else {
            trimmed.to_string()
        };
    }

    /// Replaces the description, remembering the extracted one so the row keeps its identity.
    pub fn rename(&mut self, description: impl Into<String>) {
        let description = description.into();
        let description = description.trim();
        if description.is_empty() || description == self.description {
            return;
        }
        if self.source_description.as_deref() == Some(description) {
            self.source_description = None;
        } else if self.source_description.is_none() {
            self.source_description = Some(std::mem::take(&mut self.description));
        }
        self.description = description.to_string();
    }

    /// Signature of the row as it is displayed.
    pub fn signature(&self) -> ContentSignature {
        ContentSignature::new(self.date, &self.description, self.amount)
    }

    /// Signature of the row as it was extracted. Stable across renames, used for dedup and for
    /// signature-keyed overrides.
    pub fn identity(&self) -> ContentSignature {
        let description = self
            .source_description
            .as_deref()
            .unwrap_or(&self.description);
        ContentSignature::new(self.date, description, self.amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(desc: &str, cents: i64) -> CanonicalRecord {
        CanonicalRecord::new(
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            desc,
            Amount::from_cents(cents),
        )
    }

    #[test]
    fn blank_category_becomes_uncategorized() {
        let tx = Transaction::from_record(record("STARBUCKS", 550), "   ");
        assert_eq!(tx.category, UNCATEGORIZED);
        let tx = Transaction::from_record(record("STARBUCKS", 550), " Dining ");
        assert_eq!(tx.category, "Dining");
    }

    #[test]
    fn rename_keeps_identity() {
        let mut tx = Transaction::uncategorized(record("SQ *BLUE BOTTLE 0042", 650));
        let before = tx.identity();
        tx.rename("Blue Bottle Coffee");
        tx.rename("Blue Bottle");
        assert_eq!(tx.description, "Blue Bottle");
        assert_eq!(tx.source_description.as_deref(), Some("SQ *BLUE BOTTLE 0042"));
        assert_eq!(tx.identity(), before);
        assert_ne!(tx.signature(), before);

        tx.rename("SQ *BLUE BOTTLE 0042");
        assert!(tx.source_description.is_none());
        assert_eq!(tx.identity(), before);
    }

    #[test]
    fn rename_to_blank_is_ignored() {
        let mut tx = Transaction::uncategorized(record("AMAZON", 100));
        tx.rename("  ");
        assert_eq!(tx.description, "AMAZON");
        assert!(tx.source_description.is_none());
    }

    #[test]
    fn transaction_id_round_trips_through_text() {
        let id = TransactionId::new();
        let parsed: TransactionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<TransactionId>().is_err());
    }
}
