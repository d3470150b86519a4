use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::signature::ContentSignature;
use super::transaction::{Transaction, TransactionId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverrideError {
    #[error("Invalid override key: '{0}'")]
    InvalidKey(String),
    #[error("Field '{0}' cannot be overridden")]
    UnknownField(String),
}

/// What an override is attached to. Id keys are preferred; signature keys cover rows written
/// before ids existed and references that carry no id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OverrideKey {
    Id(TransactionId),
    Signature(ContentSignature),
}

impl OverrideKey {
    /// The key an edit of `tx` should be stored under.
    pub fn for_transaction(tx: &Transaction) -> Self {
        match tx.id {
            Some(id) => OverrideKey::Id(id),
            None => OverrideKey::Signature(tx.identity()),
        }
    }
}

impl fmt::Display for OverrideKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideKey::Id(id) => write!(f, "id:{id}"),
            OverrideKey::Signature(sig) => write!(f, "sig:{sig}"),
        }
    }
}

impl FromStr for OverrideKey {
    type Err = OverrideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || OverrideError::InvalidKey(s.to_string());
        if let Some(id) = s.strip_prefix("id:") {
            return id.parse().map(OverrideKey::Id).map_err(|_| invalid());
        }
        let sig = s.strip_prefix("sig:").unwrap_or(s);
        sig.parse().map(OverrideKey::Signature).map_err(|_| invalid())
    }
}

impl Serialize for OverrideKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OverrideKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideField {
    #[serde(alias = "Category")]
    Category,
    #[serde(alias = "Description")]
    Description,
}

impl fmt::Display for OverrideField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideField::Category => write!(f, "category"),
            OverrideField::Description => write!(f, "description"),
        }
    }
}

impl FromStr for OverrideField {
    type Err = OverrideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "category" => Ok(OverrideField::Category),
            "description" => Ok(OverrideField::Description),
            _ => Err(OverrideError::UnknownField(s.to_string())),
        }
    }
}

pub type FieldChanges = BTreeMap<OverrideField, String>;

/// Parses loosely keyed edits (`{"Category": "Groceries"}`) into typed field changes.
pub fn parse_field_changes<'a>(
    raw: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<FieldChanges, OverrideError> {
    raw.into_iter()
        .map(|(k, v)| Ok((k.parse::<OverrideField>()?, v.to_string())))
        .collect()
}

fn apply_changes(tx: &mut Transaction, changes: &FieldChanges) {
    for (field, value) in changes {
        match field {
            OverrideField::Category => tx.set_category(value.as_str()),
            OverrideField::Description => tx.rename(value.as_str()),
        }
    }
}

/// All user edits, keyed by transaction id or content signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverrideSet {
    entries: BTreeMap<OverrideKey, FieldChanges>,
}

impl OverrideSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &OverrideKey) -> Option<&FieldChanges> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OverrideKey, &FieldChanges)> {
        self.entries.iter()
    }

    /// Upserts `changes` under `key`; fields already present are replaced, others kept.
    pub fn record(&mut self, key: OverrideKey, changes: FieldChanges) {
        self.entries.entry(key).or_default().extend(changes);
    }

    /// Whether any override targets `tx`.
    pub fn touches(&self, tx: &Transaction) -> bool {
        let by_id = tx
            .id
            .is_some_and(|id| self.entries.contains_key(&OverrideKey::Id(id)));
        by_id
            || self
                .entries
                .contains_key(&OverrideKey::Signature(tx.identity()))
    }

    /// Returns `tx` with its overrides applied: the signature entry first, then the id entry,
    /// so an id-keyed edit wins over a signature-keyed one for the same field.
    pub fn apply(&self, tx: &Transaction) -> Transaction {
        let mut out = tx.clone();
        if let Some(changes) = self.get(&OverrideKey::Signature(tx.identity())) {
            apply_changes(&mut out, changes);
        }
        if let Some(id) = tx.id {
            if let Some(changes) = self.get(&OverrideKey::Id(id)) {
                apply_changes(&mut out, changes);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Amount;
    use crate::transaction::CanonicalRecord;
    use chrono::NaiveDate;

    fn tx(desc: &str, with_id: bool) -> Transaction {
        let mut tx = Transaction::uncategorized(CanonicalRecord::new(
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            desc,
            Amount::from_cents(2599),
        ));
        if with_id {
            tx.id = Some(TransactionId::new());
        }
        tx
    }

    fn changes(pairs: &[(OverrideField, &str)]) -> FieldChanges {
        pairs.iter().map(|(f, v)| (*f, v.to_string())).collect()
    }

    #[test]
    fn record_upserts_per_field() {
        let mut set = OverrideSet::new();
        let key = OverrideKey::Signature(tx("LOBLAWS", false).identity());
        set.record(key.clone(), changes(&[(OverrideField::Category, "Dining")]));
        set.record(
            key.clone(),
            changes(&[
                (OverrideField::Category, "Groceries"),
                (OverrideField::Description, "Loblaws"),
            ]),
        );
        set.record(key.clone(), changes(&[(OverrideField::Description, "Loblaws #1")]));
        let entry = set.get(&key).unwrap();
        assert_eq!(entry[&OverrideField::Category], "Groceries");
        assert_eq!(entry[&OverrideField::Description], "Loblaws #1");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn apply_prefers_id_over_signature() {
        let row = tx("LOBLAWS", true);
        let mut set = OverrideSet::new();
        set.record(
            OverrideKey::Signature(row.identity()),
            changes(&[(OverrideField::Category, "Dining")]),
        );
        set.record(
            OverrideKey::Id(row.id.unwrap()),
            changes(&[(OverrideField::Category, "Groceries")]),
        );
        assert_eq!(set.apply(&row).category, "Groceries");
        assert!(set.touches(&row));
    }

    #[test]
    fn description_override_keeps_identity() {
        let row = tx("SQ *JOES", false);
        let mut set = OverrideSet::new();
        set.record(
            OverrideKey::Signature(row.identity()),
            changes(&[(OverrideField::Description, "Joe's Diner")]),
        );
        let gold = set.apply(&row);
        assert_eq!(gold.description, "Joe's Diner");
        assert_eq!(gold.identity(), row.identity());
    }

    #[test]
    fn key_text_round_trip() {
        let row = tx("A_B", true);
        for key in [
            OverrideKey::Id(row.id.unwrap()),
            OverrideKey::Signature(row.identity()),
        ] {
            assert_eq!(key.to_string().parse::<OverrideKey>().unwrap(), key);
        }
        let legacy: OverrideKey = "2024-02-01_A_B_25.99".parse().unwrap();
        assert_eq!(legacy, OverrideKey::Signature(row.identity()));
        let legacy_date: OverrideKey = "02/01/2024_A_B_25.99".parse().unwrap();
        assert_eq!(legacy_date, OverrideKey::Signature(row.identity()));
        assert!("id:nope".parse::<OverrideKey>().is_err());
    }

    #[test]
    fn json_is_a_map_of_field_maps() {
        let row = tx("COSTCO", false);
        let mut set = OverrideSet::new();
        set.record(
            OverrideKey::Signature(row.identity()),
            changes(&[(OverrideField::Category, "Groceries")]),
        );
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(
            json,
            r#"{"sig:2024-02-01_COSTCO_25.99":{"category":"Groceries"}}"#
        );
        let back: OverrideSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn parse_field_changes_rejects_unknown_fields() {
        let ok = parse_field_changes([("Category", "Fees"), ("description", "Bank fee")]).unwrap();
        assert_eq!(ok.len(), 2);
        assert!(matches!(
            parse_field_changes([("amount", "3.00")]),
            Err(OverrideError::UnknownField(_))
        ));
    }
}
