use finsight_core::{FieldChanges, OverrideKey, OverrideSet};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::store::{Expect, Store, StoreError};

pub const OVERRIDES_KEY: &str = "overrides.json";

/// Attempts per update before a concurrent external writer is reported as a conflict.
const MAX_ATTEMPTS: usize = 3;

/// Owner of the override document. Writers are serialized by a whole-store lock and each
/// update is a read-modify-write of the full document guarded by its version; readers get a
/// copy of the whole document.
pub struct OverrideStore {
    store: Arc<dyn Store>,
    key: String,
    write_lock: Mutex<()>,
}

impl OverrideStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_key(store, OVERRIDES_KEY)
    }

    pub fn with_key(store: Arc<dyn Store>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// A consistent copy of every override. Entries that cannot be read are left out.
    pub async fn snapshot(&self) -> Result<OverrideSet, StoreError> {
        match self.store.read(&self.key).await? {
            Some(doc) => Ok(Document::decode(&doc.data)?.set),
            None => Ok(OverrideSet::new()),
        }
    }

    /// Upserts one override with per-field later-wins semantics.
    pub async fn record(&self, key: OverrideKey, changes: FieldChanges) -> Result<(), StoreError> {
        self.record_many(vec![(key, changes)]).await
    }

    /// Upserts several overrides in one document write.
    pub async fn record_many(
        &self,
        edits: Vec<(OverrideKey, FieldChanges)>,
    ) -> Result<(), StoreError> {
        if edits.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.store.read(&self.key).await?;
            let mut doc = match &current {
                Some(doc) => Document::decode(&doc.data)?,
                None => Document::default(),
            };
            for (key, changes) in edits.iter().cloned() {
                doc.set.record(key, changes);
            }
            let overrides = doc.set.len();
            let data = doc.encode()?;
            match self
                .store
                .write(&self.key, data, Expect::from_read(current.as_ref()))
                .await
            {
                Ok(version) => {
                    info!(edits = edits.len(), overrides, version = %version, "Overrides recorded");
                    return Ok(());
                }
                Err(StoreError::Conflict { .. }) if attempt < MAX_ATTEMPTS => {
                    warn!(attempt, "Override document changed underneath us; retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// The override document as stored. Entries whose key or fields cannot be read are kept
/// verbatim so a rewrite does not drop them.
#[derive(Default)]
struct Document {
    set: OverrideSet,
    unreadable: Map<String, Value>,
}

impl Document {
    fn decode(data: &[u8]) -> Result<Self, StoreError> {
        let raw: Map<String, Value> = serde_json::from_slice(data)?;
        let mut doc = Document::default();
        for (key, value) in raw {
            let parsed = key.parse::<OverrideKey>().ok().zip(
                serde_json::from_value::<FieldChanges>(value.clone()).ok(),
            );
            match parsed {
                Some((k, changes)) => doc.set.record(k, changes),
                None => {
                    warn!(%key, "Skipping unreadable override");
                    doc.unreadable.insert(key, value);
                }
            }
        }
        Ok(doc)
    }

    fn encode(self) -> Result<Vec<u8>, StoreError> {
        let mut out = match serde_json::to_value(&self.set)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in self.unreadable {
            out.entry(key).or_insert(value);
        }
        Ok(serde_json::to_vec_pretty(&out)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;
    use finsight_core::{Amount, ContentSignature, OverrideField, TransactionId};

    fn sig(desc: &str) -> OverrideKey {
        OverrideKey::Signature(ContentSignature::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            desc,
            Amount::from_cents(100),
        ))
    }

    fn set_category(value: &str) -> FieldChanges {
        FieldChanges::from([(OverrideField::Category, value.to_string())])
    }

    #[tokio::test]
    async fn empty_store_has_no_overrides() {
        let store = OverrideStore::new(Arc::new(MemoryStore::new()));
        assert!(store.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn later_edit_of_same_field_wins() {
        let store = OverrideStore::new(Arc::new(MemoryStore::new()));
        store.record(sig("A"), set_category("Dining")).await.unwrap();
        store.record(sig("A"), set_category("Groceries")).await.unwrap();
        store
            .record(
                sig("A"),
                FieldChanges::from([(OverrideField::Description, "Corner store".to_string())]),
            )
            .await
            .unwrap();
        let snap = store.snapshot().await.unwrap();
        let entry = snap.get(&sig("A")).unwrap();
        assert_eq!(entry[&OverrideField::Category], "Groceries");
        assert_eq!(entry[&OverrideField::Description], "Corner store");
    }

    #[tokio::test]
    async fn concurrent_disjoint_edits_commute() {
        let store = Arc::new(OverrideStore::new(Arc::new(MemoryStore::new())));
        let ids: Vec<_> = (0..20).map(|_| OverrideKey::Id(TransactionId::new())).collect();
        let handles: Vec<_> = ids
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, key)| {
                let store = store.clone();
                tokio::spawn(async move { store.record(key, set_category(&format!("C{i}"))).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        let snap = store.snapshot().await.unwrap();
        assert_eq!(snap.len(), 20);
        for (i, key) in ids.iter().enumerate() {
            assert_eq!(snap.get(key).unwrap()[&OverrideField::Category], format!("C{i}"));
        }
    }

    #[tokio::test]
    async fn snapshot_is_a_copy() {
        let store = OverrideStore::new(Arc::new(MemoryStore::new()));
        store.record(sig("A"), set_category("Fees")).await.unwrap();
        let before = store.snapshot().await.unwrap();
        store.record(sig("B"), set_category("Fees")).await.unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(store.snapshot().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reads_legacy_capitalized_fields() {
        let mem = Arc::new(MemoryStore::new());
        mem.write(
            OVERRIDES_KEY,
            br#"{"2024-01-01_A_1": {"Category": "Gifts & Donations"}}"#.to_vec(),
            Expect::Any,
        )
        .await
        .unwrap();
        let snap = OverrideStore::new(mem).snapshot().await.unwrap();
        assert_eq!(snap.get(&sig("A")).unwrap()[&OverrideField::Category], "Gifts & Donations");
    }

    #[tokio::test]
    async fn legacy_dates_and_bad_keys_do_not_block_the_rest() {
        let mem = Arc::new(MemoryStore::new());
        mem.write(
            OVERRIDES_KEY,
            br#"{
                "01/01/2024_A_1": {"Category": "Dining"},
                "sig:not a signature": {"category": "Fees"},
                "id:00000000-0000-0000-0000-000000000001": {"amount": "3"}
            }"#
            .to_vec(),
            Expect::Any,
        )
        .await
        .unwrap();
        let store = OverrideStore::new(mem.clone());
        let snap = store.snapshot().await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.get(&sig("A")).unwrap()[&OverrideField::Category], "Dining");

        store.record(sig("B"), set_category("Fees")).await.unwrap();
        assert_eq!(store.snapshot().await.unwrap().len(), 2);
        let raw = mem.read(OVERRIDES_KEY).await.unwrap().unwrap();
        let text = String::from_utf8(raw.data).unwrap();
        assert!(text.contains("sig:not a signature"));
        assert!(text.contains("id:00000000-0000-0000-0000-000000000001"));
    }
}
