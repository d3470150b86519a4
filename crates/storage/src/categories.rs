use finsight_core::{is_delete_sentinel, Vocabulary, UNCATEGORIZED};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::store::{Expect, Store, StoreError};

pub const CATEGORIES_KEY: &str = "categories.json";

#[derive(Debug, Error)]
pub enum CategoryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Category name must not be empty")]
    EmptyName,
    #[error("'{0}' is reserved and cannot be changed")]
    Reserved(String),
}

/// The category vocabulary the categorizer may answer with. Until the first change it is the
/// configured vocabulary; afterwards it is kept as one JSON array.
pub struct CategoryStore {
    store: Arc<dyn Store>,
    key: String,
    seed: Vocabulary,
    write_lock: Mutex<()>,
}

impl CategoryStore {
    pub fn new(store: Arc<dyn Store>, seed: Vocabulary) -> Self {
        Self {
            store,
            key: CATEGORIES_KEY.to_string(),
            seed,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn vocabulary(&self) -> Result<Vocabulary, CategoryError> {
        Ok(self.read().await?.0)
    }

    /// Category names sorted case-insensitively.
    pub async fn list(&self) -> Result<Vec<String>, CategoryError> {
        let mut names = self.vocabulary().await?.categories().to_vec();
        names.sort_by_key(|c| c.to_lowercase());
        Ok(names)
    }

    /// Adds a category; `false` when it is already present in any casing.
    pub async fn add(&self, name: &str) -> Result<bool, CategoryError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(CategoryError::EmptyName);
        }
        if is_delete_sentinel(&name) {
            return Err(CategoryError::Reserved(name));
        }
        let added = self
            .modify(|names| {
                if names.iter().any(|c| c.eq_ignore_ascii_case(&name)) {
                    return false;
                }
                names.push(name.clone());
                true
            })
            .await?;
        if added {
            info!(category = %name, "Category added");
        }
        Ok(added)
    }

    /// Removes a category; `false` when there is none by that name. Rows already carrying it
    /// keep it until they are edited or reprocessed.
    pub async fn delete(&self, name: &str) -> Result<bool, CategoryError> {
        let name = name.trim();
        if name.eq_ignore_ascii_case(UNCATEGORIZED) {
            return Err(CategoryError::Reserved(name.to_string()));
        }
        let removed = self
            .modify(|names| {
                let before = names.len();
                names.retain(|c| !c.eq_ignore_ascii_case(name));
                names.len() != before
            })
            .await?;
        if removed {
            info!(category = %name, "Category deleted");
        }
        Ok(removed)
    }

    async fn read(&self) -> Result<(Vocabulary, Expect), CategoryError> {
        let current = self.store.read(&self.key).await?;
        let vocabulary = match &current {
            Some(doc) => {
                let names: Vec<String> =
                    serde_json::from_slice(&doc.data).map_err(StoreError::from)?;
                Vocabulary::new(names)
            }
            None => self.seed.clone(),
        };
        Ok((vocabulary, Expect::from_read(current.as_ref())))
    }

    async fn modify(&self, f: impl FnOnce(&mut Vec<String>) -> bool) -> Result<bool, CategoryError> {
        let _guard = self.write_lock.lock().await;
        let (vocabulary, expect) = self.read().await?;
        let mut names = vocabulary.categories().to_vec();
        if !f(&mut names) {
            return Ok(false);
        }
        let data = serde_json::to_vec_pretty(&names).map_err(StoreError::from)?;
        self.store.write(&self.key, data, expect).await?;
        Ok(true)
    }
}
