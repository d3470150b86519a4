use finsight_core::{Applicability, Rule, RuleId};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::store::{Expect, Store, StoreError};

pub const RULES_KEY: &str = "rules.json";

#[derive(Debug, Error)]
pub enum RuleError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Rule content must not be empty")]
    EmptyContent,
}

/// User-authored categorization rules, kept as one JSON array in insertion order.
pub struct RuleStore {
    store: Arc<dyn Store>,
    key: String,
    write_lock: Mutex<()>,
}

impl RuleStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            key: RULES_KEY.to_string(),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn list(&self) -> Result<Vec<Rule>, RuleError> {
        match self.store.read(&self.key).await? {
            Some(doc) => Ok(serde_json::from_slice(&doc.data).map_err(StoreError::from)?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn add(&self, content: &str, applicability: Applicability) -> Result<Rule, RuleError> {
        let rule = Rule::new(content, applicability);
        if rule.content.is_empty() {
            return Err(RuleError::EmptyContent);
        }
        let added = rule.clone();
        self.modify(move |rules| {
            rules.push(rule);
        })
        .await?;
        info!(id = %added.id, applicability = %added.applicability, "Rule added");
        Ok(added)
    }

    /// Changes the given fields of a rule. `None` when no rule has `id`.
    pub async fn update(
        &self,
        id: RuleId,
        content: Option<&str>,
        applicability: Option<Applicability>,
    ) -> Result<Option<Rule>, RuleError> {
        let content = content.map(|c| c.trim().to_string());
        if content.as_deref() == Some("") {
            return Err(RuleError::EmptyContent);
        }
        let updated = self
            .modify(move |rules| {
                let rule = rules.iter_mut().find(|r| r.id == id)?;
                if let Some(content) = content {
                    rule.content = content;
                }
                if let Some(applicability) = applicability {
                    rule.applicability = applicability;
                }
                Some(rule.clone())
            })
            .await?;
        if updated.is_some() {
            info!(%id, "Rule updated");
        }
        Ok(updated)
    }

    /// Removes a rule; `false` when no rule has `id`.
    pub async fn delete(&self, id: RuleId) -> Result<bool, RuleError> {
        let removed = self
            .modify(move |rules| {
                let before = rules.len();
                rules.retain(|r| r.id != id);
                rules.len() != before
            })
            .await?;
        if removed {
            info!(%id, "Rule deleted");
        }
        Ok(removed)
    }

    async fn modify<T>(&self, f: impl FnOnce(&mut Vec<Rule>) -> T) -> Result<T, RuleError> {
        let _guard = self.write_lock.lock().await;
        let current = self.store.read(&self.key).await?;
        let mut rules: Vec<Rule> = match &current {
            Some(doc) => serde_json::from_slice(&doc.data).map_err(StoreError::from)?,
            None => Vec::new(),
        };
        let out = f(&mut rules);
        let data = serde_json::to_vec_pretty(&rules).map_err(StoreError::from)?;
        self.store
            .write(&self.key, data, Expect::from_read(current.as_ref()))
            .await?;
        Ok(out)
    }
}
