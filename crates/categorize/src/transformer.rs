use finsight_core::{
    is_delete_sentinel, CanonicalRecord, Rule, StatementClass, Transaction, Vocabulary,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::{CategorizationError, Categorizer};
use crate::wire::{Assignment, BatchItem, CategorizationReply, CategorizationRequest};

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Output of one categorization pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Categorized {
    pub transactions: Vec<Transaction>,
    /// Rows dropped because the categorizer resolved them to the delete sentinel.
    pub deleted: usize,
    /// Batches whose rows all fell back to `Uncategorized`.
    pub fallback_batches: usize,
}

/// Turns canonical records into categorized transactions, one categorizer call per batch.
/// Never fails: a batch the categorizer cannot answer comes back `Uncategorized`.
pub struct CategorizationTransformer {
    backend: Arc<dyn Categorizer>,
    batch_size: usize,
    timeout: Duration,
}

impl CategorizationTransformer {
    pub fn new(backend: Arc<dyn Categorizer>) -> Self {
        Self {
            backend,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Every request carries all of `rules`; pick them with [`applicable_rules`] first.
    /// Answers outside `vocabulary` resolve to `Uncategorized`.
    pub async fn transform(
        &self,
        records: Vec<CanonicalRecord>,
        rules: &[&Rule],
        vocabulary: &Vocabulary,
    ) -> Categorized {
        let mut out = Categorized::default();
        let records: Vec<CanonicalRecord> = records
            .into_iter()
            .map(|mut r| {
                r.description = r.description.trim().to_string();
                r
            })
            .collect();

        for (index, batch) in records.chunks(self.batch_size).enumerate() {
            let request = build_request(batch, rules, vocabulary);
            match self.call(&request).await {
                Ok(assignments) => {
                    let (kept, deleted) = apply(batch, assignments, vocabulary);
                    out.deleted += deleted;
                    out.transactions.extend(kept);
                }
                Err(e) => {
                    warn!(batch = index, rows = batch.len(), error = %e, "Categorization failed; rows left Uncategorized");
                    out.fallback_batches += 1;
                    out.transactions
                        .extend(batch.iter().cloned().map(Transaction::uncategorized));
                }
            }
        }

        info!(
            rows = out.transactions.len(),
            deleted = out.deleted,
            fallback_batches = out.fallback_batches,
            "Categorization complete"
        );
        out
    }

    async fn call(
        &self,
        request: &CategorizationRequest,
    ) -> Result<Vec<Assignment>, CategorizationError> {
        let text = tokio::time::timeout(self.timeout, self.backend.categorize(request))
            .await
            .map_err(|_| CategorizationError::Timeout(self.timeout))??;
        match CategorizationReply::parse(&text) {
            CategorizationReply::Assignments(list) => Ok(list),
            CategorizationReply::Malformed(reason) => Err(CategorizationError::Malformed(reason)),
        }
    }
}

fn build_request(
    batch: &[CanonicalRecord],
    rules: &[&Rule],
    vocabulary: &Vocabulary,
) -> CategorizationRequest {
    CategorizationRequest {
        category_vocabulary: vocabulary.categories().to_vec(),
        rules: rules.iter().map(|r| r.content.clone()).collect(),
        batch: batch
            .iter()
            .enumerate()
            .map(|(id, r)| BatchItem {
                id,
                date: r.date,
                description: r.description.clone(),
                amount: r.amount,
            })
            .collect(),
    }
}

/// Returns the kept transactions of the batch and how many were deleted.
fn apply(
    batch: &[CanonicalRecord],
    assignments: Vec<Assignment>,
    vocabulary: &Vocabulary,
) -> (Vec<Transaction>, usize) {
    let mut by_id: HashMap<usize, Assignment> = HashMap::new();
    for a in assignments {
        if a.id >= batch.len() {
            debug!(id = a.id, "Ignoring assignment for unknown row");
            continue;
        }
        by_id.entry(a.id).or_insert(a);
    }

    let mut kept = Vec::with_capacity(batch.len());
    let mut deleted = 0;
    for (id, record) in batch.iter().enumerate() {
        let Some(a) = by_id.remove(&id) else {
            kept.push(Transaction::uncategorized(record.clone()));
            continue;
        };
        let category = a.category.as_deref().unwrap_or_default();
        if a.delete || is_delete_sentinel(category) {
            debug!(description = %record.description, "Row deleted by categorizer");
            deleted += 1;
            continue;
        }
        let mut tx = Transaction::from_record(record.clone(), vocabulary.resolve(category));
        if let Some(name) = a.renamed_description.as_deref() {
            tx.rename(name.trim());
        }
        kept.push(tx);
    }
    (kept, deleted)
}

/// Rules for the statements of `class`: `Both` plus the ones tagged for that class. The signs
/// of the rows play no part.
pub fn applicable_rules(rules: &[Rule], class: StatementClass) -> Vec<&Rule> {
    rules
        .iter()
        .filter(|rule| rule.applicability.applies_to(class))
        .collect()
}
