use finsight_core::{CanonicalRecord, ContentSignature, Transaction};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// Anything with a content identity the merge engine can compare.
pub trait Signed {
    fn identity(&self) -> ContentSignature;
}

impl Signed for CanonicalRecord {
    fn identity(&self) -> ContentSignature {
        self.signature()
    }
}

impl Signed for Transaction {
    fn identity(&self) -> ContentSignature {
        Transaction::identity(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome<T> {
    pub merged: Vec<T>,
    pub new_count: usize,
    pub duplicate_count: usize,
}

/// Rows of one batch that were not already known.
#[derive(Debug, Clone, PartialEq)]
pub struct Admitted<T> {
    pub fresh: Vec<T>,
    pub duplicates: usize,
}

/// Signature-based deduplication against everything admitted so far.
///
/// A batch is compared against the signatures known *before* it arrived, so identical rows
/// inside one batch are all kept while a later batch repeating them is dropped.
#[derive(Debug, Default)]
pub struct MergeEngine {
    seen: HashSet<ContentSignature>,
}

impl MergeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history<'a, T: Signed + 'a>(existing: impl IntoIterator<Item = &'a T>) -> Self {
        Self {
            seen: existing.into_iter().map(Signed::identity).collect(),
        }
    }

    pub fn known(&self) -> usize {
        self.seen.len()
    }

    pub fn admit<T: Signed>(&mut self, incoming: Vec<T>) -> Admitted<T> {
        let mut fresh = Vec::with_capacity(incoming.len());
        let mut admitted = Vec::new();
        let mut duplicates = 0;
        for row in incoming {
            let sig = row.identity();
            if self.seen.contains(&sig) {
                duplicates += 1;
            } else {
                admitted.push(sig);
                fresh.push(row);
            }
        }
        self.seen.extend(admitted);
        Admitted { fresh, duplicates }
    }
}

/// Appends the rows of `incoming` whose signature matches no row of `existing`.
pub fn merge<T: Signed + Clone>(existing: &[T], incoming: Vec<T>) -> MergeOutcome<T> {
    let mut engine = MergeEngine::with_history(existing);
    let Admitted { fresh, duplicates } = engine.admit(incoming);
    let new_count = fresh.len();
    let mut merged = existing.to_vec();
    merged.extend(fresh);
    MergeOutcome {
        merged,
        new_count,
        duplicate_count: duplicates,
    }
}

/// Folds several batches (one per uploaded file) into one, each merged against the rows
/// accumulated from the batches before it.
pub fn merge_batches<T: Signed + Clone>(batches: impl IntoIterator<Item = Vec<T>>) -> MergeOutcome<T> {
    let mut engine = MergeEngine::new();
    let mut merged = Vec::new();
    let mut duplicate_count = 0;
    for batch in batches {
        let Admitted { fresh, duplicates } = engine.admit(batch);
        duplicate_count += duplicates;
        merged.extend(fresh);
    }
    MergeOutcome {
        new_count: merged.len(),
        merged,
        duplicate_count,
    }
}

/// Signatures shared by more than one row, with their counts. Each one is logged as an
/// ambiguous match; such rows are treated as one logical group where the first occurrence wins.
pub fn signature_collisions<T: Signed>(rows: &[T]) -> Vec<(ContentSignature, usize)> {
    let mut counts: BTreeMap<ContentSignature, usize> = BTreeMap::new();
    for row in rows {
        *counts.entry(row.identity()).or_default() += 1;
    }
    let collisions: Vec<_> = counts.into_iter().filter(|(_, n)| *n > 1).collect();
    for (sig, n) in &collisions {
        warn!(signature = %sig, rows = n, "Ambiguous match: rows share a content signature");
    }
    collisions
}
