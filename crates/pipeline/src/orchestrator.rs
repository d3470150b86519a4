use finsight_categorize::{applicable_rules, CategorizationTransformer, Categorized, Categorizer};
use finsight_core::{
    parse_field_changes, CanonicalRecord, ContentSignature, FieldChanges, OverrideKey,
    StatementClass, Transaction, TransactionId,
};
use finsight_import::{merge_batches, MergeEngine, MergeOutcome, StatementExtractor};
use finsight_storage::{
    CategoryError, CategoryStore, FsStore, OverrideStore, RuleError, RuleStore, Store, StoreError,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigError};
use crate::gold::{materialize, Materialized};
use crate::loader::LedgerLoader;
use crate::stats::{summarize, LedgerStats};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),
    #[error("Rule store failed: {0}")]
    Rules(#[from] RuleError),
    #[error("Category store failed: {0}")]
    Categories(#[from] CategoryError),
    #[error("Unable to read uploads directory {path}: {source}")]
    Uploads {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("None of the {0} uploaded file(s) could be extracted")]
    NoReadableFiles(usize),
    #[error("The {0} class is not configured")]
    NotConfigured(StatementClass),
}

/// Where a class run is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    NoFiles,
    Extracting,
    Merging,
    Categorizing,
    PersistingSilver,
    GeneratingGold,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::NoFiles => "no files",
            Stage::Extracting => "extracting",
            Stage::Merging => "merging",
            Stage::Categorizing => "categorizing",
            Stage::PersistingSilver => "persisting silver",
            Stage::GeneratingGold => "generating gold",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Counters for one successful class run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub files: usize,
    pub failed_files: Vec<String>,
    pub extracted: usize,
    pub skipped_rows: usize,
    pub filtered_rows: usize,
    pub new_count: usize,
    pub duplicate_count: usize,
    pub deleted: usize,
    pub fallback_batches: usize,
    pub silver_rows: usize,
    pub gold_rows: usize,
}

#[derive(Debug)]
pub enum ClassOutcome {
    Success(RunStats),
    NoFiles,
    Failed { stage: Stage, error: PipelineError },
}

#[derive(Debug)]
pub struct ClassReport {
    pub class: StatementClass,
    pub outcome: ClassOutcome,
}

#[derive(Debug)]
pub struct RunReport {
    pub classes: Vec<ClassReport>,
}

impl RunReport {
    /// `true` unless some class failed. A class without uploads is not a failure.
    pub fn succeeded(&self) -> bool {
        !self
            .classes
            .iter()
            .any(|c| matches!(c.outcome, ClassOutcome::Failed { .. }))
    }

    pub fn outcome(&self, class: StatementClass) -> Option<&ClassOutcome> {
        self.classes
            .iter()
            .find(|c| c.class == class)
            .map(|c| &c.outcome)
    }
}

/// Which classes a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Credit,
    Debit,
    All,
}

impl FromStr for Selection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "credit" => Ok(Selection::Credit),
            "debit" => Ok(Selection::Debit),
            "all" => Ok(Selection::All),
            other => Err(format!("Unknown selection: '{other}' (expected credit, debit or all)")),
        }
    }
}

/// Which row a user edit refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditTarget {
    Id(TransactionId),
    /// Date, description and amount of the row, as displayed or as extracted.
    Signature(ContentSignature),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub class: StatementClass,
    pub target: EditTarget,
    /// Field name to new value, e.g. `{"Category": "Groceries"}`.
    pub changes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    /// Only rows Silver has not seen are categorized and appended.
    Incremental,
    /// Every extracted row is categorized again.
    Full,
}

struct ClassPlan {
    uploads_dir: PathBuf,
    extractor: StatementExtractor,
}

/// Runs the extract → merge → categorize → Silver → Gold flow for each statement class and
/// owns the edit surface.
pub struct Orchestrator {
    loader: LedgerLoader,
    rules: RuleStore,
    categories: CategoryStore,
    transformer: CategorizationTransformer,
    plans: BTreeMap<StatementClass, ClassPlan>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        categorizer: Arc<dyn Categorizer>,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        let plans = config
            .classes
            .iter()
            .map(|(&class, settings)| {
                let extractor = StatementExtractor::new(settings.extract.clone())
                    .map_err(|source| ConfigError::Extraction { class, source })?;
                Ok((
                    class,
                    ClassPlan {
                        uploads_dir: settings.uploads_dir.clone(),
                        extractor,
                    },
                ))
            })
            .collect::<Result<_, ConfigError>>()?;
        let settings = &config.categorizer;
        let transformer = CategorizationTransformer::new(categorizer)
            .with_batch_size(settings.batch_size)
            .with_timeout(settings.timeout);
        let overrides = Arc::new(OverrideStore::new(store.clone()));
        Ok(Self {
            loader: LedgerLoader::new(store.clone(), overrides),
            rules: RuleStore::new(store.clone()),
            categories: CategoryStore::new(store, settings.vocabulary.clone()),
            transformer,
            plans,
        })
    }

    /// Filesystem store under the data directory and the configured categorizer.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let store = Arc::new(FsStore::new(&config.data_dir).with_io_timeout(config.io_timeout));
        let categorizer = config.categorizer.backend()?;
        Self::new(store, categorizer, config)
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn categories(&self) -> &CategoryStore {
        &self.categories
    }

    pub fn loader(&self) -> &LedgerLoader {
        &self.loader
    }

    /// Runs the selected classes. Classes are independent: one failing leaves the other alone.
    pub async fn run(&self, selection: Selection) -> RunReport {
        let classes = match selection {
            Selection::Credit => vec![self.run_class(StatementClass::Credit).await],
            Selection::Debit => vec![self.run_class(StatementClass::Debit).await],
            Selection::All => {
                let (credit, debit) = tokio::join!(
                    self.run_class(StatementClass::Credit),
                    self.run_class(StatementClass::Debit)
                );
                vec![credit, debit]
            }
        };
        RunReport { classes }
    }

    pub async fn run_class(&self, class: StatementClass) -> ClassReport {
        self.report(class, Mode::Incremental).await
    }

    /// Rebuilds Silver of `class` from every uploaded file with the current rules and
    /// categories. Rows keep their ids, so id-keyed edits survive. Rows whose files are gone
    /// stay as they were.
    pub async fn reprocess(&self, class: StatementClass) -> ClassReport {
        self.report(class, Mode::Full).await
    }

    async fn report(&self, class: StatementClass, mode: Mode) -> ClassReport {
        let mut stage = Stage::Extracting;
        let outcome = match self.process_class(class, mode, &mut stage).await {
            Ok(Some(stats)) => {
                info!(
                    %class,
                    ?mode,
                    new = stats.new_count,
                    duplicates = stats.duplicate_count,
                    gold_rows = stats.gold_rows,
                    "Class run complete"
                );
                ClassOutcome::Success(stats)
            }
            Ok(None) => {
                info!(%class, "No uploaded files");
                ClassOutcome::NoFiles
            }
            Err(error) => {
                warn!(%class, %stage, %error, "Class run failed");
                ClassOutcome::Failed { stage, error }
            }
        };
        ClassReport { class, outcome }
    }

    async fn process_class(
        &self,
        class: StatementClass,
        mode: Mode,
        stage: &mut Stage,
    ) -> Result<Option<RunStats>, PipelineError> {
        let plan = self
            .plans
            .get(&class)
            .ok_or(PipelineError::NotConfigured(class))?;
        let files = list_uploads(&plan.uploads_dir).await?;
        if files.is_empty() {
            *stage = Stage::NoFiles;
            return Ok(None);
        }
        let mut stats = RunStats {
            files: files.len(),
            ..RunStats::default()
        };

        // 1. Extract every file; a bad file is skipped, not fatal.
        let mut batches = Vec::with_capacity(files.len());
        for path in &files {
            match read_and_extract(&plan.extractor, path).await {
                Ok(extraction) => {
                    debug!(file = %path.display(), layout = ?extraction.layout, rows = extraction.records.len(), "Extracted");
                    stats.extracted += extraction.records.len();
                    stats.skipped_rows += extraction.skipped;
                    stats.filtered_rows += extraction.filtered;
                    batches.push(extraction.records);
                }
                Err(reason) => {
                    warn!(%class, file = %path.display(), %reason, "Skipping unreadable statement");
                    stats.failed_files.push(file_name(path));
                }
            }
        }
        if batches.is_empty() {
            return Err(PipelineError::NoReadableFiles(files.len()));
        }
        info!(%class, files = files.len(), rows = stats.extracted, "Extraction finished");

        // 2. Merge files with each other, then against the previous Silver.
        *stage = Stage::Merging;
        let combined = merge_batches(batches);
        let snapshot = self.loader.load_silver(class).await?;
        let silver = match mode {
            Mode::Incremental => {
                self.append_fresh(class, combined, snapshot.rows, &mut stats, stage)
                    .await?
            }
            Mode::Full => {
                self.rebuild(class, combined, snapshot.rows, &mut stats, stage)
                    .await?
            }
        };

        // 4. Silver is only rewritten when something changed.
        *stage = Stage::PersistingSilver;
        if let Some(mut silver) = silver {
            assign_ids(&mut silver);
            self.loader
                .save_silver(class, &silver, snapshot.expect)
                .await?;
            stats.silver_rows = silver.len();
        }

        // 5. Gold always reflects the current Silver and overrides.
        *stage = Stage::GeneratingGold;
        let gold = self.loader.regenerate_gold(class).await?;
        stats.gold_rows = gold.rows.len();

        *stage = Stage::Done;
        Ok(Some(stats))
    }

    /// Categorizes only the rows Silver has not seen. `None` when nothing was added.
    async fn append_fresh(
        &self,
        class: StatementClass,
        combined: MergeOutcome<CanonicalRecord>,
        mut silver: Vec<Transaction>,
        stats: &mut RunStats,
        stage: &mut Stage,
    ) -> Result<Option<Vec<Transaction>>, PipelineError> {
        let mut engine = MergeEngine::with_history(&silver);
        let admitted = engine.admit(combined.merged);
        stats.duplicate_count = combined.duplicate_count + admitted.duplicates;
        stats.new_count = admitted.fresh.len();
        stats.silver_rows = silver.len();
        info!(%class, new = stats.new_count, duplicates = stats.duplicate_count, "Merged against history");
        if admitted.fresh.is_empty() {
            return Ok(None);
        }

        // 3. Categorize what is new.
        *stage = Stage::Categorizing;
        let categorized = self.categorize(class, admitted.fresh, stats).await?;
        if categorized.is_empty() {
            return Ok(None);
        }
        silver.extend(categorized);
        Ok(Some(silver))
    }

    /// Categorizes every extracted row again and lays the result over the previous Silver:
    /// matching rows keep their id and position, rows now deleted by the categorizer are
    /// dropped, rows no upload carries any more are kept, and unseen rows are appended.
    async fn rebuild(
        &self,
        class: StatementClass,
        combined: MergeOutcome<CanonicalRecord>,
        previous: Vec<Transaction>,
        stats: &mut RunStats,
        stage: &mut Stage,
    ) -> Result<Option<Vec<Transaction>>, PipelineError> {
        stats.duplicate_count = combined.duplicate_count;
        let extracted: HashSet<ContentSignature> =
            combined.merged.iter().map(CanonicalRecord::signature).collect();

        // 3. Categorize everything.
        *stage = Stage::Categorizing;
        let categorized = self.categorize(class, combined.merged, stats).await?;
        let mut by_identity: HashMap<ContentSignature, VecDeque<usize>> = HashMap::new();
        for (i, tx) in categorized.iter().enumerate() {
            by_identity.entry(tx.identity()).or_default().push_back(i);
        }
        let mut fresh: Vec<Option<Transaction>> = categorized.into_iter().map(Some).collect();

        let mut silver = Vec::with_capacity(previous.len().max(fresh.len()));
        for old in previous {
            let identity = old.identity();
            if !extracted.contains(&identity) {
                silver.push(old);
                continue;
            }
            let slot = by_identity
                .get_mut(&identity)
                .and_then(VecDeque::pop_front)
                .and_then(|i| fresh.get_mut(i))
                .and_then(Option::take);
            if let Some(mut tx) = slot {
                tx.id = old.id;
                silver.push(tx);
            }
        }
        let appended: Vec<Transaction> = fresh.into_iter().flatten().collect();
        stats.new_count = appended.len();
        silver.extend(appended);
        info!(%class, rows = silver.len(), new = stats.new_count, "Silver rebuilt");
        Ok(Some(silver))
    }

    async fn categorize(
        &self,
        class: StatementClass,
        records: Vec<CanonicalRecord>,
        stats: &mut RunStats,
    ) -> Result<Vec<Transaction>, PipelineError> {
        let rules = self.rules.list().await?;
        let rules = applicable_rules(&rules, class);
        let vocabulary = self.categories.vocabulary().await?;
        let Categorized {
            transactions,
            deleted,
            fallback_batches,
        } = self.transformer.transform(records, &rules, &vocabulary).await;
        stats.deleted = deleted;
        stats.fallback_batches = fallback_batches;
        Ok(transactions)
    }

    /// Re-materializes Gold of `class` from the stored Silver.
    pub async fn regenerate_gold(&self, class: StatementClass) -> Result<Materialized, PipelineError> {
        Ok(self.loader.regenerate_gold(class).await?)
    }

    /// Summary figures of the Gold ledger of `class`.
    pub async fn stats(&self, class: StatementClass) -> Result<LedgerStats, PipelineError> {
        Ok(summarize(&self.loader.load_gold(class).await?))
    }

    // ── Edit surface ─────────────────────────────────────────────────────────

    /// Records one user edit and regenerates Gold of its class. `false` when the reference
    /// matches no row or a field cannot be edited.
    pub async fn record_edit(&self, edit: Edit) -> Result<bool, PipelineError> {
        Ok(self.record_bulk_edits(vec![edit]).await? == 1)
    }

    /// Records several edits in a single override write. Returns how many were applied.
    pub async fn record_bulk_edits(&self, edits: Vec<Edit>) -> Result<usize, PipelineError> {
        let overrides = self.loader.overrides().snapshot().await?;
        let mut views: BTreeMap<StatementClass, ClassView> = BTreeMap::new();
        let mut resolved = Vec::new();
        for edit in edits {
            let Some(changes) = edit_changes(&edit) else {
                continue;
            };
            if !views.contains_key(&edit.class) {
                let silver = self.loader.load_silver(edit.class).await?.rows;
                let displayed = materialize(&silver, &overrides).rows;
                views.insert(edit.class, ClassView { silver, displayed });
            }
            let Some(view) = views.get(&edit.class) else {
                continue;
            };
            match view.resolve(&edit.target) {
                Some(key) => resolved.push((edit.class, key, changes)),
                None => warn!(class = %edit.class, target = ?edit.target, "Edit matches no row"),
            }
        }
        if resolved.is_empty() {
            return Ok(0);
        }

        let count = resolved.len();
        let mut affected: Vec<StatementClass> = resolved.iter().map(|(c, _, _)| *c).collect();
        self.loader
            .overrides()
            .record_many(resolved.into_iter().map(|(_, k, c)| (k, c)).collect())
            .await?;
        affected.sort();
        affected.dedup();
        for class in affected {
            self.loader.regenerate_gold(class).await?;
        }
        Ok(count)
    }
}

/// Silver of one class next to the rows as currently displayed, in the same order.
struct ClassView {
    silver: Vec<Transaction>,
    displayed: Vec<Transaction>,
}

impl ClassView {
    /// Id first, then the Silver description, then the extracted description, then the
    /// description as displayed after overrides.
    fn resolve(&self, target: &EditTarget) -> Option<OverrideKey> {
        let index = match target {
            EditTarget::Id(id) => self.silver.iter().position(|tx| tx.id == Some(*id)),
            EditTarget::Signature(sig) => first_match(&self.silver, sig, Transaction::signature)
                .or_else(|| first_match(&self.silver, sig, Transaction::identity))
                .or_else(|| first_match(&self.displayed, sig, Transaction::signature)),
        }?;
        self.silver.get(index).map(OverrideKey::for_transaction)
    }
}

fn first_match(
    rows: &[Transaction],
    sig: &ContentSignature,
    key: impl Fn(&Transaction) -> ContentSignature,
) -> Option<usize> {
    let mut hits = rows
        .iter()
        .enumerate()
        .filter(|&(_, tx)| key(tx) == *sig)
        .map(|(i, _)| i);
    let first = hits.next()?;
    let others = hits.count();
    if others > 0 {
        warn!(signature = %sig, matches = others + 1, "Ambiguous match: edit applies to the first row");
    }
    Some(first)
}

fn edit_changes(edit: &Edit) -> Option<FieldChanges> {
    match parse_field_changes(edit.changes.iter().map(|(k, v)| (k.as_str(), v.as_str()))) {
        Ok(changes) if !changes.is_empty() => Some(changes),
        Ok(_) => {
            warn!(class = %edit.class, "Edit carries no changes");
            None
        }
        Err(e) => {
            warn!(class = %edit.class, error = %e, "Rejected edit");
            None
        }
    }
}

fn assign_ids(rows: &mut [Transaction]) {
    for tx in rows.iter_mut().filter(|tx| tx.id.is_none()) {
        tx.id = Some(TransactionId::new());
    }
}

/// `*.csv` files directly inside `dir`, sorted by file name.
async fn list_uploads(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let uploads_err = |source| PipelineError::Uploads {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(uploads_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(uploads_err)? {
        let path = entry.path();
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if is_csv && path.is_file() {
            files.push(path);
        }
    }
    files.sort_by_key(|p| file_name(p));
    Ok(files)
}

async fn read_and_extract(
    extractor: &StatementExtractor,
    path: &Path,
) -> Result<finsight_import::Extraction, String> {
    let bytes = tokio::fs::read(path).await.map_err(|e| e.to_string())?;
    extractor.extract(bytes.as_slice()).map_err(|e| e.to_string())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use finsight_core::{Amount, CanonicalRecord, OverrideField, OverrideSet};

    fn row(desc: &str, cents: i64) -> Transaction {
        let mut tx = Transaction::uncategorized(CanonicalRecord::new(
            NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
            desc,
            Amount::from_cents(cents),
        ));
        tx.id = Some(TransactionId::new());
        tx
    }

    fn view(silver: Vec<Transaction>, overrides: &OverrideSet) -> ClassView {
        let displayed = materialize(&silver, overrides).rows;
        ClassView { silver, displayed }
    }

    #[test]
    fn selection_parses() {
        assert_eq!("ALL".parse::<Selection>().unwrap(), Selection::All);
        assert_eq!(" credit".parse::<Selection>().unwrap(), Selection::Credit);
        assert!("savings".parse::<Selection>().is_err());
    }

    #[test]
    fn resolves_by_id_then_signature() {
        let silver = vec![row("COSTCO", 5000), row("SHELL", 4000)];
        let v = view(silver.clone(), &OverrideSet::new());
        let id = silver[1].id.unwrap();
        assert_eq!(v.resolve(&EditTarget::Id(id)), Some(OverrideKey::Id(id)));
        assert_eq!(
            v.resolve(&EditTarget::Signature(silver[0].signature())),
            Some(OverrideKey::Id(silver[0].id.unwrap()))
        );
        assert_eq!(v.resolve(&EditTarget::Id(TransactionId::new())), None);
    }

    #[test]
    fn resolves_renamed_and_overridden_descriptions() {
        let mut renamed = row("SQ *BLUE BOTTLE 123", 650);
        renamed.rename("Blue Bottle Coffee");
        let plain = row("AMZN MKTP", 2599);
        let mut overrides = OverrideSet::new();
        overrides.record(
            OverrideKey::Id(plain.id.unwrap()),
            FieldChanges::from([(OverrideField::Description, "Amazon".to_string())]),
        );
        let v = view(vec![renamed.clone(), plain.clone()], &overrides);

        let extracted = ContentSignature::new(renamed.date, "SQ *BLUE BOTTLE 123", renamed.amount);
        assert_eq!(
            v.resolve(&EditTarget::Signature(extracted)),
            Some(OverrideKey::Id(renamed.id.unwrap()))
        );
        let shown = ContentSignature::new(plain.date, "Amazon", plain.amount);
        assert_eq!(
            v.resolve(&EditTarget::Signature(shown)),
            Some(OverrideKey::Id(plain.id.unwrap()))
        );
    }

    #[test]
    fn ambiguous_signature_takes_first_row() {
        let a = row("TIM HORTONS", 215);
        let b = row("TIM HORTONS", 215);
        let v = view(vec![a.clone(), b], &OverrideSet::new());
        assert_eq!(
            v.resolve(&EditTarget::Signature(a.signature())),
            Some(OverrideKey::Id(a.id.unwrap()))
        );
    }

    #[test]
    fn id_less_rows_are_keyed_by_signature() {
        let mut legacy = row("HYDRO ONE", 8800);
        legacy.id = None;
        let v = view(vec![legacy.clone()], &OverrideSet::new());
        assert_eq!(
            v.resolve(&EditTarget::Signature(legacy.signature())),
            Some(OverrideKey::Signature(legacy.identity()))
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let edit = |k: &str| Edit {
            class: StatementClass::Credit,
            target: EditTarget::Id(TransactionId::new()),
            changes: BTreeMap::from([(k.to_string(), "x".to_string())]),
        };
        assert!(edit_changes(&edit("Category")).is_some());
        assert!(edit_changes(&edit("amount")).is_none());
        let mut empty = edit("Category");
        empty.changes.clear();
        assert!(edit_changes(&empty).is_none());
    }
}
