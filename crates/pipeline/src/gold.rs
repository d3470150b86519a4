use finsight_core::{OverrideSet, Transaction};
use finsight_import::signature_collisions;

/// Gold rows for a class plus how many of them an override touched.
#[derive(Debug, Clone, PartialEq)]
pub struct Materialized {
    pub rows: Vec<Transaction>,
    pub overridden: usize,
}

/// Applies every override to its Silver row. Pure: the same Silver and overrides always give
/// the same rows in the same order, and neither input is modified. Rows sharing a signature
/// form one group, so a signature-keyed override reaches all of them.
pub fn materialize(silver: &[Transaction], overrides: &OverrideSet) -> Materialized {
    signature_collisions(silver);
    let mut overridden = 0;
    let rows = silver
        .iter()
        .map(|tx| {
            if overrides.touches(tx) {
                overridden += 1;
                overrides.apply(tx)
            } else {
                tx.clone()
            }
        })
        .collect();
    Materialized { rows, overridden }
}
