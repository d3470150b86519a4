use finsight_core::{Amount, Direction, Transaction};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryTotal {
    pub category: String,
    pub count: usize,
    pub amount: Amount,
}

/// Summary figures of one ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub transactions: usize,
    /// Net of every row: spending counts positive, money received negative.
    pub total_amount: Amount,
    pub outgoing: usize,
    pub incoming: usize,
    /// One entry per category in use, sorted by name.
    pub categories: Vec<CategoryTotal>,
}

pub fn summarize(rows: &[Transaction]) -> LedgerStats {
    let mut by_category: BTreeMap<&str, (usize, Amount)> = BTreeMap::new();
    let mut outgoing = 0;
    let mut incoming = 0;
    let mut total_amount = Amount::zero();
    for tx in rows {
        total_amount = total_amount + tx.amount;
        match tx.amount.direction() {
            Some(Direction::Outgoing) => outgoing += 1,
            Some(Direction::Incoming) => incoming += 1,
            None => {}
        }
        let entry = by_category
            .entry(tx.category.as_str())
            .or_insert((0, Amount::zero()));
        entry.0 += 1;
        entry.1 = entry.1 + tx.amount;
    }
    LedgerStats {
        transactions: rows.len(),
        total_amount,
        outgoing,
        incoming,
        categories: by_category
            .into_iter()
            .map(|(category, (count, amount))| CategoryTotal {
                category: category.to_string(),
                count,
                amount,
            })
            .collect(),
    }
}
