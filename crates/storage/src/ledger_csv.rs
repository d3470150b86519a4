use chrono::NaiveDate;
use finsight_core::{
    Amount, Transaction, TransactionId, DATE_FORMAT, LEGACY_DATE_FORMAT, UNCATEGORIZED,
};
use std::collections::HashMap;

use crate::store::StoreError;

pub const GOLD_HEADER: [&str; 5] = ["id", "date", "description", "category", "amount"];
pub const SILVER_HEADER: [&str; 6] = [
    "id",
    "date",
    "description",
    "category",
    "amount",
    "source_description",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Column {
    Id,
    Date,
    Description,
    Category,
    Amount,
    SourceDescription,
}

fn column_for(header: &str) -> Option<Column> {
    match header.trim().to_lowercase().replace(['_', '-'], " ").as_str() {
        "id" => Some(Column::Id),
        "date" | "transaction date" => Some(Column::Date),
        "description" => Some(Column::Description),
        "category" => Some(Column::Category),
        "amount" => Some(Column::Amount),
        "source description" => Some(Column::SourceDescription),
        _ => None,
    }
}

fn encode(rows: &[Transaction], with_source: bool) -> Result<Vec<u8>, StoreError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if with_source {
        writer.write_record(SILVER_HEADER)?;
    } else {
        writer.write_record(GOLD_HEADER)?;
    }
    for tx in rows {
        let id = tx.id.map(|id| id.to_string()).unwrap_or_default();
        let date = tx.date.format(DATE_FORMAT).to_string();
        let amount = tx.amount.to_string();
        let mut record = vec![
            id.as_str(),
            date.as_str(),
            tx.description.as_str(),
            tx.category.as_str(),
            amount.as_str(),
        ];
        if with_source {
            record.push(tx.source_description.as_deref().unwrap_or(&tx.description));
        }
        writer.write_record(&record)?;
    }
    writer
        .into_inner()
        .map_err(|e| StoreError::Csv(e.into_error().into()))
}

/// Serializes a Silver snapshot. Rows keep their order. The `source_description` cell always
/// holds the description as extracted, so an empty extracted description is not confused with
/// a row that was never renamed.
pub fn encode_silver(rows: &[Transaction]) -> Result<Vec<u8>, StoreError> {
    encode(rows, true)
}

/// Serializes Gold rows; the extracted description is not part of the user-facing ledger.
pub fn encode_gold(rows: &[Transaction]) -> Result<Vec<u8>, StoreError> {
    encode(rows, false)
}

/// Reads either ledger layout. Columns are found by header name, so older files that lack the
/// `id` or `source_description` column (or use `Transaction Date`) still load.
pub fn decode_ledger(key: &str, data: &[u8]) -> Result<Vec<Transaction>, StoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(data);
    let headers = reader.headers()?.clone();
    let columns: HashMap<Column, usize> = headers
        .iter()
        .enumerate()
        .filter_map(|(i, h)| column_for(h).map(|c| (c, i)))
        .collect();

    let decode_err = |line: u64, reason: String| StoreError::Decode {
        key: key.to_string(),
        line,
        reason,
    };
    for required in [Column::Date, Column::Description, Column::Amount] {
        if !columns.contains_key(&required) {
            return Err(decode_err(1, format!("missing {required:?} column")));
        }
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let line = record.position().map_or(0, |p| p.line());
        let cell = |c: Column| {
            columns
                .get(&c)
                .and_then(|i| record.get(*i))
                .unwrap_or_default()
        };

        let id = match cell(Column::Id).trim() {
            "" => None,
            s => Some(
                s.parse::<TransactionId>()
                    .map_err(|e| decode_err(line, format!("bad id '{s}': {e}")))?,
            ),
        };
        let raw_date = cell(Column::Date).trim();
        let date = NaiveDate::parse_from_str(raw_date, DATE_FORMAT)
            .or_else(|_| NaiveDate::parse_from_str(raw_date, LEGACY_DATE_FORMAT))
            .map_err(|_| decode_err(line, format!("bad date '{raw_date}'")))?;
        let amount = Amount::parse(cell(Column::Amount))
            .map_err(|e| decode_err(line, e.to_string()))?;
        let category = match cell(Column::Category) {
            "" => UNCATEGORIZED,
            c => c,
        };
        let description = cell(Column::Description);
        let source_description = columns
            .contains_key(&Column::SourceDescription)
            .then(|| cell(Column::SourceDescription))
            .filter(|s| *s != description);

        rows.push(Transaction {
            id,
            date,
            description: description.to_string(),
            category: category.to_string(),
            amount,
            source_description: source_description.map(str::to_string),
        });
    }
    Ok(rows)
}
