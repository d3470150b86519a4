use csv::StringRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::util::{normalize_header, parse_date};

/// A logical column a statement export can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Date,
    Description,
    Amount,
    Outflow,
    Inflow,
    Type,
    Balance,
}

/// Accepted header names per field, highest priority first. Names are compared after
/// [`normalize_header`].
pub const HEADER_VOCABULARY: &[(Field, &[&str])] = &[
    (
        Field::Date,
        &["transaction date", "trans date", "date", "posted date", "posting date"],
    ),
    (
        Field::Description,
        &["description", "memo", "payee", "name", "merchant"],
    ),
    (Field::Amount, &["amount", "value"]),
    (
        Field::Outflow,
        &["debit", "outflow", "withdrawal", "withdrawals"],
    ),
    (Field::Inflow, &["credit", "inflow", "deposit", "deposits"]),
    (Field::Type, &["type", "transaction type"]),
    (Field::Balance, &["balance"]),
];

/// Exports whose data rows carry one more field than the header (a leading index), so every
/// header label sits one column left of its data.
pub const SHIFTED_HEADER_TABLE: &[(&str, Field)] = &[
    ("details", Field::Date),
    ("posting date", Field::Description),
    ("description", Field::Amount),
    ("amount", Field::Type),
    ("type", Field::Balance),
];

/// Column order of the headerless export: date, description, outflow, inflow, balance.
pub const HEADERLESS_COLUMNS: [Field; 5] = [
    Field::Date,
    Field::Description,
    Field::Outflow,
    Field::Inflow,
    Field::Balance,
];

/// User-supplied column indices that bypass layout detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub date_column: usize,
    pub description_column: usize,
    #[serde(default)]
    pub amount_column: Option<usize>,
    #[serde(default)]
    pub outflow_column: Option<usize>,
    #[serde(default)]
    pub inflow_column: Option<usize>,
    #[serde(default)]
    pub type_column: Option<usize>,
    #[serde(default = "default_has_header")]
    pub has_header: bool,
    #[serde(default)]
    pub date_format: Option<String>,
}

fn default_has_header() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    Header,
    ShiftedHeader,
    Headerless,
    Mapped,
}

/// A resolved layout: which column holds each field and how many leading records to skip.
#[derive(Debug, Clone)]
pub struct Layout {
    pub kind: LayoutKind,
    pub columns: BTreeMap<Field, usize>,
    pub header_rows: usize,
    pub date_format: Option<String>,
}

impl Layout {
    pub fn column(&self, field: Field) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    /// True when the layout can produce a date, a description and some amount.
    fn is_complete(&self) -> bool {
        self.columns.contains_key(&Field::Date)
            && self.columns.contains_key(&Field::Description)
            && (self.columns.contains_key(&Field::Amount)
                || self.columns.contains_key(&Field::Outflow)
                || self.columns.contains_key(&Field::Inflow))
    }

    pub fn from_mapping(mapping: &ColumnMapping) -> Self {
        let mut columns = BTreeMap::new();
        columns.insert(Field::Date, mapping.date_column);
        columns.insert(Field::Description, mapping.description_column);
        let optional = [
            (Field::Amount, mapping.amount_column),
            (Field::Outflow, mapping.outflow_column),
            (Field::Inflow, mapping.inflow_column),
            (Field::Type, mapping.type_column),
        ];
        for (field, col) in optional {
            if let Some(col) = col {
                columns.insert(field, col);
            }
        }
        Layout {
            kind: LayoutKind::Mapped,
            columns,
            header_rows: usize::from(mapping.has_header),
            date_format: mapping.date_format.clone(),
        }
    }

    /// Detects the layout from the first records of a file. `None` means no known layout fits.
    pub fn detect(records: &[StringRecord]) -> Option<Self> {
        let first = records.first()?;
        let headers: Vec<String> = first.iter().map(normalize_header).collect();

        if let Some(layout) = shifted_layout(&headers, records.get(1)) {
            return Some(layout);
        }
        if let Some(layout) = header_layout(&headers) {
            return Some(layout);
        }
        headerless_layout(first)
    }
}

fn header_layout(headers: &[String]) -> Option<Layout> {
    let mut columns = BTreeMap::new();
    for (field, names) in HEADER_VOCABULARY {
        let found = names
            .iter()
            .find_map(|name| headers.iter().position(|h| h == name));
        if let Some(col) = found {
            columns.insert(*field, col);
        }
    }
    let layout = Layout {
        kind: LayoutKind::Header,
        columns,
        header_rows: 1,
        date_format: None,
    };
    layout.is_complete().then_some(layout)
}

fn shifted_layout(headers: &[String], first_data: Option<&StringRecord>) -> Option<Layout> {
    if headers.first().map(String::as_str) != Some("details") {
        return None;
    }
    let data = first_data?;
    if data.len() != headers.len() + 1 {
        return None;
    }
    let mut columns = BTreeMap::new();
    for (label, field) in SHIFTED_HEADER_TABLE {
        if let Some(col) = headers.iter().position(|h| h == label) {
            columns.insert(*field, col + 1);
        }
    }
    let layout = Layout {
        kind: LayoutKind::ShiftedHeader,
        columns,
        header_rows: 1,
        date_format: None,
    };
    layout.is_complete().then_some(layout)
}

fn headerless_layout(first: &StringRecord) -> Option<Layout> {
    if first.len() != HEADERLESS_COLUMNS.len() || parse_date(&first[0], None).is_none() {
        return None;
    }
    let columns = HEADERLESS_COLUMNS
        .iter()
        .enumerate()
        .map(|(col, field)| (*field, col))
        .collect();
    Some(Layout {
        kind: LayoutKind::Headerless,
        columns,
        header_rows: 0,
        date_format: None,
    })
}
