use csv::StringRecord;
use finsight_core::{Amount, CanonicalRecord, StatementClass};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::layout::{ColumnMapping, Field, Layout, LayoutKind};
use crate::util::parse_date;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("No known statement layout matches header [{0}]")]
    UnrecognizedLayout(String),
    #[error("Invalid exclude pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Per-class extraction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractOptions {
    /// Case-insensitive patterns; a row whose description matches any of them is dropped.
    #[serde(default)]
    pub exclude_descriptions: Vec<String>,
    /// Case-insensitive values of a `type` column whose rows are dropped.
    #[serde(default)]
    pub exclude_types: Vec<String>,
    /// Flip signs for exports that report expenses as negative numbers.
    #[serde(default)]
    pub invert_amounts: bool,
    #[serde(default)]
    pub mapping: Option<ColumnMapping>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_delimiter() -> char {
    ','
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            exclude_descriptions: Vec::new(),
            exclude_types: Vec::new(),
            invert_amounts: false,
            mapping: None,
            delimiter: default_delimiter(),
        }
    }
}

impl ExtractOptions {
    /// Drops card payments and transfers that would otherwise be counted twice across classes.
    pub fn for_class(class: StatementClass) -> Self {
        let (descriptions, types): (&[&str], &[&str]) = match class {
            StatementClass::Credit => (&["PAYMENT"], &["payment"]),
            StatementClass::Debit => (&["^TD VISA"], &["LOAN_PMT"]),
        };
        Self {
            exclude_descriptions: descriptions.iter().map(|s| s.to_string()).collect(),
            exclude_types: types.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }
}

/// Result of extracting one file.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub records: Vec<CanonicalRecord>,
    /// Rows dropped because the date or amount could not be parsed.
    pub skipped: usize,
    /// Rows dropped by the exclusion filters.
    pub filtered: usize,
    pub layout: Option<LayoutKind>,
}

struct Filters {
    descriptions: Vec<Regex>,
    types: Vec<String>,
}

impl Filters {
    fn compile(options: &ExtractOptions) -> Result<Self, FormatError> {
        let descriptions = options
            .exclude_descriptions
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| FormatError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<_, _>>()?;
        let types = options
            .exclude_types
            .iter()
            .map(|t| t.trim().to_lowercase())
            .collect();
        Ok(Self {
            descriptions,
            types,
        })
    }

    fn excludes(&self, description: &str, kind: Option<&str>) -> bool {
        self.descriptions.iter().any(|re| re.is_match(description))
            || kind.is_some_and(|k| self.types.contains(&k.trim().to_lowercase()))
    }
}

pub struct StatementExtractor {
    options: ExtractOptions,
    filters: Filters,
}

impl StatementExtractor {
    pub fn new(options: ExtractOptions) -> Result<Self, FormatError> {
        let filters = Filters::compile(&options)?;
        Ok(Self { options, filters })
    }

    pub fn extract_file(&self, path: &Path) -> Result<Extraction, FormatError> {
        let file = File::open(path)?;
        self.extract(file)
    }

    pub fn extract<R: Read>(&self, data: R) -> Result<Extraction, FormatError> {
        let delimiter = u8::try_from(self.options.delimiter).unwrap_or(b',');
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .delimiter(delimiter)
            .from_reader(data);

        let records = reader
            .records()
            .filter(|r| r.as_ref().map_or(true, |r| r.iter().any(|f| !f.is_empty())))
            .collect::<Result<Vec<StringRecord>, csv::Error>>()?;
        if records.is_empty() {
            return Ok(Extraction::default());
        }

        let layout = match &self.options.mapping {
            Some(mapping) => Layout::from_mapping(mapping),
            None => Layout::detect(&records).ok_or_else(|| {
                FormatError::UnrecognizedLayout(records[0].iter().collect::<Vec<_>>().join(", "))
            })?,
        };
        debug!(layout = ?layout.kind, rows = records.len(), "Statement layout detected");

        let mut extraction = Extraction {
            layout: Some(layout.kind),
            ..Extraction::default()
        };
        for (row, record) in records.iter().enumerate().skip(layout.header_rows) {
            match self.parse_row(record, &layout) {
                Some(Row { kind, record }) => {
                    if self.filters.excludes(&record.description, kind) {
                        debug!(row, description = %record.description, "Row excluded");
                        extraction.filtered += 1;
                    } else {
                        extraction.records.push(record);
                    }
                }
                None => {
                    debug!(row, "Row skipped: unparsable date or amount");
                    extraction.skipped += 1;
                }
            }
        }
        Ok(extraction)
    }

    fn parse_row<'r>(&self, record: &'r StringRecord, layout: &Layout) -> Option<Row<'r>> {
        let cell = |field: Field| layout.column(field).and_then(|col| record.get(col));

        let date = parse_date(cell(Field::Date)?, layout.date_format.as_deref())?;
        let description = cell(Field::Description).unwrap_or_default().trim().to_string();

        let amount = match layout.column(Field::Amount) {
            Some(_) => Amount::parse(cell(Field::Amount)?).ok()?,
            None => {
                let side = |field| match cell(field).map(str::trim) {
                    None | Some("") => Some(Amount::zero()),
                    Some(s) => Amount::parse(s).ok(),
                };
                let outflow = side(Field::Outflow)?;
                let inflow = side(Field::Inflow)?;
                outflow - inflow
            }
        };
        let amount = if self.options.invert_amounts {
            -amount
        } else {
            amount
        };

        Some(Row {
            kind: cell(Field::Type),
            record: CanonicalRecord::new(date, description, amount),
        })
    }
}

struct Row<'r> {
    kind: Option<&'r str>,
    record: CanonicalRecord,
}

/// Extracts one statement file with default options for its class.
pub fn extract_file(path: &Path, class: StatementClass) -> Result<Extraction, FormatError> {
    StatementExtractor::new(ExtractOptions::for_class(class))?.extract_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn run(options: ExtractOptions, data: &str) -> Extraction {
        StatementExtractor::new(options)
            .unwrap()
            .extract(data.as_bytes())
            .unwrap()
    }

    #[test]
    fn header_export_with_amount_column() {
        let data = "Transaction Date,Description,Category,Amount\n\
                    2024-01-15,AMAZON,Shopping,49.99\n\
                    01/16/2024,  STARBUCKS  ,,-5.00\n";
        let out = run(ExtractOptions::default(), data);
        assert_eq!(out.layout, Some(LayoutKind::Header));
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].amount, Amount::from_cents(4999));
        assert_eq!(out.records[1].date, ymd(2024, 1, 16));
        assert_eq!(out.records[1].description, "STARBUCKS");
        assert_eq!(out.records[1].amount, Amount::from_cents(-500));
    }

    #[test]
    fn headerless_outflow_minus_inflow() {
        let data = "10/18/2025,COFFEE,4.50,,995.50\n\
                    10/19/2025,PAYROLL,,1200.00,2195.50\n";
        let out = run(ExtractOptions::for_class(StatementClass::Debit), data);
        assert_eq!(out.layout, Some(LayoutKind::Headerless));
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].date, ymd(2025, 10, 18));
        assert_eq!(out.records[0].amount, Amount::from_cents(450));
        assert!(out.records[0].amount.is_outgoing());
        assert_eq!(out.records[1].amount, Amount::from_cents(-120000));
        assert!(out.records[1].amount.is_incoming());
    }

    #[test]
    fn shifted_export_reads_real_columns_and_filters_type() {
        let data = "Details,Posting Date,Description,Amount,Type,Balance,Check or Slip #\n\
                    DEBIT,01/05/2024,STARBUCKS,5.25,DEBIT_CARD,994.75,,\n\
                    DEBIT,01/06/2024,AUTO LOAN,300.00,LOAN_PMT,694.75,,\n";
        let out = run(ExtractOptions::for_class(StatementClass::Debit), data);
        assert_eq!(out.layout, Some(LayoutKind::ShiftedHeader));
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].description, "STARBUCKS");
        assert_eq!(out.records[0].amount, Amount::from_cents(525));
        assert_eq!(out.filtered, 1);
    }

    #[test]
    fn class_defaults_drop_card_payments() {
        let credit = "Transaction Date,Description,Amount,Type\n\
                      2024-02-01,PAYMENT - THANK YOU,-500.00,Payment\n\
                      2024-02-02,AMAZON MKTPLACE,12.00,Sale\n\
                      2024-02-03,REFUND,-3.00,payment\n\
                      2024-02-04,ONLINE PAYMENT - THANK YOU,-250.00,\n";
        let out = run(ExtractOptions::for_class(StatementClass::Credit), credit);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].description, "AMAZON MKTPLACE");
        assert_eq!(out.filtered, 3);

        let debit = "2024-02-01,TD VISA PREAUTH PYMT,500.00,,100.00\n\
                     2024-02-02,GROCER TD VISA,20.00,,80.00\n";
        let out = run(ExtractOptions::for_class(StatementClass::Debit), debit);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].description, "GROCER TD VISA");
    }

    #[test]
    fn unparsable_rows_are_counted_not_fatal() {
        let data = "Date,Description,Amount\n\
                    2024-01-15,OK,1.00\n\
                    yesterday,BAD DATE,1.00\n\
                    2024-01-16,BAD AMOUNT,n/a\n";
        let out = run(ExtractOptions::default(), data);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.skipped, 2);
    }

    #[test]
    fn empty_data_section_yields_no_records() {
        let out = run(ExtractOptions::default(), "Date,Description,Amount\n");
        assert!(out.records.is_empty());
        let out = run(ExtractOptions::default(), "");
        assert!(out.records.is_empty());
    }

    #[test]
    fn unknown_layout_is_a_format_error() {
        let err = StatementExtractor::new(ExtractOptions::default())
            .unwrap()
            .extract("foo,bar\n1,2\n".as_bytes())
            .unwrap_err();
        assert!(matches!(err, FormatError::UnrecognizedLayout(_)));
    }

    #[test]
    fn explicit_mapping_and_inversion() {
        let options = ExtractOptions {
            invert_amounts: true,
            delimiter: ';',
            mapping: Some(ColumnMapping {
                date_column: 1,
                description_column: 0,
                amount_column: Some(2),
                outflow_column: None,
                inflow_column: None,
                type_column: None,
                has_header: false,
                date_format: Some("%d.%m.%Y".into()),
            }),
            ..ExtractOptions::default()
        };
        let out = run(options, "BAKERY;03.04.2024;-7.10\n");
        assert_eq!(out.layout, Some(LayoutKind::Mapped));
        assert_eq!(out.records[0].date, ymd(2024, 4, 3));
        assert_eq!(out.records[0].amount, Amount::from_cents(710));
    }

    #[test]
    fn invalid_pattern_rejected() {
        let options = ExtractOptions {
            exclude_descriptions: vec!["(".into()],
            ..ExtractOptions::default()
        };
        assert!(matches!(
            StatementExtractor::new(options),
            Err(FormatError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn extract_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jan.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "Date,Description,Amount\n2024-01-02,RENT,1500.00").unwrap();
        let out = extract_file(&path, StatementClass::Debit).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].amount, Amount::from_cents(150000));
    }
}
