//! CSV parsing and schema validation for GTFS static tables.
//!
//! Parsing is fail-fast: the first row that violates its table's schema
//! rejects the whole file, so no partially valid table ever reaches the
//! loader. Validated values stay text; numeric coercion happens in
//! [`crate::records`].

use std::path::Path;

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::schema::{FieldKind, FieldSpec, GtfsTable};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// One validated row. Values are aligned with [`GtfsTable::fields`];
/// empty or absent optional values are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    table: GtfsTable,
    line: u64,
    values: Vec<Option<String>>,
}

impl Record {
    /// Value of field `name`, or `None` if absent, empty, or not in the schema.
    pub fn get(&self, name: &str) -> Option<&str> {
        let idx = self.table.field_index(name)?;
        self.values[idx].as_deref()
    }

    /// Source line of this row (the header is line 1).
    pub fn line(&self) -> u64 {
        self.line
    }

    pub fn table(&self) -> GtfsTable {
        self.table
    }
}

/// Every row of one table, validated. Consumed once by value.
#[derive(Debug)]
pub struct ValidatedTable {
    table: GtfsTable,
    records: Vec<Record>,
}

impl ValidatedTable {
    pub fn table(&self) -> GtfsTable {
        self.table
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl IntoIterator for ValidatedTable {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

/// Strips a leading UTF-8 byte-order mark, if any.
pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

/// Parses a GTFS `YYYYMMDD` date.
pub fn parse_gtfs_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y%m%d").ok()
}

/// Reads and validates one table file from an extracted feed directory.
pub fn parse_table_file(dir: &Path, table: GtfsTable) -> Result<ValidatedTable> {
    let path = dir.join(table.file_name());
    let bytes = std::fs::read(&path).map_err(|e| IngestError::filesystem(&path, e))?;
    parse_table(&bytes, table)
}

/// Validates the CSV `bytes` of `table` against its schema.
///
/// # Errors
///
/// [`IngestError::SchemaValidation`] if a required column is missing from
/// the header, or on the first row with a missing required value, a value
/// that does not coerce to its field's type, or malformed CSV.
pub fn parse_table(bytes: &[u8], table: GtfsTable) -> Result<ValidatedTable> {
    let file = table.file_name();
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(strip_bom(bytes));

    let headers = rdr
        .headers()
        .map_err(|e| IngestError::schema(file, 1, e))?
        .clone();
    let columns = column_positions(&headers, table)?;

    let mut records = Vec::new();
    let mut row = StringRecord::new();
    loop {
        match rdr.read_record(&mut row) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                return Err(IngestError::schema(file, line, e));
            }
        }
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        let values = table
            .fields()
            .iter()
            .zip(&columns)
            .map(|(spec, col)| validate_field(spec, col.and_then(|c| row.get(c)), file, line))
            .collect::<Result<Vec<_>>>()?;
        records.push(Record {
            table,
            line,
            values,
        });
    }

    debug!(file, rows = records.len(), "Validated table");
    Ok(ValidatedTable { table, records })
}

/// Maps each schema field to its column in `headers`.
fn column_positions(headers: &StringRecord, table: GtfsTable) -> Result<Vec<Option<usize>>> {
    table
        .fields()
        .iter()
        .map(|spec| {
            let pos = headers.iter().position(|h| h == spec.name);
            if pos.is_none() && spec.required {
                Err(IngestError::schema(
                    table.file_name(),
                    1,
                    format!("missing required column `{}`", spec.name),
                ))
            } else {
                Ok(pos)
            }
        })
        .collect()
}

fn validate_field(
    spec: &FieldSpec,
    raw: Option<&str>,
    file: &str,
    line: u64,
) -> Result<Option<String>> {
    let Some(value) = raw.filter(|v| !v.is_empty()) else {
        if spec.required {
            return Err(IngestError::schema(
                file,
                line,
                format!("missing required field `{}`", spec.name),
            ));
        }
        return Ok(None);
    };

    let coercible = match spec.kind {
        FieldKind::Text => true,
        FieldKind::Integer => value.parse::<i64>().is_ok(),
        FieldKind::Float => value.parse::<f64>().is_ok_and(f64::is_finite),
        FieldKind::Date => parse_gtfs_date(value).is_some(),
    };
    if !coercible {
        return Err(IngestError::schema(
            file,
            line,
            format!("field `{}`: expected {:?}, got {value:?}", spec.name, spec.kind),
        ));
    }

    Ok(Some(value.to_string()))
}
