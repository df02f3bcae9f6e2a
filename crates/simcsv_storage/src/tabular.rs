#![forbid(unsafe_code)]

//! `FieldName,FieldValue[,...]` tabular codec, record-set digest and the audit
//! report writer.

use std::fs;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};
use simcsv_kernel_contracts::field::{
    FieldName, FieldRecord, RecordSet, COMMENT_PREFIX, FIELD_NAME_COLUMN, FIELD_VALUE_COLUMN,
};
use simcsv_kernel_contracts::outcome::{ReportRow, REPORT_COLUMNS};
use simcsv_kernel_contracts::ContractViolation;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TabularError {
    #[error("tabular file '{0}' does not exist")]
    NotFound(String),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("missing required column {0}")]
    MissingColumn(&'static str),
    #[error("row {row}: {violation}")]
    Row {
        row: usize,
        violation: ContractViolation,
    },
    #[error("record set rejected: {0}")]
    Contract(#[from] ContractViolation),
}

/// Spaces are dropped from every cell.
fn normalize_cell(raw: &str) -> String {
    raw.replace(' ', "")
}

pub fn parse_record_set(bytes: &[u8]) -> Result<RecordSet, TabularError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(bytes);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let name_idx = headers
        .iter()
        .position(|h| h == FIELD_NAME_COLUMN)
        .ok_or(TabularError::MissingColumn(FIELD_NAME_COLUMN))?;
    let value_idx = headers
        .iter()
        .position(|h| h == FIELD_VALUE_COLUMN)
        .ok_or(TabularError::MissingColumn(FIELD_VALUE_COLUMN))?;
    let extra_idx: Vec<usize> = (0..headers.len())
        .filter(|&i| i != name_idx && i != value_idx)
        .collect();
    let extra_columns: Vec<String> = extra_idx.iter().map(|&i| headers[i].clone()).collect();

    let mut records = Vec::new();
    for (i, row) in reader.records().enumerate() {
        let row = row?;
        let cell = |idx: usize| normalize_cell(row.get(idx).unwrap_or(""));
        let name = cell(name_idx);
        if name.starts_with(COMMENT_PREFIX) {
            continue;
        }
        // Header is line 1.
        let line = i + 2;
        let name = FieldName::new(name).map_err(|violation| TabularError::Row {
            row: line,
            violation,
        })?;
        let value = cell(value_idx).to_lowercase();
        let extra = extra_idx.iter().map(|&idx| cell(idx)).collect();
        records.push(FieldRecord::with_extra(name, value, extra));
    }
    let set = RecordSet::new(extra_columns, records)?;
    debug!(fields = set.len(), "tabular record set parsed");
    Ok(set)
}

pub fn read_record_set_file(path: &Path) -> Result<RecordSet, TabularError> {
    if !path.exists() {
        return Err(TabularError::NotFound(path.display().to_string()));
    }
    parse_record_set(&fs::read(path)?)
}

pub fn serialize_record_set(set: &RecordSet) -> Result<Vec<u8>, TabularError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header = vec![FIELD_NAME_COLUMN, FIELD_VALUE_COLUMN];
    header.extend(set.extra_columns().iter().map(String::as_str));
    writer.write_record(&header)?;
    for record in set {
        let mut row = vec![record.name.as_str(), record.value.as_str()];
        row.extend(record.extra.iter().map(String::as_str));
        writer.write_record(&row)?;
    }
    writer.into_inner().map_err(|e| TabularError::Io(e.into_error()))
}

/// SHA-256 over the canonical serialization, lowercase hex.
pub fn record_set_digest(set: &RecordSet) -> Result<String, TabularError> {
    let bytes = serialize_record_set(set)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

pub fn write_report<W: io::Write>(out: W, rows: &[ReportRow]) -> Result<(), TabularError> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(REPORT_COLUMNS)?;
    for row in rows {
        writer.write_record([
            row.field_name.as_str(),
            row.field_value.as_str(),
            row.value_on_card.as_str(),
            row.differences(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_report_file(path: &Path, rows: &[ReportRow]) -> Result<(), TabularError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    write_report(fs::File::create(path)?, rows)
}
