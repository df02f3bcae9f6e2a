#![forbid(unsafe_code)]

use std::fmt;

use crate::{ContractViolation, Validate};

pub const FIELD_NAME_COLUMN: &str = "FieldName";
pub const FIELD_VALUE_COLUMN: &str = "FieldValue";
pub const COMMENT_PREFIX: char = '#';
/// Separates a record-structured field name from a 1-based record number (`IMPU.2`).
pub const RECORD_TARGET_SEPARATOR: char = '.';

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldName(String);

impl FieldName {
    pub fn new(name: impl Into<String>) -> Result<Self, ContractViolation> {
        let n = Self(name.into());
        n.validate()?;
        Ok(n)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_comment(&self) -> bool {
        self.0.starts_with(COMMENT_PREFIX)
    }

    pub fn split_record_target(&self) -> (&str, Option<&str>) {
        split_record_target(&self.0)
    }
}

/// Returns the registry name and the raw record suffix, if any.
pub fn split_record_target(name: &str) -> (&str, Option<&str>) {
    match name.split_once(RECORD_TARGET_SEPARATOR) {
        Some((base, suffix)) => (base, Some(suffix)),
        None => (name, None),
    }
}

impl Validate for FieldName {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "field_name",
                reason: "must not be empty",
            });
        }
        if self.0.len() > 64 {
            return Err(ContractViolation::InvalidValue {
                field: "field_name",
                reason: "must be <= 64 chars",
            });
        }
        if self.0.chars().any(|c| c.is_control()) {
            return Err(ContractViolation::InvalidValue {
                field: "field_name",
                reason: "must not contain control characters",
            });
        }
        Ok(())
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One tabular row. `value` is kept verbatim so the validator can report every
/// malformed value instead of the constructor rejecting the first one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRecord {
    pub name: FieldName,
    pub value: String,
    /// Values of the record set's extra columns, in column order.
    pub extra: Vec<String>,
}

impl FieldRecord {
    pub fn new(name: FieldName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
            extra: Vec::new(),
        }
    }

    pub fn with_extra(name: FieldName, value: impl Into<String>, extra: Vec<String>) -> Self {
        Self {
            name,
            value: value.into(),
            extra,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordSet {
    extra_columns: Vec<String>,
    records: Vec<FieldRecord>,
}

impl RecordSet {
    /// Builds a record set, dropping comment rows.
    pub fn new(
        extra_columns: Vec<String>,
        records: Vec<FieldRecord>,
    ) -> Result<Self, ContractViolation> {
        let records: Vec<FieldRecord> = records
            .into_iter()
            .filter(|r| !r.name.is_comment())
            .collect();
        let s = Self {
            extra_columns,
            records,
        };
        s.validate()?;
        Ok(s)
    }

    pub fn from_pairs<I, N, V>(pairs: I) -> Result<Self, ContractViolation>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        let mut records = Vec::new();
        for (name, value) in pairs {
            records.push(FieldRecord::new(FieldName::new(name)?, value));
        }
        Self::new(Vec::new(), records)
    }

    pub fn extra_columns(&self) -> &[String] {
        &self.extra_columns
    }

    pub fn records(&self) -> &[FieldRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FieldRecord> {
        self.records.iter().find(|r| r.name.as_str() == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &FieldName> {
        self.records.iter().map(|r| &r.name)
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a FieldRecord;
    type IntoIter = std::slice::Iter<'a, FieldRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl Validate for RecordSet {
    fn validate(&self) -> Result<(), ContractViolation> {
        for column in &self.extra_columns {
            if column == FIELD_NAME_COLUMN || column == FIELD_VALUE_COLUMN {
                return Err(ContractViolation::InvalidValue {
                    field: "record_set.extra_columns",
                    reason: "must not repeat FieldName or FieldValue",
                });
            }
        }
        for record in &self.records {
            record.name.validate()?;
            if record.extra.len() != self.extra_columns.len() {
                return Err(ContractViolation::InvalidValue {
                    field: "field_record.extra",
                    reason: "must have one value per extra column",
                });
            }
        }
        Ok(())
    }
}
