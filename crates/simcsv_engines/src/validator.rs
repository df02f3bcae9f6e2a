#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;

use simcsv_kernel_contracts::card::RecordNumber;
use simcsv_kernel_contracts::field::{split_record_target, RecordSet};
use thiserror::Error;
use tracing::debug;

use crate::registry::{FieldRegistry, RegistryEntry};

/// Every rule a record set broke, with every offending name per rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSetViolation {
    pub unknown_names: Vec<String>,
    pub invalid_record_targets: Vec<String>,
    pub duplicate_names: Vec<String>,
    pub values_with_whitespace: Vec<String>,
    pub odd_length_values: Vec<String>,
    pub invalid_hex_values: Vec<String>,
}

impl RecordSetViolation {
    pub fn is_empty(&self) -> bool {
        self.categories().iter().all(|(_, names)| names.is_empty())
    }

    /// Total offending entries across all rules.
    pub fn count(&self) -> usize {
        self.categories().iter().map(|(_, names)| names.len()).sum()
    }

    fn categories(&self) -> [(&'static str, &[String]); 6] {
        [
            ("invalid field names", &self.unknown_names),
            ("invalid record targets", &self.invalid_record_targets),
            ("duplicate field names", &self.duplicate_names),
            ("field values with spaces", &self.values_with_whitespace),
            ("field values of odd length", &self.odd_length_values),
            ("field values with invalid hex", &self.invalid_hex_values),
        ]
    }
}

impl fmt::Display for RecordSetViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("record set failed validation")?;
        for (label, names) in self.categories() {
            if !names.is_empty() {
                write!(f, "; {label}: {}", names.join(", "))?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RecordSetViolation {}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldViolation {
    #[error("[{name}]: not a known field name")]
    UnknownName { name: String },
    #[error("[{name}]: record suffix must be 1..=254 on a record-structured field")]
    InvalidRecordTarget { name: String },
    #[error("[{name}]: value contains whitespace")]
    Whitespace { name: String },
    #[error("[{name}]: value has odd length {len}")]
    OddLength { name: String, len: usize },
    #[error("[{name}]: value is not valid hex")]
    InvalidHex { name: String },
}

/// Splits `NAME` / `NAME.N` and checks both halves against the registry.
pub fn record_target<'r>(
    registry: &'r FieldRegistry,
    name: &str,
) -> Result<(&'r RegistryEntry, Option<RecordNumber>), FieldViolation> {
    let (base, suffix) = split_record_target(name);
    let Some(entry) = registry.get(base) else {
        return Err(FieldViolation::UnknownName {
            name: name.to_string(),
        });
    };
    let Some(suffix) = suffix else {
        return Ok((entry, None));
    };
    let invalid = || FieldViolation::InvalidRecordTarget {
        name: name.to_string(),
    };
    if !entry.is_record_structured || !suffix.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let n: usize = suffix.parse().map_err(|_| invalid())?;
    let record = RecordNumber::new(n).map_err(|_| invalid())?;
    Ok((entry, Some(record)))
}

pub fn is_hex_value(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Fails fast on the first broken rule for a single field.
pub fn validate_field(
    registry: &FieldRegistry,
    name: &str,
    value: &str,
) -> Result<(), FieldViolation> {
    record_target(registry, name)?;
    if value.chars().any(char::is_whitespace) {
        return Err(FieldViolation::Whitespace {
            name: name.to_string(),
        });
    }
    if value.len() % 2 != 0 {
        return Err(FieldViolation::OddLength {
            name: name.to_string(),
            len: value.len(),
        });
    }
    if !is_hex_value(value) {
        return Err(FieldViolation::InvalidHex {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Runs every rule over the whole set. `Ok` only if no rule fails.
pub fn validate_record_set(
    registry: &FieldRegistry,
    set: &RecordSet,
) -> Result<(), RecordSetViolation> {
    let mut violation = RecordSetViolation::default();
    let mut seen = BTreeSet::new();
    let mut reported_duplicates = BTreeSet::new();

    for record in set {
        let name = record.name.as_str();
        match record_target(registry, name) {
            Ok(_) => {}
            Err(FieldViolation::InvalidRecordTarget { name }) => {
                violation.invalid_record_targets.push(name)
            }
            Err(_) => violation.unknown_names.push(name.to_string()),
        }
        if !seen.insert(name) && reported_duplicates.insert(name) {
            violation.duplicate_names.push(name.to_string());
        }

        let value = record.value.as_str();
        if value.chars().any(char::is_whitespace) {
            violation.values_with_whitespace.push(name.to_string());
        }
        if value.len() % 2 != 0 {
            violation.odd_length_values.push(name.to_string());
        }
        if !is_hex_value(value) {
            violation.invalid_hex_values.push(name.to_string());
        }
    }

    if violation.is_empty() {
        debug!(fields = set.len(), "record set validated");
        Ok(())
    } else {
        Err(violation)
    }
}
