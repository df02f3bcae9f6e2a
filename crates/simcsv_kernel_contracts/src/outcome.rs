#![forbid(unsafe_code)]

use crate::field::FieldName;
use crate::{ContractViolation, SchemaVersion, Validate};

pub const WRITE_OUTCOME_VERSION: SchemaVersion = SchemaVersion(1);

pub const REPORT_COLUMNS: [&str; 4] = ["FieldName", "FieldValue", "ValueOnCard", "Differences"];
pub const DIFFERENCE_MARKER: &str = "X";

/// Per-field state machine. No field moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldPhase {
    Resolved,
    ReadBefore,
    Skipped,
    Written,
    ReadAfter,
    Verified,
    Reported,
}

impl FieldPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldPhase::Resolved => "RESOLVED",
            FieldPhase::ReadBefore => "READ_BEFORE",
            FieldPhase::Skipped => "SKIPPED",
            FieldPhase::Written => "WRITTEN",
            FieldPhase::ReadAfter => "READ_AFTER",
            FieldPhase::Verified => "VERIFIED",
            FieldPhase::Reported => "REPORTED",
        }
    }
}

/// Audit result for one field in one card session. Values are lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub schema_version: SchemaVersion,
    pub name: FieldName,
    pub value_before: String,
    pub value_after: String,
    /// The card value differed from the requested value before processing.
    pub differs: bool,
    /// A write was issued and verified.
    pub written: bool,
}

impl WriteOutcome {
    pub fn v1(
        name: FieldName,
        value_before: String,
        value_after: String,
        differs: bool,
        written: bool,
    ) -> Result<Self, ContractViolation> {
        let o = Self {
            schema_version: WRITE_OUTCOME_VERSION,
            name,
            value_before,
            value_after,
            differs,
            written,
        };
        o.validate()?;
        Ok(o)
    }
}

impl Validate for WriteOutcome {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != WRITE_OUTCOME_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "write_outcome.schema_version",
                reason: "must match WRITE_OUTCOME_VERSION",
            });
        }
        self.name.validate()?;
        for v in [&self.value_before, &self.value_after] {
            if v.len() % 2 != 0 || !v.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
                return Err(ContractViolation::InvalidValue {
                    field: "write_outcome.value",
                    reason: "must be lowercase hex with an even number of digits",
                });
            }
        }
        if self.written && !self.differs {
            return Err(ContractViolation::InvalidValue {
                field: "write_outcome.written",
                reason: "an unchanged field is never written",
            });
        }
        Ok(())
    }
}

/// One row of the audit table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub field_name: String,
    pub field_value: String,
    /// Empty when the card value could not be read.
    pub value_on_card: String,
}

impl ReportRow {
    pub fn differs(&self) -> bool {
        !self.field_value.eq_ignore_ascii_case(&self.value_on_card)
    }

    pub fn differences(&self) -> &'static str {
        if self.differs() {
            DIFFERENCE_MARKER
        } else {
            ""
        }
    }
}
