#![forbid(unsafe_code)]

use simcsv_kernel_contracts::card::{CardCommands, CardIoError, WidthSpec};
use simcsv_kernel_contracts::field::FieldRecord;
use tracing::{debug, warn};

use crate::error::FieldError;
use crate::registry::FieldRegistry;
use crate::resolver::{enter_context, resolve, FieldTarget};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidthCheck {
    Matched(WidthSpec),
    /// The card could not report a width. Not an error; the field still runs.
    Inconclusive { reason: String },
}

impl WidthCheck {
    pub fn is_inconclusive(&self) -> bool {
        matches!(self, WidthCheck::Inconclusive { .. })
    }
}

/// Live width of the target object. Never cached across sessions.
pub fn query_width<C: CardCommands + ?Sized>(
    card: &mut C,
    target: &FieldTarget,
) -> Result<WidthSpec, CardIoError> {
    let id = &target.object.identifier;
    let total = card.binary_width(id)?;
    if !target.object.is_record_structured {
        return Ok(WidthSpec::flat(total));
    }
    let count = card.record_count(id)?;
    WidthSpec::records(total, count).map_err(|v| CardIoError::new(v.to_string()))
}

/// Checks that the record's value exactly fills the storage it targets.
pub fn verify_width<C: CardCommands + ?Sized>(
    card: &mut C,
    registry: &FieldRegistry,
    record: &FieldRecord,
) -> Result<WidthCheck, FieldError> {
    let name = record.name.as_str();
    let target = resolve(registry, name)?;
    enter_context(card, name, &target.object)?;

    let spec = match query_width(card, &target) {
        Ok(spec) => spec,
        Err(e) => {
            warn!(field = name, error = %e, "unable to verify field width");
            return Ok(WidthCheck::Inconclusive {
                reason: e.to_string(),
            });
        }
    };

    let width_bytes = match target.record {
        Some(n) if n.get() > spec.record_count => {
            return Err(FieldError::InputContract {
                field: name.to_string(),
                reason: format!(
                    "record {n} is out of range, object has {} records",
                    spec.record_count
                ),
            });
        }
        Some(_) => spec.record_width(),
        None => spec.total_bytes,
    };
    let value_bytes = record.value.len() / 2;
    if value_bytes != width_bytes {
        return Err(FieldError::WidthMismatch {
            field: name.to_string(),
            value_bytes,
            width_bytes,
        });
    }
    debug!(field = name, width_bytes, "field width verified");
    Ok(WidthCheck::Matched(spec))
}
