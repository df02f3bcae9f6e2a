#![forbid(unsafe_code)]

use simcsv_kernel_contracts::card::{CardCommands, RecordNumber, StorageObject};
use simcsv_kernel_contracts::field::FieldRecord;
use simcsv_kernel_contracts::outcome::{FieldPhase, WriteOutcome};
use tracing::{error, info, warn};

use crate::diff::{difference_report, truncate_for_display, DifferenceReport};
use crate::error::{FieldError, FieldFailure};
use crate::registry::FieldRegistry;
use crate::resolver::{enter_context, resolve, FieldTarget};
use crate::width::query_width;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldEngineConfig {
    /// Hex characters shown in log lines and difference carets.
    pub display_limit: usize,
    pub report_differences: bool,
}

impl FieldEngineConfig {
    pub fn mvp_v1() -> Self {
        Self {
            display_limit: 50,
            report_differences: false,
        }
    }
}

/// One field carried through `Resolved -> ReadBefore -> {Skipped | Written ->
/// ReadAfter -> Verified} -> Reported`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedField {
    pub outcome: WriteOutcome,
    pub differences: Option<DifferenceReport>,
    pub phase: FieldPhase,
}

#[derive(Debug, Clone)]
pub struct FieldEngine<'r> {
    config: FieldEngineConfig,
    registry: &'r FieldRegistry,
}

impl<'r> FieldEngine<'r> {
    pub fn new(config: FieldEngineConfig, registry: &'r FieldRegistry) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &FieldEngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &'r FieldRegistry {
        self.registry
    }

    /// Reads the field's current card value as lowercase hex.
    pub fn read_field<C: CardCommands + ?Sized>(
        &self,
        card: &mut C,
        name: &str,
    ) -> Result<String, FieldError> {
        let target = resolve(self.registry, name)?;
        enter_context(card, name, &target.object)?;
        read_target(card, name, &target).map(hex::encode)
    }

    /// Runs one field through read, optional write and read-back verification.
    pub fn process_field<C: CardCommands + ?Sized>(
        &self,
        card: &mut C,
        record: &FieldRecord,
        dry_run: bool,
    ) -> Result<ProcessedField, FieldFailure> {
        let name = record.name.as_str();
        let requested = record.value.to_ascii_lowercase();
        let at = FieldFailure::at;

        let target = resolve(self.registry, name).map_err(|e| at(FieldPhase::Resolved, e))?;
        enter_context(card, name, &target.object).map_err(|e| at(FieldPhase::Resolved, e))?;
        let requested_bytes = hex::decode(&requested).map_err(|e| {
            at(
                FieldPhase::Resolved,
                FieldError::InputContract {
                    field: name.to_string(),
                    reason: format!("value is not hex: {e}"),
                },
            )
        })?;

        let before_bytes =
            read_target(card, name, &target).map_err(|e| at(FieldPhase::ReadBefore, e))?;
        let before = hex::encode(before_bytes);
        let differs = before != requested;
        info!(
            field = name,
            value = %truncate_for_display(&requested, self.config.display_limit),
            on_card = %truncate_for_display(&before, self.config.display_limit),
            differs,
            "field read"
        );

        let differences = (differs && self.config.report_differences).then(|| {
            let report = difference_report(&before, &requested, self.config.display_limit);
            info!(
                field = name,
                indices = ?report.indices,
                "Differences\n{}\n{}\n{}",
                truncate_for_display(&before, self.config.display_limit),
                truncate_for_display(&requested, self.config.display_limit),
                report.caret_line
            );
            report
        });

        let fail_with_before =
            |phase, e| FieldFailure::at(phase, e).with_value_before(before.clone());
        let outcome = |after: String, written: bool| {
            WriteOutcome::v1(record.name.clone(), before.clone(), after, differs, written)
                .map_err(|v| {
                    fail_with_before(
                        FieldPhase::Reported,
                        FieldError::InputContract {
                            field: name.to_string(),
                            reason: v.to_string(),
                        },
                    )
                })
        };

        if !differs {
            info!(field = name, "value unchanged, skipping write");
            return Ok(ProcessedField {
                outcome: outcome(before.clone(), false)?,
                differences,
                phase: FieldPhase::Reported,
            });
        }
        if dry_run {
            info!(field = name, "dry run, not writing");
            return Ok(ProcessedField {
                outcome: outcome(before.clone(), false)?,
                differences,
                phase: FieldPhase::Reported,
            });
        }

        write_target(card, name, &target, &requested_bytes)
            .map_err(|e| fail_with_before(FieldPhase::Written, e))?;
        let after_bytes =
            read_target(card, name, &target).map_err(|e| fail_with_before(FieldPhase::ReadAfter, e))?;
        let after = hex::encode(after_bytes);
        if after != requested {
            let err = FieldError::Verify {
                field: name.to_string(),
                expected: requested.clone(),
                actual: after.clone(),
            };
            error!(field = name, error = %err, "field verification failed");
            return Err(fail_with_before(FieldPhase::Verified, err));
        }
        info!(field = name, "field written and verified");
        Ok(ProcessedField {
            outcome: outcome(after, true)?,
            differences,
            phase: FieldPhase::Reported,
        })
    }
}

fn read_failure(name: &str, detail: impl Into<String>) -> FieldError {
    FieldError::Read {
        field: name.to_string(),
        detail: detail.into(),
    }
}

fn write_failure(name: &str, detail: impl Into<String>) -> FieldError {
    FieldError::Write {
        field: name.to_string(),
        detail: detail.into(),
    }
}

fn record_number(name: &str, n: usize) -> Result<RecordNumber, FieldError> {
    RecordNumber::new(n).map_err(|v| FieldError::InputContract {
        field: name.to_string(),
        reason: v.to_string(),
    })
}

fn read_record<C: CardCommands + ?Sized>(
    card: &mut C,
    name: &str,
    object: &StorageObject,
    record: RecordNumber,
) -> Result<Vec<u8>, FieldError> {
    let resp = card
        .read_record(&object.identifier, record)
        .map_err(|e| read_failure(name, e.to_string()))?;
    if !resp.status.is_ok() {
        return Err(read_failure(
            name,
            format!("record {record} returned status {}", resp.status),
        ));
    }
    Ok(resp.data)
}

/// Records 1..=n concatenated for record-structured objects, one binary read otherwise.
fn read_target<C: CardCommands + ?Sized>(
    card: &mut C,
    name: &str,
    target: &FieldTarget,
) -> Result<Vec<u8>, FieldError> {
    let object = &target.object;
    if let Some(record) = target.record {
        return read_record(card, name, object, record);
    }
    if !object.is_record_structured {
        let resp = card
            .read_binary(&object.identifier)
            .map_err(|e| read_failure(name, e.to_string()))?;
        if !resp.status.is_ok() {
            return Err(read_failure(name, format!("returned status {}", resp.status)));
        }
        return Ok(resp.data);
    }

    let count = card
        .record_count(&object.identifier)
        .map_err(|e| read_failure(name, e.to_string()))?;
    let mut data = Vec::new();
    for n in 1..=count {
        data.extend(read_record(card, name, object, record_number(name, n)?)?);
    }
    Ok(data)
}

fn write_target<C: CardCommands + ?Sized>(
    card: &mut C,
    name: &str,
    target: &FieldTarget,
    data: &[u8],
) -> Result<(), FieldError> {
    let object = &target.object;
    if !object.is_record_structured {
        let status = card
            .update_binary(&object.identifier, data)
            .map_err(|e| write_failure(name, e.to_string()))?;
        if !status.is_ok() {
            return Err(write_failure(name, format!("returned status {status}")));
        }
        return Ok(());
    }

    let spec = query_width(card, target).map_err(|e| write_failure(name, e.to_string()))?;
    let record_width = spec.record_width();
    if let Some(record) = target.record {
        if data.len() != record_width {
            return Err(FieldError::InputContract {
                field: name.to_string(),
                reason: format!(
                    "record {record} takes exactly {record_width} bytes, value has {}",
                    data.len()
                ),
            });
        }
        return write_record(card, name, object, record, data);
    }
    if data.len() != spec.total_bytes || record_width == 0 {
        return Err(FieldError::InputContract {
            field: name.to_string(),
            reason: format!(
                "value has {} bytes, object holds {} records of {record_width} bytes",
                data.len(),
                spec.record_count
            ),
        });
    }
    for (i, chunk) in data.chunks(record_width).enumerate() {
        write_record(card, name, object, record_number(name, i + 1)?, chunk)?;
    }
    Ok(())
}

fn write_record<C: CardCommands + ?Sized>(
    card: &mut C,
    name: &str,
    object: &StorageObject,
    record: RecordNumber,
    data: &[u8],
) -> Result<(), FieldError> {
    let status = card
        .update_record(&object.identifier, record, data)
        .map_err(|e| write_failure(name, e.to_string()))?;
    if !status.is_ok() {
        warn!(field = name, record = record.get(), status = %status, "record update refused");
        return Err(write_failure(
            name,
            format!("record {record} returned status {status}"),
        ));
    }
    Ok(())
}
