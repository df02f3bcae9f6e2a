#![forbid(unsafe_code)]

//! One provisioning pass over one inserted card.

use simcsv_engines::error::{FieldError, FieldFailure};
use simcsv_engines::field_engine::{FieldEngine, FieldEngineConfig, ProcessedField};
use simcsv_engines::identity::read_card_identity;
use simcsv_engines::pin::authenticate;
use simcsv_engines::registry::FieldRegistry;
use simcsv_engines::validator::{validate_record_set, RecordSetViolation};
use simcsv_engines::width::{verify_width, WidthCheck};
use simcsv_engines::CredentialError;
use simcsv_kernel_contracts::card::CardCommands;
use simcsv_kernel_contracts::field::{FieldName, RecordSet};
use simcsv_kernel_contracts::identity::CardIdentity;
use simcsv_kernel_contracts::outcome::{FieldPhase, ReportRow, WriteOutcome};
use simcsv_kernel_contracts::ReasonCodeId;
use simcsv_storage::tabular::{record_set_digest, TabularError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::credential::{PinSource, PinSourceError};
use crate::filter::{apply_filter, FilterCommand, FilterError};

pub mod reason_codes {
    use simcsv_kernel_contracts::ReasonCodeId;

    pub const PV_FAIL_VALIDATION: ReasonCodeId = ReasonCodeId(0x5056_00F1);
    pub const PV_FAIL_FILTER: ReasonCodeId = ReasonCodeId(0x5056_00F2);
    pub const PV_FAIL_DIGEST: ReasonCodeId = ReasonCodeId(0x5056_00F3);
    pub const PV_FAIL_PREFLIGHT: ReasonCodeId = ReasonCodeId(0x5056_00F4);
    pub const PV_FAIL_MISSING_PIN: ReasonCodeId = ReasonCodeId(0x5056_00F5);
    pub const PV_FAIL_PIN_SOURCE: ReasonCodeId = ReasonCodeId(0x5056_00F6);
    pub const PV_FAIL_CREDENTIAL: ReasonCodeId = ReasonCodeId(0x5056_00F7);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldErrorPolicy {
    /// Record the failure and move on to the next field.
    Continue,
    /// Stop the pass at the first failing field.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionConfig {
    pub dry_run: bool,
    pub field_error_policy: FieldErrorPolicy,
    pub engine: FieldEngineConfig,
}

impl ProvisionConfig {
    pub fn mvp_v1(dry_run: bool) -> Self {
        Self {
            dry_run,
            field_error_policy: FieldErrorPolicy::Abort,
            engine: FieldEngineConfig::mvp_v1(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PassInput {
    pub record_set: RecordSet,
    pub filter: Option<FilterCommand>,
    /// Required unless the pass is a dry run.
    pub pin: Option<PinSource>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub field: FieldName,
}

/// Aborts the pass before any field is mutated.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{0}")]
    Validation(RecordSetViolation),
    #[error("filter failed: {0}")]
    Filter(#[from] FilterError),
    #[error("unable to digest record set: {0}")]
    Tabular(#[from] TabularError),
    #[error("{} field(s) failed the pre-write check: {}", .0.len(), join_errors(.0))]
    Preflight(Vec<FieldError>),
    #[error("writing requires an ADM PIN")]
    MissingPin,
    #[error("unable to resolve ADM PIN: {0}")]
    PinSource(#[from] PinSourceError),
    #[error("{0}")]
    Credential(#[from] CredentialError),
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ProvisionError {
    pub fn reason_code(&self) -> ReasonCodeId {
        match self {
            ProvisionError::Validation(_) => reason_codes::PV_FAIL_VALIDATION,
            ProvisionError::Filter(_) => reason_codes::PV_FAIL_FILTER,
            ProvisionError::Tabular(_) => reason_codes::PV_FAIL_DIGEST,
            ProvisionError::Preflight(_) => reason_codes::PV_FAIL_PREFLIGHT,
            ProvisionError::MissingPin => reason_codes::PV_FAIL_MISSING_PIN,
            ProvisionError::PinSource(_) => reason_codes::PV_FAIL_PIN_SOURCE,
            ProvisionError::Credential(_) => reason_codes::PV_FAIL_CREDENTIAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub dry_run: bool,
    /// SHA-256 of the record set actually programmed (after filtering).
    pub digest: String,
    pub identity: CardIdentity,
    pub outcomes: Vec<ProcessedField>,
    pub failures: Vec<FieldFailure>,
    /// Fields whose width the card could not report.
    pub inconclusive_widths: Vec<FieldName>,
    /// Set when `FieldErrorPolicy::Abort` stopped the pass at this field.
    pub aborted_at: Option<FieldName>,
    pub rows: Vec<ReportRow>,
}

impl PassReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.aborted_at.is_none()
    }

    pub fn written_count(&self) -> usize {
        self.outcomes.iter().filter(|p| p.outcome.written).count()
    }
}

/// A pass that cleared `ProvisionRuntime::prepare` and has not yet touched
/// the card.
#[derive(Debug, Clone)]
pub struct PreparedPass {
    set: RecordSet,
    digest: String,
    identity: CardIdentity,
    preflight_failures: Vec<FieldFailure>,
    inconclusive_widths: Vec<FieldName>,
    pin: Option<PinSource>,
}

impl PreparedPass {
    /// The record set after filtering.
    pub fn record_set(&self) -> &RecordSet {
        &self.set
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn identity(&self) -> &CardIdentity {
        &self.identity
    }

    /// Only ever non-empty under `FieldErrorPolicy::Continue`.
    pub fn preflight_failures(&self) -> &[FieldFailure] {
        &self.preflight_failures
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionRuntime<'r> {
    config: ProvisionConfig,
    registry: &'r FieldRegistry,
}

impl<'r> ProvisionRuntime<'r> {
    pub fn new(config: ProvisionConfig, registry: &'r FieldRegistry) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    pub fn run<C: CardCommands + ?Sized>(
        &self,
        card: &mut C,
        input: &PassInput,
    ) -> Result<PassReport, ProvisionError> {
        self.run_with_progress(card, input, |_| {})
    }

    /// Runs the whole pass. `on_progress` fires once per field, after it
    /// completes or fails.
    pub fn run_with_progress<C, F>(
        &self,
        card: &mut C,
        input: &PassInput,
        on_progress: F,
    ) -> Result<PassReport, ProvisionError>
    where
        C: CardCommands + ?Sized,
        F: FnMut(&Progress),
    {
        let prepared = self.prepare(card, input)?;
        self.execute(card, prepared, on_progress)
    }

    /// Everything that happens before the card is authenticated: record set
    /// validation, filtering, identity and the width check of every field.
    /// Nothing here mutates the card, so an operator can still back out.
    pub fn prepare<C: CardCommands + ?Sized>(
        &self,
        card: &mut C,
        input: &PassInput,
    ) -> Result<PreparedPass, ProvisionError> {
        validate_record_set(self.registry, &input.record_set).map_err(|v| {
            error!(violations = v.count(), "record set rejected");
            ProvisionError::Validation(v)
        })?;

        let set = match &input.filter {
            Some(cmd) => apply_filter(self.registry, &input.record_set, cmd)?,
            None => input.record_set.clone(),
        };

        let digest = record_set_digest(&set)?;
        info!(digest = %digest, fields = set.len(), dry_run = self.config.dry_run, "starting provisioning pass");

        let identity = read_card_identity(card, self.registry);

        let mut preflight = Vec::new();
        let mut inconclusive_widths = Vec::new();
        for record in &set {
            match verify_width(card, self.registry, record) {
                Ok(WidthCheck::Matched(_)) => {}
                Ok(WidthCheck::Inconclusive { .. }) => inconclusive_widths.push(record.name.clone()),
                Err(e) => {
                    error!(field = %record.name, error = %e, "pre-write check failed");
                    preflight.push(e);
                }
            }
        }
        if !preflight.is_empty() && self.config.field_error_policy == FieldErrorPolicy::Abort {
            return Err(ProvisionError::Preflight(preflight));
        }

        Ok(PreparedPass {
            set,
            digest,
            identity,
            preflight_failures: preflight
                .into_iter()
                .map(|e| FieldFailure::at(FieldPhase::Resolved, e))
                .collect(),
            inconclusive_widths,
            pin: input.pin.clone(),
        })
    }

    /// Authenticates (unless dry run) and processes every field that passed
    /// `prepare`. Fields that failed there are reported, never touched.
    pub fn execute<C, F>(
        &self,
        card: &mut C,
        prepared: PreparedPass,
        mut on_progress: F,
    ) -> Result<PassReport, ProvisionError>
    where
        C: CardCommands + ?Sized,
        F: FnMut(&Progress),
    {
        let dry_run = self.config.dry_run;
        let PreparedPass {
            set,
            digest,
            identity,
            preflight_failures,
            inconclusive_widths,
            pin,
        } = prepared;

        if !dry_run {
            let source = pin.as_ref().ok_or(ProvisionError::MissingPin)?;
            let pin = source.resolve(&identity)?;
            authenticate(card, &pin)?;
        }

        let engine = FieldEngine::new(self.config.engine, self.registry);
        let total = set.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut failures = preflight_failures;
        let mut aborted_at = None;
        for (i, record) in set.iter().enumerate() {
            let excluded = failures
                .iter()
                .any(|f| f.error.field() == record.name.as_str());
            if excluded {
                debug!(field = %record.name, "skipped after failed pre-write check");
            } else {
                match engine.process_field(card, record, dry_run) {
                    Ok(done) => outcomes.push(done),
                    Err(failure) => {
                        error!(
                            field = %record.name,
                            phase = failure.phase.as_str(),
                            reason_code = %failure.error.reason_code(),
                            error = %failure.error,
                            "field failed"
                        );
                        failures.push(failure);
                        if self.config.field_error_policy == FieldErrorPolicy::Abort {
                            aborted_at = Some(record.name.clone());
                        }
                    }
                }
            }
            on_progress(&Progress {
                completed: i + 1,
                total,
                field: record.name.clone(),
            });
            if aborted_at.is_some() {
                warn!(remaining = total - i - 1, "pass aborted");
                break;
            }
        }

        let rows = report_rows(&set, &outcomes, &failures);
        let report = PassReport {
            dry_run,
            digest,
            identity,
            outcomes,
            failures,
            inconclusive_widths,
            aborted_at,
            rows,
        };
        info!(
            written = report.written_count(),
            failed = report.failures.len(),
            success = report.is_success(),
            "provisioning pass finished"
        );
        Ok(report)
    }
}

/// One row per requested field. `ValueOnCard` is the verified value after a
/// write, the value read before a failure, or empty when nothing was read.
fn report_rows(set: &RecordSet, outcomes: &[ProcessedField], failures: &[FieldFailure]) -> Vec<ReportRow> {
    set.iter()
        .map(|record| {
            let on_card = outcomes
                .iter()
                .map(|p| &p.outcome)
                .find(|o| o.name == record.name)
                .map(|o: &WriteOutcome| o.value_after.clone())
                .or_else(|| {
                    failures
                        .iter()
                        .find(|f| f.error.field() == record.name.as_str())
                        .and_then(|f| f.value_before.clone())
                })
                .unwrap_or_default();
            ReportRow {
                field_name: record.name.to_string(),
                field_value: record.value.clone(),
                value_on_card: on_card,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use simcsv_kernel_contracts::card::AppContext;
    use simcsv_storage::card_image::{CardCommand, CardImage, SimulatedCard};
    use std::collections::BTreeMap;

    const IMAGE: &str = r#"{
        "schema_version": 1,
        "capabilities": { "supports_context_a": true, "supports_context_b": true },
        "adm_pin": "3132333435363738",
        "objects": [
            { "id": "3F002FE2", "content": "981062103254769810f2" },
            { "id": "3F007F206F07", "content": "080910101032547698" },
            { "id": "3F007F206F46", "content": "54455354" },
            { "id": "3F007F206F3E", "content": "ffff" },
            { "id": "3F007F206F3F", "content": "0000", "faults": { "corrupt_writes": true } },
            { "id": "6F04", "context": "isim", "records": ["1111", "2222", "3333"] },
            { "id": "6F02", "context": "isim", "content": "00", "faults": { "width_fails": true } }
        ]
    }"#;

    fn card() -> SimulatedCard {
        SimulatedCard::from_image(&CardImage::from_json(IMAGE).unwrap()).unwrap()
    }

    fn input(pairs: &[(&str, &str)], pin: Option<&str>) -> PassInput {
        PassInput {
            record_set: RecordSet::from_pairs(pairs.iter().copied()).unwrap(),
            filter: None,
            pin: pin.map(|p| PinSource::Direct(p.to_string())),
        }
    }

    fn runtime(dry_run: bool) -> ProvisionRuntime<'static> {
        ProvisionRuntime::new(ProvisionConfig::mvp_v1(dry_run), FieldRegistry::standard())
    }

    #[test]
    fn at_provision_01_dry_run_reports_without_writing() {
        let mut c = card();
        let report = runtime(true)
            .run(&mut c, &input(&[("SPN", "54455324"), ("GID1", "ffff")], None))
            .unwrap();
        assert!(report.is_success());
        assert_eq!(c.update_count(), 0);
        assert!(!c.command_log().iter().any(|cmd| matches!(cmd, CardCommand::Verify(_))));
        assert_eq!(report.rows[0].value_on_card, "54455354");
        assert_eq!(report.rows[0].differences(), "X");
        assert_eq!(report.rows[1].differences(), "");
        assert_eq!(
            report.identity.imsi.as_ref().map(|i| i.as_str()),
            Some("001010123456789")
        );
        assert_eq!(
            report.identity.iccid.as_ref().map(|i| i.as_str()),
            Some("8901260123456789012")
        );
    }

    #[test]
    fn at_provision_02_write_pass_skips_unchanged_fields() {
        let mut c = card();
        let report = runtime(false)
            .run(
                &mut c,
                &input(&[("SPN", "54455324"), ("GID1", "ffff")], Some("12345678")),
            )
            .unwrap();
        assert!(report.is_success());
        assert_eq!(report.written_count(), 1);
        assert_eq!(c.update_count(), 1);
        assert_eq!(c.peek(None, "3F007F206F46").unwrap(), hex::decode("54455324").unwrap());
        assert!(report.rows.iter().all(|r| r.differences().is_empty()));
    }

    #[test]
    fn at_provision_03_width_mismatch_aborts_before_any_write() {
        let mut c = card();
        let err = runtime(false)
            .run(
                &mut c,
                &input(&[("GID1", "0000"), ("SPN", "5445")], Some("12345678")),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Preflight(ref errs)
                if matches!(errs[..], [FieldError::WidthMismatch { value_bytes: 2, width_bytes: 4, .. }])
        ));
        assert_eq!(c.update_count(), 0);
        assert!(!c.command_log().iter().any(|cmd| matches!(cmd, CardCommand::Verify(_))));
    }

    #[test]
    fn at_provision_04_rejected_pin_stops_pass_without_mutation() {
        let mut c = card();
        let err = runtime(false)
            .run(&mut c, &input(&[("SPN", "54455324")], Some("0x3132333435363739")))
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Credential(CredentialError::Rejected { .. })
        ));
        assert_eq!(c.update_count(), 0);

        let mut c = card();
        let err = runtime(false)
            .run(&mut c, &input(&[("SPN", "54455324")], None))
            .unwrap_err();
        assert!(matches!(err, ProvisionError::MissingPin));
    }

    #[test]
    fn at_provision_05_field_error_policy_decides_continuation() {
        let pairs = [("GID2", "1234"), ("SPN", "54455324")];

        let mut c = card();
        let report = runtime(false)
            .run(&mut c, &input(&pairs, Some("12345678")))
            .unwrap();
        assert_eq!(report.aborted_at.as_ref().map(|n| n.as_str()), Some("GID2"));
        assert!(matches!(report.failures[0].error, FieldError::Verify { .. }));
        assert!(report.outcomes.is_empty());
        assert_eq!(report.rows[0].value_on_card, "0000");
        assert_eq!(report.rows[1].value_on_card, "");

        let mut config = ProvisionConfig::mvp_v1(false);
        config.field_error_policy = FieldErrorPolicy::Continue;
        let mut c = card();
        let report = ProvisionRuntime::new(config, FieldRegistry::standard())
            .run(&mut c, &input(&pairs, Some("12345678")))
            .unwrap();
        assert!(!report.is_success());
        assert!(report.aborted_at.is_none());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.written_count(), 1);
    }

    #[test]
    fn at_provision_06_record_target_and_inconclusive_width() {
        let mut c = card();
        let mut seen = Vec::new();
        let report = runtime(false)
            .run_with_progress(
                &mut c,
                &input(&[("IMPU.2", "abcd"), ("IMPI", "01")], Some("12345678")),
                |p| seen.push((p.completed, p.total, p.field.to_string())),
            )
            .unwrap();
        assert!(report.is_success());
        assert_eq!(
            report.inconclusive_widths.iter().map(|n| n.as_str()).collect::<Vec<_>>(),
            ["IMPI"]
        );
        assert_eq!(
            c.peek(Some(AppContext::Isim), "6F04").unwrap(),
            hex::decode("1111abcd3333").unwrap()
        );
        assert_eq!(
            seen,
            vec![(1, 2, "IMPU.2".to_string()), (2, 2, "IMPI".to_string())]
        );
    }

    #[test]
    fn at_provision_07_pin_map_without_card_imsi_fails() {
        let mut c = card();
        let mut pass = input(&[("SPN", "54455324")], None);
        pass.pin = Some(PinSource::ImsiMap(BTreeMap::from([(
            "001010000000001".to_string(),
            "12345678".to_string(),
        )])));
        let err = runtime(false).run(&mut c, &pass).unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::PinSource(PinSourceError::ImsiNotInMap(_))
        ));
        assert_eq!(c.update_count(), 0);
    }

    #[test]
    fn at_provision_08_invalid_record_set_touches_nothing() {
        let mut c = card();
        let err = runtime(true)
            .run(&mut c, &input(&[("SPN", "544"), ("NOPE", "00")], None))
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
        assert_eq!(err.reason_code(), reason_codes::PV_FAIL_VALIDATION);
        assert!(c.command_log().is_empty());
    }

    #[test]
    fn at_provision_09_continue_policy_reports_width_failure_and_writes_the_rest() {
        let mut config = ProvisionConfig::mvp_v1(false);
        config.field_error_policy = FieldErrorPolicy::Continue;
        let mut c = card();
        let mut seen = Vec::new();
        let report = ProvisionRuntime::new(config, FieldRegistry::standard())
            .run_with_progress(
                &mut c,
                &input(&[("GID1", "00"), ("SPN", "54455324")], Some("12345678")),
                |p| seen.push(p.field.to_string()),
            )
            .unwrap();

        assert!(!report.is_success());
        assert!(report.aborted_at.is_none());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].phase, FieldPhase::Resolved);
        assert_eq!(
            report.failures[0].error,
            FieldError::WidthMismatch {
                field: "GID1".into(),
                value_bytes: 1,
                width_bytes: 2
            }
        );
        assert_eq!(report.written_count(), 1);
        assert_eq!(c.update_count(), 1);
        assert_eq!(c.peek(None, "3F007F206F3E").unwrap(), vec![0xff, 0xff]);
        assert_eq!(c.peek(None, "3F007F206F46").unwrap(), hex::decode("54455324").unwrap());
        assert_eq!(report.rows[0].value_on_card, "");
        assert_eq!(report.rows[1].value_on_card, "54455324");
        assert_eq!(seen, vec!["GID1".to_string(), "SPN".to_string()]);
    }

    #[test]
    fn at_provision_10_prepare_never_authenticates_or_writes() {
        let rt = runtime(false);
        let mut c = card();
        let prepared = rt
            .prepare(&mut c, &input(&[("SPN", "54455324")], Some("12345678")))
            .unwrap();
        assert!(prepared.preflight_failures().is_empty());
        assert_eq!(
            prepared.identity().imsi.as_ref().map(|i| i.as_str()),
            Some("001010123456789")
        );
        assert_eq!(c.update_count(), 0);
        assert!(!c.command_log().iter().any(|cmd| matches!(cmd, CardCommand::Verify(_))));

        let report = rt.execute(&mut c, prepared, |_| {}).unwrap();
        assert_eq!(report.written_count(), 1);
    }
}
