#![forbid(unsafe_code)]

use simcsv_kernel_contracts::card::{AppContext, CardIoError, ObjectId, StatusWord};
use simcsv_kernel_contracts::outcome::FieldPhase;
use simcsv_kernel_contracts::ReasonCodeId;
use thiserror::Error;

pub mod reason_codes {
    use simcsv_kernel_contracts::ReasonCodeId;

    // Field engine reason-code namespace ("FE").
    pub const FE_FAIL_UNKNOWN_FIELD: ReasonCodeId = ReasonCodeId(0x4645_00F1);
    pub const FE_FAIL_CONTEXT: ReasonCodeId = ReasonCodeId(0x4645_00F2);
    pub const FE_FAIL_WIDTH_MISMATCH: ReasonCodeId = ReasonCodeId(0x4645_00F3);
    pub const FE_FAIL_READ: ReasonCodeId = ReasonCodeId(0x4645_00F4);
    pub const FE_FAIL_WRITE: ReasonCodeId = ReasonCodeId(0x4645_00F5);
    pub const FE_FAIL_VERIFY: ReasonCodeId = ReasonCodeId(0x4645_00F6);
    pub const FE_FAIL_INPUT_CONTRACT: ReasonCodeId = ReasonCodeId(0x4645_00F7);

    // Credential reason codes ("CR").
    pub const CR_FAIL_FORMAT: ReasonCodeId = ReasonCodeId(0x4352_00F1);
    pub const CR_FAIL_REJECTED: ReasonCodeId = ReasonCodeId(0x4352_00F2);
    pub const CR_FAIL_TRANSPORT: ReasonCodeId = ReasonCodeId(0x4352_00F3);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Error,
    /// Silent data corruption; reported even when warnings are suppressed.
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("card does not expose the {context} application")]
    Unsupported { context: AppContext },
    #[error("select {context} application failed: {source}")]
    SelectFailed {
        context: AppContext,
        #[source]
        source: CardIoError,
    },
    #[error("select {context} application returned status {status}")]
    SelectStatus {
        context: AppContext,
        status: StatusWord,
    },
    #[error("{context} file {object} does not exist on card")]
    ObjectAbsent { context: AppContext, object: ObjectId },
}

/// Fatal, per-field failure. Every variant names the field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("[{field}]: unknown field name")]
    UnknownField { field: String },
    #[error("[{field}]: {source}")]
    Context {
        field: String,
        #[source]
        source: ContextError,
    },
    #[error("[{field}]: value is {value_bytes} bytes but the card reports a width of {width_bytes} bytes")]
    WidthMismatch {
        field: String,
        value_bytes: usize,
        width_bytes: usize,
    },
    #[error("[{field}]: read failed: {detail}")]
    Read { field: String, detail: String },
    #[error("[{field}]: write failed: {detail}")]
    Write { field: String, detail: String },
    #[error("[{field}]: verification failed: requested '{expected}' but card holds '{actual}' after writing")]
    Verify {
        field: String,
        expected: String,
        actual: String,
    },
    #[error("[{field}]: {reason}")]
    InputContract { field: String, reason: String },
}

impl FieldError {
    pub fn field(&self) -> &str {
        match self {
            FieldError::UnknownField { field }
            | FieldError::Context { field, .. }
            | FieldError::WidthMismatch { field, .. }
            | FieldError::Read { field, .. }
            | FieldError::Write { field, .. }
            | FieldError::Verify { field, .. }
            | FieldError::InputContract { field, .. } => field,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            FieldError::Verify { .. } => Severity::Critical,
            _ => Severity::Error,
        }
    }

    pub fn reason_code(&self) -> ReasonCodeId {
        match self {
            FieldError::UnknownField { .. } => reason_codes::FE_FAIL_UNKNOWN_FIELD,
            FieldError::Context { .. } => reason_codes::FE_FAIL_CONTEXT,
            FieldError::WidthMismatch { .. } => reason_codes::FE_FAIL_WIDTH_MISMATCH,
            FieldError::Read { .. } => reason_codes::FE_FAIL_READ,
            FieldError::Write { .. } => reason_codes::FE_FAIL_WRITE,
            FieldError::Verify { .. } => reason_codes::FE_FAIL_VERIFY,
            FieldError::InputContract { .. } => reason_codes::FE_FAIL_INPUT_CONTRACT,
        }
    }
}

/// A field error plus whatever the engine learned before it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFailure {
    pub error: FieldError,
    /// Phase in which the field failed.
    pub phase: FieldPhase,
    /// Card value read before the failure, lowercase hex.
    pub value_before: Option<String>,
}

impl FieldFailure {
    pub fn at(phase: FieldPhase, error: FieldError) -> Self {
        Self {
            error,
            phase,
            value_before: None,
        }
    }

    pub fn with_value_before(mut self, value_before: String) -> Self {
        self.value_before = Some(value_before);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("invalid ADM PIN format: {reason}")]
    InvalidFormat { reason: &'static str },
    #[error("entered invalid ADM PIN (status {status})")]
    Rejected { status: StatusWord },
    #[error("submitting ADM PIN failed: {0}")]
    Transport(#[from] CardIoError),
}

impl CredentialError {
    pub fn reason_code(&self) -> ReasonCodeId {
        match self {
            CredentialError::InvalidFormat { .. } => reason_codes::CR_FAIL_FORMAT,
            CredentialError::Rejected { .. } => reason_codes::CR_FAIL_REJECTED,
            CredentialError::Transport(_) => reason_codes::CR_FAIL_TRANSPORT,
        }
    }
}
