#![forbid(unsafe_code)]

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ContractViolation, Validate};

/// Two-byte card status. Rendered as four lowercase hex digits (`9000`, `6a82`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord(pub u16);

impl StatusWord {
    pub const OK: StatusWord = StatusWord(0x9000);
    pub const SECURITY_STATUS_NOT_SATISFIED: StatusWord = StatusWord(0x6982);
    pub const FILE_NOT_FOUND: StatusWord = StatusWord(0x6a82);
    pub const RECORD_NOT_FOUND: StatusWord = StatusWord(0x6a83);
    pub const WRONG_LENGTH: StatusWord = StatusWord(0x6700);
    pub const CONDITIONS_NOT_SATISFIED: StatusWord = StatusWord(0x6985);

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() != 4 {
            return None;
        }
        u16::from_str_radix(raw, 16).ok().map(StatusWord)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

/// Optional card applications. `Usim` is application-A, `Isim` is application-B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppContext {
    Usim,
    Isim,
}

impl AppContext {
    pub fn as_str(self) -> &'static str {
        match self {
            AppContext::Usim => "USIM",
            AppContext::Isim => "ISIM",
        }
    }
}

impl fmt::Display for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability tags carried by a card session instead of card-subtype checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CardCapabilities {
    pub supports_context_a: bool,
    pub supports_context_b: bool,
}

impl CardCapabilities {
    pub fn uicc_with_usim_and_isim() -> Self {
        Self {
            supports_context_a: true,
            supports_context_b: true,
        }
    }

    pub fn supports(self, context: AppContext) -> bool {
        match context {
            AppContext::Usim => self.supports_context_a,
            AppContext::Isim => self.supports_context_b,
        }
    }
}

/// File identifier or path of a storage object, upper-case hex (`6F46`, `3F007F206F07`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = Self(id.into().to_ascii_uppercase());
        id.validate()?;
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for ObjectId {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0.is_empty() || self.0.len() % 4 != 0 {
            return Err(ContractViolation::InvalidValue {
                field: "object_id",
                reason: "must be a non-empty sequence of 2-byte file identifiers",
            });
        }
        if self.0.len() > 32 {
            return Err(ContractViolation::InvalidValue {
                field: "object_id",
                reason: "must be <= 32 hex chars",
            });
        }
        if !self.0.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ContractViolation::InvalidValue {
                field: "object_id",
                reason: "must be hex",
            });
        }
        Ok(())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 1-based record number of a record-structured object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordNumber(u8);

impl RecordNumber {
    pub const MAX: usize = 254;

    pub fn new(n: usize) -> Result<Self, ContractViolation> {
        if n == 0 || n > Self::MAX {
            return Err(ContractViolation::InvalidRange {
                field: "record_number",
                min: 1,
                max: Self::MAX as u64,
                got: n as u64,
            });
        }
        Ok(Self(n as u8))
    }

    pub fn get(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RecordNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CredentialSlot(pub u8);

impl CredentialSlot {
    /// Administrative key reference used for provisioning writes.
    pub const ADM1: CredentialSlot = CredentialSlot(0x0A);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardResponse {
    pub data: Vec<u8>,
    pub status: StatusWord,
}

impl CardResponse {
    pub fn ok(data: Vec<u8>) -> Self {
        Self {
            data,
            status: StatusWord::OK,
        }
    }

    pub fn status_only(status: StatusWord) -> Self {
        Self {
            data: Vec::new(),
            status,
        }
    }
}

/// Transport-level failure: the command did not produce a status word.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("card transport failure: {message}")]
pub struct CardIoError {
    pub message: String,
}

impl CardIoError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Card-side target of a field, produced only by the field registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageObject {
    pub identifier: ObjectId,
    pub requires_context: Option<AppContext>,
    pub is_record_structured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WidthSpec {
    pub total_bytes: usize,
    /// 1 for flat objects.
    pub record_count: usize,
}

impl WidthSpec {
    pub fn flat(total_bytes: usize) -> Self {
        Self {
            total_bytes,
            record_count: 1,
        }
    }

    pub fn records(total_bytes: usize, record_count: usize) -> Result<Self, ContractViolation> {
        let w = Self {
            total_bytes,
            record_count,
        };
        w.validate()?;
        Ok(w)
    }

    pub fn record_width(&self) -> usize {
        self.total_bytes / self.record_count.max(1)
    }
}

impl Validate for WidthSpec {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.record_count == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "width_spec.record_count",
                reason: "must be >= 1",
            });
        }
        if self.total_bytes % self.record_count != 0 {
            return Err(ContractViolation::InvalidValue {
                field: "width_spec.total_bytes",
                reason: "must be a multiple of record_count",
            });
        }
        Ok(())
    }
}

/// Command surface of one exclusive card session.
///
/// `Err` means the command never completed; a completed command that the card
/// refused comes back as `Ok` with a non-`9000` status.
pub trait CardCommands {
    fn capabilities(&self) -> CardCapabilities;

    fn select_context(&mut self, context: AppContext) -> Result<StatusWord, CardIoError>;

    /// Whether `id` is addressable in the currently selected context.
    fn object_exists(&mut self, id: &ObjectId) -> bool;

    /// Total byte width of the object (all records for record-structured objects).
    fn binary_width(&mut self, id: &ObjectId) -> Result<usize, CardIoError>;

    fn record_count(&mut self, id: &ObjectId) -> Result<usize, CardIoError>;

    fn read_binary(&mut self, id: &ObjectId) -> Result<CardResponse, CardIoError>;

    fn update_binary(&mut self, id: &ObjectId, data: &[u8]) -> Result<StatusWord, CardIoError>;

    fn read_record(
        &mut self,
        id: &ObjectId,
        record: RecordNumber,
    ) -> Result<CardResponse, CardIoError>;

    fn update_record(
        &mut self,
        id: &ObjectId,
        record: RecordNumber,
        data: &[u8],
    ) -> Result<StatusWord, CardIoError>;

    fn verify_credential(
        &mut self,
        slot: CredentialSlot,
        credential: &[u8],
    ) -> Result<StatusWord, CardIoError>;
}

/// Card-presence source. Hands out a session only once a card is fully present.
pub trait CardReader {
    type Session: CardCommands;

    /// Blocks up to `timeout`; `Ok(None)` when no new card appeared in time.
    fn poll_for_card(&mut self, timeout: Duration) -> Result<Option<Self::Session>, CardIoError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_card_01_status_word_renders_lowercase_hex() {
        assert_eq!(StatusWord::OK.to_string(), "9000");
        assert_eq!(StatusWord(0x6A82).to_string(), "6a82");
        assert_eq!(StatusWord::parse("6982"), Some(StatusWord(0x6982)));
        assert_eq!(StatusWord::parse("690"), None);
    }

    #[test]
    fn at_card_02_object_id_is_normalized_and_checked() {
        assert_eq!(ObjectId::new("6f46").unwrap().as_str(), "6F46");
        assert!(ObjectId::new("6F4").is_err());
        assert!(ObjectId::new("6G46").is_err());
        assert!(ObjectId::new("").is_err());
    }

    #[test]
    fn at_card_03_record_numbers_are_one_based() {
        assert!(RecordNumber::new(0).is_err());
        assert_eq!(RecordNumber::new(1).unwrap().get(), 1);
        assert!(RecordNumber::new(255).is_err());
    }

    #[test]
    fn at_card_04_width_spec_requires_equal_records() {
        let w = WidthSpec::records(750, 10).unwrap();
        assert_eq!(w.record_width(), 75);
        assert!(WidthSpec::records(751, 10).is_err());
        assert!(WidthSpec::records(10, 0).is_err());
        assert_eq!(WidthSpec::flat(17).record_count, 1);
    }

    #[test]
    fn at_card_05_capabilities_gate_each_context() {
        let caps = CardCapabilities {
            supports_context_a: true,
            supports_context_b: false,
        };
        assert!(caps.supports(AppContext::Usim));
        assert!(!caps.supports(AppContext::Isim));
    }
}
