#![forbid(unsafe_code)]

//! JSON-described in-memory card implementing the card command interface.
//!
//! Objects with a `context` are addressable only while that application is
//! selected; objects without one are addressed by absolute path from anywhere.
//! Updates require a prior successful ADM verification.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use simcsv_kernel_contracts::card::{
    AppContext, CardCapabilities, CardCommands, CardIoError, CardReader, CardResponse,
    CredentialSlot, ObjectId, RecordNumber, StatusWord,
};
use simcsv_kernel_contracts::ContractViolation;
use thiserror::Error;
use tracing::{debug, info};

pub const CARD_IMAGE_SCHEMA_VERSION: u8 = 1;
pub const DEFAULT_PIN_RETRIES: u8 = 3;

const SW_COMMAND_INCOMPATIBLE: StatusWord = StatusWord(0x6981);
const SW_AUTH_BLOCKED: StatusWord = StatusWord(0x6983);
const SW_REFERENCE_NOT_FOUND: StatusWord = StatusWord(0x6a88);
const SW_TECHNICAL_PROBLEM: StatusWord = StatusWord(0x6f00);

#[derive(Debug, Error)]
pub enum CardImageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported card image schema version {0}")]
    Schema(u8),
    #[error("object {id}: {reason}")]
    InvalidObject { id: String, reason: String },
    #[error("card image rejected: {0}")]
    Contract(#[from] ContractViolation),
}

/// Fault injection switches for one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectFaults {
    pub width_fails: bool,
    pub read_fails: bool,
    pub corrupt_writes: bool,
}

impl ObjectFaults {
    fn is_clear(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageObject {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<AppContext>,
    /// Hex content of a transparent object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Hex content of each record of a record-structured object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "ObjectFaults::is_clear")]
    pub faults: ObjectFaults,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardImage {
    pub schema_version: u8,
    pub capabilities: CardCapabilities,
    /// ADM PIN as 16 hex digits (8 bytes).
    pub adm_pin: String,
    #[serde(default = "default_pin_retries")]
    pub pin_retries: u8,
    pub objects: Vec<ImageObject>,
}

fn default_pin_retries() -> u8 {
    DEFAULT_PIN_RETRIES
}

impl CardImage {
    pub fn from_json(raw: &str) -> Result<Self, CardImageError> {
        let image: CardImage = serde_json::from_str(raw)?;
        if image.schema_version != CARD_IMAGE_SCHEMA_VERSION {
            return Err(CardImageError::Schema(image.schema_version));
        }
        Ok(image)
    }

    pub fn load(path: &Path) -> Result<Self, CardImageError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn to_json(&self) -> Result<String, CardImageError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), CardImageError> {
        let mut tmp = path.to_path_buf();
        tmp.set_extension("tmp");
        fs::write(&tmp, self.to_json()?)?;
        fs::rename(tmp, path)?;
        Ok(())
    }
}

/// One command as the card saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardCommand {
    Select(AppContext),
    ReadBinary(ObjectId),
    UpdateBinary(ObjectId, Vec<u8>),
    ReadRecord(ObjectId, usize),
    UpdateRecord(ObjectId, usize, Vec<u8>),
    Verify(CredentialSlot),
}

impl CardCommand {
    pub fn is_update(&self) -> bool {
        matches!(
            self,
            CardCommand::UpdateBinary(..) | CardCommand::UpdateRecord(..)
        )
    }
}

#[derive(Debug, Clone)]
struct SimObject {
    data: Vec<u8>,
    /// `None` for transparent objects.
    record_count: Option<usize>,
    faults: ObjectFaults,
}

impl SimObject {
    fn record_width(&self) -> Option<usize> {
        self.record_count
            .filter(|&n| n > 0)
            .map(|n| self.data.len() / n)
    }

    fn store(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        if self.faults.corrupt_writes {
            if let Some(b) = self.data.get_mut(offset) {
                *b ^= 0xff;
            }
        }
    }
}

type ObjectKey = (Option<AppContext>, ObjectId);

#[derive(Debug, Clone)]
pub struct SimulatedCard {
    capabilities: CardCapabilities,
    adm_pin: Vec<u8>,
    pin_retries: u8,
    retries_left: u8,
    adm_verified: bool,
    selected: Option<AppContext>,
    objects: BTreeMap<ObjectKey, SimObject>,
    log: Vec<CardCommand>,
    source: Option<PathBuf>,
}

fn decode_hex(id: &str, what: &str, raw: &str) -> Result<Vec<u8>, CardImageError> {
    hex::decode(raw).map_err(|e| CardImageError::InvalidObject {
        id: id.to_string(),
        reason: format!("{what} is not hex: {e}"),
    })
}

impl SimulatedCard {
    pub fn from_image(image: &CardImage) -> Result<Self, CardImageError> {
        let adm_pin = decode_hex("adm_pin", "PIN", &image.adm_pin)?;
        if adm_pin.len() != 8 {
            return Err(CardImageError::InvalidObject {
                id: "adm_pin".to_string(),
                reason: "must be 8 bytes".to_string(),
            });
        }

        let mut objects = BTreeMap::new();
        for obj in &image.objects {
            let id = ObjectId::new(obj.id.as_str())?;
            let invalid = |reason: &str| CardImageError::InvalidObject {
                id: obj.id.clone(),
                reason: reason.to_string(),
            };
            let sim = match (&obj.content, &obj.records) {
                (Some(content), None) => SimObject {
                    data: decode_hex(&obj.id, "content", content)?,
                    record_count: None,
                    faults: obj.faults,
                },
                (None, Some(records)) => {
                    let mut data = Vec::new();
                    let mut width = None;
                    for r in records {
                        let bytes = decode_hex(&obj.id, "record", r)?;
                        if *width.get_or_insert(bytes.len()) != bytes.len() {
                            return Err(invalid("records must all have the same width"));
                        }
                        data.extend(bytes);
                    }
                    if records.is_empty() || records.len() > RecordNumber::MAX {
                        return Err(invalid("must have between 1 and 254 records"));
                    }
                    SimObject {
                        data,
                        record_count: Some(records.len()),
                        faults: obj.faults,
                    }
                }
                _ => return Err(invalid("needs exactly one of content or records")),
            };
            if objects.insert((obj.context, id), sim).is_some() {
                return Err(invalid("defined twice in the same context"));
            }
        }

        Ok(Self {
            capabilities: image.capabilities,
            adm_pin,
            pin_retries: image.pin_retries,
            retries_left: image.pin_retries,
            adm_verified: false,
            selected: None,
            objects,
            log: Vec::new(),
            source: None,
        })
    }

    pub fn load(path: &Path) -> Result<Self, CardImageError> {
        let mut card = Self::from_image(&CardImage::load(path)?)?;
        info!(path = %path.display(), objects = card.objects.len(), "card image loaded");
        card.source = Some(path.to_path_buf());
        Ok(card)
    }

    /// Image file this card was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Current state as an image, for saving after a pass.
    pub fn to_image(&self) -> CardImage {
        let objects = self
            .objects
            .iter()
            .map(|((context, id), obj)| {
                let (content, records) = match obj.record_width() {
                    Some(w) if w > 0 => (
                        None,
                        Some(obj.data.chunks(w).map(hex::encode).collect()),
                    ),
                    Some(_) => (None, Some(vec![String::new(); obj.record_count.unwrap_or(0)])),
                    None => (Some(hex::encode(&obj.data)), None),
                };
                ImageObject {
                    id: id.as_str().to_string(),
                    context: *context,
                    content,
                    records,
                    faults: obj.faults,
                }
            })
            .collect();
        CardImage {
            schema_version: CARD_IMAGE_SCHEMA_VERSION,
            capabilities: self.capabilities,
            adm_pin: hex::encode(&self.adm_pin),
            pin_retries: self.pin_retries,
            objects,
        }
    }

    pub fn command_log(&self) -> &[CardCommand] {
        &self.log
    }

    pub fn update_count(&self) -> usize {
        self.log.iter().filter(|c| c.is_update()).count()
    }

    pub fn retries_left(&self) -> u8 {
        self.retries_left
    }

    /// Raw content of an object, bypassing context and access rules.
    pub fn peek(&self, context: Option<AppContext>, id: &str) -> Option<Vec<u8>> {
        let id = ObjectId::new(id).ok()?;
        self.objects.get(&(context, id)).map(|o| o.data.clone())
    }

    fn lookup(&mut self, id: &ObjectId) -> Option<&mut SimObject> {
        if let Some(ctx) = self.selected {
            if self.objects.contains_key(&(Some(ctx), id.clone())) {
                return self.objects.get_mut(&(Some(ctx), id.clone()));
            }
        }
        self.objects.get_mut(&(None, id.clone()))
    }

    fn check_update_allowed(&self) -> Option<StatusWord> {
        (!self.adm_verified).then_some(StatusWord::SECURITY_STATUS_NOT_SATISFIED)
    }
}

impl CardCommands for SimulatedCard {
    fn capabilities(&self) -> CardCapabilities {
        self.capabilities
    }

    fn select_context(&mut self, context: AppContext) -> Result<StatusWord, CardIoError> {
        self.log.push(CardCommand::Select(context));
        if !self.capabilities.supports(context) {
            return Ok(StatusWord::FILE_NOT_FOUND);
        }
        self.selected = Some(context);
        debug!(context = %context, "application selected");
        Ok(StatusWord::OK)
    }

    fn object_exists(&mut self, id: &ObjectId) -> bool {
        self.lookup(id).is_some()
    }

    fn binary_width(&mut self, id: &ObjectId) -> Result<usize, CardIoError> {
        match self.lookup(id) {
            Some(o) if o.faults.width_fails => {
                Err(CardIoError::new(format!("{id}: file control parameters unavailable")))
            }
            Some(o) => Ok(o.data.len()),
            None => Err(CardIoError::new(format!("{id}: file not found"))),
        }
    }

    fn record_count(&mut self, id: &ObjectId) -> Result<usize, CardIoError> {
        match self.lookup(id) {
            Some(o) if o.faults.width_fails => {
                Err(CardIoError::new(format!("{id}: file control parameters unavailable")))
            }
            Some(SimObject {
                record_count: Some(n),
                ..
            }) => Ok(*n),
            Some(_) => Err(CardIoError::new(format!("{id}: not a record-structured file"))),
            None => Err(CardIoError::new(format!("{id}: file not found"))),
        }
    }

    fn read_binary(&mut self, id: &ObjectId) -> Result<CardResponse, CardIoError> {
        self.log.push(CardCommand::ReadBinary(id.clone()));
        Ok(match self.lookup(id) {
            None => CardResponse::status_only(StatusWord::FILE_NOT_FOUND),
            Some(o) if o.faults.read_fails => CardResponse::status_only(SW_TECHNICAL_PROBLEM),
            Some(o) if o.record_count.is_some() => {
                CardResponse::status_only(SW_COMMAND_INCOMPATIBLE)
            }
            Some(o) => CardResponse::ok(o.data.clone()),
        })
    }

    fn update_binary(&mut self, id: &ObjectId, data: &[u8]) -> Result<StatusWord, CardIoError> {
        self.log
            .push(CardCommand::UpdateBinary(id.clone(), data.to_vec()));
        if let Some(sw) = self.check_update_allowed() {
            return Ok(sw);
        }
        Ok(match self.lookup(id) {
            None => StatusWord::FILE_NOT_FOUND,
            Some(o) if o.record_count.is_some() => SW_COMMAND_INCOMPATIBLE,
            Some(o) if data.len() > o.data.len() || data.is_empty() => StatusWord::WRONG_LENGTH,
            Some(o) => {
                o.store(0, data);
                StatusWord::OK
            }
        })
    }

    fn read_record(
        &mut self,
        id: &ObjectId,
        record: RecordNumber,
    ) -> Result<CardResponse, CardIoError> {
        self.log.push(CardCommand::ReadRecord(id.clone(), record.get()));
        let Some(o) = self.lookup(id) else {
            return Ok(CardResponse::status_only(StatusWord::FILE_NOT_FOUND));
        };
        if o.faults.read_fails {
            return Ok(CardResponse::status_only(SW_TECHNICAL_PROBLEM));
        }
        let (Some(count), Some(width)) = (o.record_count, o.record_width()) else {
            return Ok(CardResponse::status_only(SW_COMMAND_INCOMPATIBLE));
        };
        if record.get() > count {
            return Ok(CardResponse::status_only(StatusWord::RECORD_NOT_FOUND));
        }
        let start = (record.get() - 1) * width;
        Ok(CardResponse::ok(o.data[start..start + width].to_vec()))
    }

    fn update_record(
        &mut self,
        id: &ObjectId,
        record: RecordNumber,
        data: &[u8],
    ) -> Result<StatusWord, CardIoError> {
        self.log.push(CardCommand::UpdateRecord(
            id.clone(),
            record.get(),
            data.to_vec(),
        ));
        if let Some(sw) = self.check_update_allowed() {
            return Ok(sw);
        }
        let Some(o) = self.lookup(id) else {
            return Ok(StatusWord::FILE_NOT_FOUND);
        };
        let (Some(count), Some(width)) = (o.record_count, o.record_width()) else {
            return Ok(SW_COMMAND_INCOMPATIBLE);
        };
        if record.get() > count {
            return Ok(StatusWord::RECORD_NOT_FOUND);
        }
        if data.len() != width || width == 0 {
            return Ok(StatusWord::WRONG_LENGTH);
        }
        o.store((record.get() - 1) * width, data);
        Ok(StatusWord::OK)
    }

    fn verify_credential(
        &mut self,
        slot: CredentialSlot,
        credential: &[u8],
    ) -> Result<StatusWord, CardIoError> {
        self.log.push(CardCommand::Verify(slot));
        if slot != CredentialSlot::ADM1 {
            return Ok(SW_REFERENCE_NOT_FOUND);
        }
        if self.retries_left == 0 {
            return Ok(SW_AUTH_BLOCKED);
        }
        if credential != self.adm_pin.as_slice() {
            self.retries_left -= 1;
            self.adm_verified = false;
            return Ok(StatusWord(0x63c0 | u16::from(self.retries_left)));
        }
        self.retries_left = self.pin_retries;
        self.adm_verified = true;
        Ok(StatusWord::OK)
    }
}

/// Hands out queued cards one per poll, in order. The first one shows up
/// after `polls_before_insert` empty polls.
#[derive(Debug)]
pub struct CardImageReader {
    cards: VecDeque<SimulatedCard>,
    polls_before_insert: usize,
}

impl CardImageReader {
    pub fn new(card: SimulatedCard) -> Self {
        Self::inserted_after(card, 0)
    }

    pub fn inserted_after(card: SimulatedCard, polls_before_insert: usize) -> Self {
        Self {
            cards: VecDeque::from([card]),
            polls_before_insert,
        }
    }

    pub fn queued(cards: impl IntoIterator<Item = SimulatedCard>) -> Self {
        Self {
            cards: cards.into_iter().collect(),
            polls_before_insert: 0,
        }
    }

    /// Cards not yet handed out.
    pub fn remaining(&self) -> usize {
        self.cards.len()
    }
}

impl CardReader for CardImageReader {
    type Session = SimulatedCard;

    fn poll_for_card(&mut self, timeout: Duration) -> Result<Option<SimulatedCard>, CardIoError> {
        if self.polls_before_insert > 0 || self.cards.is_empty() {
            self.polls_before_insert = self.polls_before_insert.saturating_sub(1);
            std::thread::sleep(timeout);
            return Ok(None);
        }
        Ok(self.cards.pop_front())
    }
}
