#![forbid(unsafe_code)]

//! Deterministic in-memory card used by the engine unit tests.

use std::collections::BTreeMap;

use simcsv_kernel_contracts::card::{
    AppContext, CardCapabilities, CardCommands, CardIoError, CardResponse, CredentialSlot,
    ObjectId, RecordNumber, StatusWord,
};

#[derive(Debug, Clone, Default)]
pub struct FakeObject {
    pub data: Vec<u8>,
    pub records: usize,
    pub width_fails: bool,
    pub read_fails: bool,
    pub corrupt_writes: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeWrite {
    Binary { id: String, data: Vec<u8> },
    Record { id: String, record: usize, data: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct FakeCard {
    pub caps: CardCapabilities,
    pub select_status: StatusWord,
    pub verify_status: StatusWord,
    pub objects: BTreeMap<String, FakeObject>,
    pub selected: Vec<AppContext>,
    pub writes: Vec<FakeWrite>,
    pub credentials: Vec<(CredentialSlot, Vec<u8>)>,
}

impl FakeCard {
    pub fn new(caps: CardCapabilities) -> Self {
        Self {
            caps,
            select_status: StatusWord::OK,
            verify_status: StatusWord::OK,
            objects: BTreeMap::new(),
            selected: Vec::new(),
            writes: Vec::new(),
            credentials: Vec::new(),
        }
    }

    pub fn uicc() -> Self {
        Self::new(CardCapabilities::uicc_with_usim_and_isim())
    }

    pub fn put_flat(&mut self, id: &str, data: &[u8]) -> &mut FakeObject {
        self.put(id, data.to_vec(), 1)
    }

    pub fn put_records(&mut self, id: &str, records: &[&[u8]]) -> &mut FakeObject {
        self.put(id, records.concat(), records.len())
    }

    pub fn object(&self, id: &str) -> &FakeObject {
        &self.objects[&id.to_ascii_uppercase()]
    }

    fn put(&mut self, id: &str, data: Vec<u8>, records: usize) -> &mut FakeObject {
        let key = id.to_ascii_uppercase();
        self.objects.insert(
            key.clone(),
            FakeObject {
                data,
                records,
                ..FakeObject::default()
            },
        );
        self.objects.get_mut(&key).unwrap()
    }

    fn lookup(&mut self, id: &ObjectId) -> Option<&mut FakeObject> {
        self.objects.get_mut(id.as_str())
    }
}

fn store(obj: &mut FakeObject, offset: usize, data: &[u8]) {
    obj.data[offset..offset + data.len()].copy_from_slice(data);
    if obj.corrupt_writes {
        obj.data[offset] ^= 0xff;
    }
}

impl CardCommands for FakeCard {
    fn capabilities(&self) -> CardCapabilities {
        self.caps
    }

    fn select_context(&mut self, context: AppContext) -> Result<StatusWord, CardIoError> {
        self.selected.push(context);
        Ok(self.select_status)
    }

    fn object_exists(&mut self, id: &ObjectId) -> bool {
        self.lookup(id).is_some()
    }

    fn binary_width(&mut self, id: &ObjectId) -> Result<usize, CardIoError> {
        match self.lookup(id) {
            Some(o) if !o.width_fails => Ok(o.data.len()),
            _ => Err(CardIoError::new("no FCP")),
        }
    }

    fn record_count(&mut self, id: &ObjectId) -> Result<usize, CardIoError> {
        match self.lookup(id) {
            Some(o) if !o.width_fails => Ok(o.records),
            _ => Err(CardIoError::new("no FCP")),
        }
    }

    fn read_binary(&mut self, id: &ObjectId) -> Result<CardResponse, CardIoError> {
        Ok(match self.lookup(id) {
            Some(o) if o.read_fails => CardResponse::status_only(StatusWord(0x6f00)),
            Some(o) => CardResponse::ok(o.data.clone()),
            None => CardResponse::status_only(StatusWord::FILE_NOT_FOUND),
        })
    }

    fn update_binary(&mut self, id: &ObjectId, data: &[u8]) -> Result<StatusWord, CardIoError> {
        self.writes.push(FakeWrite::Binary {
            id: id.as_str().to_string(),
            data: data.to_vec(),
        });
        let Some(o) = self.lookup(id) else {
            return Ok(StatusWord::FILE_NOT_FOUND);
        };
        if data.len() > o.data.len() {
            return Ok(StatusWord::WRONG_LENGTH);
        }
        store(o, 0, data);
        Ok(StatusWord::OK)
    }

    fn read_record(
        &mut self,
        id: &ObjectId,
        record: RecordNumber,
    ) -> Result<CardResponse, CardIoError> {
        let Some(o) = self.lookup(id) else {
            return Ok(CardResponse::status_only(StatusWord::FILE_NOT_FOUND));
        };
        if o.read_fails {
            return Ok(CardResponse::status_only(StatusWord(0x6f00)));
        }
        if record.get() > o.records {
            return Ok(CardResponse::status_only(StatusWord::RECORD_NOT_FOUND));
        }
        let width = o.data.len() / o.records;
        let start = (record.get() - 1) * width;
        Ok(CardResponse::ok(o.data[start..start + width].to_vec()))
    }

    fn update_record(
        &mut self,
        id: &ObjectId,
        record: RecordNumber,
        data: &[u8],
    ) -> Result<StatusWord, CardIoError> {
        self.writes.push(FakeWrite::Record {
            id: id.as_str().to_string(),
            record: record.get(),
            data: data.to_vec(),
        });
        let Some(o) = self.lookup(id) else {
            return Ok(StatusWord::FILE_NOT_FOUND);
        };
        if record.get() > o.records {
            return Ok(StatusWord::RECORD_NOT_FOUND);
        }
        let width = o.data.len() / o.records;
        if data.len() != width {
            return Ok(StatusWord::WRONG_LENGTH);
        }
        store(o, (record.get() - 1) * width, data);
        Ok(StatusWord::OK)
    }

    fn verify_credential(
        &mut self,
        slot: CredentialSlot,
        credential: &[u8],
    ) -> Result<StatusWord, CardIoError> {
        self.credentials.push((slot, credential.to_vec()));
        Ok(self.verify_status)
    }
}
