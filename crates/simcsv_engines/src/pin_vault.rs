#![forbid(unsafe_code)]

//! Encrypted ADM PIN store keyed by IMSI.
//!
//! Each entry is the canonical 8-byte credential sealed with AES-256-GCM
//! under a random nonce. The 32-byte key lives base64-encoded in its own
//! file, created once with owner-only permissions.

use std::collections::BTreeMap;
use std::env;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use simcsv_kernel_contracts::identity::Imsi;
use thiserror::Error;
use tracing::{debug, info};

use crate::pin::{AdmPin, ADM_PIN_LEN};

pub const PIN_VAULT_PATH_ENV: &str = "SIMCSV_PIN_VAULT_PATH";

const VAULT_VERSION: u8 = 1;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("vault file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("vault data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unsupported vault version {0}")]
    UnsupportedVersion(u8),
    #[error("vault key must be 32 bytes")]
    KeyLength,
    #[error("entry for IMSI {0} cannot be opened with this key")]
    CorruptEntry(String),
    #[error("sealing the PIN failed")]
    Seal,
}

#[derive(Debug, Serialize, Deserialize)]
struct VaultFile {
    version: u8,
    #[serde(default)]
    pins: BTreeMap<String, SealedPin>,
}

impl Default for VaultFile {
    fn default() -> Self {
        Self {
            version: VAULT_VERSION,
            pins: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SealedPin {
    nonce: String,
    sealed: String,
    stored_at_ms: u64,
}

impl SealedPin {
    fn seal(cipher: &Aes256Gcm, pin: &AdmPin) -> Result<Self, VaultError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), pin.as_bytes().as_slice())
            .map_err(|_| VaultError::Seal)?;
        Ok(Self {
            nonce: BASE64.encode(nonce),
            sealed: BASE64.encode(sealed),
            stored_at_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        })
    }

    fn open(&self, cipher: &Aes256Gcm, imsi: &Imsi) -> Result<AdmPin, VaultError> {
        let corrupt = || VaultError::CorruptEntry(imsi.to_string());
        let nonce = BASE64.decode(&self.nonce)?;
        if nonce.len() != NONCE_LEN {
            return Err(corrupt());
        }
        let plain = cipher
            .decrypt(Nonce::from_slice(&nonce), BASE64.decode(&self.sealed)?.as_slice())
            .map_err(|_| corrupt())?;
        let bytes: [u8; ADM_PIN_LEN] = plain.try_into().map_err(|_| corrupt())?;
        Ok(AdmPin::from_bytes(bytes))
    }
}

#[derive(Debug, Clone)]
pub struct PinVault {
    file: PathBuf,
    key_file: PathBuf,
}

impl PinVault {
    /// `$SIMCSV_PIN_VAULT_PATH`, else `simcsv/pin_vault.json` under the user's
    /// config directory. The key sits next to it as `pin_vault.master.key`.
    pub fn default_local() -> Self {
        let file = env::var_os(PIN_VAULT_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir().join("simcsv").join("pin_vault.json"));
        let key_file = file.with_extension("master.key");
        Self::at(file, key_file)
    }

    pub fn at(file: PathBuf, key_file: PathBuf) -> Self {
        Self { file, key_file }
    }

    pub fn store(&self, imsi: &Imsi, pin: &AdmPin) -> Result<(), VaultError> {
        let cipher = self.cipher()?;
        let mut vault = self.load()?;
        vault
            .pins
            .insert(imsi.to_string(), SealedPin::seal(&cipher, pin)?);
        self.save(&vault)?;
        info!(imsi = %imsi, "ADM PIN stored in vault");
        Ok(())
    }

    pub fn lookup(&self, imsi: &Imsi) -> Result<Option<AdmPin>, VaultError> {
        let vault = self.load()?;
        let Some(entry) = vault.pins.get(imsi.as_str()) else {
            debug!(imsi = %imsi, "no vault entry");
            return Ok(None);
        };
        entry.open(&self.cipher()?, imsi).map(Some)
    }

    pub fn contains(&self, imsi: &Imsi) -> Result<bool, VaultError> {
        Ok(self.load()?.pins.contains_key(imsi.as_str()))
    }

    /// `false` when there was nothing to remove.
    pub fn remove(&self, imsi: &Imsi) -> Result<bool, VaultError> {
        let mut vault = self.load()?;
        if vault.pins.remove(imsi.as_str()).is_none() {
            return Ok(false);
        }
        self.save(&vault)?;
        info!(imsi = %imsi, "ADM PIN removed from vault");
        Ok(true)
    }

    /// Stored IMSIs in ascending order. Keys that are not IMSIs are skipped.
    pub fn imsis(&self) -> Result<Vec<Imsi>, VaultError> {
        Ok(self.load()?.pins.keys().filter_map(|k| Imsi::parse(k)).collect())
    }

    fn load(&self) -> Result<VaultFile, VaultError> {
        let raw = match fs::read_to_string(&self.file) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(VaultFile::default()),
            Err(e) => return Err(e.into()),
        };
        let vault: VaultFile = serde_json::from_str(&raw)?;
        if vault.version != VAULT_VERSION {
            return Err(VaultError::UnsupportedVersion(vault.version));
        }
        Ok(vault)
    }

    /// Written to a sibling temp file first so a crash never leaves half a vault.
    fn save(&self, vault: &VaultFile) -> Result<(), VaultError> {
        create_parent(&self.file)?;
        let tmp = self.file.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(vault)?)?;
        fs::rename(&tmp, &self.file)?;
        Ok(())
    }

    fn cipher(&self) -> Result<Aes256Gcm, VaultError> {
        let key = match fs::read_to_string(&self.key_file) {
            Ok(encoded) => BASE64.decode(encoded.trim())?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.create_key()?,
            Err(e) => return Err(e.into()),
        };
        Aes256Gcm::new_from_slice(&key).map_err(|_| VaultError::KeyLength)
    }

    fn create_key(&self) -> Result<Vec<u8>, VaultError> {
        create_parent(&self.key_file)?;
        let mut key = vec![0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options
            .open(&self.key_file)?
            .write_all(BASE64.encode(&key).as_bytes())?;
        info!(path = %self.key_file.display(), "vault key created");
        Ok(key)
    }
}

fn create_parent(path: &Path) -> Result<(), VaultError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn config_dir() -> PathBuf {
    env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
}
