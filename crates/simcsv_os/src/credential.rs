#![forbid(unsafe_code)]

//! Where the ADM PIN for the inserted card comes from.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use simcsv_engines::pin::AdmPin;
use simcsv_engines::pin_vault::{PinVault, VaultError};
use simcsv_engines::CredentialError;
use simcsv_kernel_contracts::identity::CardIdentity;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PinSourceError {
    #[error("PIN map '{0}' must be a .json file")]
    NotJson(String),
    #[error("unable to read PIN map: {0}")]
    Io(#[from] std::io::Error),
    #[error("PIN map is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("PIN map entry for IMSI {0} must be a string or number")]
    InvalidMapEntry(String),
    #[error("card IMSI could not be read, so its ADM PIN cannot be looked up")]
    ImsiUnavailable,
    #[error("IMSI {0} is not in the PIN map")]
    ImsiNotInMap(String),
    #[error("no ADM PIN stored in the vault for IMSI {0}")]
    ImsiNotInVault(String),
    #[error("PIN vault: {0}")]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Format(#[from] CredentialError),
}

#[derive(Debug, Clone)]
pub enum PinSource {
    /// One PIN for every card.
    Direct(String),
    /// PIN looked up by the card's IMSI.
    ImsiMap(BTreeMap<String, String>),
    /// PIN looked up by IMSI in the encrypted vault.
    Vault(PinVault),
}

impl PinSource {
    /// `{ "<imsi>": "<pin>" }`; numeric PINs are accepted as their decimal text.
    pub fn load_imsi_map(path: &Path) -> Result<Self, PinSourceError> {
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            return Err(PinSourceError::NotJson(path.display().to_string()));
        }
        let raw: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&fs::read_to_string(path)?)?;
        let mut map = BTreeMap::new();
        for (imsi, value) in raw {
            let pin = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                _ => return Err(PinSourceError::InvalidMapEntry(imsi)),
            };
            map.insert(imsi.trim().to_string(), pin);
        }
        info!(entries = map.len(), "PIN map loaded");
        Ok(PinSource::ImsiMap(map))
    }

    /// Resolves the PIN for the card in front of us. A missing IMSI fails at once.
    pub fn resolve(&self, identity: &CardIdentity) -> Result<AdmPin, PinSourceError> {
        let card_imsi = || identity.imsi.as_ref().ok_or(PinSourceError::ImsiUnavailable);
        match self {
            PinSource::Direct(pin) => Ok(AdmPin::parse(pin)?),
            PinSource::ImsiMap(map) => {
                let imsi = card_imsi()?;
                let pin = map
                    .get(imsi.as_str())
                    .ok_or_else(|| PinSourceError::ImsiNotInMap(imsi.to_string()))?;
                Ok(AdmPin::parse(pin)?)
            }
            PinSource::Vault(vault) => {
                let imsi = card_imsi()?;
                vault
                    .lookup(imsi)?
                    .ok_or_else(|| PinSourceError::ImsiNotInVault(imsi.to_string()))
            }
        }
    }
}
