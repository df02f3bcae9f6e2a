#![forbid(unsafe_code)]

use std::fmt;

use simcsv_kernel_contracts::card::{CardCommands, CredentialSlot};
use tracing::{error, info};

use crate::error::CredentialError;

pub const ADM_PIN_LEN: usize = 8;
const HEX_PREFIX: &str = "0x";

/// Canonical 8-byte administrative credential.
#[derive(Clone, PartialEq, Eq)]
pub struct AdmPin([u8; ADM_PIN_LEN]);

impl AdmPin {
    /// `0x`-prefixed input is 16 hex digits; anything else is ASCII of at most
    /// 8 characters, right-padded with `0xFF`. Whitespace is never stripped.
    pub fn parse(raw: &str) -> Result<Self, CredentialError> {
        if raw.chars().any(char::is_whitespace) {
            return Err(CredentialError::InvalidFormat {
                reason: "PIN must not contain whitespace",
            });
        }
        let mut bytes = [0xffu8; ADM_PIN_LEN];
        if let Some(digits) = raw.strip_prefix(HEX_PREFIX) {
            if digits.len() != ADM_PIN_LEN * 2 {
                return Err(CredentialError::InvalidFormat {
                    reason: "hex PIN must be exactly 16 hex digits",
                });
            }
            hex::decode_to_slice(digits, &mut bytes).map_err(|_| {
                CredentialError::InvalidFormat {
                    reason: "hex PIN must be exactly 16 hex digits",
                }
            })?;
            return Ok(Self(bytes));
        }
        if raw.is_empty() {
            return Err(CredentialError::InvalidFormat {
                reason: "PIN must not be empty",
            });
        }
        if !raw.is_ascii() || raw.len() > ADM_PIN_LEN {
            return Err(CredentialError::InvalidFormat {
                reason: "ASCII PIN must be at most 8 characters",
            });
        }
        bytes[..raw.len()].copy_from_slice(raw.as_bytes());
        Ok(Self(bytes))
    }

    pub(crate) fn from_bytes(bytes: [u8; ADM_PIN_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADM_PIN_LEN] {
        &self.0
    }
}

impl fmt::Debug for AdmPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AdmPin(<redacted>)")
    }
}

/// Submits the PIN to ADM1 exactly once.
pub fn authenticate<C: CardCommands + ?Sized>(
    card: &mut C,
    pin: &AdmPin,
) -> Result<(), CredentialError> {
    let status = card.verify_credential(CredentialSlot::ADM1, pin.as_bytes())?;
    if !status.is_ok() {
        error!(status = %status, "ADM PIN rejected");
        return Err(CredentialError::Rejected { status });
    }
    info!("ADM PIN verified");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_card::FakeCard;
    use simcsv_kernel_contracts::card::StatusWord;

    #[test]
    fn at_pin_01_hex_and_ascii_forms_agree() {
        let hex_form = AdmPin::parse("0x3132333435363738").unwrap();
        let ascii_form = AdmPin::parse("12345678").unwrap();
        assert_eq!(hex_form, ascii_form);
        assert_eq!(hex_form.as_bytes(), b"12345678");
    }

    #[test]
    fn at_pin_02_short_ascii_is_padded() {
        let pin = AdmPin::parse("1234").unwrap();
        assert_eq!(hex::encode(pin.as_bytes()), "31323334ffffffff");
    }

    #[test]
    fn at_pin_03_malformed_pins_are_rejected() {
        for raw in ["", "123456789", "0x1234", "0x313233343536373g", "pässwd"] {
            assert!(
                matches!(
                    AdmPin::parse(raw),
                    Err(CredentialError::InvalidFormat { .. })
                ),
                "{raw}"
            );
        }
        assert_eq!(format!("{:?}", AdmPin::parse("1234").unwrap()), "AdmPin(<redacted>)");
    }

    #[test]
    fn at_pin_04_rejected_status_is_fatal_and_single_shot() {
        let mut card = FakeCard::uicc();
        card.verify_status = StatusWord(0x63c2);
        let pin = AdmPin::parse("0x3132333435363738").unwrap();
        let err = authenticate(&mut card, &pin).unwrap_err();
        assert_eq!(
            err,
            CredentialError::Rejected {
                status: StatusWord(0x63c2)
            }
        );
        assert_eq!(card.credentials.len(), 1);
        assert_eq!(card.credentials[0].0, CredentialSlot::ADM1);
        assert_eq!(card.credentials[0].1, b"12345678".to_vec());
    }

    #[test]
    fn at_pin_05_success_status_authenticates() {
        let mut card = FakeCard::uicc();
        assert!(authenticate(&mut card, &AdmPin::parse("1111").unwrap()).is_ok());
    }

    #[test]
    fn at_pin_06_whitespace_is_rejected_not_stripped() {
        for raw in [" 12345678", "12345678\n", "1234 5678", "0x3132333435363738 "] {
            assert_eq!(
                AdmPin::parse(raw),
                Err(CredentialError::InvalidFormat {
                    reason: "PIN must not contain whitespace"
                }),
                "{raw:?}"
            );
        }
    }
}
