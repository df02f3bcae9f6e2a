#![forbid(unsafe_code)]

use simcsv_engines::pin::AdmPin;
use simcsv_engines::pin_vault::PinVault;
use simcsv_kernel_contracts::identity::Imsi;

pub const VAULT_USAGE: &str = "usage: simcsv vault <set|has|del|ls> [imsi]";

/// Output is one of OK, YES, NO, NOT_FOUND or the IMSI list; never a PIN.
pub fn execute_vault_command(
    vault: &PinVault,
    subcommand: &str,
    imsi: Option<&str>,
    pin: Option<&str>,
) -> Result<String, String> {
    match subcommand {
        "set" => {
            let imsi = require_imsi(imsi)?;
            let raw = pin.ok_or_else(|| "missing ADM PIN input".to_string())?;
            let pin = AdmPin::parse(raw).map_err(|e| e.to_string())?;
            vault
                .store(&imsi, &pin)
                .map_err(|e| format!("failed to store ADM PIN: {e}"))?;
            Ok("OK".to_string())
        }
        "has" => {
            let imsi = require_imsi(imsi)?;
            let has = vault
                .contains(&imsi)
                .map_err(|e| format!("failed to check IMSI: {e}"))?;
            Ok(if has { "YES" } else { "NO" }.to_string())
        }
        "del" => {
            let imsi = require_imsi(imsi)?;
            let removed = vault
                .remove(&imsi)
                .map_err(|e| format!("failed to delete ADM PIN: {e}"))?;
            Ok(if removed { "OK" } else { "NOT_FOUND" }.to_string())
        }
        "ls" => {
            let imsis = vault
                .imsis()
                .map_err(|e| format!("failed to list IMSIs: {e}"))?;
            Ok(imsis
                .iter()
                .map(Imsi::as_str)
                .collect::<Vec<_>>()
                .join("\n"))
        }
        _ => Err(format!(
            "unknown vault subcommand: {subcommand}. expected one of: set, has, del, ls"
        )),
    }
}

pub fn parse_imsi(raw: &str) -> Result<Imsi, String> {
    Imsi::parse(raw).ok_or_else(|| {
        format!(
            "'{raw}' is not an IMSI ({}-{} digits)",
            Imsi::MIN_DIGITS,
            Imsi::MAX_DIGITS
        )
    })
}

fn require_imsi(raw: Option<&str>) -> Result<Imsi, String> {
    let raw = raw.ok_or_else(|| format!("missing IMSI. {VAULT_USAGE}"))?;
    parse_imsi(raw)
}
