#![forbid(unsafe_code)]

use simcsv_kernel_contracts::card::CardCommands;
use simcsv_kernel_contracts::identity::{CardIdentity, Iccid, Imsi};
use tracing::{info, warn};

use crate::registry::{FieldRegistry, Namespace};

const ICCID_FIELD: &str = "ICCID";
const IMSI_FIELD: &str = "IMSI";

/// BCD with swapped nibbles, as stored in EF.ICCID and EF.IMSI.
fn swap_nibbles(bytes: &[u8]) -> String {
    hex::encode(
        bytes
            .iter()
            .map(|b| b.rotate_left(4))
            .collect::<Vec<u8>>(),
    )
}

pub fn decode_iccid(bytes: &[u8]) -> Option<Iccid> {
    let digits = swap_nibbles(bytes);
    Iccid::parse(digits.trim_end_matches('f'))
}

/// EF.IMSI: length byte, then a parity nibble followed by the digits.
pub fn decode_imsi(bytes: &[u8]) -> Option<Imsi> {
    let (&len, rest) = bytes.split_first()?;
    let first = *rest.first()?;
    let mut digits_len = (len as usize * 2).checked_sub(1)?;
    let swapped = swap_nibbles(rest);
    let swapped = swapped.trim_end_matches('f');
    if swapped.is_empty() {
        return None;
    }
    let odd = (first & 0x08) != 0;
    if !odd {
        digits_len = digits_len.checked_sub(1)?;
    }
    if digits_len != swapped.len() - 1 {
        return None;
    }
    Imsi::parse(&swapped[1..])
}

fn read_base<C: CardCommands + ?Sized>(
    card: &mut C,
    registry: &FieldRegistry,
    name: &str,
) -> Option<Vec<u8>> {
    let id = registry.get(name)?.object_id(Namespace::Base)?;
    match card.read_binary(id) {
        Ok(resp) if resp.status.is_ok() => Some(resp.data),
        Ok(resp) => {
            warn!(field = name, status = %resp.status, "identity read refused");
            None
        }
        Err(e) => {
            warn!(field = name, error = %e, "identity read failed");
            None
        }
    }
}

/// Reads ICCID and IMSI from the base namespace. Either item may come back
/// empty; failures are logged, never raised.
pub fn read_card_identity<C: CardCommands + ?Sized>(
    card: &mut C,
    registry: &FieldRegistry,
) -> CardIdentity {
    let iccid = read_base(card, registry, ICCID_FIELD).and_then(|b| decode_iccid(&b));
    let imsi = read_base(card, registry, IMSI_FIELD).and_then(|b| decode_imsi(&b));
    if iccid.is_none() {
        warn!("unable to read ICCID");
    }
    if imsi.is_none() {
        warn!("unable to read IMSI");
    }
    info!(
        iccid = iccid.as_ref().map(Iccid::as_str).unwrap_or("-"),
        imsi = imsi.as_ref().map(Imsi::as_str).unwrap_or("-"),
        "card identity"
    );
    CardIdentity { iccid, imsi }
}
