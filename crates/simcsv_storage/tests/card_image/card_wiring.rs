#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use simcsv_kernel_contracts::card::{
    AppContext, CardCommands, CredentialSlot, ObjectId, RecordNumber, StatusWord,
};
use simcsv_storage::card_image::{CardCommand, CardImage, SimulatedCard};

const IMAGE: &str = r#"{
    "schema_version": 1,
    "capabilities": { "supports_context_a": true, "supports_context_b": true },
    "adm_pin": "3132333435363738",
    "pin_retries": 3,
    "objects": [
        { "id": "6F07", "context": "usim", "content": "080910101032547698" },
        { "id": "6F07", "context": "isim", "content": "01" },
        { "id": "6F04", "context": "isim", "records": ["11111111", "22222222", "33333333"] },
        { "id": "6F46", "context": "usim", "content": "ffff", "faults": { "width_fails": true } },
        { "id": "6F3E", "context": "usim", "content": "ffff", "faults": { "corrupt_writes": true } }
    ]
}"#;

fn temp_dir(name: &str) -> PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(1);
    let dir = std::env::temp_dir().join(format!("simcsv-card-test-{name}-{suffix}"));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn card() -> SimulatedCard {
    SimulatedCard::from_image(&CardImage::from_json(IMAGE).unwrap()).unwrap()
}

fn id(raw: &str) -> ObjectId {
    ObjectId::new(raw).unwrap()
}

fn rec(n: usize) -> RecordNumber {
    RecordNumber::new(n).unwrap()
}

fn adm(c: &mut SimulatedCard) {
    assert_eq!(
        c.verify_credential(CredentialSlot::ADM1, b"12345678").unwrap(),
        StatusWord::OK
    );
}

#[test]
fn at_card_db_01_same_fid_resolves_per_selected_application() {
    let mut c = card();
    c.select_context(AppContext::Usim).unwrap();
    assert_eq!(c.read_binary(&id("6F07")).unwrap().data.len(), 9);
    c.select_context(AppContext::Isim).unwrap();
    assert_eq!(c.read_binary(&id("6F07")).unwrap().data, vec![0x01]);
}

#[test]
fn at_card_db_02_record_bounds_and_command_mismatch() {
    let mut c = card();
    c.select_context(AppContext::Isim).unwrap();
    assert_eq!(c.record_count(&id("6F04")).unwrap(), 3);
    assert_eq!(c.binary_width(&id("6F04")).unwrap(), 12);
    assert_eq!(
        c.read_record(&id("6F04"), rec(4)).unwrap().status,
        StatusWord::RECORD_NOT_FOUND
    );
    assert_eq!(
        c.read_binary(&id("6F04")).unwrap().status,
        StatusWord(0x6981)
    );
    adm(&mut c);
    assert_eq!(
        c.update_record(&id("6F04"), rec(2), &[0xaa; 3]).unwrap(),
        StatusWord::WRONG_LENGTH
    );
    assert_eq!(
        c.update_record(&id("6F04"), rec(2), &[0xaa; 4]).unwrap(),
        StatusWord::OK
    );
    assert_eq!(
        c.read_record(&id("6F04"), rec(2)).unwrap().data,
        vec![0xaa; 4]
    );
}

#[test]
fn at_card_db_03_fault_injection() {
    let mut c = card();
    c.select_context(AppContext::Usim).unwrap();
    assert!(c.binary_width(&id("6F46")).is_err());
    adm(&mut c);
    assert_eq!(
        c.update_binary(&id("6F3E"), &[0x01, 0x02]).unwrap(),
        StatusWord::OK
    );
    assert_eq!(c.read_binary(&id("6F3E")).unwrap().data, vec![0xfe, 0x02]);
}

#[test]
fn at_card_db_04_blocked_after_retries_exhausted() {
    let mut c = card();
    for expected in [0x63c2u16, 0x63c1, 0x63c0] {
        assert_eq!(
            c.verify_credential(CredentialSlot::ADM1, b"99999999").unwrap(),
            StatusWord(expected)
        );
    }
    assert_eq!(
        c.verify_credential(CredentialSlot::ADM1, b"12345678").unwrap(),
        StatusWord(0x6983)
    );
    assert_eq!(c.command_log().len(), 4);
    assert!(c
        .command_log()
        .iter()
        .all(|cmd| matches!(cmd, CardCommand::Verify(CredentialSlot::ADM1))));
}

#[test]
fn at_card_db_05_saved_image_keeps_written_state() {
    let dir = temp_dir("save");
    let path = dir.join("card.json");
    fs::write(&path, IMAGE).unwrap();

    let mut c = SimulatedCard::load(&path).unwrap();
    c.select_context(AppContext::Isim).unwrap();
    adm(&mut c);
    c.update_record(&id("6F04"), rec(3), &[0xde, 0xad, 0xbe, 0xef])
        .unwrap();
    c.to_image().save(&path).unwrap();

    let reloaded = SimulatedCard::load(&path).unwrap();
    assert_eq!(
        reloaded.peek(Some(AppContext::Isim), "6F04"),
        Some(hex::decode("111111112222222233333333").map(|mut v| {
            v[8..12].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
            v
        }).unwrap())
    );
    fs::remove_dir_all(dir).unwrap();
}
