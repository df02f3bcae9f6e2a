#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use simcsv_kernel_contracts::outcome::ReportRow;
use simcsv_storage::tabular::{
    read_record_set_file, record_set_digest, serialize_record_set, write_report_file,
    TabularError,
};

fn temp_dir(name: &str) -> PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(1);
    let dir = std::env::temp_dir().join(format!("simcsv-tabular-test-{name}-{suffix}"));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn at_tabular_db_01_file_roundtrip_preserves_order_and_digest() {
    let dir = temp_dir("roundtrip");
    let path = dir.join("card.csv");
    fs::write(
        &path,
        "FieldName,FieldValue,Comment\n\
         # header row,,\n\
         IMSI,080910101032547698,home\n\
         SPN,0154455354FFFFFFFFFFFFFFFFFFFFFF,brand\n\
         IMPU.2,80,\n",
    )
    .unwrap();

    let set = read_record_set_file(&path).unwrap();
    let names: Vec<&str> = set.names().map(|n| n.as_str()).collect();
    assert_eq!(names, vec!["IMSI", "SPN", "IMPU.2"]);
    assert_eq!(
        set.get("SPN").unwrap().value,
        "0154455354ffffffffffffffffffffff"
    );
    assert_eq!(set.get("IMSI").unwrap().extra, vec!["home".to_string()]);

    let copy = dir.join("copy.csv");
    fs::write(&copy, serialize_record_set(&set).unwrap()).unwrap();
    let reread = read_record_set_file(&copy).unwrap();
    assert_eq!(reread, set);
    assert_eq!(
        record_set_digest(&reread).unwrap(),
        record_set_digest(&set).unwrap()
    );
    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn at_tabular_db_02_missing_file_is_named() {
    let dir = temp_dir("missing");
    let err = read_record_set_file(&dir.join("absent.csv")).unwrap_err();
    assert!(matches!(err, TabularError::NotFound(ref p) if p.ends_with("absent.csv")));
    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn at_tabular_db_03_report_file_written_under_new_directory() {
    let dir = temp_dir("report");
    let path = dir.join("reports").join("card-1.csv");
    let rows = vec![ReportRow {
        field_name: "SPN".to_string(),
        field_value: "0154".to_string(),
        value_on_card: String::new(),
    }];
    write_report_file(&path, &rows).unwrap();
    let raw = fs::read_to_string(&path).unwrap();
    assert_eq!(
        raw,
        "FieldName,FieldValue,ValueOnCard,Differences\nSPN,0154,,X\n"
    );
    fs::remove_dir_all(dir).unwrap();
}
