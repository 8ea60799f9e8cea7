// Encrypted token vault tests

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chrono::{Duration, TimeZone, Utc};
use homeboard::credentials::{EncryptionKey, TokenRecord, Vault, VaultRead};
use homeboard::error::BoardError;
use std::fs;

fn key(byte: u8) -> EncryptionKey {
    EncryptionKey::from_bytes([byte; 32])
}

fn sample_record() -> TokenRecord {
    TokenRecord::new(
        "ya29.a0Af-round-trip",
        Some("1//0round-trip".to_string()),
        Some(Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap()),
        serde_json::json!({"token_type": "Bearer", "scope": "https://www.googleapis.com/auth/calendar.readonly"}),
    )
    .unwrap()
}

#[test]
fn test_write_then_read_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::new(dir.path(), key(1)).unwrap();
    let record = sample_record();

    vault.write("calendar_token", &record).unwrap();

    match vault.read("calendar_token").unwrap() {
        VaultRead::Found(read) => assert_eq!(read, record),
        other => panic!("expected Found, got {:?}", other),
    }
}

#[test]
fn test_record_without_expiry_or_refresh_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::new(dir.path(), key(1)).unwrap();
    let record = TokenRecord::new("eyJ0.app.only", None, None, serde_json::Value::Null).unwrap();

    vault.write("onedrive_token", &record).unwrap();
    let read = vault.read("onedrive_token").unwrap().into_result("onedrive_token").unwrap();
    assert_eq!(read, record);
}

#[test]
fn test_missing_file_is_absent() {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::new(dir.path().join("not-created-yet"), key(1)).unwrap();

    let outcome = vault.read("calendar_token").unwrap();
    assert!(matches!(outcome, VaultRead::Absent));
    assert!(matches!(
        outcome.into_result("calendar_token"),
        Err(BoardError::VaultAbsent(_))
    ));
}

#[test]
fn test_garbage_file_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::new(dir.path(), key(1)).unwrap();

    fs::write(vault.path_for("calendar_token"), b"\x00\xffnot an envelope").unwrap();
    assert!(matches!(vault.read("calendar_token").unwrap(), VaultRead::Corrupt));
}

#[test]
fn test_truncated_envelope_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::new(dir.path(), key(1)).unwrap();
    vault.write("calendar_token", &sample_record()).unwrap();

    let path = vault.path_for("calendar_token");
    let envelope = fs::read_to_string(&path).unwrap();
    let mut bytes = URL_SAFE.decode(envelope.trim()).unwrap();
    bytes.truncate(bytes.len() - 4);
    fs::write(&path, URL_SAFE.encode(bytes)).unwrap();

    assert!(matches!(vault.read("calendar_token").unwrap(), VaultRead::Corrupt));
}

#[test]
fn test_tampered_ciphertext_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::new(dir.path(), key(1)).unwrap();
    vault.write("calendar_token", &sample_record()).unwrap();

    let path = vault.path_for("calendar_token");
    let mut bytes = URL_SAFE.decode(fs::read_to_string(&path).unwrap().trim()).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    fs::write(&path, URL_SAFE.encode(bytes)).unwrap();

    assert!(matches!(vault.read("calendar_token").unwrap(), VaultRead::Corrupt));
}

#[test]
fn test_rotated_key_reads_as_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    Vault::new(dir.path(), key(1))
        .unwrap()
        .write("calendar_token", &sample_record())
        .unwrap();

    let rotated = Vault::new(dir.path(), key(2)).unwrap();
    assert!(matches!(rotated.read("calendar_token").unwrap(), VaultRead::Corrupt));

    // Writing under the new key replaces the unreadable file.
    let replacement = TokenRecord::new(
        "ya29.after-rotation",
        None,
        Some(Utc::now() + Duration::hours(1)),
        serde_json::Value::Null,
    )
    .unwrap();
    rotated.write("calendar_token", &replacement).unwrap();
    match rotated.read("calendar_token").unwrap() {
        VaultRead::Found(read) => assert_eq!(read.access_token(), "ya29.after-rotation"),
        other => panic!("expected Found, got {:?}", other),
    }
}

#[test]
fn test_each_write_uses_fresh_nonce() {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::new(dir.path(), key(1)).unwrap();
    let path = vault.path_for("calendar_token");

    vault.write("calendar_token", &sample_record()).unwrap();
    let first = fs::read_to_string(&path).unwrap();
    vault.write("calendar_token", &sample_record()).unwrap();
    let second = fs::read_to_string(&path).unwrap();

    assert_ne!(first, second);
}

#[test]
fn test_file_name_is_identity_only() {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::new(dir.path(), key(1)).unwrap();
    vault.write("calendar_token", &sample_record()).unwrap();

    assert_eq!(
        vault.path_for("calendar_token").file_name().unwrap(),
        "calendar_token.enc"
    );
}
