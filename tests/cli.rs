use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::{TempDir, tempdir};

const PAGE: &str = "<!DOCTYPE HTML><html><body><p>meeting notes</p></body></html>";

fn bin(dir: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("cryptic"));
    cmd.env("CRYPTIC_SETTINGS", dir.path().join("settings.json"))
        .env_remove("CRYPTIC_PASSWORD")
        .env_remove("CRYPTIC_LOG");
    cmd
}

fn encrypt(dir: &TempDir, input: &Path, output: &Path, extra: &[&str]) {
    bin(dir)
        .env("CRYPTIC_PASSWORD", "pw")
        .arg("encrypt")
        .arg(input)
        .arg("-o")
        .arg(output)
        .args(["--iterations", "1000"])
        .args(extra)
        .assert()
        .success()
        .stdout(predicate::str::contains("wrote"));
}

#[test]
fn encrypt_then_decrypt_roundtrip() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("notes.html");
    let output = dir.path().join("notes.cryptic");
    fs::write(&input, PAGE).unwrap();

    encrypt(&dir, &input, &output, &[]);

    let container = fs::read_to_string(&output).unwrap();
    assert!(container.contains(r#"schemaVersion="2""#));
    assert!(container.contains("<Cipher>AES</Cipher>"));
    assert!(!container.contains("meeting notes"));

    bin(&dir)
        .env("CRYPTIC_PASSWORD", "pw")
        .arg("decrypt")
        .arg(&output)
        .assert()
        .success()
        .stdout(PAGE);
}

#[test]
fn encrypt_without_output_replaces_input() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("notes.html");
    fs::write(&input, PAGE).unwrap();

    bin(&dir)
        .env("CRYPTIC_PASSWORD", "pw")
        .arg("encrypt")
        .arg(&input)
        .args(["--iterations", "1000"])
        .assert()
        .success();

    let container = fs::read_to_string(&input).unwrap();
    assert!(container.contains("<Cryptic"));
}

#[test]
fn decrypt_to_output_file() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("notes.html");
    let sealed = dir.path().join("notes.cryptic");
    let restored = dir.path().join("restored.html");
    fs::write(&input, PAGE).unwrap();
    encrypt(&dir, &input, &sealed, &["--cipher", "serpent", "--mode", "ctr"]);

    bin(&dir)
        .env("CRYPTIC_PASSWORD", "pw")
        .arg("decrypt")
        .arg(&sealed)
        .arg("-o")
        .arg(&restored)
        .assert()
        .success();

    assert_eq!(fs::read_to_string(restored).unwrap(), PAGE);
}

#[test]
fn wrong_password_fails_with_hint() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("notes.html");
    let output = dir.path().join("notes.cryptic");
    fs::write(&input, PAGE).unwrap();
    encrypt(&dir, &input, &output, &[]);

    bin(&dir)
        .env("CRYPTIC_PASSWORD", "wrong")
        .arg("decrypt")
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid password or corrupted data"))
        .stderr(predicate::str::contains("hint"));
}

#[test]
fn inspect_shows_header_without_password() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("notes.html");
    let output = dir.path().join("notes.cryptic");
    fs::write(&input, PAGE).unwrap();
    encrypt(
        &dir,
        &input,
        &output,
        &["--cipher", "twofish", "--mode", "cbc", "--compression", "zlib"],
    );

    bin(&dir)
        .arg("inspect")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("version: current (2)"))
        .stdout(predicate::str::contains("cipher: Twofish"))
        .stdout(predicate::str::contains("mode: CBC"))
        .stdout(predicate::str::contains("compression: ZLib"))
        .stdout(predicate::str::contains("iterations: 1000"));
}

#[test]
fn plain_files_need_no_password() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("notes.txt");
    fs::write(&input, "nothing secret here").unwrap();

    bin(&dir)
        .arg("decrypt")
        .arg(&input)
        .assert()
        .success()
        .stdout("nothing secret here");

    bin(&dir)
        .arg("inspect")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("version: plain (0)"));
}

#[test]
fn plain_flag_writes_uncontained_bytes() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("notes.html");
    let output = dir.path().join("copy.html");
    fs::write(&input, PAGE).unwrap();

    bin(&dir)
        .arg("encrypt")
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .arg("--plain")
        .assert()
        .success();

    assert_eq!(fs::read_to_string(output).unwrap(), PAGE);
}

#[test]
fn unknown_algorithm_names_are_rejected() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("notes.html");
    fs::write(&input, PAGE).unwrap();

    bin(&dir)
        .env("CRYPTIC_PASSWORD", "pw")
        .arg("encrypt")
        .arg(&input)
        .args(["--cipher", "SEED"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));

    assert_eq!(fs::read_to_string(input).unwrap(), PAGE);
}

#[test]
fn unsupported_version_is_rejected() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("future.cryptic");
    fs::write(
        &input,
        r#"<?xml version="1.0"?><Cryptic schemaVersion="7"><Header/></Cryptic>"#,
    )
    .unwrap();

    bin(&dir)
        .env("CRYPTIC_PASSWORD", "pw")
        .arg("decrypt")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported version"))
        .stderr(predicate::str::contains("hint").not());
}

#[test]
fn missing_password_fails() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("notes.html");
    let output = dir.path().join("notes.cryptic");
    fs::write(&input, PAGE).unwrap();
    encrypt(&dir, &input, &output, &[]);

    bin(&dir)
        .arg("decrypt")
        .arg(&output)
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no password provided"));
}

#[test]
fn password_can_be_piped() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("notes.html");
    let output = dir.path().join("notes.cryptic");
    fs::write(&input, PAGE).unwrap();
    encrypt(&dir, &input, &output, &[]);

    bin(&dir)
        .arg("decrypt")
        .arg(&output)
        .write_stdin("pw\n")
        .assert()
        .success()
        .stdout(PAGE);
}

#[test]
fn config_save_sets_defaults_for_encrypt() {
    let dir = tempdir().unwrap();

    bin(&dir)
        .arg("config")
        .arg("--save")
        .args(["--cipher", "camellia", "--mode", "eax", "--iterations", "1000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"Camellia\""));

    assert!(dir.path().join("settings.json").exists());

    let input = dir.path().join("notes.html");
    let output = dir.path().join("notes.cryptic");
    fs::write(&input, PAGE).unwrap();

    bin(&dir)
        .env("CRYPTIC_PASSWORD", "pw")
        .arg("encrypt")
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .assert()
        .success();

    bin(&dir)
        .arg("inspect")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("cipher: Camellia"))
        .stdout(predicate::str::contains("mode: EAX"));
}

#[test]
fn config_prints_defaults() {
    let dir = tempdir().unwrap();

    bin(&dir)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"cipher\": \"AES\""))
        .stdout(predicate::str::contains("\"iterations\": 100000"));

    assert!(!dir.path().join("settings.json").exists());
}
