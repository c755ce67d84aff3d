use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

use clauselens::DocumentId;

const CONTRACT: &str = "1. Payment. Pay within 30 days.\n2. Confidentiality. Keep secrets.\n";

fn clauselens(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("clauselens").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("CLAUSELENS_STORAGE")
        .env_remove("OLLAMA_HOST")
        .env("RUST_LOG", "off")
        .arg("--storage")
        .arg(dir.path().join("store"));
    cmd
}

fn ingest(dir: &TempDir) -> DocumentId {
    let file = dir.path().join("contract.txt");
    fs::write(&file, CONTRACT).unwrap();
    clauselens(dir).arg("ingest").arg(&file).assert().success();
    DocumentId::fingerprint(CONTRACT.as_bytes())
}

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("clauselens")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ingest"))
        .stdout(predicate::str::contains("query"))
        .stdout(predicate::str::contains("records"));
}

#[test]
fn test_ingest_prints_fingerprint() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("contract.txt");
    fs::write(&file, CONTRACT).unwrap();
    let id = DocumentId::fingerprint(CONTRACT.as_bytes());

    clauselens(&dir)
        .arg("ingest")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::diff(format!("{}\n", id)));

    let stored = dir.path().join("store").join("texts").join(format!("{}.txt", id));
    assert_eq!(fs::read_to_string(stored).unwrap(), CONTRACT);
}

#[test]
fn test_ingest_missing_file_fails() {
    let dir = TempDir::new().unwrap();

    clauselens(&dir)
        .arg("ingest")
        .arg(dir.path().join("absent.txt"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}

#[test]
fn test_status_after_ingest_is_unprocessed() {
    let dir = TempDir::new().unwrap();
    let id = ingest(&dir);

    clauselens(&dir)
        .args(["status", id.as_str(), "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"state\": \"unprocessed\""));
}

#[test]
fn test_status_of_unknown_document_fails() {
    let dir = TempDir::new().unwrap();

    clauselens(&dir)
        .args(["status", "0123456789abcdef"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no extracted text found"));
}

#[test]
fn test_query_before_process_fails() {
    let dir = TempDir::new().unwrap();
    let id = ingest(&dir);

    clauselens(&dir)
        .args(["query", id.as_str(), "When must payment occur?", "-k", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("process the document first"));
}

#[test]
fn test_records_before_process_fails() {
    let dir = TempDir::new().unwrap();
    let id = ingest(&dir);

    clauselens(&dir)
        .args(["records", id.as_str(), "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no index found"));
}

#[test]
fn test_invalid_config_is_reported() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.toml");
    fs::write(&config, "[chunking]\nmax_tokens = 0\n").unwrap();

    clauselens(&dir)
        .arg("--config")
        .arg(&config)
        .args(["status", "abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("chunking.max_tokens"));
}
