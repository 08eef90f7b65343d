//! Subcommand behavior through the real binary.

use std::fs;
use std::path::Path;

use assert_cmd::Command;

const CATALOG_JSON: &str = r#"{
  "clients": [
    {"id": "c1", "name": "Ana Silva", "phone": "555-0100"},
    {"id": "c2", "name": "Bruno Diaz", "phone": null}
  ],
  "products": [
    {"id": "p1", "name": "Queso", "price": 80.0, "variants": [
      {"id": "v1", "name": "Oaxaca", "price": 95.0}
    ]},
    {"id": "p2", "name": "Tortillas", "price": 18.0, "variants": []}
  ]
}"#;

/// A command isolated from the host environment: config, database, and
/// logs all point into the temp directory.
fn comanda(dir: &Path) -> Command {
    let config_path = dir.join("comanda.toml");
    if !config_path.exists() {
        let config = format!(
            "[store]\ndb_path = {:?}\n\n[log]\nlevel = \"warn\"\ndir = {:?}\n",
            dir.join("comanda.db"),
            dir.join("logs"),
        );
        fs::write(&config_path, config).expect("write config");
    }
    let mut cmd = Command::cargo_bin("comanda").expect("binary");
    cmd.env("COMANDA_CONFIG_PATH", &config_path)
        .env_remove("COMANDA_API_KEY")
        .env_remove("GEMINI_API_KEY")
        .env_remove("COMANDA_DB_PATH")
        .env_remove("COMANDA_MODEL")
        .env_remove("COMANDA_BASE_URL")
        .env_remove("COMANDA_SINGLE_CALL")
        .env_remove("COMANDA_LOG_LEVEL");
    cmd
}

fn write_catalog(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("catalog.json");
    fs::write(&path, CATALOG_JSON).expect("write catalog");
    path
}

#[test]
fn help_lists_subcommands() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = comanda(dir.path()).arg("--help").output().expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for subcommand in ["import", "scan", "analyze", "orders"] {
        assert!(stdout.contains(subcommand), "missing {subcommand}: {stdout}");
    }
}

#[test]
fn scan_flags_unknown_words_from_catalog_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let catalog = write_catalog(dir.path());

    let output = comanda(dir.path())
        .args(["scan", "ana quiere 2 quesos y un zumo"])
        .arg("--catalog")
        .arg(&catalog)
        .output()
        .expect("run");
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("unknown words:"), "{stdout}");
    assert!(stdout.contains("[zumo]"), "{stdout}");
    assert!(!stdout.contains("[ana]"), "known client flagged: {stdout}");
}

#[test]
fn scan_reports_clean_message() {
    let dir = tempfile::tempdir().expect("tempdir");
    let catalog = write_catalog(dir.path());

    let output = comanda(dir.path())
        .args(["scan", "ana 2 queso"])
        .arg("--catalog")
        .arg(&catalog)
        .output()
        .expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("no unknown words"), "{stdout}");
}

#[test]
fn import_then_list_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let catalog = write_catalog(dir.path());

    let output = comanda(dir.path())
        .arg("import")
        .arg(&catalog)
        .output()
        .expect("run import");
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("imported 2 clients, 2 products, 1 variants"),
        "{stdout}"
    );

    // Scan now works straight off the database.
    let output = comanda(dir.path())
        .args(["scan", "bruno quiere tortillas"])
        .output()
        .expect("run scan");
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("no unknown words"), "{stdout}");

    let output = comanda(dir.path())
        .args(["orders", "--limit", "5"])
        .output()
        .expect("run orders");
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("no saved orders"), "{stdout}");
}

#[test]
fn import_rejects_malformed_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bad = dir.path().join("broken.json");
    fs::write(&bad, "{ not json").expect("write");

    let output = comanda(dir.path())
        .arg("import")
        .arg(&bad)
        .output()
        .expect("run");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to parse catalog JSON"), "{stderr}");
}

#[test]
fn analyze_refuses_without_api_key() {
    let dir = tempfile::tempdir().expect("tempdir");

    let output = comanda(dir.path())
        .args(["analyze", "ana quiere queso"])
        .output()
        .expect("run");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no API key configured"), "{stderr}");
}
