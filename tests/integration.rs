use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use vault_sync::config::StoreConfig;
use vault_sync::models::StoreRecord;
use vault_sync::store::SqliteStore;

const X1: &str = "---\nid: X1\ngroup: CV\ntitle: Dor torácica\nrisk: high\nseverity: 3\nicd10: [I20.0]\naliases: [angina]\nsearch_terms: [dor no peito]\n---\n\n# Dor torácica\n\n## Red Flags\n\n- [ ] Síncope\n";

fn sync_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("sync");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let cv = root.join("vault/CV - Cardiovascular");
    fs::create_dir_all(&cv).unwrap();
    fs::write(cv.join("X1.md"), X1).unwrap();
    fs::write(root.join("vault/CV - Cardiovascular/00 - Index.md"), "# Cardiovascular\n").unwrap();

    let config_content = format!(
        r#"[vault]
root = "{root}/vault"

[store]
path = "{root}/data/sync.sqlite"
timeout_ms = 2000

[retry]
max_attempts = 2
base_delay_ms = 10

[health]
bind = "127.0.0.1:0"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("sync.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_sync(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = sync_binary();
    let mut command = Command::new(&binary);
    for (key, _) in std::env::vars() {
        if key.starts_with("SYNC_") {
            command.env_remove(key);
        }
    }
    let output = command
        .current_dir(config_path.parent().unwrap())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run sync binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

async fn provision(tmp: &TempDir, records: &[StoreRecord]) {
    let store = SqliteStore::open(&StoreConfig {
        path: tmp.path().join("data/sync.sqlite"),
        ..StoreConfig::default()
    })
    .await
    .unwrap();
    for record in records {
        store.insert(record).await.unwrap();
    }
    store.close().await;
}

fn stale(id: &str, group: &str, title: &str) -> StoreRecord {
    let mut record = StoreRecord::new(id, group, title);
    record.updated_at = chrono::Utc::now() - chrono::Duration::days(1);
    record
}

#[test]
fn test_init_creates_store() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sync(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("sync init"));
    assert!(stdout.contains("ok"));
    assert!(tmp.path().join("data/sync.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_sync(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_sync(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_validate_clean_vault() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sync(&config_path, &["validate"]);
    assert!(success, "validate failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents: 1"));
    assert!(stdout.contains("errors: 0"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_validate_reports_hard_errors() {
    let (tmp, config_path) = setup_test_env();
    let bad = X1.replace("id: X1", "id: X2").replace("I20.0", "i20");
    fs::write(tmp.path().join("vault/CV - Cardiovascular/X2.md"), bad).unwrap();

    let (stdout, _, success) = run_sync(&config_path, &["validate"]);
    assert!(!success, "validate should fail on a hard error");
    assert!(stdout.contains("FAIL"));
    assert!(stdout.contains("icd10"));
}

#[test]
fn test_validate_never_writes() {
    let (tmp, config_path) = setup_test_env();
    let path = tmp.path().join("vault/CV - Cardiovascular/X1.md");
    run_sync(&config_path, &["validate"]);
    assert_eq!(fs::read_to_string(path).unwrap(), X1);
    assert!(!tmp.path().join("data/sync.sqlite").exists());
}

#[tokio::test]
async fn test_pull_then_pull_again() {
    let (tmp, config_path) = setup_test_env();
    provision(&tmp, &[stale("X1", "CV", "old")]).await;

    let (stdout, stderr, success) = run_sync(&config_path, &["pull"]);
    assert!(success, "pull failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("updated: 1"));
    assert!(stdout.contains("skipped: 0"));
    assert!(stdout.contains("conflicts: 0"));
    assert!(stdout.contains("ok"));

    let (stdout, _, success) = run_sync(&config_path, &["pull"]);
    assert!(success);
    assert!(stdout.contains("updated: 0"));
    assert!(stdout.contains("skipped: 1"));
}

#[tokio::test]
async fn test_pull_exits_non_zero_on_document_errors() {
    let (tmp, config_path) = setup_test_env();
    provision(&tmp, &[stale("X1", "CV", "old")]).await;
    let broken = X1.replace("id: X1", "id: X3").replace("risk: high", "risk: critical");
    fs::write(tmp.path().join("vault/CV - Cardiovascular/X3.md"), broken).unwrap();

    let (stdout, _, success) = run_sync(&config_path, &["pull"]);
    assert!(!success);
    assert!(stdout.contains("updated: 1"));
    assert!(stdout.contains("errors: 1"));
}

#[tokio::test]
async fn test_pull_single_path() {
    let (tmp, config_path) = setup_test_env();
    provision(&tmp, &[stale("X1", "CV", "old")]).await;
    let path = tmp.path().join("vault/CV - Cardiovascular/X1.md");

    let (stdout, stderr, success) = run_sync(&config_path, &["pull", path.to_str().unwrap()]);
    assert!(success, "pull failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents: 1"));
    assert!(stdout.contains("updated: 1"));
}

#[tokio::test]
async fn test_pull_path_flag() {
    let (tmp, config_path) = setup_test_env();
    provision(&tmp, &[stale("X1", "CV", "old"), stale("X2", "CV", "other")]).await;
    let other = X1.replace("id: X1", "id: X2");
    fs::write(tmp.path().join("vault/CV - Cardiovascular/X2.md"), other).unwrap();
    let path = tmp.path().join("vault/CV - Cardiovascular/X1.md");

    let flag = format!("--path={}", path.display());
    let (stdout, stderr, success) = run_sync(&config_path, &["pull", &flag]);
    assert!(success, "pull failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents: 1"));
    assert!(stdout.contains("updated: 1"));

    let dir = tmp.path().join("vault/CV - Cardiovascular");
    let (stdout, _, success) = run_sync(&config_path, &["pull", "--path", dir.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("documents: 2"));
    assert!(stdout.contains("updated: 1"));
    assert!(stdout.contains("skipped: 1"));
}

#[tokio::test]
async fn test_push_writes_new_document() {
    let (tmp, config_path) = setup_test_env();
    let mut record = stale("GI4", "GI", "Dor abdominal");
    record.icd10_codes = vec!["R10.4".into()];
    provision(&tmp, &[record]).await;

    let (stdout, stderr, success) = run_sync(&config_path, &["push"]);
    assert!(success, "push failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("records: 1"));
    assert!(stdout.contains("updated: 1"));
    assert!(stdout.contains("checkpoint:"));

    let written = tmp.path().join("vault/GI - Digestivo/GI4.md");
    let text = fs::read_to_string(written).unwrap();
    assert!(text.contains("id: GI4"));
    assert!(text.contains("R10.4"));

    // checkpoint: nothing new on the second run
    let (stdout, _, success) = run_sync(&config_path, &["push"]);
    assert!(success);
    assert!(stdout.contains("records: 0"));
}

#[tokio::test]
async fn test_push_since_and_full() {
    let (tmp, config_path) = setup_test_env();
    provision(&tmp, &[stale("GI4", "GI", "Dor abdominal")]).await;

    let (stdout, _, success) = run_sync(&config_path, &["push", "--since", "2999-01-01"]);
    assert!(success);
    assert!(stdout.contains("records: 0"));

    let (stdout, _, success) = run_sync(&config_path, &["push", "--full", "--limit", "10"]);
    assert!(success);
    assert!(stdout.contains("records: 1"));
}

#[test]
fn test_push_rejects_bad_since() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_sync(&config_path, &["push", "--since", "yesterday"]);
    assert!(!success);
    assert!(!stderr.is_empty());
}

#[test]
fn test_invalid_config_fails() {
    let (_tmp, config_path) = setup_test_env();
    fs::write(&config_path, "[retry]\nmax_attempts = 0\n").unwrap();
    let (_, _, success) = run_sync(&config_path, &["validate"]);
    assert!(!success);
}
