use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn clm_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("clm");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    fs::write(
        root.join("journal.md"),
        "今日は洗濯した。午後はバグを修正した。",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/claims.sqlite"

[extract]
max_claims = 32

[llm]
api_key_env = "CLM_INTEGRATION_UNSET_KEY"

[retry]
delay_secs = 60
"#,
        root.display()
    );

    let config_path = config_dir.join("clm.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_clm(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = clm_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("CLM_INTEGRATION_UNSET_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run clm binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn json_lines(stdout: &str) -> Vec<serde_json::Value> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap_or_else(|e| panic!("bad JSON {:?}: {}", l, e)))
        .collect()
}

fn add_journal(tmp: &TempDir, config_path: &Path) {
    let file = tmp.path().join("journal.md");
    let (stdout, stderr, success) = run_clm(
        config_path,
        &[
            "doc",
            "add",
            "entry-1",
            "--type",
            "journal",
            "--file",
            file.to_str().unwrap(),
            "--occurred-at",
            "2026-03-01T09:00:00Z",
        ],
    );
    assert!(success, "doc add failed: stdout={}, stderr={}", stdout, stderr);
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_clm(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_clm(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_clm(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_doc_add_is_idempotent() {
    let (tmp, config_path) = setup_test_env();
    run_clm(&config_path, &["init"]);

    add_journal(&tmp, &config_path);
    let file = tmp.path().join("journal.md");
    let (stdout, _, success) = run_clm(
        &config_path,
        &["doc", "add", "entry-1", "--file", file.to_str().unwrap()],
    );
    assert!(success);
    let docs = json_lines(&stdout);
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["entry_id"], "entry-1");
}

#[test]
fn test_redact_needs_no_config() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("missing.toml");

    let (stdout, stderr, success) = run_clm(&missing, &["redact", "--text", "mail me at a.b@example.com"]);
    assert!(success, "redact failed: stderr={}", stderr);
    let result = &json_lines(&stdout)[0];
    assert_eq!(result["risk_level"], "medium");
    assert_eq!(result["redaction_state"], "masked");
    assert!(!result["llm_text"].as_str().unwrap().contains("example.com"));
}

#[test]
fn test_extract_with_rules() {
    let (tmp, config_path) = setup_test_env();
    run_clm(&config_path, &["init"]);
    add_journal(&tmp, &config_path);

    let (stdout, stderr, success) = run_clm(
        &config_path,
        &["extract", "--entry-id", "entry-1", "--extractor", "rules"],
    );
    assert!(success, "extract failed: stdout={}, stderr={}", stdout, stderr);
    let outcome = &json_lines(&stdout)[0];
    assert_eq!(outcome["status"], "succeeded");
    assert_eq!(outcome["extractor"], "rules");
    assert!(outcome["claims_inserted"].as_u64().unwrap() >= 1);
    assert!(outcome["error_code"].is_null());

    let (stdout, _, success) = run_clm(&config_path, &["claims", "--entry-id", "entry-1"]);
    assert!(success);
    let claims = json_lines(&stdout);
    assert_eq!(
        claims.len() as u64,
        outcome["claims_inserted"].as_u64().unwrap()
    );
    assert!(claims.iter().all(|c| c["status"] == "active"));
}

#[test]
fn test_extract_replace_keeps_one_active_set() {
    let (tmp, config_path) = setup_test_env();
    run_clm(&config_path, &["init"]);
    add_journal(&tmp, &config_path);

    let args = [
        "extract",
        "--entry-id",
        "entry-1",
        "--extractor",
        "rules",
        "--replace-existing",
    ];
    let (first, _, _) = run_clm(&config_path, &args);
    let (second, _, success) = run_clm(&config_path, &args);
    assert!(success);
    let first = &json_lines(&first)[0];
    let second = &json_lines(&second)[0];
    assert_eq!(first["claims_inserted"], second["claims_inserted"]);

    let (stdout, _, _) = run_clm(&config_path, &["claims", "--entry-id", "entry-1"]);
    let claims = json_lines(&stdout);
    assert_eq!(claims.len() as u64, second["claims_inserted"].as_u64().unwrap());
    assert!(claims
        .iter()
        .all(|c| c["extraction_id"] == second["extraction_id"]));
}

#[test]
fn test_extract_without_api_key_is_queued() {
    let (tmp, config_path) = setup_test_env();
    run_clm(&config_path, &["init"]);
    add_journal(&tmp, &config_path);

    let (stdout, stderr, success) = run_clm(
        &config_path,
        &["extract", "--entry-id", "entry-1", "--attempt-count", "2"],
    );
    assert!(success, "extract failed: stderr={}", stderr);
    let outcome = &json_lines(&stdout)[0];
    assert_eq!(outcome["status"], "queued");
    assert_eq!(outcome["error_code"], "retryable_error");
    assert_eq!(outcome["attempt_count"], 2);
    assert!(outcome["next_retry_at"].is_string());
    assert!(outcome["error"]
        .as_str()
        .unwrap()
        .contains("CLM_INTEGRATION_UNSET_KEY"));

    let (stdout, _, _) = run_clm(&config_path, &["claims", "--entry-id", "entry-1"]);
    assert!(json_lines(&stdout).is_empty());
}

#[test]
fn test_extract_unknown_entry_is_queued() {
    let (_tmp, config_path) = setup_test_env();
    run_clm(&config_path, &["init"]);

    let (stdout, _, success) = run_clm(
        &config_path,
        &["extract", "--entry-id", "missing", "--extractor", "rules"],
    );
    assert!(success);
    let outcome = &json_lines(&stdout)[0];
    assert_eq!(outcome["status"], "queued");
    assert_eq!(outcome["error"], "fact_document not found");
}

#[test]
fn test_facts_from_document() {
    let (tmp, config_path) = setup_test_env();
    run_clm(&config_path, &["init"]);
    add_journal(&tmp, &config_path);

    let (stdout, stderr, success) = run_clm(&config_path, &["facts", "--entry-id", "entry-1"]);
    assert!(success, "facts failed: stdout={}, stderr={}", stdout, stderr);
    let counts = &json_lines(&stdout)[0];
    assert_eq!(counts["source_type"], "document");

    // Re-running without replace inserts nothing new.
    let (stdout, _, _) = run_clm(&config_path, &["facts", "--entry-id", "entry-1"]);
    let again = &json_lines(&stdout)[0];
    assert_eq!(again["inserted"], 0);
    assert_eq!(again["duplicates"], counts["inserted"]);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("missing.toml");
    let (_, stderr, success) = run_clm(&missing, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
