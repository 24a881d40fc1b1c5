//! CLI tests: run the `eqa` binary against configs in temp directories.
//! Only commands that need no running backend are exercised here.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn eqa_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_eqa"))
}

fn setup_test_env(embedding: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("mail/Ken")).unwrap();

    let config_content = format!(
        r#"[index]
persist_dir = "{root}/db"
source_dir = "{root}/mail"

[embedding]
{embedding}

[[users]]
name = "Ken"
mailbox = "kenneth.lay@enron.com"

[[users]]
name = "Pete"
mailbox = "pete.davis@enron.com"
"#,
        root = root.display(),
        embedding = embedding,
    );

    let config_path = config_dir.join("eqa.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

/// Ollama never gets called when there is nothing to embed.
const OLLAMA: &str = r#"provider = "ollama"
model = "nomic-embed-text"
dims = 768
url = "http://127.0.0.1:9""#;

fn run_eqa(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = eqa_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run eqa binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_help_lists_commands() {
    let output = Command::new(eqa_binary()).arg("--help").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    for command in ["ingest", "users", "keywords", "context", "ask", "chat", "serve"] {
        assert!(stdout.contains(command), "help is missing {}", command);
    }
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_eqa(&tmp.path().join("nope.toml"), &["users"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_config_fails() {
    let (_tmp, config_path) = setup_test_env("provider = \"word2vec\"");
    let (_, stderr, success) = run_eqa(&config_path, &["users"]);
    assert!(!success);
    assert!(stderr.contains("Unknown embedding provider"));
}

#[test]
fn test_users_lists_status() {
    let (_tmp, config_path) = setup_test_env(OLLAMA);
    let (stdout, stderr, success) = run_eqa(&config_path, &["users"]);
    assert!(success, "users failed: {}", stderr);

    let ken = stdout.lines().find(|l| l.starts_with("Ken")).unwrap();
    assert!(ken.contains("kenneth.lay@enron.com"));
    assert!(ken.contains("yes"));
    let pete = stdout.lines().find(|l| l.starts_with("Pete")).unwrap();
    assert!(!pete.contains("yes"));
}

#[test]
fn test_ingest_skips_users_without_mail() {
    let (_tmp, config_path) = setup_test_env(OLLAMA);
    let (stdout, stderr, success) = run_eqa(&config_path, &["ingest", "--progress", "off"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Ken"));
    assert!(stdout.contains("skipped: no loadable documents"));
}

#[test]
fn test_ingest_unknown_user_fails() {
    let (_tmp, config_path) = setup_test_env(OLLAMA);
    let (_, stderr, success) = run_eqa(&config_path, &["ingest", "--user", "Jeff"]);
    assert!(!success);
    assert!(stderr.contains("unknown user: Jeff"));
}

#[test]
fn test_ingest_requires_embedding_provider() {
    let (_tmp, config_path) = setup_test_env("provider = \"disabled\"");
    let (_, stderr, success) = run_eqa(&config_path, &["ingest"]);
    assert!(!success);
    assert!(stderr.contains("Embedding provider is disabled"));
}

#[test]
fn test_ask_rejects_bad_date() {
    let (_tmp, config_path) = setup_test_env(OLLAMA);
    let (_, _, success) = run_eqa(
        &config_path,
        &["ask", "When?", "--user", "Ken", "--since", "yesterday"],
    );
    assert!(!success);
}
