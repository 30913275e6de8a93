use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn harvest_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("harvest");
    path
}

const ARCHIVE: &str = r#"{"date": "2024-01-01T08:00:00Z", "actor_primary": "Gazette", "title": "Acme hires", "body": "Acme hired a CFO."}
{"date": "2024-01-02T08:00:00Z", "actor_primary": "Gazette", "title": "Acme launch", "body": "The launch went well."}
{"date": "2024-01-03T08:00:00Z", "actor_primary": "Courier", "title": "Weather", "body": "Sunny."}
{"date": "2024-01-04T08:00:00Z", "actor_primary": "Courier", "body": "Acme opens an office."}
"#;

fn setup_test_env(query: &str, extra_sources: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();
    fs::write(data_dir.join("archive.jsonl"), ARCHIVE).unwrap();

    let config_content = format!(
        r#"{extra_sources}
[sources.archive]
type = "jsonl"
path = "{root}/data/archive.jsonl"

[aggregators.site]
type = "posts"
output_dir = "{root}/posts"
checkpoint = {{ backend = "file", path = "{root}/data/last_dates.json" }}

[aggregators.site.query]
{query}
"#,
        root = root.display(),
    );

    let config_path = config_dir.join("harvest.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_harvest(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = harvest_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run harvest binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn post_count(root: &Path) -> usize {
    match fs::read_dir(root.join("posts")) {
        Ok(entries) => entries
            .flatten()
            .filter(|e| e.path().extension().map_or(false, |x| x == "md"))
            .count(),
        Err(_) => 0,
    }
}

const AND_ACME: &str = "type = \"and\"\nkeywords = [\"acme\"]";

#[test]
fn test_run_then_rerun_fetches_nothing_new() {
    let (tmp, config) = setup_test_env(AND_ACME, "");

    let (stdout, stderr, success) = run_harvest(&config, &["run"]);
    assert!(success, "run failed: {}", stderr);
    assert!(stdout.contains("run site"));
    assert!(stdout.contains("jsonl:archive"));
    assert!(stdout.contains("fetched: 3"));
    assert!(stdout.contains("written: 3"));
    assert!(stdout.contains("watermark: 2024-01-04T08:00:00Z"));
    assert!(stdout.trim_end().ends_with("ok"));
    assert_eq!(post_count(tmp.path()), 3);

    let checkpoints = fs::read_to_string(tmp.path().join("data/last_dates.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&checkpoints).unwrap();
    assert_eq!(parsed["jsonl:archive"], "2024-01-04T08:00:00Z");

    let (stdout, stderr, success) = run_harvest(&config, &["run"]);
    assert!(success, "second run failed: {}", stderr);
    assert!(stdout.contains("fetched: 0"));
    assert_eq!(post_count(tmp.path()), 3);
}

#[test]
fn test_full_run_reports_duplicates() {
    let (tmp, config) = setup_test_env(AND_ACME, "");
    let (_, stderr, success) = run_harvest(&config, &["run"]);
    assert!(success, "run failed: {}", stderr);

    let (stdout, stderr, success) = run_harvest(&config, &["run", "--full"]);
    assert!(success, "full run failed: {}", stderr);
    assert!(stdout.contains("run site (full)"));
    assert!(stdout.contains("fetched: 3"));
    assert!(stdout.contains("written: 0"));
    assert!(stdout.contains("duplicates: 3"));
    assert_eq!(post_count(tmp.path()), 3);
}

#[test]
fn test_dry_run_writes_nothing() {
    let (tmp, config) = setup_test_env(AND_ACME, "");

    let (stdout, stderr, success) = run_harvest(&config, &["run", "--dry-run"]);
    assert!(success, "dry run failed: {}", stderr);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("written: 3"));
    assert_eq!(post_count(tmp.path()), 0);

    let (stdout, _, success) = run_harvest(&config, &["checkpoint", "show"]);
    assert!(success);
    assert!(stdout.contains("jsonl:archive: never"));
}

#[test]
fn test_unknown_aggregator_fails() {
    let (_tmp, config) = setup_test_env(AND_ACME, "");
    let (_, stderr, success) = run_harvest(&config, &["run", "--aggregator", "nope"]);
    assert!(!success);
    assert!(stderr.contains("Unknown aggregator"));
}

#[test]
fn test_unsupported_query_isolated_to_one_source() {
    let newsapi = r#"
[sources.press]
type = "newsapi"
api_key = "unused"
base_url = "http://127.0.0.1:9"
"#;
    let (tmp, config) = setup_test_env("type = \"or\"\nkeywords = [\"launch\", \"office\"]", newsapi);

    let (stdout, stderr, success) = run_harvest(&config, &["run"]);
    assert!(success, "run failed: {}", stderr);
    assert!(stdout.contains("newsapi:press FAILED [unsupported_query_kind]"));
    assert!(stdout.contains("fetched: 2"));
    assert_eq!(post_count(tmp.path()), 2);
}

#[test]
fn test_sources_lists_watermarks() {
    let (_tmp, config) = setup_test_env(AND_ACME, "");
    run_harvest(&config, &["run"]);

    let (stdout, stderr, success) = run_harvest(&config, &["sources"]);
    assert!(success, "sources failed: {}", stderr);
    assert!(stdout.contains("SOURCE"));
    let row = stdout
        .lines()
        .find(|l| l.starts_with("jsonl:archive"))
        .expect("row for jsonl:archive");
    assert!(row.contains("site"));
    assert!(row.contains("2024-01-04T08:00:00Z"));
}

#[test]
fn test_sources_does_not_need_api_keys() {
    let newsapi = r#"
[sources.press]
type = "newsapi"
api_key_env = "HARVEST_TEST_KEY_NEVER_SET"
"#;
    let (tmp, config) = setup_test_env(AND_ACME, newsapi);

    let (stdout, stderr, success) = run_harvest(&config, &["sources"]);
    assert!(success, "sources failed: {}", stderr);
    let row = stdout
        .lines()
        .find(|l| l.starts_with("newsapi:press"))
        .expect("row for newsapi:press");
    assert!(row.contains("never"));
    assert!(!tmp.path().join("posts").exists());
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_harvest(&tmp.path().join("nope.toml"), &["run"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
