use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn path_str(path: &Path) -> &str {
    path.to_str()
        .unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn ct_command(data_dir: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_ct"));
    command
        .env_remove("COURSETRACK_DATA_DIR")
        .env_remove("RUST_LOG")
        .arg("--data-dir")
        .arg(data_dir);
    command
}

fn run_ct<I, S>(data_dir: &Path, args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    ct_command(data_dir)
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute ct binary: {err}"))
}

fn run_json<I, S>(data_dir: &Path, args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_ct(data_dir, args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "ct command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn as_bool(value: &Value, key: &str) -> bool {
    value
        .get(key)
        .and_then(Value::as_bool)
        .unwrap_or_else(|| panic!("missing bool field `{key}` in payload: {value}"))
}

fn as_u64(value: &Value, key: &str) -> u64 {
    value
        .get(key)
        .and_then(Value::as_u64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

#[test]
fn toggle_persists_across_invocations() {
    let data_dir = unique_temp_dir("ct-toggle");

    let first = run_json(&data_dir, ["toggle", "algo-hw1"]);
    assert_eq!(as_str(&first, "task_id"), "algo-hw1");
    assert!(as_bool(&first, "is_done"));
    assert!(as_bool(&first, "just_completed"));

    let status = run_json(&data_dir, ["status"]);
    assert_eq!(as_u64(&status, "completed_count"), 1);
    assert_eq!(status["completed_tasks"][0], "algo-hw1");
    assert_eq!(as_u64(&status, "undo_depth"), 0);

    let second = run_json(&data_dir, ["toggle", "algo-hw1"]);
    assert!(!as_bool(&second, "is_done"));

    let status = run_json(&data_dir, ["status"]);
    assert_eq!(as_u64(&status, "completed_count"), 0);
    // History is retained when a task is un-marked.
    assert_eq!(as_u64(&status, "history_entries"), 1);
}

#[test]
fn stats_report_streak_for_today() {
    let data_dir = unique_temp_dir("ct-stats");
    run_json(&data_dir, ["toggle", "t1"]);

    let stats = run_json(&data_dir, ["stats"]);
    assert_eq!(as_u64(&stats, "streak"), 1);
    assert!(as_bool(&stats, "hasCompletedToday"));
    assert_eq!(as_u64(&stats, "completedCount"), 1);
    let weekly = stats["weeklyActivity"]
        .as_array()
        .unwrap_or_else(|| panic!("weeklyActivity should be an array: {stats}"));
    assert_eq!(weekly.len(), 7);
}

#[test]
fn shell_supports_undo_within_one_session() {
    let data_dir = unique_temp_dir("ct-shell");

    let mut child = ct_command(&data_dir)
        .arg("shell")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap_or_else(|err| panic!("failed to spawn ct shell: {err}"));
    {
        let stdin = child
            .stdin
            .as_mut()
            .unwrap_or_else(|| panic!("shell stdin should be piped"));
        stdin
            .write_all(b"toggle a\ntoggle b\nundo\nstatus\nquit\n")
            .unwrap_or_else(|err| panic!("failed to write shell input: {err}"));
    }
    let output = child
        .wait_with_output()
        .unwrap_or_else(|err| panic!("failed to wait for ct shell: {err}"));
    assert!(
        output.status.success(),
        "shell failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let lines: Vec<Value> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| {
            serde_json::from_str(line)
                .unwrap_or_else(|err| panic!("shell line is not JSON: {err}\n{line}"))
        })
        .collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[2]["undone"]["kind"], "mark");
    assert_eq!(lines[2]["undone"]["id"], "b");
    assert_eq!(as_u64(&lines[3], "completed_count"), 1);

    let status = run_json(&data_dir, ["status"]);
    assert_eq!(status["completed_tasks"], serde_json::json!(["a"]));
}

#[test]
fn export_then_import_restores_state() {
    let source = unique_temp_dir("ct-export-src");
    let target = unique_temp_dir("ct-export-dst");
    run_json(&source, ["toggle", "t1"]);
    run_json(&source, ["toggle", "t2"]);

    let backup = source.join("backup.json");
    let exported = run_json(&source, ["export", "--out", path_str(&backup)]);
    assert_eq!(as_u64(&exported, "completed_tasks"), 2);
    assert!(backup.exists());

    let status = run_json(&source, ["status"]);
    assert!(status["last_backup"].is_string());

    let imported = run_json(&target, ["import", "--in", path_str(&backup)]);
    assert_eq!(as_u64(&imported, "completedTasks"), 2);
    assert_eq!(as_u64(&imported, "historyEntries"), 2);

    let status = run_json(&target, ["status"]);
    assert_eq!(status["completed_tasks"], serde_json::json!(["t1", "t2"]));
}

#[test]
fn malformed_import_is_rejected_without_touching_state() {
    let data_dir = unique_temp_dir("ct-bad-import");
    run_json(&data_dir, ["toggle", "keep-me"]);

    let bad = data_dir.join("bad.json");
    fs::write(&bad, r#"{"completedTasks": "not-a-list"}"#)
        .unwrap_or_else(|err| panic!("failed to write bad backup: {err}"));

    let output = run_ct(&data_dir, ["import", "--in", path_str(&bad)]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("VALIDATION_INVALID_FORMAT"));

    let status = run_json(&data_dir, ["status"]);
    assert_eq!(status["completed_tasks"], serde_json::json!(["keep-me"]));
}

#[test]
fn notes_lifecycle() {
    let data_dir = unique_temp_dir("ct-notes");
    let file = data_dir.join("week-1.md");
    fs::write(&file, "# Week 1\nIntro lecture")
        .unwrap_or_else(|err| panic!("failed to write note file: {err}"));

    let added = run_json(
        &data_dir,
        ["notes", "add", "course-1", "--file", path_str(&file), "--name", "Week 1"],
    );
    assert_eq!(as_u64(&added, "count"), 1);
    let item_id = as_str(&added["added"], "id").to_string();
    assert_eq!(as_str(&added["added"], "name"), "Week 1");
    assert_eq!(as_str(&added["added"], "original_file_name"), "week-1.md");

    let listed = run_json(&data_dir, ["notes", "list", "course-1"]);
    assert_eq!(listed["items"][0]["id"], item_id.as_str());

    let summary = run_json(&data_dir, ["notes", "summary"]);
    assert_eq!(as_u64(&summary, "owners"), 1);
    assert_eq!(as_u64(&summary, "total_bytes"), 22);

    let deleted = run_json(&data_dir, ["notes", "delete", "course-1", item_id.as_str()]);
    assert_eq!(as_u64(&deleted, "count"), 0);

    run_json(&data_dir, ["notes", "clear", "course-1"]);
    let summary = run_json(&data_dir, ["notes", "summary"]);
    assert_eq!(as_u64(&summary, "owners"), 0);
}

#[test]
fn missing_note_file_fails_cleanly() {
    let data_dir = unique_temp_dir("ct-notes-missing");
    let output = run_ct(
        &data_dir,
        ["notes", "add", "course-1", "--file", path_str(&data_dir.join("nope.pdf"))],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).trim().is_empty());
}
