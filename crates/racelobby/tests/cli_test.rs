//! Integration tests for the `racelobby` CLI binary.
//!
//! Argument parsing, completions, config handling and file lists. Nothing
//! here talks to a lobby server.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `racelobby` binary with env isolation.
///
/// Clears the `RACELOBBY_*` overrides and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn racelobby_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("racelobby");
    cmd.env("HOME", "/tmp/racelobby-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/racelobby-cli-test-nonexistent")
        .env("XDG_DATA_HOME", "/tmp/racelobby-cli-test-nonexistent")
        .env_remove("RACELOBBY_CONFIG")
        .env_remove("RACELOBBY_LOBBY_URL")
        .env_remove("RACELOBBY_LISTS_DIR")
        .env_remove("RACELOBBY_TIMEOUT")
        .env_remove("RUST_LOG");
    cmd
}

fn with_lists(dir: &Path) -> assert_cmd::Command {
    let mut cmd = racelobby_cmd();
    cmd.arg("--lists-dir").arg(dir);
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = racelobby_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    racelobby_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("racing game servers")
            .and(predicate::str::contains("scan"))
            .and(predicate::str::contains("lists"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    racelobby_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("racelobby"));
}

#[test]
fn test_invalid_subcommand() {
    let output = racelobby_cmd().arg("launch").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("unrecognized subcommand"));
}

#[test]
fn test_invalid_output_format() {
    racelobby_cmd()
        .args(["-o", "xml", "config", "path"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_prefer_free_requires_ping() {
    racelobby_cmd()
        .args(["scan", "--prefer-free"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--ping"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    racelobby_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    racelobby_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("racelobby"));
}

#[test]
fn test_completions_fish() {
    racelobby_cmd()
        .args(["completions", "fish"])
        .assert()
        .success()
        .stdout(predicate::str::contains("racelobby"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_flag() {
    racelobby_cmd()
        .args(["config", "path", "--config", "/tmp/elsewhere/racelobby.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/tmp/elsewhere/racelobby.toml"));
}

#[test]
fn test_config_show_without_file_uses_defaults() {
    racelobby_cmd()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("lobby_url").and(predicate::str::contains("9456")));
}

#[test]
fn test_config_init_then_show() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    racelobby_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config written"));
    assert!(path.exists());

    racelobby_cmd()
        .arg("--config")
        .arg(&path)
        .args(["-o", "json", "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"lobby_url\""));

    // A second init refuses to clobber the file.
    racelobby_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("already exists"));

    racelobby_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

#[test]
fn test_invalid_config_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "lobby_url = \"not a url\"\n").unwrap();

    racelobby_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "show"])
        .assert()
        .code(2);
}

// ── Lists ───────────────────────────────────────────────────────────

#[test]
fn test_lists_show_empty_dir() {
    let dir = tempfile::tempdir().unwrap();
    with_lists(dir.path())
        .args(["-o", "json", "lists", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn test_lists_add_show_remove() {
    let dir = tempfile::tempdir().unwrap();

    with_lists(dir.path())
        .args(["lists", "add", "favourites", "10.0.0.5:8081", "--name", "Club Night"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added 10.0.0.5:8081 to favourites"));

    let file = std::fs::read_to_string(dir.path().join("favourites.txt")).unwrap();
    assert!(file.contains("10.0.0.5:8081;Club Night"), "file was:\n{file}");

    with_lists(dir.path())
        .args(["lists", "add", "favourites", "10.0.0.5:8081"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already in favourites"));

    with_lists(dir.path())
        .args(["-o", "plain", "lists", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("favourites"));

    with_lists(dir.path())
        .args(["-o", "plain", "lists", "show", "favourites"])
        .assert()
        .success()
        .stdout(predicate::str::contains("10.0.0.5:8081"));

    with_lists(dir.path())
        .args(["lists", "rm", "favourites", "10.0.0.5:8081"])
        .assert()
        .success();

    let file = std::fs::read_to_string(dir.path().join("favourites.txt")).unwrap();
    assert!(!file.contains("10.0.0.5:8081"));
}

#[test]
fn test_lists_show_unknown_list() {
    let dir = tempfile::tempdir().unwrap();
    with_lists(dir.path())
        .args(["lists", "show", "friends"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("friends"));
}

#[test]
fn test_lists_remove_missing_server() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("friends.txt"), "10.0.0.9:8081\n").unwrap();

    with_lists(dir.path())
        .args(["lists", "remove", "friends", "10.0.0.1:8081"])
        .assert()
        .code(4);
}

#[test]
fn test_lists_add_rejects_separator() {
    let dir = tempfile::tempdir().unwrap();
    with_lists(dir.path())
        .args(["lists", "add", "favourites", "a;b"])
        .assert()
        .code(2);
    assert!(!dir.path().join("favourites.txt").exists());
}
